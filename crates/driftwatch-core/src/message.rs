use std::sync::OnceLock;

use regex::Regex;

const CHANGE_ID_MARKER: &str = "Change-Id: ";

fn issue_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z][A-Za-z0-9]*-\d+").expect("issue key pattern"))
}

/// Ticket identifiers found in a commit message, deduplicated, in order of
/// first appearance.
pub fn issue_keys(text: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for m in issue_key_re().find_iter(text) {
        let key = m.as_str().to_string();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// A change is a revert iff its subject begins with the revert marker and is
/// not itself a revert of a revert (the double negation cancels).
pub fn is_revert(subject: &str) -> bool {
    subject.starts_with("Revert") && !subject.contains("Revert Revert")
}

/// One `Change-Id:` trailer extracted from a commit message, paired with the
/// issue keys it is associated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    pub change_id: String,
    pub issues: Vec<String>,
}

/// Extract every `Change-Id:` trailer from a commit message.
///
/// A single message may carry several trailers (squashed or merged commits).
/// Each trailer after the first is associated with the issue keys found in
/// the span since the previous trailer line, falling back to the
/// whole-message key set when that span has none. Messages with a single
/// trailer always get the whole-message key set.
pub fn change_id_trailers(message: &str) -> Vec<Trailer> {
    let positions: Vec<usize> = message
        .match_indices(CHANGE_ID_MARKER)
        .map(|(i, _)| i)
        .collect();
    if positions.is_empty() {
        return Vec::new();
    }
    let multi = positions.len() > 1;
    let whole_message_keys = issue_keys(message);

    let mut trailers = Vec::with_capacity(positions.len());
    let mut span_start = 0;
    for start in positions {
        let value_start = start + CHANGE_ID_MARKER.len();
        let line_end = message[value_start..]
            .find('\n')
            .map(|i| value_start + i)
            .unwrap_or(message.len());
        let change_id = message[value_start..line_end].trim().to_string();
        if change_id.is_empty() {
            continue;
        }
        let issues = if multi {
            let span = issue_keys(&message[span_start..line_end]);
            if span.is_empty() {
                whole_message_keys.clone()
            } else {
                span
            }
        } else {
            whole_message_keys.clone()
        };
        trailers.push(Trailer { change_id, issues });
        span_start = (line_end + 1).min(message.len());
    }
    trailers
}
