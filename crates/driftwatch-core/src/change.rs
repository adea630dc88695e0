use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type BackendId = String;

/// A merged logical change observed on one (repository, ref).
///
/// `change_id` is the change fingerprint: it survives cherry-picks and
/// rebases and is unique within a single (repository, ref) scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub change_id: String,
    pub project: String,
    /// Branch, variant-qualified branch or release tag the change was
    /// observed on.
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub subject: String,
    pub merge_time: DateTime<Utc>,
    pub issues: Vec<String>,
    pub is_revert: bool,
}

/// Final output of a comparison run. Partial completion is a normal,
/// reportable outcome: `error_repos` lists repositories that could not be
/// reconciled while every other repository's results are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub by_backend: BTreeMap<BackendId, Vec<Change>>,
    pub error_repos: Vec<String>,
}

impl ComparisonReport {
    /// Stable ascending sort by merge time within every backend partition.
    pub fn sort_by_merge_time(&mut self) {
        for changes in self.by_backend.values_mut() {
            changes.sort_by_key(|c| c.merge_time);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_backend.values().all(|c| c.is_empty())
    }

    pub fn change_count(&self) -> usize {
        self.by_backend.values().map(|c| c.len()).sum()
    }

    /// Deduplicated roll-up of every issue key in the report, in output order.
    pub fn all_issues(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for change in self.by_backend.values().flatten() {
            for issue in &change.issues {
                if !seen.contains(issue) {
                    seen.push(issue.clone());
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn change(id: &str, at: i64) -> Change {
        Change {
            change_id: id.to_string(),
            project: "platform/app".to_string(),
            branch: "stable".to_string(),
            commit: None,
            author: None,
            subject: format!("subject for {id}"),
            merge_time: Utc.timestamp_opt(at, 0).unwrap(),
            issues: vec![format!("TICKET-{}", at)],
            is_revert: false,
        }
    }

    #[test]
    fn sort_is_ascending_by_merge_time() {
        let mut report = ComparisonReport::default();
        report
            .by_backend
            .insert("primary".into(), vec![change("c3", 30), change("c1", 10), change("c2", 20)]);
        report.sort_by_merge_time();
        let ids: Vec<&str> = report.by_backend["primary"]
            .iter()
            .map(|c| c.change_id.as_str())
            .collect();
        assert_eq!(ids, ["c1", "c2", "c3"]);
    }

    #[test]
    fn all_issues_deduplicates() {
        let mut report = ComparisonReport::default();
        let mut a = change("c1", 10);
        a.issues = vec!["AAA-1".into(), "BBB-2".into()];
        let mut b = change("c2", 20);
        b.issues = vec!["BBB-2".into(), "CCC-3".into()];
        report.by_backend.insert("primary".into(), vec![a, b]);
        assert_eq!(report.all_issues(), ["AAA-1", "BBB-2", "CCC-3"]);
    }

    #[test]
    fn empty_report() {
        let mut report = ComparisonReport::default();
        report.by_backend.insert("primary".into(), Vec::new());
        assert!(report.is_empty());
        assert_eq!(report.change_count(), 0);
    }
}
