use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

/// Subset of Gerrit's ChangeInfo entity, with the current revision and its
/// commit message requested via `o=CURRENT_REVISION&o=CURRENT_COMMIT`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeInfo {
    pub change_id: String,
    pub project: String,
    pub branch: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub current_revision: Option<String>,
    #[serde(default)]
    pub revisions: HashMap<String, RevisionInfo>,
    #[serde(default)]
    pub submitted: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
}

impl ChangeInfo {
    pub fn commit_message(&self) -> Option<&str> {
        let revision = self.current_revision.as_deref()?;
        let commit = self.revisions.get(revision)?.commit.as_ref()?;
        Some(&commit.message)
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        parse_gerrit_timestamp(self.submitted.as_deref()?)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        parse_gerrit_timestamp(self.updated.as_deref()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevisionInfo {
    #[serde(default)]
    pub commit: Option<CommitInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitInfo {
    #[serde(default)]
    pub message: String,
}

/// Gerrit timestamps look like `2024-03-01 10:15:00.000000000` in UTC.
pub fn parse_gerrit_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// One page of a gitiles `+log` listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogPage {
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    pub commit: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: Option<GitPerson>,
    #[serde(default)]
    pub committer: Option<GitPerson>,
}

impl LogEntry {
    pub fn author_name(&self) -> Option<&str> {
        self.author.as_ref().map(|p| p.name.as_str())
    }

    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        let raw = &self.committer.as_ref()?.time;
        DateTime::parse_from_str(raw, "%a %b %d %H:%M:%S %Y %z")
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitPerson {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub time: String,
}

/// One entry of a `/projects/{name}/tags` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct TagInfo {
    #[serde(rename = "ref")]
    pub ref_name: String,
    /// Peeled target of an annotated tag.
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
}

impl TagInfo {
    pub fn short_name(&self) -> &str {
        self.ref_name
            .strip_prefix("refs/tags/")
            .unwrap_or(&self.ref_name)
    }

    /// Commit the tag points at: the peeled object for annotated tags,
    /// otherwise the ref revision itself.
    pub fn commit(&self) -> Option<&str> {
        self.object.as_deref().or(self.revision.as_deref())
    }
}

/// Response of the `/changes/{id}/in` membership endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MembershipInfo {
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}
