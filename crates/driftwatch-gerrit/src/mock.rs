use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::client::GerritClient;
use crate::error::GerritError;
use crate::types::{ChangeInfo, GitPerson, LogEntry, LogPage, TagInfo};

/// Scripted in-memory Gerrit used by the engine tests.
///
/// All data is installed up front through the `with_*` builders; failure
/// injection mirrors the error classes the engines have to tolerate.
#[derive(Default)]
pub struct MockGerrit {
    changes: HashMap<String, Vec<ChangeInfo>>,
    changes_fail: HashSet<String>,
    reachable: HashSet<(String, String, String)>,
    reachable_fail: HashSet<(String, String, String)>,
    logs: HashMap<(String, String), Vec<LogEntry>>,
    log_fail: HashSet<(String, String)>,
    log_page_size: usize,
    tags: HashMap<String, Vec<TagInfo>>,
    tag_fail: HashSet<String>,
    files: HashMap<(String, String, String), String>,
    by_commit: HashMap<String, ChangeInfo>,
}

impl MockGerrit {
    pub fn new() -> Self {
        Self {
            log_page_size: 25,
            ..Self::default()
        }
    }

    pub fn with_changes(mut self, query: &str, changes: Vec<ChangeInfo>) -> Self {
        self.changes.insert(query.to_string(), changes);
        self
    }

    /// Make the change listing fail for one query (transport-style, as after
    /// exhausted retries).
    pub fn with_changes_error(mut self, query: &str) -> Self {
        self.changes_fail.insert(query.to_string());
        self
    }

    pub fn with_reachable(mut self, project: &str, branch: &str, change_id: &str) -> Self {
        self.reachable
            .insert((project.into(), branch.into(), change_id.into()));
        self
    }

    /// Make the reachability endpoint fail for one change (404-style).
    pub fn with_reachable_error(mut self, project: &str, branch: &str, change_id: &str) -> Self {
        self.reachable_fail
            .insert((project.into(), branch.into(), change_id.into()));
        self
    }

    pub fn with_log(mut self, project: &str, ref_name: &str, entries: Vec<LogEntry>) -> Self {
        self.logs.insert((project.into(), ref_name.into()), entries);
        self
    }

    pub fn with_log_error(mut self, project: &str, ref_name: &str) -> Self {
        self.log_fail.insert((project.into(), ref_name.into()));
        self
    }

    pub fn with_log_page_size(mut self, size: usize) -> Self {
        self.log_page_size = size.max(1);
        self
    }

    pub fn with_tags(mut self, project: &str, tags: Vec<TagInfo>) -> Self {
        self.tags.insert(project.to_string(), tags);
        self
    }

    pub fn with_tags_error(mut self, project: &str) -> Self {
        self.tag_fail.insert(project.to_string());
        self
    }

    pub fn with_file(mut self, project: &str, ref_name: &str, path: &str, content: &str) -> Self {
        self.files.insert(
            (project.into(), ref_name.into(), path.into()),
            content.to_string(),
        );
        self
    }

    pub fn with_commit_change(mut self, commit: &str, change: ChangeInfo) -> Self {
        self.by_commit.insert(commit.to_string(), change);
        self
    }
}

#[async_trait]
impl GerritClient for MockGerrit {
    async fn list_changes(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChangeInfo>, GerritError> {
        if self.changes_fail.contains(query) {
            return Err(GerritError::Transport("connection reset".to_string()));
        }
        let all = match self.changes.get(query) {
            Some(all) => all,
            None => return Ok(Vec::new()),
        };
        if offset >= all.len() {
            return Ok(Vec::new());
        }
        let end = (offset + limit).min(all.len());
        Ok(all[offset..end].to_vec())
    }

    async fn check_reachable(
        &self,
        project: &str,
        branch: &str,
        change_id: &str,
    ) -> Result<bool, GerritError> {
        let key = (project.to_string(), branch.to_string(), change_id.to_string());
        if self.reachable_fail.contains(&key) {
            return Err(GerritError::NotFound(format!("{project}~{branch}~{change_id}")));
        }
        Ok(self.reachable.contains(&key))
    }

    async fn list_commit_log(
        &self,
        project: &str,
        ref_name: &str,
        page_token: Option<&str>,
    ) -> Result<LogPage, GerritError> {
        let key = (project.to_string(), ref_name.to_string());
        if self.log_fail.contains(&key) {
            return Err(GerritError::NotFound(format!("{project}/+log/{ref_name}")));
        }
        let entries = match self.logs.get(&key) {
            Some(entries) => entries,
            None => return Err(GerritError::NotFound(format!("{project}/+log/{ref_name}"))),
        };
        let start: usize = page_token
            .map(|t| t.parse().unwrap_or(entries.len()))
            .unwrap_or(0);
        let end = (start + self.log_page_size).min(entries.len());
        let next = if end < entries.len() {
            Some(end.to_string())
        } else {
            None
        };
        Ok(LogPage {
            log: entries[start.min(entries.len())..end].to_vec(),
            next,
        })
    }

    async fn list_tags(&self, project: &str, pattern: &str) -> Result<Vec<TagInfo>, GerritError> {
        if self.tag_fail.contains(project) {
            return Err(GerritError::Http {
                status: 500,
                message: "tag listing unavailable".to_string(),
            });
        }
        Ok(self
            .tags
            .get(project)
            .map(|tags| {
                tags.iter()
                    .filter(|t| t.short_name().contains(pattern))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_file_content(
        &self,
        project: &str,
        ref_name: &str,
        path: &str,
    ) -> Result<String, GerritError> {
        self.files
            .get(&(project.to_string(), ref_name.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| GerritError::NotFound(format!("{project}:{ref_name}:{path}")))
    }

    async fn query_by_commit(
        &self,
        project: &str,
        commit: &str,
    ) -> Result<Option<ChangeInfo>, GerritError> {
        Ok(self
            .by_commit
            .get(commit)
            .filter(|c| c.project == project)
            .cloned())
    }
}

/// Build a ChangeInfo the way Gerrit would return it from a merged-change
/// query, with the commit message attached to the current revision.
pub fn change_info(
    change_id: &str,
    project: &str,
    branch: &str,
    message: &str,
    submitted: DateTime<Utc>,
    updated: DateTime<Utc>,
) -> ChangeInfo {
    let revision = format!("rev-{change_id}");
    let commit = crate::types::CommitInfo {
        message: message.to_string(),
    };
    let mut revisions = HashMap::new();
    revisions.insert(
        revision.clone(),
        crate::types::RevisionInfo {
            commit: Some(commit),
        },
    );
    ChangeInfo {
        change_id: change_id.to_string(),
        project: project.to_string(),
        branch: branch.to_string(),
        subject: message.lines().next().unwrap_or_default().to_string(),
        current_revision: Some(revision),
        revisions,
        submitted: Some(gerrit_timestamp(submitted)),
        updated: Some(gerrit_timestamp(updated)),
    }
}

pub fn log_entry(commit: &str, message: &str, committed: DateTime<Utc>) -> LogEntry {
    LogEntry {
        commit: commit.to_string(),
        message: message.to_string(),
        author: Some(GitPerson {
            name: "Author".to_string(),
            time: gitiles_timestamp(committed),
        }),
        committer: Some(GitPerson {
            name: "Committer".to_string(),
            time: gitiles_timestamp(committed),
        }),
    }
}

pub fn tag(name: &str, commit: &str) -> TagInfo {
    TagInfo {
        ref_name: format!("refs/tags/{name}"),
        object: Some(commit.to_string()),
        revision: None,
    }
}

fn gerrit_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

fn gitiles_timestamp(t: DateTime<Utc>) -> String {
    t.format("%a %b %d %H:%M:%S %Y %z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn list_changes_pages_by_offset() {
        let changes: Vec<ChangeInfo> = (0..5)
            .map(|i| {
                change_info(
                    &format!("I{i}"),
                    "platform/app",
                    "stable",
                    "msg",
                    at(100 - i),
                    at(100 - i),
                )
            })
            .collect();
        let mock = MockGerrit::new().with_changes("branch:stable status:merged", changes);
        let page = mock
            .list_changes("branch:stable status:merged", 3, 2)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].change_id, "I3");
        let empty = mock
            .list_changes("branch:stable status:merged", 5, 2)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn log_pagination_round_trip() {
        let entries: Vec<LogEntry> = (0..5)
            .map(|i| log_entry(&format!("c{i}"), "msg", at(100 - i)))
            .collect();
        let mock = MockGerrit::new()
            .with_log_page_size(2)
            .with_log("platform/app", "stable", entries);

        let mut token: Option<String> = None;
        let mut seen = Vec::new();
        loop {
            let page = mock
                .list_commit_log("platform/app", "stable", token.as_deref())
                .await
                .unwrap();
            seen.extend(page.log.iter().map(|e| e.commit.clone()));
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, ["c0", "c1", "c2", "c3", "c4"]);
    }

    #[tokio::test]
    async fn parsed_round_trip_timestamps() {
        let info = change_info("I1", "p", "b", "msg", at(1000), at(2000));
        assert_eq!(info.submitted_at().unwrap(), at(1000));
        let entry = log_entry("c1", "msg", at(3000));
        assert_eq!(entry.committed_at().unwrap(), at(3000));
    }
}
