use async_trait::async_trait;

use crate::error::GerritError;
use crate::types::{ChangeInfo, LogPage, TagInfo};

/// Abstraction over the code-review service consumed by the reconciliation
/// engines.
///
/// `GerritHttp` is the production implementation; `MockGerrit` backs the
/// engine tests. Every method may suspend; nothing else in the engines does.
#[async_trait]
pub trait GerritClient: Send + Sync {
    /// Merged-change query, strictly ordered by descending submit time (a
    /// service invariant the branch engine's early exit relies on).
    async fn list_changes(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChangeInfo>, GerritError>;

    /// Whether a change is reachable from `branch` in `project`.
    async fn check_reachable(
        &self,
        project: &str,
        branch: &str,
        change_id: &str,
    ) -> Result<bool, GerritError>;

    /// One page of the gitiles commit log for a ref, oldest-last.
    async fn list_commit_log(
        &self,
        project: &str,
        ref_name: &str,
        page_token: Option<&str>,
    ) -> Result<LogPage, GerritError>;

    /// Tags of `project` whose name contains `pattern`.
    async fn list_tags(&self, project: &str, pattern: &str) -> Result<Vec<TagInfo>, GerritError>;

    /// Decoded file content at a branch tip or commit.
    async fn get_file_content(
        &self,
        project: &str,
        ref_name: &str,
        path: &str,
    ) -> Result<String, GerritError>;

    /// First merged change of `project` associated with a commit hash, if
    /// any.
    async fn query_by_commit(
        &self,
        project: &str,
        commit: &str,
    ) -> Result<Option<ChangeInfo>, GerritError>;
}
