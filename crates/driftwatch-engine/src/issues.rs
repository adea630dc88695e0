use async_trait::async_trait;
use tracing::debug;

/// Parent-ticket lookup against the issue tracker.
///
/// Strictly best effort: a change report with unresolved child tickets is
/// still correct, so every lookup failure collapses to `None`.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn parent_key(&self, key: &str) -> Option<String>;
}

/// Disabled enrichment.
pub struct NoTracker;

#[async_trait]
impl IssueTracker for NoTracker {
    async fn parent_key(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Jira REST implementation of [`IssueTracker`].
pub struct JiraTracker {
    base_url: String,
    client: reqwest::Client,
    username: String,
    password: String,
}

impl JiraTracker {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

#[async_trait]
impl IssueTracker for JiraTracker {
    async fn parent_key(&self, key: &str) -> Option<String> {
        let url = format!("{}/rest/api/2/issue/{key}?fields=parent", self.base_url);
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            debug!("issue lookup for {key} returned {}", resp.status());
            return None;
        }
        let body: serde_json::Value = resp.json().await.ok()?;
        body.get("fields")?
            .get("parent")?
            .get("key")?
            .as_str()
            .map(str::to_string)
    }
}

/// Replace every key that has a parent ticket with the parent, preserving
/// order and deduplicating the result.
pub async fn enrich_issue_keys(tracker: &dyn IssueTracker, keys: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        let resolved = tracker.parent_key(&key).await.unwrap_or(key);
        if !out.contains(&resolved) {
            out.push(resolved);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapTracker(HashMap<String, String>);

    #[async_trait]
    impl IssueTracker for MapTracker {
        async fn parent_key(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    #[tokio::test]
    async fn children_collapse_onto_parent() {
        let tracker = MapTracker(HashMap::from([
            ("CPE-10".to_string(), "CPE-1".to_string()),
            ("CPE-11".to_string(), "CPE-1".to_string()),
        ]));
        let enriched = enrich_issue_keys(
            &tracker,
            vec!["CPE-10".into(), "CPE-11".into(), "PLAT-5".into()],
        )
        .await;
        assert_eq!(enriched, ["CPE-1", "PLAT-5"]);
    }

    #[tokio::test]
    async fn no_tracker_passes_keys_through() {
        let enriched = enrich_issue_keys(&NoTracker, vec!["CPE-10".into()]).await;
        assert_eq!(enriched, ["CPE-10"]);
    }
}
