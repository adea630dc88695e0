use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use async_trait::async_trait;

use crate::client::GerritClient;
use crate::error::GerritError;
use crate::types::{ChangeInfo, LogPage, MembershipInfo, TagInfo};

/// Gerrit and gitiles prepend this to every JSON body as an XSSI guard.
const XSSI_PREFIX: &str = ")]}'";

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// REST implementation of [`GerritClient`] over reqwest.
///
/// Authenticated requests go through Gerrit's `/a` prefix with basic auth.
/// Transport failures and 5xx responses are retried with exponential backoff
/// before surfacing as `GerritError::Transport`/`Http`.
pub struct GerritHttp {
    base_url: String,
    client: reqwest::Client,
    auth: Option<(String, String)>,
}

impl GerritHttp {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            auth: None,
        }
    }

    pub fn with_basic_auth(base_url: &str, username: &str, password: &str) -> Self {
        let mut this = Self::new(base_url);
        this.auth = Some((username.to_string(), password.to_string()));
        this
    }

    /// REST endpoints move under `/a` once authenticated. Gitiles plugin
    /// paths stay where they are.
    fn rest_url(&self, path: &str) -> String {
        match &self.auth {
            Some(_) => format!("{}/a{path}", self.base_url),
            None => format!("{}{path}", self.base_url),
        }
    }

    fn plugin_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_text(&self, url: &str) -> Result<String, GerritError> {
        let mut attempt = 0;
        loop {
            match self.get_text_once(url).await {
                Ok(body) => return Ok(body),
                Err(err) if attempt < MAX_RETRIES && is_retryable(&err) => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    debug!("retrying {url} after {err} (attempt {})", attempt + 1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn get_text_once(&self, url: &str) -> Result<String, GerritError> {
        let mut builder = self.client.get(url);
        if let Some((user, pass)) = &self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| GerritError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GerritError::Transport(format!("read body: {e}")))?;
        match status {
            s if s.is_success() => Ok(body),
            StatusCode::UNAUTHORIZED => Err(GerritError::Auth(url.to_string())),
            StatusCode::NOT_FOUND => Err(GerritError::NotFound(url.to_string())),
            s => Err(GerritError::Http {
                status: s.as_u16(),
                message: body.chars().take(200).collect(),
            }),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, GerritError> {
        let body = self.get_text(url).await?;
        let trimmed = body
            .strip_prefix(XSSI_PREFIX)
            .unwrap_or(&body)
            .trim_start_matches(['\n', '\r']);
        serde_json::from_str(trimmed).map_err(|e| GerritError::Decode(format!("{url}: {e}")))
    }
}

fn is_retryable(err: &GerritError) -> bool {
    match err {
        GerritError::Transport(_) => true,
        GerritError::Http { status, .. } => *status >= 500,
        _ => false,
    }
}

/// Gerrit wants project names with slashes percent-encoded in REST paths.
fn encode_segment(raw: &str) -> String {
    raw.replace('/', "%2F")
}

/// Query terms are joined with `+`, which Gerrit decodes as a space.
fn encode_query(raw: &str) -> String {
    raw.replace(' ', "+")
}

fn looks_like_commit(ref_name: &str) -> bool {
    ref_name.len() == 40 && ref_name.bytes().all(|b| b.is_ascii_hexdigit())
}

#[async_trait]
impl GerritClient for GerritHttp {
    async fn list_changes(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChangeInfo>, GerritError> {
        let url = self.rest_url(&format!(
            "/changes/?q={}&o=CURRENT_REVISION&o=CURRENT_COMMIT&o=MESSAGES&n={limit}&S={offset}",
            encode_query(query)
        ));
        self.get_json(&url).await
    }

    async fn check_reachable(
        &self,
        project: &str,
        branch: &str,
        change_id: &str,
    ) -> Result<bool, GerritError> {
        let url = self.rest_url(&format!(
            "/changes/{}~{}~{}/in",
            encode_segment(project),
            encode_segment(branch),
            change_id
        ));
        let membership: MembershipInfo = self.get_json(&url).await?;
        Ok(membership.branches.iter().any(|b| b == branch))
    }

    async fn list_commit_log(
        &self,
        project: &str,
        ref_name: &str,
        page_token: Option<&str>,
    ) -> Result<LogPage, GerritError> {
        let mut url = self.plugin_url(&format!(
            "/plugins/gitiles/{project}/+log/{ref_name}?format=JSON"
        ));
        if let Some(token) = page_token {
            url.push_str(&format!("&s={token}"));
        }
        self.get_json(&url).await
    }

    async fn list_tags(&self, project: &str, pattern: &str) -> Result<Vec<TagInfo>, GerritError> {
        let url = self.rest_url(&format!(
            "/projects/{}/tags?m={}",
            encode_segment(project),
            pattern
        ));
        self.get_json(&url).await
    }

    async fn get_file_content(
        &self,
        project: &str,
        ref_name: &str,
        path: &str,
    ) -> Result<String, GerritError> {
        // File content can be anchored at a branch tip or at a tag's commit.
        let anchor = if looks_like_commit(ref_name) {
            format!("commits/{ref_name}")
        } else {
            format!("branches/{}", encode_segment(ref_name))
        };
        let url = self.rest_url(&format!(
            "/projects/{}/{anchor}/files/{}/content",
            encode_segment(project),
            encode_segment(path)
        ));
        let body = self.get_text(&url).await?;
        // Gerrit ships file content base64-encoded, wrapped at 76 columns.
        let packed: Vec<u8> = body
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let decoded = BASE64
            .decode(&packed)
            .map_err(|e| GerritError::Decode(format!("{url}: {e}")))?;
        String::from_utf8(decoded).map_err(|e| GerritError::Decode(format!("{url}: {e}")))
    }

    async fn query_by_commit(
        &self,
        project: &str,
        commit: &str,
    ) -> Result<Option<ChangeInfo>, GerritError> {
        let url = self.rest_url(&format!(
            "/changes/?q=commit:{commit}+project:{project}+status:merged"
        ));
        let mut changes: Vec<ChangeInfo> = self.get_json(&url).await?;
        if changes.len() > 1 {
            warn!("commit {commit} maps to {} merged changes", changes.len());
        }
        if changes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(changes.remove(0)))
        }
    }
}
