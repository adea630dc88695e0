use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use driftwatch_engine::issues::{IssueTracker, JiraTracker, NoTracker};
use driftwatch_engine::Backend;
use driftwatch_gerrit::GerritHttp;

/// One code-review backend from `gerrit.json`.
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Whether the device manifest projects live on this backend.
    #[serde(default)]
    pub hosts_catalog: bool,
}

#[derive(Debug, Deserialize)]
pub struct TrackerConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Credentials file: a list of backends plus an optional issue tracker.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub backends: Vec<BackendConfig>,
    pub tracker: Option<TrackerConfig>,
}

impl AppConfig {
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join("gerrit.json");
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        if config.backends.is_empty() {
            bail!("{} configures no backends", path.display());
        }
        if config.backends.iter().filter(|b| b.hosts_catalog).count() > 1 {
            bail!("{} marks more than one backend as the catalog host", path.display());
        }
        Ok(config)
    }

    pub fn build_backends(&self) -> Vec<Backend> {
        self.backends
            .iter()
            .map(|b| {
                let client = match (&b.username, &b.password) {
                    (Some(user), Some(pass)) => GerritHttp::with_basic_auth(&b.url, user, pass),
                    _ => GerritHttp::new(&b.url),
                };
                Backend::new(&b.id, Arc::new(client), b.hosts_catalog)
            })
            .collect()
    }

    pub fn build_tracker(&self) -> Arc<dyn IssueTracker> {
        match &self.tracker {
            Some(t) => Arc::new(JiraTracker::new(&t.url, &t.username, &t.password)),
            None => Arc::new(NoTracker),
        }
    }
}
