use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use driftwatch_core::change::{Change, ComparisonReport};
use driftwatch_core::message;
use driftwatch_core::window::{ScanWindow, StopReason, WindowCheck};
use driftwatch_core::CompareError;
use driftwatch_gerrit::types::ChangeInfo;
use driftwatch_gerrit::GerritError;

use crate::catalog::{parse_manifest, DeviceCatalog, ManifestScan};
use crate::issues::{enrich_issue_keys, IssueTracker};
use crate::Backend;

/// How target-side absence is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionMode {
    /// One bulk commit-log scan per repository, membership-tested in memory.
    /// Trades a handful of log pages for N per-change remote calls.
    #[default]
    Implicit,
    /// One reachability call per candidate change.
    Explicit,
}

#[derive(Debug, Clone)]
pub struct BranchRequest {
    pub source: String,
    /// Absent target turns the run into a branch dump: the in-window source
    /// list itself is the result.
    pub target: Option<String>,
    pub window: ScanWindow,
    /// Devices whose manifests define the repository filter; empty means no
    /// filtering.
    pub devices: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BranchOptions {
    pub page_size: usize,
    /// Cap on bulk log pages fetched per repository in implicit mode.
    pub log_pages_per_repo: usize,
    pub mode: DetectionMode,
}

impl Default for BranchOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            log_pages_per_repo: 10,
            mode: DetectionMode::Implicit,
        }
    }
}

/// Continuous time-windowed comparison of one branch against another.
///
/// Pagination is strictly sequential: the crossed-start early exit is only
/// sound because the service returns changes in descending submit-time
/// order, and parallel pages would break that cutoff.
pub struct BranchComparator {
    backends: Vec<Backend>,
    catalog: DeviceCatalog,
    tracker: Arc<dyn IssueTracker>,
    options: BranchOptions,
}

impl BranchComparator {
    pub fn new(
        backends: Vec<Backend>,
        catalog: DeviceCatalog,
        tracker: Arc<dyn IssueTracker>,
        options: BranchOptions,
    ) -> Self {
        Self {
            backends,
            catalog,
            tracker,
            options,
        }
    }

    pub async fn compare(&self, req: &BranchRequest) -> Result<ComparisonReport, CompareError> {
        // The device filter is resolved once, against the backend hosting
        // the manifest projects, then applied to every backend.
        let filter = if req.devices.is_empty() {
            None
        } else {
            let host = self
                .backends
                .iter()
                .find(|b| b.hosts_catalog)
                .ok_or_else(|| {
                    CompareError::Manifest("no backend hosts the device catalog".to_string())
                })?;
            Some(self.resolve_device_filter(host, req).await?)
        };
        let variants = filter
            .as_ref()
            .map(|f| f.variants.clone())
            .unwrap_or_default();
        let repo_filter: Option<HashSet<String>> =
            filter.map(|f| f.projects.into_iter().collect());

        // The base refs plus one independent follow-on scan per declared
        // build-system variant, each with its own crossed-start watermark.
        let mut ref_pairs = vec![(req.source.clone(), req.target.clone())];
        for variant in &variants {
            ref_pairs.push((
                variant.qualify(&req.source),
                req.target.as_deref().map(|t| variant.qualify(t)),
            ));
        }

        let mut report = ComparisonReport::default();
        for backend in &self.backends {
            let mut changes = Vec::new();
            for (source_ref, target_ref) in &ref_pairs {
                let scanned = self
                    .scan_ref(
                        backend,
                        req.window,
                        source_ref,
                        target_ref.as_deref(),
                        repo_filter.as_ref(),
                        &mut report.error_repos,
                    )
                    .await?;
                changes.extend(scanned);
            }
            changes.sort_by_key(|c| c.merge_time);
            info!(
                "{}: {} missing change(s) for {}",
                backend.id,
                changes.len(),
                req.source
            );
            report.by_backend.insert(backend.id.clone(), changes);
        }
        Ok(report)
    }

    async fn resolve_device_filter(
        &self,
        backend: &Backend,
        req: &BranchRequest,
    ) -> Result<ManifestScan, CompareError> {
        let mut merged = ManifestScan::default();
        for device in &req.devices {
            let entry = self
                .catalog
                .entry(device)
                .map_err(|e| CompareError::Manifest(e.to_string()))?;
            let content = backend
                .client
                .get_file_content(&entry.project, &req.source, &entry.manifest_file)
                .await
                .map_err(|e| match e {
                    GerritError::Auth(m) => CompareError::Auth(m),
                    other => CompareError::Manifest(format!(
                        "no manifest for device '{device}' on '{}': {other}",
                        req.source
                    )),
                })?;
            let scan = parse_manifest(&entry.manifest_file, &content).map_err(|e| {
                CompareError::Manifest(format!("device '{device}' on '{}': {e}", req.source))
            })?;
            for project in scan.projects {
                if !merged.projects.contains(&project) {
                    merged.projects.push(project);
                }
            }
            for variant in scan.variants {
                if !merged.variants.contains(&variant) {
                    merged.variants.push(variant);
                }
            }
        }
        Ok(merged)
    }

    /// Scan one (source, target) ref pair and return the missing changes.
    async fn scan_ref(
        &self,
        backend: &Backend,
        window: ScanWindow,
        source_ref: &str,
        target_ref: Option<&str>,
        repo_filter: Option<&HashSet<String>>,
        error_repos: &mut Vec<String>,
    ) -> Result<Vec<Change>, CompareError> {
        let query = format!("branch:{source_ref} status:merged");
        let mut candidates: Vec<Change> = Vec::new();
        let mut offset = 0;
        let stop = 'scan: loop {
            let page = match backend
                .client
                .list_changes(&query, offset, self.options.page_size)
                .await
            {
                Ok(page) => page,
                Err(GerritError::Auth(m)) => return Err(CompareError::Auth(m)),
                Err(err) => {
                    warn!("{}: change listing for {source_ref} failed: {err}", backend.id);
                    // Keep the degraded scope visible next to the results.
                    error_repos.push(format!("{}:{source_ref}", backend.id));
                    break StopReason::PageEmpty;
                }
            };
            if page.is_empty() {
                break StopReason::PageEmpty;
            }
            let full_page = page.len() == self.options.page_size;
            for info in &page {
                let (Some(submitted), Some(updated)) = (info.submitted_at(), info.updated_at())
                else {
                    debug!("change {} has no submit/update time", info.change_id);
                    continue;
                };
                match window.check(submitted, updated) {
                    WindowCheck::CrossedStart => break 'scan StopReason::CrossedStart,
                    WindowCheck::Skip => continue,
                    WindowCheck::Keep => {}
                }
                if let Some(filter) = repo_filter {
                    if !filter.contains(&info.project) {
                        debug!("skipping {}: not in the device repository set", info.project);
                        continue;
                    }
                }
                let candidate = self
                    .build_change(info, target_ref.unwrap_or(source_ref), submitted)
                    .await;
                candidates.push(candidate);
            }
            if !full_page {
                break StopReason::Exhausted;
            }
            offset += self.options.page_size;
        };
        debug!("scan of {source_ref} stopped: {stop:?}");

        let Some(target) = target_ref else {
            // Branch dump: no diff to compute.
            return Ok(candidates);
        };

        match self.options.mode {
            DetectionMode::Explicit => {
                self.filter_unreachable(backend, target, candidates).await
            }
            DetectionMode::Implicit => {
                self.filter_by_log_membership(backend, target, candidates, error_repos)
                    .await
            }
        }
    }

    async fn build_change(
        &self,
        info: &ChangeInfo,
        branch: &str,
        submitted: DateTime<Utc>,
    ) -> Change {
        let message_text = info.commit_message().unwrap_or(&info.subject);
        let keys = message::issue_keys(message_text);
        let issues = enrich_issue_keys(self.tracker.as_ref(), keys).await;
        Change {
            change_id: info.change_id.clone(),
            project: info.project.clone(),
            branch: branch.to_string(),
            commit: info.current_revision.clone(),
            author: None,
            subject: info.subject.clone(),
            merge_time: submitted,
            issues,
            is_revert: message::is_revert(&info.subject),
        }
    }

    /// Explicit mode: one membership call per candidate. A lookup failure
    /// means the service cannot see the change on the target branch, which
    /// is reported as missing, never as a run failure.
    async fn filter_unreachable(
        &self,
        backend: &Backend,
        target: &str,
        candidates: Vec<Change>,
    ) -> Result<Vec<Change>, CompareError> {
        let mut missing = Vec::new();
        for change in candidates {
            match backend
                .client
                .check_reachable(&change.project, target, &change.change_id)
                .await
            {
                Ok(true) => debug!("{} is present on {target}", change.change_id),
                Ok(false) => missing.push(change),
                Err(GerritError::Auth(m)) => return Err(CompareError::Auth(m)),
                Err(err) => {
                    debug!("reachability check for {} failed: {err}", change.change_id);
                    missing.push(change);
                }
            }
        }
        Ok(missing)
    }

    /// Implicit mode: bulk-scan the target's commit log once per touched
    /// repository and membership-test candidates against the collected
    /// fingerprints.
    async fn filter_by_log_membership(
        &self,
        backend: &Backend,
        target: &str,
        candidates: Vec<Change>,
        error_repos: &mut Vec<String>,
    ) -> Result<Vec<Change>, CompareError> {
        let projects: BTreeSet<String> =
            candidates.iter().map(|c| c.project.clone()).collect();
        let mut log_index: HashMap<String, HashSet<String>> = HashMap::new();
        for project in projects {
            match self.collect_log_ids(backend, &project, target).await {
                Ok(ids) => {
                    log_index.insert(project, ids);
                }
                Err(GerritError::Auth(m)) => return Err(CompareError::Auth(m)),
                Err(err) => {
                    warn!("target log for {project} on {target} unavailable: {err}");
                    // Everything in this repository stays a candidate; the
                    // repository is reported alongside the results.
                    error_repos.push(project.clone());
                    log_index.insert(project, HashSet::new());
                }
            }
        }
        Ok(candidates
            .into_iter()
            .filter(|c| {
                !log_index
                    .get(&c.project)
                    .is_some_and(|ids| ids.contains(&c.change_id))
            })
            .collect())
    }

    async fn collect_log_ids(
        &self,
        backend: &Backend,
        project: &str,
        target: &str,
    ) -> Result<HashSet<String>, GerritError> {
        let mut ids = HashSet::new();
        let mut token: Option<String> = None;
        for _ in 0..self.options.log_pages_per_repo {
            let page = backend
                .client
                .list_commit_log(project, target, token.as_deref())
                .await?;
            for entry in &page.log {
                for trailer in message::change_id_trailers(&entry.message) {
                    ids.insert(trailer.change_id);
                }
            }
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(ids)
    }
}
