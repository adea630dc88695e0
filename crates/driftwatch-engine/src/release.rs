use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use driftwatch_core::change::{Change, ComparisonReport};
use driftwatch_core::message;
use driftwatch_core::version::{tag_ref_version, ReleaseTag, ReleaseVersion};
use driftwatch_core::CompareError;
use driftwatch_gerrit::types::{LogEntry, TagInfo};
use driftwatch_gerrit::{GerritClient, GerritError};

use crate::catalog::{parse_manifest, DeviceCatalog};
use crate::Backend;

#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    pub source_tag: String,
    pub target_tag: String,
    /// Device whose manifest defines the repository set.
    pub device: String,
    /// Explicit repository list overriding the manifest.
    pub projects: Option<Vec<String>>,
    /// Manifest file overriding the catalog entry.
    pub manifest_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReleaseOptions {
    /// Width of the per-repository worker pool. A throughput knob, not a
    /// correctness requirement.
    pub workers: usize,
    /// Ticket prefix treated as internal test noise on the manifest
    /// repository.
    pub test_ticket_prefix: Option<String>,
}

impl Default for ReleaseOptions {
    fn default() -> Self {
        Self {
            workers: 10,
            test_ticket_prefix: None,
        }
    }
}

/// Tag-checkpoint-bounded comparison of two release tags across many
/// repositories in parallel.
pub struct ReleaseComparator {
    backends: Vec<Backend>,
    catalog: DeviceCatalog,
    options: ReleaseOptions,
}

/// Version arithmetic shared by every repository task, computed once from
/// the validated request.
#[derive(Debug, Clone)]
struct VersionBounds {
    model: String,
    floor: String,
    smallest: ReleaseVersion,
    largest: ReleaseVersion,
    /// Tag walked first; its log walk discovers the effective checkpoint.
    larger_tag: String,
    smaller_tag: String,
    larger_is_source: bool,
    target_tag: String,
}

impl VersionBounds {
    fn new(source: &ReleaseTag, target: &ReleaseTag) -> Self {
        let larger_is_source = source.version > target.version;
        let (larger, smaller) = if larger_is_source {
            (source, target)
        } else {
            (target, source)
        };
        Self {
            model: source.model.clone(),
            floor: smaller.version.floor(),
            smallest: smaller.version.clone(),
            largest: larger.version.clone(),
            larger_tag: larger.name(),
            smaller_tag: smaller.name(),
            larger_is_source,
            target_tag: target.name(),
        }
    }
}

/// Read-only inputs shared by all repository tasks.
struct RepoContext {
    client: Arc<dyn GerritClient>,
    bounds: VersionBounds,
    manifest_project: Option<String>,
    test_ticket_prefix: Option<String>,
}

impl ReleaseComparator {
    pub fn new(backends: Vec<Backend>, catalog: DeviceCatalog, options: ReleaseOptions) -> Self {
        Self {
            backends,
            catalog,
            options,
        }
    }

    pub async fn compare(&self, req: &ReleaseRequest) -> Result<ComparisonReport, CompareError> {
        let source = ReleaseTag::parse(&req.source_tag)?;
        let target = ReleaseTag::parse(&req.target_tag)?;
        if source.model != target.model {
            return Err(CompareError::InvalidInput(format!(
                "source model '{}' does not match target model '{}'",
                source.model, target.model
            )));
        }
        if source.version > target.version {
            return Err(CompareError::InvalidInput(format!(
                "source release {} is numerically greater than target release {}",
                source.version, target.version
            )));
        }
        let bounds = VersionBounds::new(&source, &target);

        // The repository set is resolved once, against the backend hosting
        // the manifest projects, then reused for every backend.
        let projects = self.resolve_projects(req, &source).await?;
        let manifest_project = self
            .catalog
            .entry(&req.device)
            .ok()
            .map(|e| e.project.clone());

        let mut report = ComparisonReport::default();
        for backend in &self.backends {
            info!(
                "{}: reconciling {} repositories between {} and {}",
                backend.id,
                projects.len(),
                bounds.smaller_tag,
                bounds.larger_tag
            );

            let ctx = Arc::new(RepoContext {
                client: Arc::clone(&backend.client),
                bounds: bounds.clone(),
                manifest_project: manifest_project.clone(),
                test_ticket_prefix: self.options.test_ticket_prefix.clone(),
            });

            let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
            let mut handles = Vec::with_capacity(projects.len());
            for project in projects.iter().cloned() {
                let ctx = Arc::clone(&ctx);
                let semaphore = Arc::clone(&semaphore);
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("worker semaphore closed");
                    let result = scan_repository(&ctx, &project).await;
                    (project, result)
                }));
            }

            let mut changes = Vec::new();
            for handle in handles {
                let (project, result) = handle
                    .await
                    .map_err(|e| CompareError::Internal(format!("worker panicked: {e}")))?;
                match result {
                    Ok(repo_changes) => {
                        debug!("{project}: {} missing change(s)", repo_changes.len());
                        changes.extend(repo_changes);
                    }
                    Err(GerritError::Auth(m)) => return Err(CompareError::Auth(m)),
                    Err(err) => {
                        warn!("{project}: {err}");
                        report.error_repos.push(project);
                    }
                }
            }
            changes.sort_by_key(|c| c.merge_time);
            report.by_backend.insert(backend.id.clone(), changes);
        }
        Ok(report)
    }

    /// The repository set under comparison: an explicit override, or the
    /// manifest content anchored at the source tag's commit, fetched from
    /// the backend hosting the catalog.
    async fn resolve_projects(
        &self,
        req: &ReleaseRequest,
        source: &ReleaseTag,
    ) -> Result<Vec<String>, CompareError> {
        if let Some(projects) = &req.projects {
            let mut out = Vec::new();
            for project in projects {
                if !out.contains(project) {
                    out.push(project.clone());
                }
            }
            return Ok(out);
        }

        let host = self
            .backends
            .iter()
            .find(|b| b.hosts_catalog)
            .ok_or_else(|| {
                CompareError::Manifest("no backend hosts the device catalog".to_string())
            })?;
        let entry = self
            .catalog
            .entry(&req.device)
            .map_err(|e| CompareError::Manifest(e.to_string()))?;
        let manifest_file = req.manifest_file.as_deref().unwrap_or(&entry.manifest_file);

        let source_name = source.name();
        let tags = host
            .client
            .list_tags(&entry.project, &source_name)
            .await
            .map_err(|e| manifest_error(e, &req.device, &source_name))?;
        let commit = tags
            .iter()
            .find(|t| t.short_name() == source_name)
            .and_then(|t| t.commit())
            .ok_or_else(|| {
                CompareError::Manifest(format!(
                    "manifest project '{}' has no tag '{source_name}'",
                    entry.project
                ))
            })?
            .to_string();
        let content = host
            .client
            .get_file_content(&entry.project, &commit, manifest_file)
            .await
            .map_err(|e| manifest_error(e, &req.device, &source_name))?;
        let scan = parse_manifest(manifest_file, &content).map_err(|e| {
            CompareError::Manifest(format!("device '{}' at '{source_name}': {e}", req.device))
        })?;
        Ok(scan.projects)
    }
}

fn manifest_error(err: GerritError, device: &str, ref_name: &str) -> CompareError {
    match err {
        GerritError::Auth(m) => CompareError::Auth(m),
        other => CompareError::Manifest(format!(
            "manifest for device '{device}' at '{ref_name}': {other}"
        )),
    }
}

/// Commits of the walked tags whose terminating checkpoint was resolved from
/// tag metadata.
#[derive(Debug, Default)]
struct Checkpoints {
    /// Stable-floor checkpoint, scanned past first.
    primary: Option<String>,
    /// Exact smallest-version checkpoint.
    secondary: Option<String>,
}

struct Walk {
    changes: Vec<Change>,
    hit_checkpoint: Option<String>,
}

/// Reconcile one repository. Any error degrades just this repository.
async fn scan_repository(ctx: &RepoContext, project: &str) -> Result<Vec<Change>, GerritError> {
    let checkpoints = resolve_checkpoints(ctx, project).await?;

    let first_stops = [
        checkpoints.primary.as_deref(),
        checkpoints.secondary.as_deref(),
    ];
    let first = walk_log(ctx, project, &ctx.bounds.larger_tag, &first_stops).await?;

    // The smaller tag terminates at whatever checkpoint the first walk
    // actually hit, or at the exact-version checkpoint if it ran out.
    let second_stop = first
        .hit_checkpoint
        .clone()
        .or_else(|| checkpoints.secondary.clone());
    let second = walk_log(ctx, project, &ctx.bounds.smaller_tag, &[second_stop.as_deref()]).await?;

    let (source_walk, target_walk) = if ctx.bounds.larger_is_source {
        (first, second)
    } else {
        (second, first)
    };

    let target_ids: HashSet<&str> = target_walk
        .changes
        .iter()
        .map(|c| c.change_id.as_str())
        .collect();
    let mut missing: Vec<Change> = source_walk
        .changes
        .into_iter()
        .filter(|c| !target_ids.contains(c.change_id.as_str()))
        .collect();

    resolve_submit_times(ctx, project, &mut missing).await?;
    Ok(missing)
}

/// Resolve the pair of checkpoint commits bounding the log walks, following
/// the tag-metadata fallback chain: stable-floor listing, exact smallest
/// version listing, finally the target tag itself.
async fn resolve_checkpoints(
    ctx: &RepoContext,
    project: &str,
) -> Result<Checkpoints, GerritError> {
    let b = &ctx.bounds;
    let floor_pattern = format!("{}_{}", b.model, b.floor);
    let floor_tags = parsed_tags(&ctx.client.list_tags(project, &floor_pattern).await?);

    // Highest floor-line tag that does not overshoot the larger release.
    let nearest_below_largest = floor_tags
        .iter()
        .filter(|(v, _)| *v <= b.largest)
        .max_by(|(a, _), (c, _)| a.cmp(c))
        .map(|(_, commit)| commit.clone());

    let mut checkpoints = Checkpoints::default();
    if let Some(commit) = commit_for(&floor_tags, &b.smallest) {
        checkpoints.secondary = Some(commit);
        checkpoints.primary = nearest_below_largest;
    } else {
        let exact_pattern = format!("{}_{}", b.model, b.smallest);
        let exact_tags = parsed_tags(&ctx.client.list_tags(project, &exact_pattern).await?);
        if let Some(commit) = commit_for(&exact_tags, &b.smallest) {
            checkpoints.secondary = Some(commit);
            checkpoints.primary = nearest_below_largest;
        } else {
            checkpoints.secondary = target_tag_commit(ctx, project).await?;
        }
    }

    if checkpoints.primary.is_none() && checkpoints.secondary.is_none() {
        return Err(GerritError::NotFound(format!(
            "no checkpoint tag for '{project}' around {}_{}",
            b.model, b.floor
        )));
    }
    Ok(checkpoints)
}

/// Last-resort checkpoint: the target tag's own commit, which turns the
/// second walk into a scan-until-exhaustion.
async fn target_tag_commit(ctx: &RepoContext, project: &str) -> Result<Option<String>, GerritError> {
    let target = &ctx.bounds.target_tag;
    let tags = ctx.client.list_tags(project, target).await?;
    Ok(tags
        .iter()
        .find(|t| t.short_name() == target.as_str())
        .and_then(|t| t.commit())
        .map(str::to_string))
}

fn parsed_tags(tags: &[TagInfo]) -> Vec<(ReleaseVersion, String)> {
    tags.iter()
        .filter_map(|t| {
            let version = ReleaseVersion::parse(tag_ref_version(&t.ref_name)?).ok()?;
            Some((version, t.commit()?.to_string()))
        })
        .collect()
}

fn commit_for(tags: &[(ReleaseVersion, String)], version: &ReleaseVersion) -> Option<String> {
    tags.iter()
        .find(|(v, _)| v == version)
        .map(|(_, commit)| commit.clone())
}

/// Walk one tag's commit log, newest first, accumulating a change per
/// Change-Id trailer, until a stop commit or log exhaustion. The stop commit
/// itself is still collected; the set difference cancels shared history.
async fn walk_log(
    ctx: &RepoContext,
    project: &str,
    tag_name: &str,
    stops: &[Option<&str>],
) -> Result<Walk, GerritError> {
    let mut changes = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = ctx
            .client
            .list_commit_log(project, tag_name, token.as_deref())
            .await?;
        for entry in &page.log {
            collect_entry_changes(ctx, project, tag_name, entry, &mut changes);
            if stops.iter().flatten().any(|stop| *stop == entry.commit) {
                return Ok(Walk {
                    changes,
                    hit_checkpoint: Some(entry.commit.clone()),
                });
            }
        }
        match page.next {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    Ok(Walk {
        changes,
        hit_checkpoint: None,
    })
}

fn collect_entry_changes(
    ctx: &RepoContext,
    project: &str,
    tag_name: &str,
    entry: &LogEntry,
    out: &mut Vec<Change>,
) {
    let trailers = message::change_id_trailers(&entry.message);
    if trailers.is_empty() {
        return;
    }
    // Manifest-repository commits that reference nothing beyond internal
    // test tickets are release plumbing, not propagated changes.
    if let (Some(manifest_project), Some(prefix)) =
        (&ctx.manifest_project, &ctx.test_ticket_prefix)
    {
        if project == manifest_project
            && message::issue_keys(&entry.message)
                .iter()
                .all(|key| key.starts_with(prefix.as_str()))
        {
            debug!("skipping manifest commit {} (test tickets only)", entry.commit);
            return;
        }
    }
    let Some(merge_time) = entry.committed_at() else {
        debug!("commit {} has no committer time", entry.commit);
        return;
    };
    let revert = message::is_revert(&entry.message);
    for trailer in trailers {
        out.push(Change {
            change_id: trailer.change_id,
            project: project.to_string(),
            branch: tag_name.to_string(),
            commit: Some(entry.commit.clone()),
            author: entry.author_name().map(str::to_string),
            subject: entry.subject().to_string(),
            merge_time,
            issues: trailer.issues,
            is_revert: revert,
        });
    }
}

/// Overwrite walk-derived committer times with the authoritative submit
/// time, one lookup per unique commit hash.
async fn resolve_submit_times(
    ctx: &RepoContext,
    project: &str,
    missing: &mut [Change],
) -> Result<(), GerritError> {
    let commits: BTreeSet<String> = missing.iter().filter_map(|c| c.commit.clone()).collect();
    let mut submitted: HashMap<String, DateTime<Utc>> = HashMap::new();
    for commit in commits {
        match ctx.client.query_by_commit(project, &commit).await {
            Ok(Some(info)) => {
                if let Some(at) = info.submitted_at() {
                    submitted.insert(commit, at);
                }
            }
            Ok(None) => debug!("no merged change found for commit {commit}"),
            Err(err) if err.is_auth() => return Err(err),
            Err(err) => debug!("submit-time lookup for {commit} failed: {err}"),
        }
    }
    for change in missing.iter_mut() {
        if let Some(at) = change.commit.as_ref().and_then(|c| submitted.get(c)) {
            change.merge_time = *at;
        }
    }
    Ok(())
}
