mod config;

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use driftwatch_core::change::ComparisonReport;
use driftwatch_core::window::ScanWindow;
use driftwatch_engine::catalog::DeviceCatalog;
use driftwatch_engine::{
    BranchComparator, BranchOptions, BranchRequest, DetectionMode, ReleaseComparator,
    ReleaseOptions, ReleaseRequest,
};

use config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "driftwatch", about = "Reconcile merged changes between refs")]
struct Cli {
    /// Directory holding gerrit.json, manifests.json and devices.json
    #[arg(long, env = "DRIFTWATCH_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Directory for timestamped report files
    #[arg(long, env = "DRIFTWATCH_REPORT_DIR", default_value = "reports")]
    report_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compare merged changes between two branches over a time window
    Branch(BranchArgs),
    /// Compare merged changes between two release tags
    Release(ReleaseArgs),
}

#[derive(Debug, Args)]
struct BranchArgs {
    /// Branch whose changes are expected on the target
    source: String,

    /// Target branch; omit to dump the source branch instead of diffing
    target: Option<String>,

    /// Window start (RFC 3339, "YYYY-MM-DD HH:MM:SS" or "YYYY-MM-DD")
    #[arg(long)]
    start: Option<String>,

    /// Window end, same formats as --start
    #[arg(long)]
    end: Option<String>,

    /// Devices whose manifests restrict the repository set
    #[arg(long, value_delimiter = ',')]
    devices: Vec<String>,

    /// Probe target membership per change instead of bulk log scanning
    #[arg(long)]
    explicit: bool,

    /// Changes fetched per query page
    #[arg(long, default_value = "100")]
    page_size: usize,

    /// Bulk log pages scanned per repository in implicit mode
    #[arg(long, default_value = "10")]
    log_pages: usize,
}

#[derive(Debug, Args)]
struct ReleaseArgs {
    /// Release tag whose changes are expected in the target release
    source_tag: String,

    /// Target release tag, same model as the source
    target_tag: String,

    /// Device whose manifest defines the repository set
    #[arg(long)]
    device: String,

    /// Explicit repository list overriding the manifest
    #[arg(long, value_delimiter = ',')]
    projects: Option<Vec<String>>,

    /// Manifest file overriding the catalog entry
    #[arg(long)]
    manifest_file: Option<String>,

    /// Repository worker pool width
    #[arg(long, default_value = "10")]
    workers: usize,

    /// Ticket prefix filtered out of manifest-repository commits
    #[arg(long, env = "DRIFTWATCH_TEST_TICKET_PREFIX")]
    test_ticket_prefix: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config_dir)?;
    let backends = config.build_backends();

    let (report, mode) = match &cli.command {
        Command::Branch(args) => {
            let catalog = load_catalog(&cli.config_dir, !args.devices.is_empty())?;
            let request = BranchRequest {
                source: args.source.clone(),
                target: args.target.clone(),
                window: ScanWindow::new(
                    args.start.as_deref().map(parse_utc).transpose()?,
                    args.end.as_deref().map(parse_utc).transpose()?,
                ),
                devices: args.devices.clone(),
            };
            let options = BranchOptions {
                page_size: args.page_size,
                log_pages_per_repo: args.log_pages,
                mode: if args.explicit {
                    DetectionMode::Explicit
                } else {
                    DetectionMode::Implicit
                },
            };
            let comparator =
                BranchComparator::new(backends, catalog, config.build_tracker(), options);
            (comparator.compare(&request).await?, "branch")
        }
        Command::Release(args) => {
            let catalog = load_catalog(&cli.config_dir, args.projects.is_none())?;
            let request = ReleaseRequest {
                source_tag: args.source_tag.clone(),
                target_tag: args.target_tag.clone(),
                device: args.device.clone(),
                projects: args.projects.clone(),
                manifest_file: args.manifest_file.clone(),
            };
            let options = ReleaseOptions {
                workers: args.workers,
                test_ticket_prefix: args.test_ticket_prefix.clone(),
            };
            let comparator = ReleaseComparator::new(backends, catalog, options);
            (comparator.compare(&request).await?, "release")
        }
    };

    emit_report(&report, &cli.report_dir, mode)
}

/// Load the device catalog from the config directory. Only a hard
/// requirement when the run actually consults a manifest.
fn load_catalog(config_dir: &PathBuf, required: bool) -> Result<DeviceCatalog> {
    match DeviceCatalog::load(config_dir) {
        Ok(catalog) => Ok(catalog),
        Err(e) if required => Err(e).context("loading device catalog"),
        Err(e) => {
            warn!("device catalog unavailable ({e}), continuing without it");
            Ok(DeviceCatalog::default())
        }
    }
}

fn parse_utc(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    bail!("unrecognized time '{s}' (expected RFC 3339, 'YYYY-MM-DD HH:MM:SS' or 'YYYY-MM-DD')")
}

fn emit_report(report: &ComparisonReport, report_dir: &PathBuf, mode: &str) -> Result<()> {
    let rendered = serde_json::to_string_pretty(report)?;
    println!("{rendered}");

    fs::create_dir_all(report_dir)
        .with_context(|| format!("creating {}", report_dir.display()))?;
    let path = report_dir.join(format!(
        "driftwatch-{mode}-{}.json",
        Utc::now().format("%Y%m%dT%H%M%SZ")
    ));
    fs::write(&path, &rendered).with_context(|| format!("writing {}", path.display()))?;
    info!("report written to {}", path.display());

    info!("{} missing change(s)", report.change_count());
    let issues = report.all_issues();
    if !issues.is_empty() {
        // Paste-ready tracker query for the full roll-up.
        info!("issues: key in ({})", issues.join(", "));
    }
    if !report.error_repos.is_empty() {
        warn!(
            "{} repository(ies) could not be reconciled: {}",
            report.error_repos.len(),
            report.error_repos.join(", ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_utc_accepts_all_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        assert_eq!(parse_utc("2024-03-05").unwrap(), expected);
        assert_eq!(parse_utc("2024-03-05 00:00:00").unwrap(), expected);
        assert_eq!(parse_utc("2024-03-05T00:00:00Z").unwrap(), expected);
        assert_eq!(parse_utc("2024-03-05T01:00:00+01:00").unwrap(), expected);
        assert!(parse_utc("last tuesday").is_err());
    }
}
