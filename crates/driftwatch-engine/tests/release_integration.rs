use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use driftwatch_core::CompareError;
use driftwatch_engine::catalog::{DeviceCatalog, ManifestEntry};
use driftwatch_engine::{Backend, ReleaseComparator, ReleaseOptions, ReleaseRequest};
use driftwatch_gerrit::mock::{change_info, log_entry, tag, MockGerrit};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn msg(subject: &str, ticket: &str, change_id: &str) -> String {
    format!("{subject}\n\n{ticket}\n\nChange-Id: {change_id}\n")
}

fn cam_catalog() -> DeviceCatalog {
    DeviceCatalog::from_parts(
        HashMap::from([(
            "cam".to_string(),
            ManifestEntry {
                project: "manifests/cam".to_string(),
                manifest_file: "default.xml".to_string(),
            },
        )]),
        vec!["cam".to_string()],
    )
}

fn comparator(mock: MockGerrit, options: ReleaseOptions) -> ReleaseComparator {
    ReleaseComparator::new(
        vec![Backend::new("primary", Arc::new(mock), true)],
        cam_catalog(),
        options,
    )
}

fn request(source: &str, target: &str, projects: Option<Vec<&str>>) -> ReleaseRequest {
    ReleaseRequest {
        source_tag: source.to_string(),
        target_tag: target.to_string(),
        device: "cam".to_string(),
        projects: projects.map(|p| p.iter().map(|s| s.to_string()).collect()),
        manifest_file: None,
    }
}

fn missing_ids(report: &driftwatch_core::ComparisonReport) -> Vec<String> {
    report.by_backend["primary"]
        .iter()
        .map(|c| c.change_id.clone())
        .collect()
}

/// A repository where the 1.2 maintenance line carries a hotfix that the
/// 1.4 release never received. Both logs share the checkpoint commit.
fn hotfix_fixture() -> MockGerrit {
    MockGerrit::new()
        .with_tags("platform/app", vec![tag("cam_1.2.0.0", "cp")])
        .with_log(
            "platform/app",
            "cam_1.4.0.0",
            vec![
                log_entry("n1", &msg("New feature", "CPE-5", "Iaaa"), at(400)),
                log_entry("cp", &msg("Base", "CPE-1", "Ibase"), at(100)),
            ],
        )
        .with_log(
            "platform/app",
            "cam_1.2.0.0",
            vec![
                log_entry("hf", &msg("Hotfix leak", "CPE-7", "Ifix"), at(300)),
                log_entry("cp", &msg("Base", "CPE-1", "Ibase"), at(100)),
            ],
        )
        .with_commit_change(
            "hf",
            change_info(
                "Ifix",
                "platform/app",
                "cam_1.2.0.0",
                &msg("Hotfix leak", "CPE-7", "Ifix"),
                at(310),
                at(310),
            ),
        )
}

#[tokio::test]
async fn hotfix_absent_from_target_release_is_reported() {
    let comparator = comparator(hotfix_fixture(), ReleaseOptions::default());
    let report = comparator
        .compare(&request("cam_1.2.0.0", "cam_1.4.0.0", Some(vec!["platform/app"])))
        .await
        .unwrap();

    assert_eq!(missing_ids(&report), ["Ifix"]);
    assert!(report.error_repos.is_empty());

    let change = &report.by_backend["primary"][0];
    assert_eq!(change.project, "platform/app");
    assert_eq!(change.branch, "cam_1.2.0.0");
    assert_eq!(change.commit.as_deref(), Some("hf"));
    assert_eq!(change.issues, ["CPE-7"]);
    // Submit time from the change lookup wins over the log committer time.
    assert_eq!(change.merge_time, at(310));
}

#[tokio::test]
async fn comparison_is_idempotent() {
    let comparator = comparator(hotfix_fixture(), ReleaseOptions::default());
    let req = request("cam_1.2.0.0", "cam_1.4.0.0", Some(vec!["platform/app"]));

    let first = comparator.compare(&req).await.unwrap();
    let second = comparator.compare(&req).await.unwrap();
    assert_eq!(missing_ids(&first), missing_ids(&second));
    assert_eq!(first.error_repos, second.error_repos);
}

#[tokio::test]
async fn repository_set_comes_from_the_manifest_at_the_source_tag() {
    const MANIFEST: &str = r#"<manifest>
  <project name="platform/app" path="app"/>
</manifest>"#;

    let mock = hotfix_fixture()
        .with_tags("manifests/cam", vec![tag("cam_1.2.0.0", "mcommit")])
        .with_file("manifests/cam", "mcommit", "default.xml", MANIFEST);
    let comparator = comparator(mock, ReleaseOptions::default());

    let report = comparator
        .compare(&request("cam_1.2.0.0", "cam_1.4.0.0", None))
        .await
        .unwrap();
    assert_eq!(missing_ids(&report), ["Ifix"]);
}

#[tokio::test]
async fn backend_without_the_catalog_does_not_abort_the_run() {
    const MANIFEST: &str = r#"<manifest>
  <project name="platform/app" path="app"/>
</manifest>"#;

    let primary = hotfix_fixture()
        .with_tags("manifests/cam", vec![tag("cam_1.2.0.0", "mcommit")])
        .with_file("manifests/cam", "mcommit", "default.xml", MANIFEST);
    // The mirror carries neither the manifest project nor any release tags.
    let mirror = MockGerrit::new();
    let comparator = ReleaseComparator::new(
        vec![
            Backend::new("primary", Arc::new(primary), true),
            Backend::new("mirror", Arc::new(mirror), false),
        ],
        cam_catalog(),
        ReleaseOptions::default(),
    );

    let report = comparator
        .compare(&request("cam_1.2.0.0", "cam_1.4.0.0", None))
        .await
        .unwrap();
    // The repository set comes from the catalog host; the mirror's missing
    // checkpoint degrades only its own partition.
    assert_eq!(missing_ids(&report), ["Ifix"]);
    assert!(report.by_backend["mirror"].is_empty());
    assert_eq!(report.error_repos, ["platform/app"]);
}

#[tokio::test]
async fn mismatched_models_are_rejected_before_any_remote_call() {
    let comparator = comparator(MockGerrit::new(), ReleaseOptions::default());
    let err = comparator
        .compare(&request("cam_1.2.0.0", "gw_1.4.0.0", Some(vec!["platform/app"])))
        .await
        .unwrap_err();
    assert!(matches!(err, CompareError::InvalidInput(_)));
}

#[tokio::test]
async fn source_newer_than_target_is_rejected() {
    let comparator = comparator(MockGerrit::new(), ReleaseOptions::default());
    let err = comparator
        .compare(&request("cam_1.4.0.0", "cam_1.2.0.0", Some(vec!["platform/app"])))
        .await
        .unwrap_err();
    assert!(matches!(err, CompareError::InvalidInput(_)));
}

#[tokio::test]
async fn tag_listing_failure_degrades_only_that_repository() {
    let mock = hotfix_fixture().with_tags_error("platform/flaky");
    let comparator = comparator(mock, ReleaseOptions::default());

    let report = comparator
        .compare(&request(
            "cam_1.2.0.0",
            "cam_1.4.0.0",
            Some(vec!["platform/app", "platform/flaky"]),
        ))
        .await
        .unwrap();
    assert_eq!(missing_ids(&report), ["Ifix"]);
    assert_eq!(report.error_repos, ["platform/flaky"]);
}

#[tokio::test]
async fn missing_floor_tags_fall_back_to_the_target_tag_commit() {
    // No 1.2-floor tag anywhere; the target tag's own commit becomes the
    // stop, so the source walk runs to exhaustion.
    let mock = MockGerrit::new()
        .with_tags("platform/app", vec![tag("cam_1.4.0.0", "n1")])
        .with_log(
            "platform/app",
            "cam_1.4.0.0",
            vec![log_entry("n1", &msg("Base", "CPE-1", "Ibase"), at(100))],
        )
        .with_log(
            "platform/app",
            "cam_1.2.0.0",
            vec![
                log_entry("hf", &msg("Hotfix leak", "CPE-7", "Ifix"), at(300)),
                log_entry("old", &msg("Base", "CPE-1", "Ibase"), at(100)),
            ],
        );
    let comparator = comparator(mock, ReleaseOptions::default());

    let report = comparator
        .compare(&request("cam_1.2.0.0", "cam_1.4.0.0", Some(vec!["platform/app"])))
        .await
        .unwrap();
    assert_eq!(missing_ids(&report), ["Ifix"]);
}

#[tokio::test]
async fn non_floor_source_resolves_through_the_exact_tag_listing() {
    // The source release 1.2.3.5 is not on the stable floor line, so its
    // checkpoint comes from the un-floored listing while the floor tag
    // still bounds the target walk.
    let mock = MockGerrit::new()
        .with_tags(
            "platform/app",
            vec![tag("cam_1.2.0.0", "cpF"), tag("cam_1.2.3.5", "cpS")],
        )
        .with_log(
            "platform/app",
            "cam_1.4.0.0",
            vec![
                log_entry("n1", &msg("New feature", "CPE-5", "Iaaa"), at(400)),
                log_entry("cpF", &msg("Stable base", "CPE-1", "Ifloor"), at(150)),
            ],
        )
        .with_log(
            "platform/app",
            "cam_1.2.3.5",
            vec![
                log_entry("hf", &msg("Hotfix leak", "CPE-7", "Ifix"), at(300)),
                log_entry("cpF", &msg("Stable base", "CPE-1", "Ifloor"), at(150)),
            ],
        );
    let comparator = comparator(mock, ReleaseOptions::default());

    let report = comparator
        .compare(&request("cam_1.2.3.5", "cam_1.4.0.0", Some(vec!["platform/app"])))
        .await
        .unwrap();
    assert_eq!(missing_ids(&report), ["Ifix"]);
}

#[tokio::test]
async fn manifest_repository_test_tickets_are_skipped() {
    let mock = MockGerrit::new()
        .with_tags("manifests/cam", vec![tag("cam_1.2.0.0", "cp")])
        .with_log(
            "manifests/cam",
            "cam_1.4.0.0",
            vec![log_entry("cp", &msg("Base", "CPE-1", "Ibase"), at(100))],
        )
        .with_log(
            "manifests/cam",
            "cam_1.2.0.0",
            vec![
                log_entry("k1", &msg("Fix pinning", "CPE-2", "Ikeep"), at(400)),
                log_entry("s1", &msg("Nightly bump", "STBT-9", "Iskip"), at(350)),
                log_entry("s2", "Update manifest\n\nChange-Id: Inone\n", at(320)),
                log_entry("cp", &msg("Base", "CPE-1", "Ibase"), at(100)),
            ],
        );
    let comparator = comparator(
        mock,
        ReleaseOptions {
            test_ticket_prefix: Some("STBT-".to_string()),
            ..ReleaseOptions::default()
        },
    );

    let report = comparator
        .compare(&request("cam_1.2.0.0", "cam_1.4.0.0", Some(vec!["manifests/cam"])))
        .await
        .unwrap();
    // Test-only and ticketless manifest commits are release plumbing.
    assert_eq!(missing_ids(&report), ["Ikeep"]);
}

#[tokio::test]
async fn many_repositories_reconcile_under_a_narrow_pool() {
    let mut mock = MockGerrit::new();
    let mut projects = Vec::new();
    for i in 0..12 {
        let project = format!("platform/repo{i}");
        mock = mock
            .with_tags(&project, vec![tag("cam_1.2.0.0", "cp")])
            .with_log(
                &project,
                "cam_1.4.0.0",
                vec![log_entry("cp", &msg("Base", "CPE-1", "Ibase"), at(100))],
            )
            .with_log(
                &project,
                "cam_1.2.0.0",
                vec![
                    log_entry("hf", &msg("Hotfix", "CPE-7", &format!("Ifix{i}")), at(300 + i)),
                    log_entry("cp", &msg("Base", "CPE-1", "Ibase"), at(100)),
                ],
            );
        projects.push(project);
    }
    let comparator = comparator(
        mock,
        ReleaseOptions {
            workers: 3,
            ..ReleaseOptions::default()
        },
    );

    let report = comparator
        .compare(&ReleaseRequest {
            source_tag: "cam_1.2.0.0".to_string(),
            target_tag: "cam_1.4.0.0".to_string(),
            device: "cam".to_string(),
            projects: Some(projects),
            manifest_file: None,
        })
        .await
        .unwrap();
    assert_eq!(report.change_count(), 12);
    assert!(report.error_repos.is_empty());
}
