//! Integration tests for the crawl-and-fetch pipeline.
//!
//! These tests drive the full pipeline against a scripted in-memory session
//! and a real SQLite progress store.

use std::path::Path;
use std::time::Duration;

use harvester_core::{
    ChallengeGate, CrawlError, Database, DelayRange, PacingPolicy, Pipeline, PipelineConfig,
    PipelineError, ProgressStore, RunConfig, RunSummary, SiteLayout,
};
use tempfile::TempDir;

mod support;
use support::stub_session::{
    BASE_URL, StubSession, detail_html, download_url, ids, item_url, listing_html, listing_url,
};

/// Helper to create a pipeline over a file-backed store in a temp dir.
async fn setup_pipeline(temp_dir: &TempDir) -> Pipeline {
    let db = Database::new(&temp_dir.path().join("progress.db"))
        .await
        .expect("Failed to create database");
    Pipeline::new(pipeline_config(temp_dir.path()), ProgressStore::new(db))
}

fn pipeline_config(output_dir: &Path) -> PipelineConfig {
    let site = SiteLayout::new(BASE_URL).expect("valid base URL");
    let mut config = PipelineConfig::new(site, output_dir);
    config.pacing = PacingPolicy::disabled();
    config.gate = ChallengeGate::new(Duration::from_millis(1), Duration::from_millis(5));
    config
}

fn read_export(path: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(path).expect("export should exist");
    serde_json::from_str(&text).expect("export should be JSON")
}

// ==================== Full Runs ====================

#[tokio::test]
async fn test_first_run_processes_every_discovered_item() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let pages = vec![ids(1, 3), ids(4, 2)];
    let mut session = StubSession::new();
    session.listing(&pages).items(&ids(1, 5));

    let summary = pipeline
        .execute(&mut session, &RunConfig::default())
        .await
        .expect("run should succeed");

    assert_eq!(summary.discovered, 5);
    assert_eq!(summary.new_records, 5);
    assert_eq!(summary.completed, 5);
    assert_eq!(summary.artifacts, 5);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.exported, 5);
    assert!(session.closed, "session must be closed after the run");

    for id in ids(1, 5) {
        let artifact = temp_dir.path().join(format!("{id}.torrent"));
        assert!(artifact.exists(), "missing artifact for {id}");
    }

    let export = read_export(&temp_dir.path().join("export.json"));
    assert_eq!(export.as_array().unwrap().len(), 5);
    assert_eq!(export[0]["id"], "1");
    assert_eq!(export[0]["title_primary"], "Title 1");
    assert_eq!(export[0]["title_secondary"], "Subtitle 1");
    assert_eq!(
        export[0]["tags"],
        serde_json::json!(["tags:foo", "tags:bar"])
    );
    assert_eq!(export[0]["page_count"], 24);
    assert_eq!(export[0]["artifact_acquired"], true);
}

#[tokio::test]
async fn test_second_run_skips_all_items_without_downloading() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let pages = vec![ids(1, 3), ids(4, 2)];

    let mut first = StubSession::new();
    first.listing(&pages).items(&ids(1, 5));
    pipeline
        .execute(&mut first, &RunConfig::default())
        .await
        .unwrap();
    let export_after_first = read_export(&temp_dir.path().join("export.json"));

    let mut second = StubSession::new();
    second.listing(&pages).items(&ids(1, 5));
    let summary = pipeline
        .execute(&mut second, &RunConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 5);
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.new_records, 0);
    assert!(second.download_requests.is_empty());
    assert!(
        second
            .navigations
            .iter()
            .all(|url| url.contains("/favorites/")),
        "only listing pages should be loaded: {:?}",
        second.navigations
    );
    assert_eq!(pipeline.store().count().await.unwrap(), 5);
    assert_eq!(
        read_export(&temp_dir.path().join("export.json")),
        export_after_first
    );
}

#[tokio::test]
async fn test_deleted_artifact_is_fetched_again() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let pages = vec![ids(1, 2)];

    let mut first = StubSession::new();
    first.listing(&pages).items(&ids(1, 2));
    pipeline
        .execute(&mut first, &RunConfig::default())
        .await
        .unwrap();

    std::fs::remove_file(temp_dir.path().join("2.torrent")).unwrap();

    let mut second = StubSession::new();
    second.listing(&pages).items(&ids(1, 2));
    let summary = pipeline
        .execute(&mut second, &RunConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(second.download_requests, vec![download_url("2")]);
    assert!(temp_dir.path().join("2.torrent").exists());
}

// ==================== Limits and Page Ranges ====================

#[tokio::test]
async fn test_max_items_stops_discovery_and_caps_processing() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let pages = vec![ids(1, 8), ids(9, 8), ids(17, 8)];
    let mut session = StubSession::new();
    session.listing(&pages).items(&ids(1, 24));

    let run = RunConfig {
        max_items: Some(10),
        ..RunConfig::default()
    };
    let summary = pipeline.execute(&mut session, &run).await.unwrap();

    assert!(
        !session.navigations.contains(&listing_url(3)),
        "page 3 should not be visited once 10 IDs are known"
    );
    assert_eq!(summary.processed, 10);
    assert_eq!(session.download_requests.len(), 10);
    assert_eq!(summary.exported, 10);
}

#[tokio::test]
async fn test_single_page_mode_visits_only_start_page() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let pages: Vec<_> = (0..5).map(|p| ids(p * 10 + 1, 2)).collect();
    let mut session = StubSession::new();
    session.listing(&pages).items(&ids(21, 2));

    let run = RunConfig {
        start_page: 3,
        single_page: true,
        ..RunConfig::default()
    };
    let summary = pipeline.execute(&mut session, &run).await.unwrap();

    assert_eq!(
        session.listing_navigations(),
        vec![listing_url(1).as_str(), listing_url(3).as_str()]
    );
    assert_eq!(summary.discovered, 2);
    assert_eq!(pipeline.store().list_ids().await.unwrap(), vec!["21", "22"]);
}

#[tokio::test]
async fn test_start_page_through_last_page() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let pages: Vec<_> = (0..5).map(|p| ids(p * 10 + 1, 1)).collect();
    let mut session = StubSession::new();
    session
        .listing(&pages)
        .items(&["21".to_string(), "31".to_string(), "41".to_string()]);

    let run = RunConfig {
        start_page: 3,
        metadata_only: true,
        ..RunConfig::default()
    };
    pipeline.execute(&mut session, &run).await.unwrap();

    assert_eq!(
        session.listing_navigations(),
        vec![
            listing_url(1).as_str(),
            listing_url(3).as_str(),
            listing_url(4).as_str(),
            listing_url(5).as_str(),
        ]
    );
}

#[tokio::test]
async fn test_overlapping_pages_store_each_id_once() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let pages = vec![
        vec!["1".to_string(), "2".to_string(), "2".to_string()],
        vec!["2".to_string(), "3".to_string()],
    ];
    let mut session = StubSession::new();
    session.listing(&pages).items(&ids(1, 3));

    let summary = pipeline
        .execute(&mut session, &RunConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.discovered, 3);
    assert_eq!(pipeline.store().count().await.unwrap(), 3);
    assert_eq!(session.download_requests.len(), 3);
}

// ==================== Fatal Preconditions ====================

#[tokio::test]
async fn test_login_redirect_is_fatal_and_closes_session() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let login = format!("{BASE_URL}/login/?next=/favorites/");
    let mut session = StubSession::new();
    session
        .redirect(listing_url(1), login.as_str())
        .page(
            login.as_str(),
            "<html><body><form id=\"login\"></form></body></html>",
        );

    let result = pipeline.execute(&mut session, &RunConfig::default()).await;

    assert!(
        matches!(
            result,
            Err(PipelineError::Crawl(CrawlError::NotAuthenticated { .. }))
        ),
        "expected not-authenticated error, got {result:?}"
    );
    assert!(session.closed);
    assert_eq!(pipeline.store().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_plain_login_redirect_fails_without_waiting_at_gate() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("progress.db"))
        .await
        .unwrap();
    let mut config = pipeline_config(temp_dir.path());
    config.gate = ChallengeGate::default();
    let pipeline = Pipeline::new(config, ProgressStore::new(db));

    let login = format!("{BASE_URL}/login/");
    let mut session = StubSession::new();
    session
        .redirect(listing_url(1), login.as_str())
        .page(
            login.as_str(),
            "<html><body><form id=\"login\"></form></body></html>",
        );

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.execute(&mut session, &RunConfig::default()),
    )
    .await
    .expect("login redirect must not wait for the gate timeout");

    assert!(
        matches!(
            result,
            Err(PipelineError::Crawl(CrawlError::NotAuthenticated { ref url })) if url == &login
        ),
        "expected not-authenticated error, got {result:?}"
    );
    assert!(session.closed);
}

#[tokio::test]
async fn test_challenge_on_listing_root_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let challenge = format!("{BASE_URL}/challenge");
    let mut session = StubSession::new();
    session
        .redirect(listing_url(1), challenge.as_str())
        .page(challenge.as_str(), "<title>Just a moment...</title>");

    let result = pipeline.execute(&mut session, &RunConfig::default()).await;

    assert!(matches!(
        result,
        Err(PipelineError::Crawl(CrawlError::ChallengeTimeout { .. }))
    ));
    assert!(session.closed);
}

#[tokio::test]
async fn test_start_page_beyond_total_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let mut session = StubSession::new();
    session.listing(&[ids(1, 1), ids(2, 1)]);

    let run = RunConfig {
        start_page: 3,
        ..RunConfig::default()
    };
    let result = pipeline.execute(&mut session, &run).await;

    assert!(matches!(
        result,
        Err(PipelineError::Crawl(CrawlError::StartPageOutOfRange { start: 3, total: 2 }))
    ));
}

// ==================== Degraded Pages and Items ====================

#[tokio::test]
async fn test_empty_listing_page_saves_snapshot_and_ends_run() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let mut session = StubSession::new();
    session.page(listing_url(1), listing_html(&[], 1));

    let summary = pipeline
        .execute(&mut session, &RunConfig::default())
        .await
        .expect("an empty listing is not an error");

    assert_eq!(summary.discovered, 0);
    assert_eq!(summary.processed, 0);
    let snapshot = temp_dir.path().join("debug_page1.html");
    assert!(snapshot.exists(), "expected diagnostic snapshot");
    let saved = std::fs::read_to_string(snapshot).unwrap();
    assert!(saved.contains("favcontainer"));
    assert!(session.closed);
}

#[tokio::test]
async fn test_empty_middle_page_does_not_stop_crawl() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let pages = vec![ids(1, 1), Vec::new(), ids(3, 1)];
    let mut session = StubSession::new();
    session
        .listing(&pages)
        .items(&["1".to_string(), "3".to_string()]);

    let summary = pipeline
        .execute(&mut session, &RunConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.discovered, 2);
    assert_eq!(summary.completed, 2);
    assert!(temp_dir.path().join("debug_page2.html").exists());
}

#[tokio::test]
async fn test_missing_detail_page_fails_item_and_continues() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let mut session = StubSession::new();
    session
        .listing(&[ids(1, 3)])
        .items(&["1".to_string(), "3".to_string()]);

    let summary = pipeline
        .execute(&mut session, &RunConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 2);
    assert!(!pipeline.store().has_metadata("2").await.unwrap());
    assert!(pipeline.store().has_metadata("3").await.unwrap());
}

#[tokio::test]
async fn test_failed_download_commits_metadata_without_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let mut session = StubSession::new();
    session
        .listing(&[ids(1, 1)])
        .page(item_url("1"), detail_html("1", true));

    let summary = pipeline
        .execute(&mut session, &RunConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.artifacts, 0);
    let record = pipeline.store().get("1").await.unwrap().unwrap();
    assert!(record.is_processed());
    assert!(!record.artifact_acquired);
    assert_eq!(record.tags(), vec!["tags:foo", "tags:bar"]);
    assert!(!temp_dir.path().join("1.torrent").exists());
}

#[tokio::test]
async fn test_missing_download_control_uses_download_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let mut session = StubSession::new();
    session
        .listing(&[ids(7, 1)])
        .page(item_url("7"), detail_html("7", false))
        .download(download_url("7"), b"d8:announce7e");

    let summary = pipeline
        .execute(&mut session, &RunConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.artifacts, 1);
    assert_eq!(session.download_requests, vec![download_url("7")]);
    assert_eq!(
        std::fs::read(temp_dir.path().join("7.torrent")).unwrap(),
        b"d8:announce7e"
    );
}

#[tokio::test]
async fn test_empty_download_is_not_acquired() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let mut session = StubSession::new();
    session
        .listing(&[ids(1, 1)])
        .page(item_url("1"), detail_html("1", true))
        .download(download_url("1"), b"");

    let summary = pipeline
        .execute(&mut session, &RunConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.artifacts, 0);
    assert!(!pipeline.store().is_artifact_acquired("1").await.unwrap());
}

// ==================== Run Modes ====================

#[tokio::test]
async fn test_metadata_only_run_never_downloads_and_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    let run = RunConfig {
        metadata_only: true,
        ..RunConfig::default()
    };

    let mut first = StubSession::new();
    first.listing(&[ids(1, 2)]).items(&ids(1, 2));
    let summary = pipeline.execute(&mut first, &run).await.unwrap();
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.artifacts, 0);
    assert!(first.download_requests.is_empty());

    let mut second = StubSession::new();
    second.listing(&[ids(1, 2)]).items(&ids(1, 2));
    let summary = pipeline.execute(&mut second, &run).await.unwrap();
    assert_eq!(summary.skipped, 2);
    assert!(!second.navigations.contains(&item_url("1")));
}

#[tokio::test]
async fn test_skip_discovery_processes_stored_ids() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = setup_pipeline(&temp_dir).await;
    for id in ["5", "6"] {
        pipeline.store().record_discovered(id).await.unwrap();
    }
    let mut session = StubSession::new();
    session.items(&ids(5, 2));

    let run = RunConfig {
        skip_discovery: true,
        ..RunConfig::default()
    };
    let summary = pipeline.execute(&mut session, &run).await.unwrap();

    assert_eq!(summary.discovered, 2);
    assert_eq!(summary.artifacts, 2);
    assert!(session.listing_navigations().is_empty());
}

// ==================== Pacing ====================

const COOLDOWN: Duration = Duration::from_millis(1500);

/// Runs `count` single-page items with a fixed cooldown every 20
/// completions and returns how long the run took. `missing` has no
/// detail page and fails.
async fn timed_run(count: u32, missing: Option<&str>) -> (Duration, RunSummary) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("progress.db"))
        .await
        .unwrap();
    let mut config = pipeline_config(temp_dir.path());
    config.pacing = PacingPolicy {
        cooldown: DelayRange::new(COOLDOWN, COOLDOWN),
        cooldown_every: 20,
        ..PacingPolicy::disabled()
    };
    let pipeline = Pipeline::new(config, ProgressStore::new(db));

    let all = ids(1, count);
    let present: Vec<String> = all
        .iter()
        .filter(|id| Some(id.as_str()) != missing)
        .cloned()
        .collect();
    let mut session = StubSession::new();
    session.listing(&[all]).items(&present);

    let started = std::time::Instant::now();
    let summary = pipeline
        .execute(&mut session, &RunConfig::default())
        .await
        .unwrap();
    (started.elapsed(), summary)
}

#[tokio::test]
async fn test_cooldown_after_twentieth_completion_before_next_item() {
    let (elapsed, summary) = timed_run(21, None).await;
    assert_eq!(summary.completed, 21);
    assert!(elapsed >= COOLDOWN, "expected a cooldown, run took {elapsed:?}");
}

#[tokio::test]
async fn test_no_cooldown_after_last_item() {
    let (elapsed, summary) = timed_run(20, None).await;
    assert_eq!(summary.completed, 20);
    assert!(elapsed < COOLDOWN, "unexpected cooldown, run took {elapsed:?}");
}

#[tokio::test]
async fn test_failed_items_do_not_advance_cooldown_cadence() {
    let (elapsed, summary) = timed_run(21, Some("2")).await;
    assert_eq!(summary.completed, 20);
    assert_eq!(summary.failed, 1);
    assert!(elapsed < COOLDOWN, "unexpected cooldown, run took {elapsed:?}");
}
