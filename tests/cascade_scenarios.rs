//! Cascade traversal against a scripted in-memory form.
//!
//! Run with: `cargo test --test cascade_scenarios`

mod support;

use std::path::Path;
use std::sync::Arc;

use mapcrawl_core::crawl::{
    CancelToken, CascadeSettings, CascadeTraverser, CrawlContext, CrawlError, CrawlSummary,
    PacingPolicy, Traverser,
};
use mapcrawl_core::session::default_link_pattern;
use mapcrawl_core::{Classifier, NamingScheme};
use tempfile::TempDir;

use support::scripted::{
    DISTRICT_FIELD, Journal, PAGE_URL, ScriptedSession, ScriptedSite, ScriptedUpazila,
    UPAZILA_FIELD,
};

const RESOURCE_BASE: &str = "http://maps.example.gov.bd/UploadedDocument";

fn resource(path: &str) -> String {
    format!("{RESOURCE_BASE}/{path}")
}

fn settings() -> CascadeSettings {
    CascadeSettings {
        page_url: PAGE_URL.to_string(),
        district_field: DISTRICT_FIELD.to_string(),
        upazila_field: UPAZILA_FIELD.to_string(),
        link_pattern: default_link_pattern("UploadedDocument").unwrap(),
        link_element_ids: vec!["lnkRoadMap".to_string()],
        resource_root: "UploadedDocument".to_string(),
    }
}

fn context(output: &Path, cancel: CancelToken) -> CrawlContext {
    CrawlContext::new(
        Classifier::default(),
        NamingScheme::new(output, "upazila", "road"),
        PacingPolicy::none(),
        cancel,
    )
}

async fn crawl(
    site: &Arc<ScriptedSite>,
    output: &Path,
    cancel: CancelToken,
) -> (Result<CrawlSummary, CrawlError>, Arc<Journal>) {
    let journal = Arc::new(Journal::default());
    let session = ScriptedSession::new(Arc::clone(site), Arc::clone(&journal));
    let traverser: Box<dyn Traverser> =
        Box::new(CascadeTraverser::new(Box::new(session), settings()));
    let ctx = context(output, cancel);
    let result = traverser.run(&ctx).await;
    (result, journal)
}

/// Dhaka has two upazilas with maps, Gazipur offers no upazilas at all.
fn dhaka_site() -> ScriptedSite {
    ScriptedSite::default()
        .district(
            "10",
            "Dhaka",
            vec![
                ScriptedUpazila::new(
                    "5",
                    "Savar",
                    &[
                        "../UploadedDocument/Dhaka/Savar.jpg",
                        "../UploadedDocument/Dhaka/Savar_Road.jpg",
                        "/UploadedDocument/Dhaka/Savar.jpg?v=2",
                        "../UploadedDocument/Dhaka/Dhamrai.jpg",
                    ],
                ),
                ScriptedUpazila::new("6", "Dhamrai", &[])
                    .with_anchor("lnkRoadMap", "../UploadedDocument/Dhaka/Dhamrai_road.pdf"),
            ],
        )
        .district("20", "Gazipur", Vec::new())
        .resource(&resource("Dhaka/Savar.jpg"), b"savar upazila map")
        .resource(&resource("Dhaka/Savar_Road.jpg"), b"savar road map")
        .resource(&resource("Dhaka/Dhamrai_road.pdf"), b"dhamrai road map")
}

#[tokio::test]
async fn test_happy_path_writes_categorized_files() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(dhaka_site());

    let (result, journal) = crawl(&site, dir.path(), CancelToken::new()).await;
    let summary = result.unwrap();

    let upazila_map = dir.path().join("upazila/dhaka__savar_upazila_1.jpg");
    let road_map = dir.path().join("road/dhaka__savar_road_1.jpg");
    let dhamrai_road = dir.path().join("road/dhaka__dhamrai_road_1.pdf");
    assert_eq!(std::fs::read(&upazila_map).unwrap(), b"savar upazila map");
    assert_eq!(std::fs::read(&road_map).unwrap(), b"savar road map");
    assert_eq!(std::fs::read(&dhamrai_road).unwrap(), b"dhamrai road map");

    assert_eq!(summary.written, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.soft_misses, 0);
    // Gazipur offers no upazilas.
    assert_eq!(summary.branches_skipped, 1);
    assert!(!summary.interrupted);

    // The duplicate Savar link is fetched once; the unrelated Dhamrai link on
    // the Savar page is filtered out by the label.
    let fetched = journal.fetched();
    assert_eq!(
        fetched
            .iter()
            .filter(|url| url.ends_with("Dhaka/Savar.jpg"))
            .count(),
        1
    );
    assert!(!fetched.iter().any(|url| url.ends_with("Dhamrai.jpg")));
    assert_eq!(journal.count("close"), 1);
}

#[tokio::test]
async fn test_single_upazila_writes_upazila_and_road_maps() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        ScriptedSite::default()
            .district(
                "10",
                "Dhaka",
                vec![ScriptedUpazila::new(
                    "5",
                    "Savar",
                    &[
                        "/UploadedDocument/x/savar_road.jpg",
                        "/UploadedDocument/x/savar.jpg",
                    ],
                )],
            )
            .resource(&resource("x/savar_road.jpg"), b"road")
            .resource(&resource("x/savar.jpg"), b"upazila"),
    );

    let (result, _) = crawl(&site, dir.path(), CancelToken::new()).await;
    let summary = result.unwrap();

    assert_eq!(summary.written, 2);
    assert_eq!(
        std::fs::read(dir.path().join("upazila/dhaka__savar_upazila_1.jpg")).unwrap(),
        b"upazila"
    );
    assert_eq!(
        std::fs::read(dir.path().join("road/dhaka__savar_road_1.jpg")).unwrap(),
        b"road"
    );
}

#[tokio::test]
async fn test_multi_word_upazila_ignores_unrelated_links() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        ScriptedSite::default()
            .district(
                "10",
                "Dhaka",
                vec![ScriptedUpazila::new(
                    "5",
                    "Savar Sadar",
                    &[
                        "/UploadedDocument/x/Savar Sadar.jpg",
                        "/UploadedDocument/x/Teknaf.jpg",
                    ],
                )],
            )
            .resource(&resource("x/Savar%20Sadar.jpg"), b"savar sadar map")
            .resource(&resource("x/Teknaf.jpg"), b"teknaf map"),
    );

    let (result, journal) = crawl(&site, dir.path(), CancelToken::new()).await;
    let summary = result.unwrap();

    assert_eq!(summary.written, 1);
    assert_eq!(
        std::fs::read(dir.path().join("upazila/dhaka__savar-sadar_upazila_1.jpg")).unwrap(),
        b"savar sadar map"
    );
    assert!(!dir.path().join("upazila/dhaka__savar-sadar_upazila_2.jpg").exists());
    assert_eq!(journal.fetched(), vec![resource("x/Savar%20Sadar.jpg")]);
}

#[tokio::test]
async fn test_upazila_with_apostrophe_downloads_its_own_map() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        ScriptedSite::default()
            .district(
                "22",
                "Cox's Bazar",
                vec![ScriptedUpazila::new(
                    "3",
                    "Cox's Bazar Sadar",
                    &[
                        "/UploadedDocument/x/Cox's%20Bazar%20Sadar.jpg",
                        "/UploadedDocument/x/Teknaf.jpg",
                    ],
                )],
            )
            .resource(&resource("x/Cox's%20Bazar%20Sadar.jpg"), b"sadar map")
            .resource(&resource("x/Teknaf.jpg"), b"teknaf map"),
    );

    let (result, journal) = crawl(&site, dir.path(), CancelToken::new()).await;
    let summary = result.unwrap();

    assert_eq!(summary.written, 1);
    assert_eq!(
        std::fs::read(dir.path().join("upazila/cox-s-bazar__cox-s-bazar-sadar_upazila_1.jpg"))
            .unwrap(),
        b"sadar map"
    );
    assert_eq!(
        journal.fetched(),
        vec![resource("x/Cox's%20Bazar%20Sadar.jpg")]
    );
}

#[tokio::test]
async fn test_options_are_visited_in_reported_order() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(dhaka_site());

    let (result, journal) = crawl(&site, dir.path(), CancelToken::new()).await;
    result.unwrap();

    let selections: Vec<String> = journal
        .events()
        .into_iter()
        .filter(|e| e.starts_with("select"))
        .collect();
    assert_eq!(
        selections,
        vec![
            "select ddlDistrict=10",
            "select ddlUpazila=5",
            "select ddlUpazila=6",
            "select ddlDistrict=20",
        ]
    );
}

#[tokio::test]
async fn test_rerun_skips_existing_files_without_fetching() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(dhaka_site());

    let (first, _) = crawl(&site, dir.path(), CancelToken::new()).await;
    assert_eq!(first.unwrap().written, 3);

    let (second, journal) = crawl(&site, dir.path(), CancelToken::new()).await;
    let summary = second.unwrap();
    assert_eq!(summary.written, 0);
    assert_eq!(summary.skipped, 3);
    assert!(journal.fetched().is_empty());
}

#[tokio::test]
async fn test_missing_resource_fails_only_that_task() {
    let dir = TempDir::new().unwrap();
    let mut site = dhaka_site();
    site.resources.remove(&resource("Dhaka/Savar_Road.jpg"));
    let site = Arc::new(site);

    let (result, _) = crawl(&site, dir.path(), CancelToken::new()).await;
    let summary = result.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.written, 2);
    let road_map = dir.path().join("road/dhaka__savar_road_1.jpg");
    assert!(!road_map.exists());
    assert!(!dir.path().join("road/dhaka__savar_road_1.jpg.part").exists());
    assert!(dir.path().join("upazila/dhaka__savar_upazila_1.jpg").exists());
}

#[tokio::test]
async fn test_upazila_without_links_is_a_soft_miss() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        ScriptedSite::default()
            .district("10", "Dhaka", vec![ScriptedUpazila::new("7", "Keraniganj", &[])]),
    );

    let (result, journal) = crawl(&site, dir.path(), CancelToken::new()).await;
    let summary = result.unwrap();

    assert_eq!(summary.soft_misses, 1);
    assert_eq!(summary.written, 0);
    assert!(journal.fetched().is_empty());
}

#[tokio::test]
async fn test_failed_selection_resyncs_and_continues_with_next_sibling() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        ScriptedSite::default()
            .district(
                "10",
                "Dhaka",
                vec![
                    ScriptedUpazila::new("5", "Savar", &["../UploadedDocument/Dhaka/Savar.jpg"]),
                    ScriptedUpazila::new("6", "Dhamrai", &["../UploadedDocument/Dhaka/Dhamrai.jpg"]),
                    ScriptedUpazila::new("8", "Nawabganj", &["../UploadedDocument/Dhaka/Nawabganj.jpg"]),
                ],
            )
            .failing_upazila("6")
            .resource(&resource("Dhaka/Savar.jpg"), b"a")
            .resource(&resource("Dhaka/Dhamrai.jpg"), b"b")
            .resource(&resource("Dhaka/Nawabganj.jpg"), b"c"),
    );

    let (result, journal) = crawl(&site, dir.path(), CancelToken::new()).await;
    let summary = result.unwrap();

    assert_eq!(summary.branches_skipped, 1);
    assert_eq!(summary.written, 2);
    assert!(dir.path().join("upazila/dhaka__nawabganj_upazila_1.jpg").exists());
    assert!(!dir.path().join("upazila/dhaka__dhamrai_upazila_1.jpg").exists());
    // Initial load plus one reload after the failed selection.
    assert_eq!(journal.count("load"), 2);
    assert_eq!(journal.count("select ddlDistrict=10"), 2);
}

#[tokio::test]
async fn test_no_districts_is_a_discovery_failure() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(ScriptedSite::default());

    let (result, journal) = crawl(&site, dir.path(), CancelToken::new()).await;

    assert!(matches!(result, Err(CrawlError::Discovery { .. })));
    assert_eq!(journal.count("close"), 1);
}

#[tokio::test]
async fn test_start_page_failure_aborts_run_and_closes_session() {
    let dir = TempDir::new().unwrap();
    let mut site = dhaka_site();
    site.page_down = true;
    let site = Arc::new(site);

    let (result, journal) = crawl(&site, dir.path(), CancelToken::new()).await;

    assert!(matches!(result, Err(CrawlError::Session(_))));
    assert!(journal.fetched().is_empty());
    assert_eq!(journal.count("close"), 1);
}

#[tokio::test]
async fn test_cancelled_run_fetches_nothing_and_reports_interrupt() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(dhaka_site());
    let cancel = CancelToken::new();
    cancel.cancel();

    let (result, journal) = crawl(&site, dir.path(), cancel).await;
    let summary = result.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.written, 0);
    assert!(journal.fetched().is_empty());
    assert_eq!(journal.count("close"), 1);
}
