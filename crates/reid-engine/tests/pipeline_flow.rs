//! End-to-end pipeline scenarios against the in-memory store.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use reid_core::{first_of_month, Availability, Observation, PRICE_UNKNOWN};
use reid_engine::{EngineConfig, IngestPipeline, ReconcileOutcome, SourceConfig, SourceRegistry};
use reid_store::{CatalogStore, MemoryStore};

fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).single().unwrap()
}

fn registry() -> SourceRegistry {
    SourceRegistry {
        sources: vec![
            SourceConfig {
                name: "Bali Realty".into(),
                code: "BREL".into(),
                enabled: true,
                notes: None,
            },
            SourceConfig {
                name: "Kibarer".into(),
                code: "KIBR".into(),
                enabled: true,
                notes: None,
            },
        ],
    }
}

fn config(reports_dir: PathBuf) -> EngineConfig {
    EngineConfig {
        reports_dir,
        sources_path: PathBuf::from("sources.yaml"),
        reporting_offset_months: 1,
        scheduler_enabled: false,
        ingest_cron_1: "0 6 * * *".into(),
        ingest_cron_2: "0 18 * * *".into(),
    }
}

fn observation(source: &str, url: &str) -> Observation {
    let mut obs = Observation::new(source, url, ts(2026, 3, 14));
    obs.title = Some("Modern 3 bedroom villa in Canggu".into());
    obs.description = Some("Land size: 400 sqm\nBuilding size 250 m2\n3 bedroom villa.".into());
    obs.price_text = Some("IDR 4.500.000.000".into());
    obs.bedrooms_text = Some("3".into());
    obs.bathrooms_text = Some("2".into());
    obs.contract_text = Some("Freehold".into());
    obs.raw_html = Some(format!("<html>{url}</html>"));
    obs
}

fn pipeline(store: Arc<dyn CatalogStore>, reports_dir: PathBuf) -> IngestPipeline {
    IngestPipeline::new(store, registry(), config(reports_dir))
}

#[tokio::test]
async fn create_then_reobserve_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), dir.path().to_path_buf());
    let now = ts(2026, 3, 14);
    let obs = observation("Bali Realty", "https://brel.example/villa-1");

    let first = pipeline.process_at(&obs, now).await.unwrap();
    let created = match first {
        ReconcileOutcome::Created(record) => record,
        other => panic!("expected creation, got {other:?}"),
    };
    assert!(created.reid_id.starts_with("REID_26_02_BREL_"));
    assert_eq!(created.price, 4_500_000_000);
    assert_eq!(created.bedrooms, Some(3.0));

    let second = pipeline.process_at(&obs, now).await.unwrap();
    match second {
        ReconcileOutcome::Unchanged(record) => {
            assert_eq!(record.updated_at, created.updated_at);
            assert_eq!(record.price, created.price);
        }
        other => panic!("expected no-op, got {other:?}"),
    }
}

#[tokio::test]
async fn sold_observation_transitions_with_single_change() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), dir.path().to_path_buf());
    let now = ts(2026, 3, 14);
    let url = "https://brel.example/villa-2";

    pipeline
        .process_at(&observation("Bali Realty", url), now)
        .await
        .unwrap();

    let mut sold = observation("Bali Realty", url);
    sold.availability_labels = vec!["SOLD".to_string()];
    let outcome = pipeline.process_at(&sold, now).await.unwrap();

    match outcome {
        ReconcileOutcome::Updated { record, changes } => {
            assert_eq!(changes.len(), 1);
            assert_eq!(changes[0].field, "availability");
            assert!(!record.is_available);
            assert_eq!(record.availability, Availability::Sold);
            assert_eq!(record.sold_at, Some(first_of_month(now)));
        }
        other => panic!("expected update, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_price_never_overwrites_known_price() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), dir.path().to_path_buf());
    let now = ts(2026, 3, 14);
    let url = "https://brel.example/villa-3";

    pipeline
        .process_at(&observation("Bali Realty", url), now)
        .await
        .unwrap();

    let mut vague = observation("Bali Realty", url);
    vague.price_text = Some("call the office".into());
    let outcome = pipeline.process_at(&vague, now).await.unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Unchanged(_)));
    let record = store.get_record(url).await.unwrap().unwrap();
    assert_eq!(record.price, 4_500_000_000);
    assert_ne!(record.price, PRICE_UNKNOWN);
}

#[tokio::test]
async fn duplicate_pairs_record_cross_and_same_source_matches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), dir.path().to_path_buf());
    let now = ts(2026, 3, 14);

    let a = "https://brel.example/a";
    let b = "https://kibr.example/b";
    let c = "https://brel.example/c";

    pipeline.process_at(&observation("Bali Realty", a), now).await.unwrap();
    pipeline.process_at(&observation("Kibarer", b), now).await.unwrap();

    let pairs = store.duplicate_pairs().await.unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].source_url, a);
    assert_eq!(pairs[0].duplicate_url, b);

    // same tuple again from A's own source
    pipeline.process_at(&observation("Bali Realty", c), now).await.unwrap();
    let pairs = store.duplicate_pairs().await.unwrap();
    assert!(pairs
        .iter()
        .any(|p| p.source_url == a && p.duplicate_url == c));

    // reprocessing an unchanged record never re-runs detection
    pipeline.process_at(&observation("Kibarer", b), now).await.unwrap();
    let after = store.duplicate_pairs().await.unwrap();
    assert_eq!(after.len(), pairs.len());
}

#[tokio::test]
async fn failures_record_errors_and_compensate_the_archive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), dir.path().to_path_buf());
    let now = ts(2026, 3, 14);
    let url = "https://unknown.example/1";

    let obs = observation("Unregistered Source", url);
    assert!(pipeline.process_at(&obs, now).await.is_err());

    let errors = store.errors_for_url(url).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("Unregistered Source"));
    // the archive row written for this observation was rolled back
    assert!(store.archive_for_url(url).await.unwrap().is_empty());

    // same failure again stays deduplicated
    assert!(pipeline.process_at(&obs, now).await.is_err());
    assert_eq!(store.errors_for_url(url).await.unwrap().len(), 1);
}

#[tokio::test]
async fn errors_clear_on_next_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::new());
    let now = ts(2026, 3, 14);
    let url = "https://brel.example/flaky";

    // a pipeline that does not know the source fails the URL
    let unaware = IngestPipeline::new(
        store.clone(),
        SourceRegistry { sources: vec![] },
        config(dir.path().to_path_buf()),
    );
    let obs = observation("Bali Realty", url);
    assert!(unaware.process_at(&obs, now).await.is_err());
    assert_eq!(store.errors_for_url(url).await.unwrap().len(), 1);

    // once the source is registered, the next success clears the error
    let aware = pipeline(store.clone(), dir.path().to_path_buf());
    aware.process_at(&obs, now).await.unwrap();
    assert!(store.errors_for_url(url).await.unwrap().is_empty());
}

#[tokio::test]
async fn delisting_transitions_without_an_observation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), dir.path().to_path_buf());
    let now = ts(2026, 3, 14);
    let url = "https://brel.example/gone";

    pipeline
        .process_at(&observation("Bali Realty", url), now)
        .await
        .unwrap();

    // a second listing from the same source that the crawl did see
    let seen_url = "https://brel.example/still-listed";
    pipeline
        .process_at(&observation("Bali Realty", seen_url), now)
        .await
        .unwrap();
    let unseen = pipeline
        .unseen_available_urls("Bali Realty", &[seen_url.to_string()])
        .await
        .unwrap();
    assert_eq!(unseen, vec![url.to_string()]);

    let record = pipeline.mark_delisted(url, now).await.unwrap().unwrap();
    assert!(!record.is_available);
    assert_eq!(record.availability, Availability::Delisted);
    assert_eq!(record.sold_at, Some(first_of_month(now)));

    let unseen = pipeline
        .unseen_available_urls("Bali Realty", &[seen_url.to_string()])
        .await
        .unwrap();
    assert!(unseen.is_empty());

    assert!(pipeline
        .mark_delisted("https://brel.example/never-seen", now)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn run_batch_reports_per_source() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), dir.path().to_path_buf());

    let batch = vec![
        observation("Bali Realty", "https://brel.example/1"),
        observation("Bali Realty", "https://brel.example/2"),
        observation("Kibarer", "https://kibr.example/1"),
        observation("Unregistered Source", "https://unknown.example/1"),
    ];
    let outcome = pipeline.run_batch(&batch).await.unwrap();

    assert_eq!(outcome.summaries.len(), 3);
    let brel = outcome
        .summaries
        .iter()
        .find(|s| s.source == "Bali Realty")
        .unwrap();
    assert_eq!(brel.items_scraped, 2);
    assert_eq!(brel.items_dropped, 0);
    let unknown = outcome
        .summaries
        .iter()
        .find(|s| s.source == "Unregistered Source")
        .unwrap();
    assert_eq!(unknown.items_dropped, 1);
    assert_eq!(unknown.errors, 1);

    assert!(outcome.reports_dir.join("ingest_brief.md").exists());
    assert!(outcome.reports_dir.join("snapshots/manifest.json").exists());
}
