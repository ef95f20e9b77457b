//! Ingest pipeline orchestration: assembling observations into candidates,
//! classification and validation, identifier allocation, reconciliation
//! against the catalog, duplicate detection, and end-of-run reporting.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use parquet::arrow::ArrowWriter;
use reid_core::{
    first_of_month, Availability, CatalogRecord, ChangeEntry, Currency, ErrorRecord, IssueKind,
    IssueTag, ListingCandidate, Observation, RawArchiveEntry, Segment, KNOWN_CONTRACT_TYPES,
    KNOWN_PROPERTY_TYPES, PRICE_UNKNOWN,
};
use reid_extract::{
    availability_from_labels, contract_type_or_default, detect_currency, detect_off_plan,
    detect_property_type, find_bedrooms, find_bedrooms_in_text, find_build_size,
    find_contract_type, find_idr, find_land_size, find_land_zoning,
    find_location_in_description, find_location_in_title, find_usd, is_price_on_request,
    parse_listed_date, parse_number, price_per_are_total, recover_price, size_to_sqm,
    standardize_property_type, LeaseYearsExtractor,
};
use reid_store::{sha256_hex, CatalogStore, DuplicateScope, ScopedLocks, StoreError};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "reid-engine";

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub reports_dir: PathBuf,
    pub sources_path: PathBuf,
    /// How many months the identifier reporting period trails the processing
    /// month. The scheme historically pinned this; it is an explicit knob.
    pub reporting_offset_months: u32,
    pub scheduler_enabled: bool,
    pub ingest_cron_1: String,
    pub ingest_cron_2: String,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            reports_dir: std::env::var("REID_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./reports")),
            sources_path: std::env::var("REID_SOURCES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./sources.yaml")),
            reporting_offset_months: std::env::var("REID_REPORTING_OFFSET_MONTHS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            scheduler_enabled: std::env::var("REID_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            ingest_cron_1: std::env::var("INGEST_CRON_1").unwrap_or_else(|_| "0 6 * * *".to_string()),
            ingest_cron_2: std::env::var("INGEST_CRON_2").unwrap_or_else(|_| "0 18 * * *".to_string()),
        }
    }
}

// ─── Source registry ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub code: String,
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SourceRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Allocation code for a source display name.
    pub fn code_for(&self, source: &str) -> Option<&str> {
        self.sources
            .iter()
            .find(|s| s.name == source)
            .map(|s| s.code.as_str())
    }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no source code registered for {0}")]
    UnknownSource(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ─── Reporting period & identifier allocation ────────────────────────────────

/// The month an allocated identifier reports under. Derived from the
/// processing time shifted back by a configurable number of months, so the
/// pinning is a parameter rather than a constant buried in the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingPeriod {
    pub year: i32,
    pub month: u32,
}

impl ReportingPeriod {
    pub fn from_processing_time(now: DateTime<Utc>, offset_months: u32) -> Self {
        let total = now.year() * 12 + now.month0() as i32 - offset_months as i32;
        Self {
            year: total.div_euclid(12),
            month: total.rem_euclid(12) as u32 + 1,
        }
    }

    /// Identifier prefix for one source code within this period.
    pub fn prefix(&self, code: &str) -> String {
        format!("REID_{:02}_{:02}_{}", self.year % 100, self.month, code)
    }

    pub fn start(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .expect("first of month is always a valid timestamp")
    }
}

/// Allocates `REID_<yy>_<mm>_<CODE>_<seq>` identifiers. The read-highest,
/// compute-next, insert steps run under a per-scope lock so concurrent
/// allocations in the same (period, source) scope can never share a
/// sequence number.
#[derive(Default)]
pub struct IdAllocator {
    scopes: ScopedLocks,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn allocate_and_insert(
        &self,
        store: &dyn CatalogStore,
        prefix: &str,
        make_record: impl FnOnce(String) -> CatalogRecord + Send,
    ) -> Result<CatalogRecord, EngineError> {
        let _scope = self.scopes.acquire(prefix).await;
        let next = store.max_sequence(prefix).await?.unwrap_or(0) + 1;
        let reid_id = format!("{prefix}_{next:03}");
        let record = make_record(reid_id);
        store.insert_record(record.clone()).await?;
        Ok(record)
    }
}

// ─── Listing assembler ───────────────────────────────────────────────────────

/// Builds a typed candidate out of an observation's raw text fragments,
/// then repairs still-empty fields from the full description in a second
/// pass.
#[derive(Debug, Clone, Copy)]
pub struct Assembler {
    today: NaiveDate,
}

impl Assembler {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn assemble(&self, observation: &Observation) -> ListingCandidate {
        let mut candidate =
            ListingCandidate::new(&observation.source, &observation.url, observation.scraped_at);

        candidate.property_id = trimmed(observation.property_id.as_deref());
        candidate.title = trimmed(observation.title.as_deref());
        candidate.description = observation
            .description
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        candidate.image_url = trimmed(observation.image_url.as_deref());
        candidate.region = trimmed(observation.region.as_deref());
        candidate.longitude = observation.longitude;
        candidate.latitude = observation.latitude;

        let description = candidate.description.clone().unwrap_or_default();

        candidate.contract_type = match trimmed(observation.contract_text.as_deref()) {
            Some(text) => Some(find_contract_type(&text).unwrap_or(text)),
            None => Some(contract_type_or_default(&description)),
        };

        candidate.property_type = match trimmed(observation.property_type_text.as_deref()) {
            Some(text) => Some(standardize_property_type(&text)),
            None => {
                let basis = candidate.title.as_deref().unwrap_or(&description);
                Some(detect_property_type(basis, "Villa"))
            }
        };

        let lease = LeaseYearsExtractor::new(self.today);
        candidate.leasehold_years = observation
            .lease_text
            .as_deref()
            .and_then(|t| lease.extract(t))
            .or_else(|| lease.extract(&description))
            .map(f64::from);

        candidate.land_size = observation
            .land_size_text
            .as_deref()
            .and_then(size_to_sqm)
            .filter(|v| *v > 0.0)
            .or_else(|| find_land_size(&description));
        candidate.build_size = observation
            .build_size_text
            .as_deref()
            .and_then(size_to_sqm)
            .filter(|v| *v > 0.0)
            .or_else(|| find_build_size(&description));

        candidate.bedrooms = observation
            .bedrooms_text
            .as_deref()
            .and_then(parse_number)
            .or_else(|| find_bedrooms(&description).map(f64::from))
            .or_else(|| find_bedrooms_in_text(&description).map(f64::from));
        candidate.bathrooms = observation.bathrooms_text.as_deref().and_then(parse_number);

        candidate.location = trimmed(observation.location_text.as_deref())
            .or_else(|| find_location_in_description(&description))
            .or_else(|| candidate.title.as_deref().and_then(find_location_in_title));

        candidate.listed_date = observation
            .listed_date_text
            .as_deref()
            .and_then(parse_listed_date);

        candidate.availability = availability_from_labels(&observation.availability_labels);
        candidate.is_off_plan = detect_off_plan(
            candidate.title.as_deref(),
            candidate.description.as_deref(),
            &observation.labels,
        );

        let (price, currency) = self.extract_price(observation, candidate.land_size);
        candidate.price = price;
        candidate.currency = currency;

        // identical land and build figures mean one land parcel was read
        // twice, not a building that fills its plot
        if candidate.land_size.is_some() && candidate.land_size == candidate.build_size {
            candidate.build_size = None;
            candidate.property_type = Some("Land".to_string());
        }

        if candidate.property_type.as_deref() == Some("Land") {
            candidate.land_zoning = find_land_zoning(&description);
        }

        candidate
    }

    /// Price chain: tagged IDR/USD amounts, then vernacular recovery, then
    /// per-are expansion against the land size. A present-but-unparseable
    /// fragment yields the unknown sentinel rather than zero.
    fn extract_price(&self, observation: &Observation, land_size: Option<f64>) -> (i64, Option<Currency>) {
        let Some(text) = trimmed(observation.price_text.as_deref()) else {
            return (0, None);
        };
        let currency = detect_currency(&text);
        if is_price_on_request(&text) {
            return (0, currency);
        }
        let mut price = find_idr(&text)
            .or_else(|| find_usd(&text))
            .or_else(|| recover_price(&text));
        if price.is_none() {
            // unit-price quotes ("10 juta/are") hide the multiplier behind
            // the slash; recover from the head alone
            if let Some((head, _)) = text.split_once('/') {
                price = recover_price(head);
            }
        }
        if let (Some(unit_price), Some(land)) = (price, land_size) {
            if let Some(total) = price_per_are_total(&text, unit_price, land) {
                price = Some(total);
            }
        }
        match price {
            Some(price) => (price, currency),
            None => (PRICE_UNKNOWN, currency),
        }
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ─── Classification & validation ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct LuxuryThresholds {
    pub idr: i64,
    pub usd: i64,
}

impl Default for LuxuryThresholds {
    fn default() -> Self {
        Self {
            idr: 78_656_000_000,
            usd: 5_000_000,
        }
    }
}

/// Segment is a pure function of (price, currency, property type).
pub fn classify(record: &CatalogRecord, thresholds: &LuxuryThresholds) -> Segment {
    let luxury = match record.currency {
        Currency::Idr => record.price >= thresholds.idr,
        Currency::Usd => record.price >= thresholds.usd,
    };
    if luxury {
        Segment::Luxury
    } else if record.property_type.as_deref() == Some("Land") {
        Segment::AllLand
    } else {
        Segment::Data
    }
}

/// Structural rules evaluated against the current field set.
pub fn identify_issues(record: &CatalogRecord) -> Vec<IssueKind> {
    let mut issues = Vec::new();
    let is_land = record.property_type.as_deref() == Some("Land");
    let bedrooms = record.bedrooms.unwrap_or(0.0);

    if bedrooms >= 13.0 {
        issues.push(IssueKind::TooManyBedrooms);
    }
    if bedrooms == 0.0 && !is_land {
        issues.push(IssueKind::NoBedrooms);
    }
    if record.price == 0 {
        issues.push(IssueKind::NoPrice);
    }
    if record.title.as_deref().map(|t| t.is_empty() || t == "N/A").unwrap_or(true) {
        issues.push(IssueKind::NoTitle);
    }
    if record.description.is_empty() {
        issues.push(IssueKind::NoDescription);
    }
    if record.location.as_deref().map(str::is_empty).unwrap_or(true) {
        issues.push(IssueKind::NoLocation);
    }
    if let (Some(build), Some(land)) = (record.build_size, record.land_size) {
        if build > 0.0 && land > 0.0 && build > land {
            issues.push(IssueKind::BuildSizeExceedsLandSize);
        }
    }
    if record.contract_type.as_deref() == Some("Leasehold")
        && record.leasehold_years.unwrap_or(0.0) == 0.0
    {
        issues.push(IssueKind::NoLeaseholdYears);
    }
    if record.availability != Availability::Available {
        issues.push(IssueKind::NotAvailable);
    }
    if !record
        .property_type
        .as_deref()
        .map(|t| KNOWN_PROPERTY_TYPES.contains(&t))
        .unwrap_or(false)
    {
        issues.push(IssueKind::UnknownPropertyType);
    }
    if is_land && bedrooms > 0.0 {
        issues.push(IssueKind::LandWithBedrooms);
    }
    if !record
        .contract_type
        .as_deref()
        .map(|t| KNOWN_CONTRACT_TYPES.contains(&t))
        .unwrap_or(false)
    {
        issues.push(IssueKind::UnknownContractType);
    }
    if is_land && record.land_zoning.as_deref().map(str::is_empty).unwrap_or(true) {
        issues.push(IssueKind::NoLandZoning);
    }
    issues
}

/// Reconcile the tag set against a fresh evaluation: rules that stopped
/// triggering mark their tag solved, re-triggered rules reopen it, new
/// rules create one. A uniqueness conflict on create means the row already
/// exists and is a no-op.
pub async fn apply_issue_tags(
    store: &dyn CatalogStore,
    record: &CatalogRecord,
    issues: &[IssueKind],
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let existing = store.tags_for_record(record.id).await?;
    let issue_names: Vec<&'static str> = issues.iter().map(|i| i.as_str()).collect();

    for tag in &existing {
        if !tag.is_solved && !issue_names.contains(&tag.name.as_str()) {
            store
                .set_issue_tag_solved(record.id, &tag.name, true, now)
                .await?;
        }
    }

    for name in &issue_names {
        match existing.iter().find(|t| t.name == *name) {
            Some(tag) if tag.is_solved => {
                store
                    .set_issue_tag_solved(record.id, name, false, now)
                    .await?;
            }
            Some(_) => {}
            None => {
                let tag = IssueTag {
                    id: Uuid::new_v4(),
                    record_id: record.id,
                    name: (*name).to_string(),
                    is_solved: false,
                    is_ignored: false,
                    created_at: now,
                    updated_at: now,
                };
                if let Err(err) = store.insert_issue_tag(tag).await {
                    if !err.is_unique_violation() {
                        return Err(err.into());
                    }
                }
            }
        }
    }
    Ok(())
}

// ─── Duplicate detection ─────────────────────────────────────────────────────

/// Two passes immediately after a successful insert: an exact tuple match
/// from a different source, then from the same source under a different
/// URL. An already-recorded pair is a no-op.
pub async fn detect_duplicates(
    store: &dyn CatalogStore,
    record: &CatalogRecord,
    now: DateTime<Utc>,
) -> Result<Vec<reid_core::DuplicatePair>, EngineError> {
    let mut created = Vec::new();
    for scope in [DuplicateScope::DifferentSource, DuplicateScope::SameSource] {
        let Some(similar) = store.find_matching_record(record, scope).await? else {
            continue;
        };
        let pair = reid_core::DuplicatePair {
            id: Uuid::new_v4(),
            created_at: now,
            source_url: similar.url.clone(),
            duplicate_url: record.url.clone(),
        };
        match store.insert_duplicate_pair(pair.clone()).await {
            Ok(()) => created.push(pair),
            Err(err) if err.is_unique_violation() => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(created)
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Created(CatalogRecord),
    Updated {
        record: CatalogRecord,
        changes: Vec<ChangeEntry>,
    },
    Unchanged(CatalogRecord),
}

impl ReconcileOutcome {
    pub fn record(&self) -> &CatalogRecord {
        match self {
            ReconcileOutcome::Created(r) => r,
            ReconcileOutcome::Updated { record, .. } => record,
            ReconcileOutcome::Unchanged(r) => r,
        }
    }
}

/// Per-URL state machine: Absent inserts (with identifier allocation,
/// classification, validation, and duplicate detection), Present merges
/// field by field and persists only when the change log is non-empty.
pub struct Reconciler {
    thresholds: LuxuryThresholds,
    allocator: IdAllocator,
    urls: ScopedLocks,
}

impl Reconciler {
    pub fn new(thresholds: LuxuryThresholds) -> Self {
        Self {
            thresholds,
            allocator: IdAllocator::new(),
            urls: ScopedLocks::new(),
        }
    }

    pub async fn reconcile(
        &self,
        store: &dyn CatalogStore,
        registry: &SourceRegistry,
        candidate: ListingCandidate,
        period: ReportingPeriod,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, EngineError> {
        let _url_guard = self.urls.acquire(&candidate.url).await;

        match store.get_record(&candidate.url).await? {
            None => self.insert_new(store, registry, &candidate, period, now).await,
            Some(existing) => self.merge_existing(store, existing, &candidate, now).await,
        }
    }

    async fn insert_new(
        &self,
        store: &dyn CatalogStore,
        registry: &SourceRegistry,
        candidate: &ListingCandidate,
        period: ReportingPeriod,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, EngineError> {
        let code = registry
            .code_for(&candidate.source)
            .ok_or_else(|| EngineError::UnknownSource(candidate.source.clone()))?;
        let prefix = period.prefix(code);
        let thresholds = self.thresholds;
        let sold_stamp = first_of_month(now);
        let record = self
            .allocator
            .allocate_and_insert(store, &prefix, move |reid_id| {
                let mut record = CatalogRecord::from_candidate(candidate, reid_id, now, sold_stamp);
                record.segment = classify(&record, &thresholds);
                record
            })
            .await?;

        apply_issue_tags(store, &record, &identify_issues(&record), now).await?;
        let pairs = detect_duplicates(store, &record, now).await?;
        if !pairs.is_empty() {
            info!(url = %record.url, pairs = pairs.len(), "duplicate pairs recorded");
        }
        Ok(ReconcileOutcome::Created(record))
    }

    async fn merge_existing(
        &self,
        store: &dyn CatalogStore,
        mut existing: CatalogRecord,
        candidate: &ListingCandidate,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, EngineError> {
        let changes = existing.merge_candidate(candidate, first_of_month(now));
        if changes.is_empty() {
            return Ok(ReconcileOutcome::Unchanged(existing));
        }
        existing.segment = classify(&existing, &self.thresholds);
        existing.updated_at = now;
        store.update_record(existing.clone()).await?;
        apply_issue_tags(store, &existing, &identify_issues(&existing), now).await?;
        Ok(ReconcileOutcome::Updated {
            record: existing,
            changes,
        })
    }

    /// External "URL no longer resolves" signal: the record is delisted in
    /// place, independent of any fresh observation.
    pub async fn mark_delisted(
        &self,
        store: &dyn CatalogStore,
        url: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CatalogRecord>, EngineError> {
        let _url_guard = self.urls.acquire(url).await;
        let Some(mut record) = store.get_record(url).await? else {
            return Ok(None);
        };
        record.is_available = false;
        record.availability = Availability::Delisted;
        record.sold_at = Some(first_of_month(now));
        record.updated_at = now;
        record.segment = classify(&record, &self.thresholds);
        store.update_record(record.clone()).await?;
        store.clear_errors(url).await?;
        Ok(Some(record))
    }
}

// ─── Run summaries & reports ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub source: String,
    pub scraped_at: DateTime<Utc>,
    pub items_scraped: usize,
    pub items_dropped: usize,
    pub errors: usize,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summaries: Vec<RunSummary>,
    pub reports_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
struct SnapshotManifest {
    schema_version: u32,
    files: Vec<SnapshotManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
struct SnapshotManifestFile {
    name: String,
    path: String,
    sha256: String,
    bytes: u64,
}

/// Writes the per-run report directory: a markdown brief, a JSON delta of
/// the run summaries, and per-segment parquet snapshots of the catalog
/// with a hashed manifest.
pub struct ReportWriter {
    reports_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    pub async fn write(
        &self,
        store: &dyn CatalogStore,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        summaries: &[RunSummary],
    ) -> Result<PathBuf> {
        let run_dir = self.reports_dir.join(run_id.to_string());
        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("creating {}", run_dir.display()))?;

        let brief = format!(
            "# REID Ingest Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n\n## Sources\n{}\n",
            run_id,
            started_at,
            finished_at,
            summaries
                .iter()
                .map(|s| format!(
                    "- {}: scraped {}, dropped {}, errors {}",
                    s.source, s.items_scraped, s.items_dropped, s.errors
                ))
                .collect::<Vec<_>>()
                .join("\n")
        );
        fs::write(run_dir.join("ingest_brief.md"), brief)
            .await
            .context("writing ingest_brief.md")?;

        let delta = serde_json::to_vec_pretty(&serde_json::json!({
            "run_id": run_id,
            "started_at": started_at,
            "finished_at": finished_at,
            "summaries": summaries,
        }))
        .context("serializing run delta")?;
        fs::write(run_dir.join("catalog_delta.json"), delta)
            .await
            .context("writing catalog_delta.json")?;

        let snapshot_dir = run_dir.join("snapshots");
        fs::create_dir_all(&snapshot_dir)
            .await
            .with_context(|| format!("creating {}", snapshot_dir.display()))?;

        let mut files = Vec::new();
        for (segment, file_name) in [
            (Segment::Luxury, "luxury_listings.parquet"),
            (Segment::AllLand, "all_land.parquet"),
            (Segment::Data, "data.parquet"),
        ] {
            let records = store.records_by_segment(segment).await.map_err(|e| anyhow::anyhow!(e))?;
            let path = snapshot_dir.join(file_name);
            write_segment_parquet(&path, &records)?;
            files.push(manifest_entry(segment.as_str(), &run_dir, &path)?);
        }

        let pairs = store.duplicate_pairs().await.map_err(|e| anyhow::anyhow!(e))?;
        let pairs_path = snapshot_dir.join("duplicate_pairs.parquet");
        write_pairs_parquet(&pairs_path, &pairs)?;
        files.push(manifest_entry("duplicate_pairs", &run_dir, &pairs_path)?);

        let manifest = SnapshotManifest {
            schema_version: 1,
            files,
        };
        let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
        fs::write(snapshot_dir.join("manifest.json"), bytes)
            .await
            .context("writing manifest.json")?;

        Ok(run_dir)
    }
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_segment_parquet(path: &Path, records: &[CatalogRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("reid_id", DataType::Utf8, false),
        ArrowField::new("source", DataType::Utf8, false),
        ArrowField::new("url", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, true),
        ArrowField::new("location", DataType::Utf8, true),
        ArrowField::new("contract_type", DataType::Utf8, true),
        ArrowField::new("property_type", DataType::Utf8, true),
        ArrowField::new("bedrooms", DataType::Float64, true),
        ArrowField::new("land_size", DataType::Float64, true),
        ArrowField::new("build_size", DataType::Float64, true),
        ArrowField::new("price", DataType::Int64, false),
        ArrowField::new("currency", DataType::Utf8, false),
        ArrowField::new("availability", DataType::Utf8, false),
        ArrowField::new("is_off_plan", DataType::Boolean, false),
    ]));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(
            records.iter().map(|r| Some(r.reid_id.as_str())).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| Some(r.source.as_str())).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| Some(r.url.as_str())).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| r.title.as_deref()).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| r.location.as_deref()).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| r.contract_type.as_deref()).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| r.property_type.as_deref()).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            records.iter().map(|r| r.bedrooms).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            records.iter().map(|r| r.land_size).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            records.iter().map(|r| r.build_size).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            records.iter().map(|r| r.price).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| Some(r.currency.as_str())).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| Some(r.availability.as_str())).collect::<Vec<_>>(),
        )),
        Arc::new(BooleanArray::from(
            records.iter().map(|r| r.is_off_plan).collect::<Vec<_>>(),
        )),
    ];

    let batch = RecordBatch::try_new(schema, columns).context("building segment record batch")?;
    write_parquet(path, batch)
}

fn write_pairs_parquet(path: &Path, pairs: &[reid_core::DuplicatePair]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("source_url", DataType::Utf8, false),
        ArrowField::new("duplicate_url", DataType::Utf8, false),
        ArrowField::new("created_at", DataType::Utf8, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(
            pairs.iter().map(|p| Some(p.source_url.as_str())).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            pairs.iter().map(|p| Some(p.duplicate_url.as_str())).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            pairs
                .iter()
                .map(|p| Some(p.created_at.to_rfc3339()))
                .collect::<Vec<_>>(),
        )),
    ];
    let batch = RecordBatch::try_new(schema, columns).context("building pairs record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, run_dir: &Path, path: &Path) -> Result<SnapshotManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path.strip_prefix(run_dir).unwrap_or(path).display().to_string();
    Ok(SnapshotManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}

/// Markdown digest of the most recent report directories.
pub fn report_recent_runs(reports_root: &Path, runs: usize) -> Result<String> {
    let mut dirs = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();
    let dirs = dirs.into_iter().take(runs.max(1)).collect::<Vec<_>>();

    let mut lines = vec!["# REID Ingest Runs".to_string(), String::new()];
    for dir in dirs {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let delta_path = dir.path().join("catalog_delta.json");
        let delta: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&delta_path)
                .with_context(|| format!("reading {}", delta_path.display()))?,
        )
        .with_context(|| format!("parsing {}", delta_path.display()))?;

        let summaries = delta
            .get("summaries")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let scraped: u64 = summaries
            .iter()
            .filter_map(|s| s.get("items_scraped").and_then(|v| v.as_u64()))
            .sum();
        let dropped: u64 = summaries
            .iter()
            .filter_map(|s| s.get("items_dropped").and_then(|v| v.as_u64()))
            .sum();

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- sources: {}", summaries.len()));
        lines.push(format!("- items scraped: {scraped}"));
        lines.push(format!("- items dropped: {dropped}"));
        lines.push(format!("- delta: `{}`", delta_path.display()));
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

// ─── Ingest pipeline ─────────────────────────────────────────────────────────

/// Sequences archive → assemble → reconcile per observation, with error
/// capture and compensation. One listing's failure never stops the batch.
pub struct IngestPipeline {
    store: Arc<dyn CatalogStore>,
    registry: SourceRegistry,
    config: EngineConfig,
    reconciler: Reconciler,
    reports: ReportWriter,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn CatalogStore>, registry: SourceRegistry, config: EngineConfig) -> Self {
        let reports = ReportWriter::new(config.reports_dir.clone());
        Self {
            store,
            registry,
            config,
            reconciler: Reconciler::new(LuxuryThresholds::default()),
            reports,
        }
    }

    pub fn with_thresholds(mut self, thresholds: LuxuryThresholds) -> Self {
        self.reconciler = Reconciler::new(thresholds);
        self
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Process one observation at an explicit processing time.
    pub async fn process_at(
        &self,
        observation: &Observation,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let archive_id = self.archive_raw(observation, now).await?;

        let candidate = Assembler::new(now.date_naive()).assemble(observation);
        let period =
            ReportingPeriod::from_processing_time(now, self.config.reporting_offset_months);

        match self
            .reconciler
            .reconcile(self.store.as_ref(), &self.registry, candidate, period, now)
            .await
        {
            Ok(outcome) => {
                self.store.clear_errors(&observation.url).await.map_err(|e| anyhow::anyhow!(e))?;
                info!(url = %observation.url, outcome = outcome_label(&outcome), "observation reconciled");
                Ok(outcome)
            }
            Err(err) => {
                self.capture_failure(&observation.url, "reconcile", &err.to_string(), Some(archive_id), now)
                    .await;
                Err(err.into())
            }
        }
    }

    pub async fn mark_delisted(&self, url: &str, now: DateTime<Utc>) -> Result<Option<CatalogRecord>> {
        Ok(self
            .reconciler
            .mark_delisted(self.store.as_ref(), url, now)
            .await?)
    }

    /// Catalog URLs still marked available for `source` that were not seen
    /// in the current crawl. The crawling collaborator re-checks these and
    /// reports the ones that no longer resolve via [`Self::mark_delisted`].
    pub async fn unseen_available_urls(&self, source: &str, seen: &[String]) -> Result<Vec<String>> {
        let known = self
            .store
            .available_urls_for_source(source)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(known.into_iter().filter(|url| !seen.contains(url)).collect())
    }

    /// Process a batch and write the end-of-run reports.
    pub async fn run_batch(&self, observations: &[Observation]) -> Result<BatchOutcome> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let period =
            ReportingPeriod::from_processing_time(started_at, self.config.reporting_offset_months);

        let mut per_source: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for observation in observations {
            let counts = per_source.entry(observation.source.clone()).or_default();
            match self.process_at(observation, Utc::now()).await {
                Ok(_) => counts.0 += 1,
                Err(err) => {
                    warn!(url = %observation.url, error = %err, "observation dropped");
                    counts.1 += 1;
                }
            }
        }

        let finished_at = Utc::now();
        let elapsed_seconds = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
        let summaries: Vec<RunSummary> = per_source
            .into_iter()
            .map(|(source, (scraped, dropped))| RunSummary {
                source,
                scraped_at: period.start(),
                items_scraped: scraped,
                items_dropped: dropped,
                errors: dropped,
                elapsed_seconds,
            })
            .collect();

        let reports_dir = self
            .reports
            .write(self.store.as_ref(), run_id, started_at, finished_at, &summaries)
            .await?;

        Ok(BatchOutcome {
            run_id,
            started_at,
            finished_at,
            summaries,
            reports_dir,
        })
    }

    async fn archive_raw(&self, observation: &Observation, now: DateTime<Utc>) -> Result<Uuid> {
        let html = observation.raw_html.clone().unwrap_or_default();
        let json = observation.raw_json.clone().unwrap_or_default();
        let mut payload = html.clone().into_bytes();
        payload.extend_from_slice(json.as_bytes());
        let entry = RawArchiveEntry {
            id: Uuid::new_v4(),
            url: observation.url.clone(),
            html,
            json,
            content_hash: sha256_hex(&payload),
            archived_at: now,
        };
        let id = entry.id;
        match self.store.append_archive(entry).await {
            Ok(()) => Ok(id),
            Err(err) => {
                self.capture_failure(&observation.url, "archive", &err.to_string(), None, now)
                    .await;
                Err(anyhow::anyhow!(err).context("archiving raw payload"))
            }
        }
    }

    /// Record the failure (deduplicated by url+message) and delete the
    /// archive row written for this observation so no orphan survives.
    async fn capture_failure(
        &self,
        url: &str,
        stage: &str,
        message: &str,
        archive_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) {
        let error = ErrorRecord {
            id: Uuid::new_v4(),
            url: url.to_string(),
            stage: stage.to_string(),
            message: message.to_string(),
            recorded_at: now,
        };
        if let Err(err) = self.store.record_error(error).await {
            if !err.is_unique_violation() {
                warn!(url, error = %err, "failed to record error");
            }
        }
        if let Some(archive_id) = archive_id {
            if let Err(err) = self.store.delete_archive(archive_id).await {
                warn!(url, error = %err, "failed to compensate archive row");
            }
        }
    }
}

fn outcome_label(outcome: &ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::Created(_) => "created",
        ReconcileOutcome::Updated { .. } => "updated",
        ReconcileOutcome::Unchanged(_) => "unchanged",
    }
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

/// Optional cron scheduler for recurring ingest runs; the host orchestrator
/// wires the actual batch trigger.
pub async fn maybe_build_scheduler(config: &EngineConfig) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in [&config.ingest_cron_1, &config.ingest_cron_2] {
        let job = Job::new_async(cron.as_str(), |_uuid, _l| {
            Box::pin(async move {
                warn!("scheduled ingest tick; run_batch is wired by the host orchestrator");
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(Some(sched))
}
