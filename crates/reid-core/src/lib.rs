//! Core domain model for the REID catalog: observations delivered by the
//! crawling collaborator, assembled listing candidates, durable catalog
//! records, and the field-level merge rules applied on reconciliation.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

pub const CRATE_NAME: &str = "reid-core";

/// Property types the validation layer accepts without flagging.
pub const KNOWN_PROPERTY_TYPES: &[&str] = &[
    "Villa",
    "House",
    "Land",
    "Apartment",
    "Hotel",
    "Townhouse",
    "Commercial",
    "Loft",
];

/// Contract types the validation layer accepts without flagging.
pub const KNOWN_CONTRACT_TYPES: &[&str] = &["Freehold", "Leasehold", "Rental"];

/// Incoming price value meaning "unknown, keep whatever is stored".
pub const PRICE_UNKNOWN: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Availability {
    #[default]
    Available,
    Sold,
    Delisted,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Available => "Available",
            Availability::Sold => "Sold",
            Availability::Delisted => "Delisted",
        }
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Currency {
    #[default]
    #[serde(rename = "IDR")]
    Idr,
    #[serde(rename = "USD")]
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Idr => "IDR",
            Currency::Usd => "USD",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog segment a record is filed under. Recomputed on every successful
/// write, never stored stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Segment {
    #[serde(rename = "LUXURY LISTINGS")]
    Luxury,
    #[serde(rename = "ALL LAND")]
    AllLand,
    #[default]
    #[serde(rename = "DATA")]
    Data,
}

impl Segment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Luxury => "LUXURY LISTINGS",
            Segment::AllLand => "ALL LAND",
            Segment::Data => "DATA",
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scrape result for a single listing URL, as handed over by the crawling
/// collaborator. Raw text fragments per semantic field; the site-specific
/// selection that isolated them is not our concern. Consumed once by the
/// assembler and never persisted as such.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub source: String,
    pub url: String,
    pub scraped_at: DateTime<Utc>,
    pub raw_html: Option<String>,
    pub raw_json: Option<String>,
    pub property_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub region: Option<String>,
    pub location_text: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub price_text: Option<String>,
    pub contract_text: Option<String>,
    pub property_type_text: Option<String>,
    pub lease_text: Option<String>,
    pub land_size_text: Option<String>,
    pub build_size_text: Option<String>,
    pub bedrooms_text: Option<String>,
    pub bathrooms_text: Option<String>,
    pub listed_date_text: Option<String>,
    #[serde(default)]
    pub availability_labels: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Observation {
    pub fn new(source: impl Into<String>, url: impl Into<String>, scraped_at: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            url: url.into(),
            scraped_at,
            raw_html: None,
            raw_json: None,
            property_id: None,
            title: None,
            description: None,
            image_url: None,
            region: None,
            location_text: None,
            longitude: None,
            latitude: None,
            price_text: None,
            contract_text: None,
            property_type_text: None,
            lease_text: None,
            land_size_text: None,
            build_size_text: None,
            bedrooms_text: None,
            bathrooms_text: None,
            listed_date_text: None,
            availability_labels: Vec::new(),
            labels: Vec::new(),
        }
    }
}

/// Typed output of the listing assembler, ready for reconciliation.
/// `price` uses [`PRICE_UNKNOWN`] as the "unknown" sentinel; `0` means the
/// listing carries no price and will be flagged by validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingCandidate {
    pub source: String,
    pub url: String,
    pub scraped_at: DateTime<Utc>,
    pub property_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub region: Option<String>,
    pub location: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub contract_type: Option<String>,
    pub property_type: Option<String>,
    pub leasehold_years: Option<f64>,
    pub listed_date: Option<NaiveDate>,
    pub bedrooms: Option<f64>,
    pub bathrooms: Option<f64>,
    pub build_size: Option<f64>,
    pub land_size: Option<f64>,
    pub land_zoning: Option<String>,
    pub price: i64,
    pub currency: Option<Currency>,
    pub availability: Availability,
    pub is_off_plan: bool,
    pub sold_at: Option<DateTime<Utc>>,
}

impl ListingCandidate {
    pub fn new(source: impl Into<String>, url: impl Into<String>, scraped_at: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            url: url.into(),
            scraped_at,
            property_id: None,
            title: None,
            description: None,
            image_url: None,
            region: None,
            location: None,
            longitude: None,
            latitude: None,
            contract_type: None,
            property_type: None,
            leasehold_years: None,
            listed_date: None,
            bedrooms: None,
            bathrooms: None,
            build_size: None,
            land_size: None,
            land_zoning: None,
            price: 0,
            currency: None,
            availability: Availability::Available,
            is_off_plan: false,
            sold_at: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }
}

/// One field mutation recorded during reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub field: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

impl ChangeEntry {
    fn new(field: &str, old: serde_json::Value, new: serde_json::Value) -> Self {
        Self {
            field: field.to_string(),
            old,
            new,
        }
    }
}

/// The durable, per-URL catalog entry. Never physically deleted; its
/// `availability` transitions to Sold/Delisted instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: Uuid,
    pub reid_id: String,
    pub property_id: Option<String>,
    pub source: String,
    pub url: String,
    pub title: Option<String>,
    pub description: String,
    pub image_url: String,
    pub region: Option<String>,
    pub location: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub contract_type: Option<String>,
    pub property_type: Option<String>,
    pub leasehold_years: Option<f64>,
    pub listed_date: Option<NaiveDate>,
    pub bedrooms: Option<f64>,
    pub bathrooms: Option<f64>,
    pub build_size: Option<f64>,
    pub land_size: Option<f64>,
    pub land_zoning: Option<String>,
    pub price: i64,
    pub currency: Currency,
    pub is_available: bool,
    pub availability: Availability,
    pub is_off_plan: bool,
    pub sold_at: Option<DateTime<Utc>>,
    pub segment: Segment,
    pub scraped_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogRecord {
    /// Materialize a brand-new record from an assembled candidate.
    ///
    /// `sold_stamp` is the first-of-month timestamp used when the candidate
    /// already arrives Sold/Delisted, so the `sold_at`-iff-not-available
    /// invariant holds from the very first write.
    pub fn from_candidate(candidate: &ListingCandidate, reid_id: String, now: DateTime<Utc>, sold_stamp: DateTime<Utc>) -> Self {
        let availability = candidate.availability;
        let sold_at = if availability == Availability::Available {
            None
        } else {
            candidate.sold_at.or(Some(sold_stamp))
        };
        Self {
            id: Uuid::new_v4(),
            reid_id,
            property_id: candidate.property_id.clone(),
            source: candidate.source.clone(),
            url: candidate.url.clone(),
            title: candidate.title.clone(),
            description: candidate.description.clone().unwrap_or_default(),
            image_url: candidate.image_url.clone().unwrap_or_default(),
            region: candidate.region.clone(),
            location: candidate.location.clone(),
            longitude: candidate.longitude,
            latitude: candidate.latitude,
            contract_type: candidate.contract_type.clone(),
            property_type: candidate.property_type.clone(),
            leasehold_years: candidate.leasehold_years,
            listed_date: candidate.listed_date,
            bedrooms: candidate.bedrooms,
            bathrooms: candidate.bathrooms,
            build_size: candidate.build_size,
            land_size: candidate.land_size,
            land_zoning: candidate.land_zoning.clone(),
            price: candidate.price.max(0),
            currency: candidate.currency.unwrap_or_default(),
            is_available: availability == Availability::Available,
            availability,
            is_off_plan: candidate.is_off_plan,
            sold_at,
            segment: Segment::Data,
            scraped_at: candidate.scraped_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// The exact-match tuple used by duplicate detection.
    pub fn duplicate_tuple(&self) -> DuplicateTuple<'_> {
        DuplicateTuple {
            price: self.price,
            contract_type: self.contract_type.as_deref(),
            bedrooms: self.bedrooms,
            bathrooms: self.bathrooms,
            land_size: self.land_size,
            build_size: self.build_size,
        }
    }

    /// Merge an incoming candidate into this record, returning the change
    /// log for the pass. Field rules, in order:
    ///
    /// - `availability` not Available forces `is_available = false` and
    ///   stamps `sold_at` with the first instant of the processing month,
    ///   suppressing the authoritative `sold_at` comparison for this pass;
    /// - an incoming price of [`PRICE_UNKNOWN`] never overwrites;
    /// - `leasehold_years` and `sold_at` are authoritative: overwritten on
    ///   any difference, even back to empty;
    /// - everything else fills a missing value or overwrites a differing
    ///   one, and never replaces a populated field with an empty one.
    pub fn merge_candidate(&mut self, candidate: &ListingCandidate, sold_stamp: DateTime<Utc>) -> Vec<ChangeEntry> {
        let mut changes = Vec::new();

        // price
        if candidate.price != PRICE_UNKNOWN {
            merge_number_i64("price", &mut self.price, candidate.price, &mut changes);
        }

        // currency
        if let Some(new) = candidate.currency {
            if new != self.currency {
                changes.push(ChangeEntry::new(
                    "currency",
                    json!(self.currency.as_str()),
                    json!(new.as_str()),
                ));
                self.currency = new;
            }
        }

        // availability
        let mut availability_forced = false;
        if candidate.availability != Availability::Available {
            if self.availability != candidate.availability
                || self.is_available
                || self.sold_at != Some(sold_stamp)
            {
                changes.push(ChangeEntry::new(
                    "availability",
                    json!(self.availability.as_str()),
                    json!(candidate.availability.as_str()),
                ));
            }
            self.availability = candidate.availability;
            self.is_available = false;
            self.sold_at = Some(sold_stamp);
            availability_forced = true;
        } else if self.availability != Availability::Available {
            // relisted: back to Available through the ordinary overwrite rule
            changes.push(ChangeEntry::new(
                "availability",
                json!(self.availability.as_str()),
                json!(candidate.availability.as_str()),
            ));
            self.availability = Availability::Available;
        }

        // is_available only ever flips false -> true here; the forced path
        // above is the only way down.
        if !availability_forced && candidate.is_available() && !self.is_available {
            changes.push(ChangeEntry::new("is_available", json!(false), json!(true)));
            self.is_available = true;
        }

        // is_off_plan
        if candidate.is_off_plan && !self.is_off_plan {
            changes.push(ChangeEntry::new("is_off_plan", json!(false), json!(true)));
            self.is_off_plan = true;
        }

        merge_string("image_url", &mut self.image_url, candidate.image_url.as_deref(), &mut changes);
        merge_string("description", &mut self.description, candidate.description.as_deref(), &mut changes);
        merge_opt_string("location", &mut self.location, candidate.location.as_deref(), &mut changes);

        // leasehold_years: authoritative on every observation
        if candidate.leasehold_years != self.leasehold_years {
            changes.push(ChangeEntry::new(
                "leasehold_years",
                json!(self.leasehold_years),
                json!(candidate.leasehold_years),
            ));
            self.leasehold_years = candidate.leasehold_years;
        }

        merge_opt_string("contract_type", &mut self.contract_type, candidate.contract_type.as_deref(), &mut changes);
        merge_opt_string("property_type", &mut self.property_type, candidate.property_type.as_deref(), &mut changes);
        merge_opt_number("bedrooms", &mut self.bedrooms, candidate.bedrooms, &mut changes);
        merge_opt_number("bathrooms", &mut self.bathrooms, candidate.bathrooms, &mut changes);
        merge_opt_number("build_size", &mut self.build_size, candidate.build_size, &mut changes);
        merge_opt_number("land_size", &mut self.land_size, candidate.land_size, &mut changes);
        merge_opt_string("land_zoning", &mut self.land_zoning, candidate.land_zoning.as_deref(), &mut changes);
        merge_opt_string("property_id", &mut self.property_id, candidate.property_id.as_deref(), &mut changes);

        if let Some(new) = candidate.listed_date {
            if self.listed_date != Some(new) {
                changes.push(ChangeEntry::new(
                    "listed_date",
                    json!(self.listed_date),
                    json!(new),
                ));
                self.listed_date = Some(new);
            }
        }

        // sold_at: authoritative, unless this pass already stamped it
        if !availability_forced && candidate.sold_at != self.sold_at {
            changes.push(ChangeEntry::new(
                "sold_at",
                json!(self.sold_at),
                json!(candidate.sold_at),
            ));
            self.sold_at = candidate.sold_at;
        }

        changes
    }
}

/// Borrowed view of the six fields duplicate detection matches on.
/// `None` never matches anything, mirroring SQL NULL comparison semantics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicateTuple<'a> {
    pub price: i64,
    pub contract_type: Option<&'a str>,
    pub bedrooms: Option<f64>,
    pub bathrooms: Option<f64>,
    pub land_size: Option<f64>,
    pub build_size: Option<f64>,
}

impl DuplicateTuple<'_> {
    pub fn matches(&self, other: &DuplicateTuple<'_>) -> bool {
        fn both<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        self.price == other.price
            && both(self.contract_type, other.contract_type)
            && both(self.bedrooms, other.bedrooms)
            && both(self.bathrooms, other.bathrooms)
            && both(self.land_size, other.land_size)
            && both(self.build_size, other.build_size)
    }
}

fn merge_string(field: &str, old: &mut String, new: Option<&str>, changes: &mut Vec<ChangeEntry>) {
    let Some(new) = new.filter(|s| !s.is_empty()) else {
        return;
    };
    if old.is_empty() || old.as_str() != new {
        changes.push(ChangeEntry::new(field, json!(old.clone()), json!(new)));
        *old = new.to_string();
    }
}

fn merge_opt_string(field: &str, old: &mut Option<String>, new: Option<&str>, changes: &mut Vec<ChangeEntry>) {
    let Some(new) = new.filter(|s| !s.is_empty()) else {
        return;
    };
    let differs = match old.as_deref() {
        Some(existing) if !existing.is_empty() => existing != new,
        _ => true,
    };
    if differs {
        changes.push(ChangeEntry::new(field, json!(old.clone()), json!(new)));
        *old = Some(new.to_string());
    }
}

fn merge_opt_number(field: &str, old: &mut Option<f64>, new: Option<f64>, changes: &mut Vec<ChangeEntry>) {
    let Some(new) = new.filter(|v| *v != 0.0) else {
        return;
    };
    let differs = match *old {
        Some(existing) if existing != 0.0 => existing != new,
        _ => true,
    };
    if differs {
        changes.push(ChangeEntry::new(field, json!(*old), json!(new)));
        *old = Some(new);
    }
}

fn merge_number_i64(field: &str, old: &mut i64, new: i64, changes: &mut Vec<ChangeEntry>) {
    if new == 0 {
        return;
    }
    if *old == 0 || *old != new {
        changes.push(ChangeEntry::new(field, json!(*old), json!(new)));
        *old = new;
    }
}

/// Structural-quality flags raised by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    TooManyBedrooms,
    NoBedrooms,
    NoPrice,
    NoTitle,
    NoDescription,
    NoLocation,
    BuildSizeExceedsLandSize,
    NoLeaseholdYears,
    NotAvailable,
    UnknownPropertyType,
    LandWithBedrooms,
    UnknownContractType,
    NoLandZoning,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::TooManyBedrooms => "has_more_than_13_bedrooms",
            IssueKind::NoBedrooms => "no_bedrooms",
            IssueKind::NoPrice => "no_price",
            IssueKind::NoTitle => "no_title",
            IssueKind::NoDescription => "no_description",
            IssueKind::NoLocation => "no_location",
            IssueKind::BuildSizeExceedsLandSize => "build_size_greater_than_land_size",
            IssueKind::NoLeaseholdYears => "no_leasehold_years",
            IssueKind::NotAvailable => "not_available",
            IssueKind::UnknownPropertyType => "unknown_property_type",
            IssueKind::LandWithBedrooms => "land_with_bedrooms",
            IssueKind::UnknownContractType => "unknown_contract_type",
            IssueKind::NoLandZoning => "no_land_zoning",
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded belief that two URLs describe one physical property.
/// Append-only, unique per ordered pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicatePair {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub source_url: String,
    pub duplicate_url: String,
}

/// Per-record structural-quality flag. Marked solved when the rule stops
/// triggering, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTag {
    pub id: Uuid,
    pub record_id: Uuid,
    pub name: String,
    pub is_solved: bool,
    pub is_ignored: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A captured pipeline failure, unique per (url, message); cleared when the
/// same URL later succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub url: String,
    pub stage: String,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only raw payload row kept for audit/replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawArchiveEntry {
    pub id: Uuid,
    pub url: String,
    pub html: String,
    pub json: String,
    pub content_hash: String,
    pub archived_at: DateTime<Utc>,
}

/// First instant of the month `now` falls in.
pub fn first_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .expect("first of month is always a valid timestamp")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 30, 0).single().unwrap()
    }

    fn base_candidate() -> ListingCandidate {
        let mut c = ListingCandidate::new("Bali Realty", "https://example.com/villa-1", ts(2026, 3, 14));
        c.title = Some("Villa in Canggu".into());
        c.description = Some("Three bedroom villa".into());
        c.location = Some("Canggu".into());
        c.contract_type = Some("Freehold".into());
        c.property_type = Some("Villa".into());
        c.bedrooms = Some(3.0);
        c.bathrooms = Some(2.0);
        c.land_size = Some(400.0);
        c.build_size = Some(250.0);
        c.price = 4_500_000_000;
        c.currency = Some(Currency::Idr);
        c
    }

    fn base_record() -> CatalogRecord {
        CatalogRecord::from_candidate(
            &base_candidate(),
            "REID_26_02_BREL_001".into(),
            ts(2026, 3, 14),
            first_of_month(ts(2026, 3, 14)),
        )
    }

    #[test]
    fn merge_of_identical_candidate_is_idempotent() {
        let mut record = base_record();
        let before = record.clone();
        let changes = record.merge_candidate(&base_candidate(), first_of_month(ts(2026, 3, 14)));
        assert!(changes.is_empty(), "unexpected changes: {changes:?}");
        assert_eq!(record, before);
    }

    #[test]
    fn unknown_price_sentinel_never_overwrites() {
        let mut record = base_record();
        let mut candidate = base_candidate();
        candidate.price = PRICE_UNKNOWN;
        let changes = record.merge_candidate(&candidate, first_of_month(ts(2026, 3, 14)));
        assert!(changes.is_empty());
        assert_eq!(record.price, 4_500_000_000);
    }

    #[test]
    fn sold_transition_logs_one_change_and_stamps_sold_at() {
        let mut record = base_record();
        let mut candidate = base_candidate();
        candidate.availability = Availability::Sold;
        let stamp = first_of_month(ts(2026, 3, 14));
        let changes = record.merge_candidate(&candidate, stamp);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "availability");
        assert_eq!(changes[0].old, json!("Available"));
        assert_eq!(changes[0].new, json!("Sold"));
        assert!(!record.is_available);
        assert_eq!(record.availability, Availability::Sold);
        assert_eq!(record.sold_at, Some(stamp));
    }

    #[test]
    fn delisted_transition_applies_regardless_of_prior_state() {
        let mut record = base_record();
        record.availability = Availability::Sold;
        record.is_available = false;
        record.sold_at = Some(first_of_month(ts(2026, 1, 2)));
        let mut candidate = base_candidate();
        candidate.availability = Availability::Delisted;
        let stamp = first_of_month(ts(2026, 3, 14));
        let changes = record.merge_candidate(&candidate, stamp);
        assert_eq!(changes.len(), 1);
        assert_eq!(record.availability, Availability::Delisted);
        assert_eq!(record.sold_at, Some(stamp));
    }

    #[test]
    fn sold_record_reobserved_next_month_restamps_sold_at() {
        let mut record = base_record();
        record.availability = Availability::Sold;
        record.is_available = false;
        record.sold_at = Some(first_of_month(ts(2026, 1, 2)));
        let mut candidate = base_candidate();
        candidate.availability = Availability::Sold;
        let stamp = first_of_month(ts(2026, 3, 14));
        let changes = record.merge_candidate(&candidate, stamp);
        assert_eq!(changes.len(), 1);
        assert_eq!(record.sold_at, Some(stamp));

        // and a second pass in the same month is silent
        let changes = record.merge_candidate(&candidate, stamp);
        assert!(changes.is_empty());
    }

    #[test]
    fn relisting_restores_availability_and_clears_sold_at() {
        let mut record = base_record();
        record.availability = Availability::Sold;
        record.is_available = false;
        record.sold_at = Some(first_of_month(ts(2026, 1, 2)));
        let candidate = base_candidate();
        let changes = record.merge_candidate(&candidate, first_of_month(ts(2026, 3, 14)));
        assert!(record.is_available);
        assert_eq!(record.availability, Availability::Available);
        assert_eq!(record.sold_at, None);
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        assert!(fields.contains(&"availability"));
        assert!(fields.contains(&"is_available"));
        assert!(fields.contains(&"sold_at"));
    }

    #[test]
    fn leasehold_years_are_authoritative_even_when_smaller() {
        let mut record = base_record();
        record.leasehold_years = Some(25.0);
        let mut candidate = base_candidate();
        candidate.leasehold_years = Some(20.0);
        let changes = record.merge_candidate(&candidate, first_of_month(ts(2026, 3, 14)));
        assert_eq!(record.leasehold_years, Some(20.0));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "leasehold_years");
    }

    #[test]
    fn populated_fields_are_never_replaced_by_empty_ones() {
        let mut record = base_record();
        let mut candidate = base_candidate();
        candidate.location = None;
        candidate.description = Some(String::new());
        candidate.bedrooms = Some(0.0);
        let changes = record.merge_candidate(&candidate, first_of_month(ts(2026, 3, 14)));
        assert!(changes.is_empty());
        assert_eq!(record.location.as_deref(), Some("Canggu"));
        assert_eq!(record.description, "Three bedroom villa");
        assert_eq!(record.bedrooms, Some(3.0));
    }

    #[test]
    fn differing_populated_fields_are_overwritten() {
        let mut record = base_record();
        let mut candidate = base_candidate();
        candidate.location = Some("Umalas".into());
        candidate.price = 5_000_000_000;
        let changes = record.merge_candidate(&candidate, first_of_month(ts(2026, 3, 14)));
        assert_eq!(record.location.as_deref(), Some("Umalas"));
        assert_eq!(record.price, 5_000_000_000);
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn duplicate_tuple_null_fields_never_match() {
        let mut a = base_record();
        let mut b = base_record();
        a.bedrooms = None;
        b.bedrooms = None;
        assert!(!a.duplicate_tuple().matches(&b.duplicate_tuple()));
        a.bedrooms = Some(3.0);
        b.bedrooms = Some(3.0);
        assert!(a.duplicate_tuple().matches(&b.duplicate_tuple()));
    }

    #[test]
    fn new_record_with_sold_candidate_gets_sold_stamp() {
        let mut candidate = base_candidate();
        candidate.availability = Availability::Sold;
        let stamp = first_of_month(ts(2026, 3, 14));
        let record = CatalogRecord::from_candidate(&candidate, "REID_26_02_BREL_002".into(), ts(2026, 3, 14), stamp);
        assert!(!record.is_available);
        assert_eq!(record.sold_at, Some(stamp));
    }

    #[test]
    fn first_of_month_truncates_to_midnight() {
        let stamp = first_of_month(ts(2026, 3, 14));
        assert_eq!(stamp, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().unwrap());
    }
}
