//! Catalog persistence boundary.
//!
//! The real store is a transactional row store owned by a separate
//! collaborator; this crate defines the `CatalogStore` trait the engine
//! talks to, the uniqueness-aware error taxonomy, an in-memory reference
//! implementation carrying the same constraints, and the scoped lock
//! registry used to serialize identifier allocation and per-URL
//! reconciliation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reid_core::{
    CatalogRecord, DuplicatePair, ErrorRecord, IssueTag, RawArchiveEntry, Segment,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

pub const CRATE_NAME: &str = "reid-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: &'static str },
    #[error("no catalog record for url {0}")]
    RecordNotFound(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Benign on append-only side tables: the row is already there.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

/// Which other records a duplicate search is allowed to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateScope {
    DifferentSource,
    SameSource,
}

/// CRUD surface over the five persisted entities. Implementations enforce
/// the schema's uniqueness constraints: `listing.url`,
/// `duplicate_pair(source_url, duplicate_url)`, `issue_tag(record_id, name)`
/// and `error(url, message)`.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    // ── Catalog records ───────────────────────────────────────────────

    async fn insert_record(&self, record: CatalogRecord) -> Result<(), StoreError>;

    async fn get_record(&self, url: &str) -> Result<Option<CatalogRecord>, StoreError>;

    async fn update_record(&self, record: CatalogRecord) -> Result<(), StoreError>;

    /// First record matching `record`'s duplicate tuple within `scope`,
    /// excluding `record`'s own URL.
    async fn find_matching_record(
        &self,
        record: &CatalogRecord,
        scope: DuplicateScope,
    ) -> Result<Option<CatalogRecord>, StoreError>;

    /// Highest allocated sequence among reid ids sharing `prefix`.
    async fn max_sequence(&self, prefix: &str) -> Result<Option<u32>, StoreError>;

    /// URLs of still-available records for one source.
    async fn available_urls_for_source(&self, source: &str) -> Result<Vec<String>, StoreError>;

    async fn records_by_segment(&self, segment: Segment) -> Result<Vec<CatalogRecord>, StoreError>;

    // ── Duplicate pairs ───────────────────────────────────────────────

    async fn insert_duplicate_pair(&self, pair: DuplicatePair) -> Result<(), StoreError>;

    async fn duplicate_pairs(&self) -> Result<Vec<DuplicatePair>, StoreError>;

    // ── Issue tags ────────────────────────────────────────────────────

    async fn tags_for_record(&self, record_id: Uuid) -> Result<Vec<IssueTag>, StoreError>;

    async fn insert_issue_tag(&self, tag: IssueTag) -> Result<(), StoreError>;

    async fn set_issue_tag_solved(
        &self,
        record_id: Uuid,
        name: &str,
        solved: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // ── Error records ─────────────────────────────────────────────────

    async fn record_error(&self, error: ErrorRecord) -> Result<(), StoreError>;

    async fn clear_errors(&self, url: &str) -> Result<(), StoreError>;

    async fn errors_for_url(&self, url: &str) -> Result<Vec<ErrorRecord>, StoreError>;

    // ── Raw archive ───────────────────────────────────────────────────

    async fn append_archive(&self, entry: RawArchiveEntry) -> Result<(), StoreError>;

    async fn delete_archive(&self, id: Uuid) -> Result<(), StoreError>;

    async fn archive_for_url(&self, url: &str) -> Result<Vec<RawArchiveEntry>, StoreError>;
}

/// Content hash used on raw archive rows and report manifests.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, CatalogRecord>,
    pairs: Vec<DuplicatePair>,
    tags: Vec<IssueTag>,
    errors: Vec<ErrorRecord>,
    archive: Vec<RawArchiveEntry>,
}

/// In-memory reference store. Single mutex over the whole state: every
/// operation is one transaction, which is exactly the behavior the engine
/// may assume of the real backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn insert_record(&self, record: CatalogRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.records.contains_key(&record.url) {
            return Err(StoreError::UniqueViolation {
                constraint: "listing.url",
            });
        }
        inner.records.insert(record.url.clone(), record);
        Ok(())
    }

    async fn get_record(&self, url: &str) -> Result<Option<CatalogRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.records.get(url).cloned())
    }

    async fn update_record(&self, record: CatalogRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.records.contains_key(&record.url) {
            return Err(StoreError::RecordNotFound(record.url.clone()));
        }
        inner.records.insert(record.url.clone(), record);
        Ok(())
    }

    async fn find_matching_record(
        &self,
        record: &CatalogRecord,
        scope: DuplicateScope,
    ) -> Result<Option<CatalogRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let tuple = record.duplicate_tuple();
        let found = inner
            .records
            .values()
            .filter(|other| other.url != record.url)
            .filter(|other| match scope {
                DuplicateScope::DifferentSource => other.source != record.source,
                DuplicateScope::SameSource => other.source == record.source,
            })
            .find(|other| other.duplicate_tuple().matches(&tuple));
        Ok(found.cloned())
    }

    async fn max_sequence(&self, prefix: &str) -> Result<Option<u32>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|r| r.reid_id.starts_with(prefix))
            .filter_map(|r| r.reid_id.rsplit('_').next())
            .filter_map(|seq| seq.parse::<u32>().ok())
            .max())
    }

    async fn available_urls_for_source(&self, source: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|r| r.source == source && r.is_available)
            .map(|r| r.url.clone())
            .collect())
    }

    async fn records_by_segment(&self, segment: Segment) -> Result<Vec<CatalogRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|r| r.segment == segment)
            .cloned()
            .collect())
    }

    async fn insert_duplicate_pair(&self, pair: DuplicatePair) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let exists = inner
            .pairs
            .iter()
            .any(|p| p.source_url == pair.source_url && p.duplicate_url == pair.duplicate_url);
        if exists {
            return Err(StoreError::UniqueViolation {
                constraint: "duplicate_pair(source_url, duplicate_url)",
            });
        }
        inner.pairs.push(pair);
        Ok(())
    }

    async fn duplicate_pairs(&self) -> Result<Vec<DuplicatePair>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.pairs.clone())
    }

    async fn tags_for_record(&self, record_id: Uuid) -> Result<Vec<IssueTag>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tags
            .iter()
            .filter(|t| t.record_id == record_id)
            .cloned()
            .collect())
    }

    async fn insert_issue_tag(&self, tag: IssueTag) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let exists = inner
            .tags
            .iter()
            .any(|t| t.record_id == tag.record_id && t.name == tag.name);
        if exists {
            return Err(StoreError::UniqueViolation {
                constraint: "issue_tag(record_id, name)",
            });
        }
        inner.tags.push(tag);
        Ok(())
    }

    async fn set_issue_tag_solved(
        &self,
        record_id: Uuid,
        name: &str,
        solved: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        for tag in inner
            .tags
            .iter_mut()
            .filter(|t| t.record_id == record_id && t.name == name)
        {
            tag.is_solved = solved;
            tag.updated_at = now;
        }
        Ok(())
    }

    async fn record_error(&self, error: ErrorRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let exists = inner
            .errors
            .iter()
            .any(|e| e.url == error.url && e.message == error.message);
        if exists {
            return Err(StoreError::UniqueViolation {
                constraint: "error(url, message)",
            });
        }
        inner.errors.push(error);
        Ok(())
    }

    async fn clear_errors(&self, url: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.errors.retain(|e| e.url != url);
        Ok(())
    }

    async fn errors_for_url(&self, url: &str) -> Result<Vec<ErrorRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.errors.iter().filter(|e| e.url == url).cloned().collect())
    }

    async fn append_archive(&self, entry: RawArchiveEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.archive.push(entry);
        Ok(())
    }

    async fn delete_archive(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.archive.retain(|a| a.id != id);
        Ok(())
    }

    async fn archive_for_url(&self, url: &str) -> Result<Vec<RawArchiveEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.archive.iter().filter(|a| a.url == url).cloned().collect())
    }
}

/// Per-key async lock registry. Identifier allocation locks on the
/// `(period, source-code)` scope string, reconciliation locks on the URL;
/// unrelated keys never contend.
#[derive(Default)]
pub struct ScopedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ScopedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
