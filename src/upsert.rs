//! Duplicate-safe persistence of a finished record.
//!
//! One persisted row per (entity_slug, period_date): an existing row is
//! replaced with a full-field update, never a partial merge. Correctness
//! under concurrent writers relies on the store's native uniqueness
//! constraint rather than an in-process lock; a lost insert race is retried
//! once as an update.

use crate::error::{ExtractError, Result};
use crate::record::ExtractedRecord;
use crate::schema::EntityProfile;
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStatus {
    Inserted,
    Updated,
    Rejected,
    /// Extraction succeeded but no persistence handle is configured.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub status: UpsertStatus,
    pub record_id: Option<String>,
    pub reason: Option<String>,
}

impl UpsertOutcome {
    fn inserted(id: String) -> Self {
        Self {
            status: UpsertStatus::Inserted,
            record_id: Some(id),
            reason: None,
        }
    }

    fn updated(id: String) -> Self {
        Self {
            status: UpsertStatus::Updated,
            record_id: Some(id),
            reason: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: UpsertStatus::Rejected,
            record_id: None,
            reason: Some(reason.into()),
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: UpsertStatus::Skipped,
            record_id: None,
            reason: Some(reason.into()),
        }
    }
}

/// The extraction context a record must match before it may be written.
/// Guards against cross-entity contamination when a fixed per-entity
/// extraction flow is in use.
#[derive(Debug, Clone, Default)]
pub struct UpsertContext {
    pub expected_slug: Option<String>,
}

impl UpsertContext {
    pub fn for_slug(slug: impl Into<String>) -> Self {
        Self {
            expected_slug: Some(slug.into()),
        }
    }
}

/// A keyed store supporting point lookup on the natural key, insert, and
/// full-record update. Implementations must surface a unique-constraint
/// violation on insert as `DuplicateKeyConflict`.
pub trait RecordStore {
    fn find_id(&self, table: &str, entity_slug: &str, period_date: NaiveDate)
        -> Result<Option<String>>;
    fn insert(&self, table: &str, row: &Map<String, Value>) -> Result<String>;
    fn update(&self, table: &str, id: &str, row: &Map<String, Value>) -> Result<String>;
}

/// Checks a record against the extraction context before any write.
/// Returns a rejection reason, or `None` when the record may be persisted.
pub fn validate_for_push(record: &ExtractedRecord, ctx: &UpsertContext) -> Option<String> {
    if record.entity_slug.trim().is_empty() {
        return Some("record has no entity_slug".to_string());
    }
    if let Some(expected) = &ctx.expected_slug {
        if expected != &record.entity_slug {
            return Some(format!(
                "entity_slug '{}' does not match extraction context '{}'",
                record.entity_slug, expected
            ));
        }
    }
    if record.has_pending() {
        return Some("record has unnormalized metric values".to_string());
    }
    None
}

/// Builds the write payload: full row in schema order with the surrogate
/// identity column stripped. A null `id` in the payload is a guaranteed
/// failure against a store enforcing a non-null identity constraint.
pub fn prepare_row(record: &ExtractedRecord, profile: &EntityProfile) -> Map<String, Value> {
    let mut row = record.to_row(profile);
    row.remove("id");
    row
}

pub struct UpsertCoordinator<'a> {
    store: Option<&'a dyn RecordStore>,
}

impl<'a> UpsertCoordinator<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store: Some(store) }
    }

    /// Coordinator with no configured store: every push degrades to
    /// `Skipped` so upstream flows can still present extraction results.
    pub fn without_store() -> Self {
        Self { store: None }
    }

    pub fn push(
        &self,
        record: &ExtractedRecord,
        profile: &EntityProfile,
        ctx: &UpsertContext,
    ) -> Result<UpsertOutcome> {
        if let Some(reason) = validate_for_push(record, ctx) {
            warn!("rejecting push for '{}': {}", record.entity_slug, reason);
            return Ok(UpsertOutcome::rejected(reason));
        }

        let store = match self.store {
            Some(store) => store,
            None => {
                info!("no persistence handle configured; skipping push");
                return Ok(UpsertOutcome::skipped("persistence not configured"));
            }
        };

        let row = prepare_row(record, profile);
        let table = profile.table.as_str();
        let slug = record.entity_slug.as_str();
        let date = record.period_date;

        match store.find_id(table, slug, date)? {
            Some(id) => {
                debug!("existing row {} for ({}, {}); updating", id, slug, date);
                let id = store.update(table, &id, &row)?;
                Ok(UpsertOutcome::updated(id))
            }
            None => match store.insert(table, &row) {
                Ok(id) => {
                    info!("inserted row {} for ({}, {})", id, slug, date);
                    Ok(UpsertOutcome::inserted(id))
                }
                Err(ExtractError::DuplicateKeyConflict { .. }) => {
                    // Lost the race between duplicate-check and insert:
                    // another writer got there first. Retry once as an update.
                    warn!("insert raced on ({}, {}); retrying as update", slug, date);
                    match store.find_id(table, slug, date)? {
                        Some(id) => {
                            let id = store.update(table, &id, &row)?;
                            Ok(UpsertOutcome::updated(id))
                        }
                        None => Err(ExtractError::DuplicateKeyConflict {
                            entity_slug: slug.to_string(),
                            period_date: date.to_string(),
                        }),
                    }
                }
                Err(e) => Err(e),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct StoredRow {
    id: String,
    row: Map<String, Value>,
}

#[derive(Default)]
struct MemoryInner {
    next_id: u64,
    rows: HashMap<(String, String, String), StoredRow>,
}

/// In-memory store keyed by (table, entity_slug, period_date). Enforces the
/// same uniqueness constraint a real store would.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(
        &self,
        table: &str,
        entity_slug: &str,
        period_date: NaiveDate,
    ) -> Option<Map<String, Value>> {
        let inner = self.inner.lock().ok()?;
        inner
            .rows
            .get(&key(table, entity_slug, period_date))
            .map(|stored| stored.row.clone())
    }
}

fn key(table: &str, slug: &str, date: NaiveDate) -> (String, String, String) {
    (table.to_string(), slug.to_string(), date.to_string())
}

fn row_natural_key(table: &str, row: &Map<String, Value>) -> Result<(String, String, String)> {
    let slug = row
        .get("entity_slug")
        .and_then(Value::as_str)
        .ok_or_else(|| ExtractError::ExtractionFailed("row missing entity_slug".to_string()))?;
    let date_str = row
        .get("period_date")
        .and_then(Value::as_str)
        .ok_or_else(|| ExtractError::ExtractionFailed("row missing period_date".to_string()))?;
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|_| ExtractError::InvalidDate(date_str.to_string()))?;
    Ok(key(table, slug, date))
}

impl RecordStore for MemoryStore {
    fn find_id(
        &self,
        table: &str,
        entity_slug: &str,
        period_date: NaiveDate,
    ) -> Result<Option<String>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| ExtractError::PersistenceUnavailable("store lock poisoned".to_string()))?;
        Ok(inner
            .rows
            .get(&key(table, entity_slug, period_date))
            .map(|stored| stored.id.clone()))
    }

    fn insert(&self, table: &str, row: &Map<String, Value>) -> Result<String> {
        if row.get("id").map(|v| v.is_null()).unwrap_or(false) {
            return Err(ExtractError::ExtractionFailed(
                "null identity column in insert payload".to_string(),
            ));
        }
        let natural_key = row_natural_key(table, row)?;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ExtractError::PersistenceUnavailable("store lock poisoned".to_string()))?;
        if inner.rows.contains_key(&natural_key) {
            return Err(ExtractError::DuplicateKeyConflict {
                entity_slug: natural_key.1,
                period_date: natural_key.2,
            });
        }
        inner.next_id += 1;
        let id = inner.next_id.to_string();
        inner.rows.insert(
            natural_key,
            StoredRow {
                id: id.clone(),
                row: row.clone(),
            },
        );
        Ok(id)
    }

    fn update(&self, table: &str, id: &str, row: &Map<String, Value>) -> Result<String> {
        let natural_key = row_natural_key(table, row)?;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ExtractError::PersistenceUnavailable("store lock poisoned".to_string()))?;
        match inner.rows.get_mut(&natural_key) {
            Some(stored) if stored.id == id => {
                // Full-field replacement, never a partial merge.
                stored.row = row.clone();
                Ok(id.to_string())
            }
            _ => Err(ExtractError::PersistenceUnavailable(format!(
                "no row {} to update in {}",
                id, table
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MetricValue;
    use crate::schema::builtin_profile;
    use std::collections::BTreeMap;

    fn record(slug: &str, revenue: f64) -> ExtractedRecord {
        let mut record = ExtractedRecord {
            entity_slug: slug.to_string(),
            period_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            currency_code: Some("USD".to_string()),
            metrics: BTreeMap::new(),
            texts: BTreeMap::new(),
        };
        record.set_metric("revenue", MetricValue::Number(revenue));
        record
    }

    #[test]
    fn test_insert_then_update_single_row() {
        let profile = builtin_profile("private-company").unwrap();
        let store = MemoryStore::new();
        let coordinator = UpsertCoordinator::new(&store);
        let ctx = UpsertContext::default();

        let first = coordinator
            .push(&record("private-company", 100.0), &profile, &ctx)
            .unwrap();
        assert_eq!(first.status, UpsertStatus::Inserted);
        let first_id = first.record_id.clone().unwrap();

        let second = coordinator
            .push(&record("private-company", 250.0), &profile, &ctx)
            .unwrap();
        assert_eq!(second.status, UpsertStatus::Updated);
        assert_eq!(second.record_id, Some(first_id));

        assert_eq!(store.len(), 1);
        let row = store
            .get(
                "private_company_financials",
                "private-company",
                NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            )
            .unwrap();
        // Second write wins in full.
        assert_eq!(row["revenue"], serde_json::json!(250.0));
    }

    #[test]
    fn test_slug_mismatch_rejected_without_write() {
        let profile = builtin_profile("private-company").unwrap();
        let store = MemoryStore::new();
        let coordinator = UpsertCoordinator::new(&store);
        let ctx = UpsertContext::for_slug("grab-com");

        let outcome = coordinator
            .push(&record("private-company", 100.0), &profile, &ctx)
            .unwrap();
        assert_eq!(outcome.status, UpsertStatus::Rejected);
        assert!(outcome.reason.unwrap().contains("does not match"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_missing_store_degrades_to_skipped() {
        let profile = builtin_profile("private-company").unwrap();
        let coordinator = UpsertCoordinator::without_store();

        let outcome = coordinator
            .push(
                &record("private-company", 100.0),
                &profile,
                &UpsertContext::default(),
            )
            .unwrap();
        assert_eq!(outcome.status, UpsertStatus::Skipped);
        assert!(outcome.record_id.is_none());
    }

    #[test]
    fn test_pending_metrics_rejected() {
        let profile = builtin_profile("private-company").unwrap();
        let store = MemoryStore::new();
        let coordinator = UpsertCoordinator::new(&store);

        let mut unnormalized = record("private-company", 100.0);
        unnormalized.set_metric("revenue", MetricValue::Pending("1.2B".to_string()));

        let outcome = coordinator
            .push(&unnormalized, &profile, &UpsertContext::default())
            .unwrap();
        assert_eq!(outcome.status, UpsertStatus::Rejected);
        assert!(store.is_empty());
    }

    #[test]
    fn test_prepare_row_strips_surrogate_id() {
        let profile = builtin_profile("private-company").unwrap();
        let row = prepare_row(&record("private-company", 1.0), &profile);
        assert!(!row.contains_key("id"));
        assert_eq!(row["entity_slug"], serde_json::json!("private-company"));
    }

    /// Store double simulating a writer that sneaks in between the duplicate
    /// check and the insert.
    struct RacingStore {
        inner: MemoryStore,
        raced: Mutex<bool>,
    }

    impl RacingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                raced: Mutex::new(false),
            }
        }
    }

    impl RecordStore for RacingStore {
        fn find_id(
            &self,
            table: &str,
            entity_slug: &str,
            period_date: NaiveDate,
        ) -> Result<Option<String>> {
            let mut raced = self.raced.lock().unwrap();
            if !*raced {
                // First check: pretend nothing is there, then let the
                // competing writer land its row.
                *raced = true;
                let mut row = Map::new();
                row.insert("entity_slug".to_string(), serde_json::json!(entity_slug));
                row.insert(
                    "period_date".to_string(),
                    serde_json::json!(period_date.to_string()),
                );
                row.insert("revenue".to_string(), serde_json::json!(1.0));
                self.inner.insert(table, &row)?;
                return Ok(None);
            }
            self.inner.find_id(table, entity_slug, period_date)
        }

        fn insert(&self, table: &str, row: &Map<String, Value>) -> Result<String> {
            self.inner.insert(table, row)
        }

        fn update(&self, table: &str, id: &str, row: &Map<String, Value>) -> Result<String> {
            self.inner.update(table, id, row)
        }
    }

    #[test]
    fn test_insert_race_retried_once_as_update() {
        let profile = builtin_profile("private-company").unwrap();
        let store = RacingStore::new();
        let coordinator = UpsertCoordinator::new(&store);

        let outcome = coordinator
            .push(
                &record("private-company", 42.0),
                &profile,
                &UpsertContext::default(),
            )
            .unwrap();
        assert_eq!(outcome.status, UpsertStatus::Updated);

        let row = store
            .inner
            .get(
                "private_company_financials",
                "private-company",
                NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            )
            .unwrap();
        assert_eq!(row["revenue"], serde_json::json!(42.0));
        assert_eq!(store.inner.len(), 1);
    }
}
