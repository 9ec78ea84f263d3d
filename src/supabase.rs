//! PostgREST-style persistence collaborator for Supabase.
//!
//! Mirrors the core `UpsertCoordinator` state machine over an async REST
//! transport, reusing the same pre-write validation and payload preparation.
//! Missing credentials degrade to `None` from `from_env` so callers can skip
//! persistence without failing the extraction flow.

use crate::error::{ExtractError, Result};
use crate::record::ExtractedRecord;
use crate::schema::EntityProfile;
use crate::upsert::{prepare_row, validate_for_push, UpsertContext, UpsertOutcome, UpsertStatus};
use chrono::NaiveDate;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SupabaseStore {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl SupabaseStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bounds every `push` exchange; on expiry a retryable `Timeout` error
    /// is surfaced instead of hanging.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds a store from `SUPABASE_URL` and `SUPABASE_SERVICE_ROLE_KEY`.
    /// Returns `None` when credentials are not configured.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let api_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY").ok()?;
        Some(Self::new(base_url, api_key))
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn find_id(
        &self,
        table: &str,
        entity_slug: &str,
        period_date: NaiveDate,
    ) -> Result<Option<String>> {
        let res = self
            .client
            .get(self.table_url(table))
            .query(&[
                ("select", "id".to_string()),
                ("entity_slug", format!("eq.{}", entity_slug)),
                ("period_date", format!("eq.{}", period_date)),
            ])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ExtractError::PersistenceUnavailable(format!(
                "lookup on {} failed (status {}): {}",
                table, status, body
            )));
        }

        let rows: Vec<Value> = res.json().await?;
        Ok(rows.first().and_then(row_id))
    }

    async fn insert(&self, table: &str, row: &Map<String, Value>) -> Result<String> {
        let res = self
            .client
            .post(self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::CONFLICT {
            return Err(ExtractError::DuplicateKeyConflict {
                entity_slug: row_text(row, "entity_slug"),
                period_date: row_text(row, "period_date"),
            });
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ExtractError::PersistenceUnavailable(format!(
                "insert into {} failed (status {}): {}",
                table, status, body
            )));
        }

        let rows: Vec<Value> = res.json().await?;
        rows.first().and_then(row_id).ok_or_else(|| {
            ExtractError::PersistenceUnavailable("insert returned no representation".to_string())
        })
    }

    async fn update(&self, table: &str, id: &str, row: &Map<String, Value>) -> Result<String> {
        let res = self
            .client
            .patch(self.table_url(table))
            .query(&[("id", format!("eq.{}", id))])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ExtractError::PersistenceUnavailable(format!(
                "update of {} row {} failed (status {}): {}",
                table, id, status, body
            )));
        }

        let rows: Vec<Value> = res.json().await?;
        Ok(rows.first().and_then(row_id).unwrap_or_else(|| id.to_string()))
    }

    /// Upserts a finished record: same state machine as the in-process
    /// coordinator, including the single retry on a lost insert race. The
    /// whole exchange is bounded by the configured timeout.
    pub async fn push(
        &self,
        record: &ExtractedRecord,
        profile: &EntityProfile,
        ctx: &UpsertContext,
    ) -> Result<UpsertOutcome> {
        tokio::time::timeout(self.timeout, self.push_inner(record, profile, ctx))
            .await
            .map_err(|_| ExtractError::Timeout(self.timeout.as_secs()))?
    }

    async fn push_inner(
        &self,
        record: &ExtractedRecord,
        profile: &EntityProfile,
        ctx: &UpsertContext,
    ) -> Result<UpsertOutcome> {
        if let Some(reason) = validate_for_push(record, ctx) {
            warn!("rejecting push for '{}': {}", record.entity_slug, reason);
            return Ok(UpsertOutcome {
                status: UpsertStatus::Rejected,
                record_id: None,
                reason: Some(reason),
            });
        }

        let row = prepare_row(record, profile);
        let table = profile.table.as_str();
        let slug = record.entity_slug.as_str();
        let date = record.period_date;

        match self.find_id(table, slug, date).await? {
            Some(id) => {
                debug!("existing row {} for ({}, {}); updating", id, slug, date);
                let id = self.update(table, &id, &row).await?;
                Ok(UpsertOutcome {
                    status: UpsertStatus::Updated,
                    record_id: Some(id),
                    reason: None,
                })
            }
            None => match self.insert(table, &row).await {
                Ok(id) => {
                    info!("inserted row {} for ({}, {})", id, slug, date);
                    Ok(UpsertOutcome {
                        status: UpsertStatus::Inserted,
                        record_id: Some(id),
                        reason: None,
                    })
                }
                Err(ExtractError::DuplicateKeyConflict { .. }) => {
                    warn!("insert raced on ({}, {}); retrying as update", slug, date);
                    match self.find_id(table, slug, date).await? {
                        Some(id) => {
                            let id = self.update(table, &id, &row).await?;
                            Ok(UpsertOutcome {
                                status: UpsertStatus::Updated,
                                record_id: Some(id),
                                reason: None,
                            })
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

fn row_id(row: &Value) -> Option<String> {
    match row.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn row_text(row: &Map<String, Value>, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
