use crate::schema::{EntityProfile, FieldKind};
use chrono::{Datelike, NaiveDate};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// A metric value moving through the pipeline.
///
/// `Pending` holds a numeric-looking string (e.g. `"(56)"`, `"1.2B"`) that the
/// schema validator accepted but the normalizer has not yet resolved. After
/// normalization every metric is `Number` or `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Pending(String),
    Null,
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetricValue::Null)
    }

    pub fn to_json(&self) -> Value {
        match self {
            MetricValue::Number(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
            MetricValue::Pending(s) => Value::String(s.clone()),
            MetricValue::Null => Value::Null,
        }
    }
}

/// A schema-conformant financial record for one entity and one reporting period.
///
/// Created fresh per extraction, rewritten in place by the normalizer, and
/// terminal once persisted. `(entity_slug, period_date)` is the natural key.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRecord {
    pub entity_slug: String,
    /// First day of the reporting quarter, derived from the reported date.
    pub period_date: NaiveDate,
    /// Reporting currency as declared by the source, if any (e.g. "SGD").
    pub currency_code: Option<String>,
    pub metrics: BTreeMap<String, MetricValue>,
    /// Pass-through string fields (e.g. a reported company name).
    pub texts: BTreeMap<String, Option<String>>,
}

impl ExtractedRecord {
    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(|v| v.as_number())
    }

    pub fn set_metric(&mut self, name: impl Into<String>, value: MetricValue) {
        self.metrics.insert(name.into(), value);
    }

    /// True while any metric still holds unresolved text from the generator.
    pub fn has_pending(&self) -> bool {
        self.metrics
            .values()
            .any(|v| matches!(v, MetricValue::Pending(_)))
    }

    /// Serializes the record as a persistence row in schema field order.
    ///
    /// The row never carries a surrogate `id` column; the store assigns identity.
    pub fn to_row(&self, profile: &EntityProfile) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert(
            "entity_slug".to_string(),
            Value::String(self.entity_slug.clone()),
        );
        row.insert(
            "period_date".to_string(),
            Value::String(self.period_date.format("%Y-%m-%d").to_string()),
        );
        for field in &profile.fields {
            if field.kind == FieldKind::Text {
                let value = self
                    .texts
                    .get(&field.name)
                    .and_then(|v| v.as_ref())
                    .map(|s| Value::String(s.clone()))
                    .unwrap_or(Value::Null);
                row.insert(field.name.clone(), value);
            } else {
                let value = self
                    .metrics
                    .get(&field.name)
                    .map(|v| v.to_json())
                    .unwrap_or(Value::Null);
                row.insert(field.name.clone(), value);
            }
        }
        if let Some(code) = &self.currency_code {
            row.insert("currency_code".to_string(), Value::String(code.clone()));
        }
        row
    }

    pub fn to_json(&self, profile: &EntityProfile) -> Value {
        Value::Object(self.to_row(profile))
    }
}

/// Snaps a reported date to the first day of its calendar quarter.
pub fn quarter_start(date: NaiveDate) -> NaiveDate {
    let month = match date.month() {
        1..=3 => 1,
        4..=6 => 4,
        7..=9 => 7,
        _ => 10,
    };
    NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
}
