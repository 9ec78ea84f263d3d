//! Enforces the fixed field set of an entity profile against a parsed object.
//!
//! The generator omitting an optional metric is expected (coerced to null);
//! inventing keys, renaming keys, or emitting non-numeric metric text is not.

use crate::error::{ExtractError, Result};
use crate::normalize::is_numeric_like;
use crate::record::{quarter_start, ExtractedRecord, MetricValue};
use crate::schema::{EntityProfile, FieldKind};
use chrono::NaiveDate;
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const SLUG_KEY: &str = "entity_slug";
const DATE_KEY: &str = "period_date";
const SURROGATE_KEY: &str = "id";
const CURRENCY_KEY: &str = "currency_code";
const CURRENCIES_KEY: &str = "currencies";

/// Validates a parsed object against a profile, producing a schema-conformant
/// record or a `SchemaViolation` enumerating every problem found.
pub fn validate(obj: &Map<String, Value>, profile: &EntityProfile) -> Result<ExtractedRecord> {
    let mut violations = Vec::new();

    let entity_slug = match obj.get(SLUG_KEY) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(_) => {
            violations.push(format!("'{}' must be a non-empty string", SLUG_KEY));
            String::new()
        }
        None => {
            violations.push(format!("missing required identifier '{}'", SLUG_KEY));
            String::new()
        }
    };

    let period_date = match obj.get(DATE_KEY) {
        Some(Value::String(s)) => match NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
            Ok(date) => Some(quarter_start(date)),
            Err(_) => {
                violations.push(format!("'{}' is not an ISO date: '{}'", DATE_KEY, s));
                None
            }
        },
        Some(_) => {
            violations.push(format!("'{}' must be an ISO date string", DATE_KEY));
            None
        }
        None => {
            violations.push(format!("missing required field '{}'", DATE_KEY));
            None
        }
    };

    // A null surrogate id is tolerated (the generator copies it from the
    // schema example); anything else in that slot is drift.
    if let Some(id) = obj.get(SURROGATE_KEY) {
        if !id.is_null() {
            violations.push(format!("'{}' must be null or absent, got {}", SURROGATE_KEY, id));
        }
    }

    let currency_code = extract_currency(obj, &mut violations);

    let mut metrics = BTreeMap::new();
    let mut texts = BTreeMap::new();
    for field in &profile.fields {
        match field.kind {
            FieldKind::Text => {
                texts.insert(field.name.clone(), coerce_text(field, obj, &mut violations));
            }
            _ => {
                let value = coerce_metric(field, obj.get(&field.name), &mut violations);
                metrics.insert(field.name.clone(), value);
            }
        }
        if field.required {
            let present = match field.kind {
                FieldKind::Text => texts.get(&field.name).map(|v| v.is_some()).unwrap_or(false),
                _ => metrics
                    .get(&field.name)
                    .map(|v| !v.is_null())
                    .unwrap_or(false),
            };
            if !present {
                violations.push(format!("required field '{}' is missing or null", field.name));
            }
        }
    }

    // No extra keys: silent schema drift from the generator is rejected.
    for key in obj.keys() {
        let builtin = matches!(
            key.as_str(),
            SLUG_KEY | DATE_KEY | SURROGATE_KEY | CURRENCY_KEY | CURRENCIES_KEY
        );
        if !builtin && profile.field(key).is_none() {
            violations.push(format!("unexpected field '{}'", key));
        }
    }

    if !violations.is_empty() {
        return Err(ExtractError::SchemaViolation {
            profile: profile.slug.clone(),
            version: profile.version,
            violations,
        });
    }

    debug!(
        "validated record for '{}' at {} ({} metrics)",
        entity_slug,
        period_date.map(|d| d.to_string()).unwrap_or_default(),
        metrics.len()
    );

    Ok(ExtractedRecord {
        entity_slug,
        // Unreachable fallback: violations above guarantee Some here.
        period_date: period_date.unwrap_or(NaiveDate::MIN),
        currency_code,
        metrics,
        texts,
    })
}

fn coerce_metric(
    field: &crate::schema::FieldSpec,
    value: Option<&Value>,
    violations: &mut Vec<String>,
) -> MetricValue {
    if field.kind == FieldKind::Ratio {
        // Ratios are declared always-null at extraction time.
        if let Some(v) = value {
            if !v.is_null() {
                warn!("ratio field '{}' arrived non-null; coercing to null", field.name);
            }
        }
        return MetricValue::Null;
    }

    match value {
        None | Some(Value::Null) => MetricValue::Null,
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if f.is_finite() => MetricValue::Number(f),
            _ => {
                violations.push(format!("field '{}' is not a finite number: {}", field.name, n));
                MetricValue::Null
            }
        },
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if is_numeric_like(trimmed) {
                MetricValue::Pending(trimmed.to_string())
            } else {
                violations.push(format!(
                    "field '{}' has non-numeric value '{}'",
                    field.name, s
                ));
                MetricValue::Null
            }
        }
        Some(other) => {
            violations.push(format!(
                "field '{}' must be a number or null, got {}",
                field.name, other
            ));
            MetricValue::Null
        }
    }
}

fn coerce_text(
    field: &crate::schema::FieldSpec,
    obj: &Map<String, Value>,
    violations: &mut Vec<String>,
) -> Option<String> {
    match obj.get(&field.name) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(other) => {
            violations.push(format!(
                "field '{}' must be a string or null, got {}",
                field.name, other
            ));
            None
        }
    }
}

/// Accepts either a `currency_code` string or the original `currencies` array
/// shape; `currency_code` wins if both are present.
fn extract_currency(obj: &Map<String, Value>, violations: &mut Vec<String>) -> Option<String> {
    match obj.get(CURRENCY_KEY) {
        Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
        Some(Value::Null) | None => {}
        Some(other) => {
            violations.push(format!("'{}' must be a string, got {}", CURRENCY_KEY, other));
            return None;
        }
    }
    match obj.get(CURRENCIES_KEY) {
        Some(Value::Array(items)) => items.iter().find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }),
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Null) | None => None,
        Some(other) => {
            violations.push(format!("'{}' must be an array of strings, got {}", CURRENCIES_KEY, other));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::builtin_profile;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_valid_record_with_omissions_coerced_to_null() {
        let profile = builtin_profile("grab-com").unwrap();
        let parsed = obj(json!({
            "entity_slug": "grab-com",
            "period_date": "2024-05-15",
            "group_revenue": 653,
            "monthly_transacting_users": 38000000
        }));

        let record = validate(&parsed, &profile).unwrap();
        assert_eq!(record.entity_slug, "grab-com");
        // Reported mid-quarter date snaps to the quarter start.
        assert_eq!(
            record.period_date,
            NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
        );
        assert_eq!(record.number("group_revenue"), Some(653.0));
        assert!(record.metric("mobility_revenue").unwrap().is_null());
    }

    #[test]
    fn test_numeric_string_kept_pending() {
        let profile = builtin_profile("grab-com").unwrap();
        let parsed = obj(json!({
            "entity_slug": "grab-com",
            "period_date": "2024-04-01",
            "group_revenue": "819",
            "group_profit_loss_for_period": "(56)"
        }));

        let record = validate(&parsed, &profile).unwrap();
        assert_eq!(
            record.metric("group_revenue"),
            Some(&MetricValue::Pending("819".to_string()))
        );
        assert_eq!(
            record.metric("group_profit_loss_for_period"),
            Some(&MetricValue::Pending("(56)".to_string()))
        );
    }

    #[test]
    fn test_rejects_extra_missing_and_mistyped_fields() {
        let profile = builtin_profile("grab-com").unwrap();
        let parsed = obj(json!({
            "period_date": "not-a-date",
            "group_revenue": "N/A",
            "invented_metric": 5
        }));

        match validate(&parsed, &profile) {
            Err(ExtractError::SchemaViolation { violations, .. }) => {
                assert!(violations.iter().any(|v| v.contains("entity_slug")));
                assert!(violations.iter().any(|v| v.contains("not-a-date")));
                assert!(violations.iter().any(|v| v.contains("non-numeric")));
                assert!(violations.iter().any(|v| v.contains("invented_metric")));
            }
            other => panic!("expected SchemaViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_currency_symbol_rejected_at_validation() {
        let profile = builtin_profile("private-company").unwrap();
        let parsed = obj(json!({
            "entity_slug": "private-company",
            "period_date": "2023-01-01",
            "revenue": "S$819"
        }));
        assert!(matches!(
            validate(&parsed, &profile),
            Err(ExtractError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_null_surrogate_id_tolerated_non_null_rejected() {
        let profile = builtin_profile("grab-com").unwrap();
        let mut parsed = obj(json!({
            "entity_slug": "grab-com",
            "period_date": "2024-04-01",
            "id": null
        }));
        assert!(validate(&parsed, &profile).is_ok());

        parsed.insert("id".to_string(), json!(42));
        assert!(matches!(
            validate(&parsed, &profile),
            Err(ExtractError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_ratio_field_coerced_to_null() {
        let profile = builtin_profile("grab-com").unwrap();
        let parsed = obj(json!({
            "entity_slug": "grab-com",
            "period_date": "2024-04-01",
            "group_adjusted_ebitda_margin_percent": 12.5
        }));
        let record = validate(&parsed, &profile).unwrap();
        assert!(record
            .metric("group_adjusted_ebitda_margin_percent")
            .unwrap()
            .is_null());
    }

    #[test]
    fn test_currencies_array_shape_accepted() {
        let profile = builtin_profile("private-company").unwrap();
        let parsed = obj(json!({
            "entity_slug": "private-company",
            "period_date": "2023-01-01",
            "currencies": ["S$", "SGD"]
        }));
        let record = validate(&parsed, &profile).unwrap();
        assert_eq!(record.currency_code.as_deref(), Some("S$"));
    }
}
