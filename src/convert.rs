//! Applies a point-in-time exchange-rate lookup to the currency-scaled
//! metrics of a normalized record.
//!
//! Conversion never rewrites the extracted record in place: it produces a
//! second artifact carrying the converted values, the original-currency
//! values, and the rate used, so the caller can always recover the
//! pre-conversion figures exactly.

use crate::error::{ExtractError, Result};
use crate::record::{ExtractedRecord, MetricValue};
use crate::schema::{EntityProfile, FieldKind, RateTable};
use chrono::{Datelike, NaiveDate};
use log::{debug, warn};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A calendar quarter, the key space of the exchange-rate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quarter {
    pub year: i32,
    pub number: u32,
}

impl Quarter {
    pub fn new(year: i32, number: u32) -> Self {
        Self { year, number }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            number: (date.month() - 1) / 3 + 1,
        }
    }

    /// Label matching the rate table key format, e.g. "Q1 2023".
    pub fn label(&self) -> String {
        format!("Q{} {}", self.number, self.year)
    }

    pub fn parse_label(label: &str) -> Option<Self> {
        let rest = label.trim().strip_prefix('Q')?;
        let (number_str, year_str) = rest.split_once(' ')?;
        let number: u32 = number_str.parse().ok()?;
        let year: i32 = year_str.trim().parse().ok()?;
        if (1..=4).contains(&number) {
            Some(Self { year, number })
        } else {
            None
        }
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Indicator substrings used to recognize a declared reporting currency.
const SGD_INDICATORS: &[&str] = &["s$", "sgd", "singapore"];
const USD_INDICATORS: &[&str] = &["us$", "usd", "united states dollar"];

/// Resolves a free-form currency label ("S$", "Singapore dollar", "SGD$")
/// to an ISO-ish code the rate table understands.
pub fn resolve_currency_code(label: &str) -> Option<&'static str> {
    let lower = label.trim().to_ascii_lowercase();
    if SGD_INDICATORS.iter().any(|i| lower.contains(i)) {
        return Some("SGD");
    }
    if USD_INDICATORS.iter().any(|i| lower.contains(i)) || lower == "$" {
        return Some("USD");
    }
    None
}

/// Whether the record declares a currency other than the target.
/// Records without any declared currency are left alone.
pub fn needs_conversion(record: &ExtractedRecord, target: &str) -> bool {
    match &record.currency_code {
        Some(label) => match resolve_currency_code(label) {
            Some(code) => !code.eq_ignore_ascii_case(target),
            // Unrecognized label: hand it to the converter so the outcome
            // is flagged, rather than silently skipping conversion.
            None => true,
        },
        None => false,
    }
}

/// Pre-conversion values preserved alongside the converted artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginalCurrency {
    pub currency_code: Option<String>,
    /// Original currency-scaled metric values, exactly as extracted.
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedRecord {
    /// The converted copy; the input record is never touched.
    pub record: ExtractedRecord,
    pub original: OriginalCurrency,
    /// Rate(s) applied, keyed by quarter label.
    pub rates_used: BTreeMap<String, f64>,
}

impl ConvertedRecord {
    /// Serializes the conversion artifact: the converted row plus the
    /// original-currency structure and the rates used.
    pub fn to_json(&self, profile: &EntityProfile) -> Value {
        let mut row = self.record.to_row(profile);
        let originals: Map<String, Value> = self
            .original
            .metrics
            .iter()
            .filter_map(|(k, v)| Number::from_f64(*v).map(|n| (k.clone(), Value::Number(n))))
            .collect();
        row.insert(
            "original_currency".to_string(),
            serde_json::json!({
                "currency_code": self.original.currency_code,
                "metrics": originals,
            }),
        );
        let rates: Map<String, Value> = self
            .rates_used
            .iter()
            .filter_map(|(k, v)| Number::from_f64(*v).map(|n| (k.clone(), Value::Number(n))))
            .collect();
        row.insert("exchange_rates_used".to_string(), Value::Object(rates));
        Value::Object(row)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    Converted(ConvertedRecord),
    /// No rate for the record's quarter: fail closed, record unconverted.
    RateUnavailable { quarter: String },
    /// The declared currency did not resolve to a convertible source
    /// currency: fail closed, record unconverted.
    UnsupportedCurrency { label: String },
}

/// Converts every currency-scaled metric of a normalized record using the
/// rate for the record's reporting quarter.
pub fn convert_record(
    record: &ExtractedRecord,
    profile: &EntityProfile,
    rates: &RateTable,
    target: &str,
) -> Result<ConversionOutcome> {
    if record.has_pending() {
        return Err(ExtractError::ExtractionFailed(
            "record must be normalized before currency conversion".to_string(),
        ));
    }

    // The rate applies to one recognized source currency only. Anything the
    // indicator scan cannot place must never be multiplied by it.
    let declared = record.currency_code.clone().unwrap_or_default();
    match resolve_currency_code(&declared) {
        Some(code) if !code.eq_ignore_ascii_case(target) => {}
        _ => {
            warn!(
                "declared currency '{}' is not convertible to {}; returning record unconverted",
                declared, target
            );
            return Ok(ConversionOutcome::UnsupportedCurrency { label: declared });
        }
    }

    let quarter = Quarter::from_date(record.period_date);
    let rate = match rates.get(&quarter) {
        Some(rate) => rate,
        None => {
            warn!(
                "no exchange rate for {}; returning record unconverted",
                quarter
            );
            return Ok(ConversionOutcome::RateUnavailable {
                quarter: quarter.label(),
            });
        }
    };

    let mut converted = record.clone();
    let mut originals = BTreeMap::new();
    for field in profile.fields.iter().filter(|f| f.kind == FieldKind::Currency) {
        if let Some(value) = record.number(&field.name) {
            originals.insert(field.name.clone(), value);
            converted.set_metric(field.name.clone(), MetricValue::Number(value * rate));
        }
    }
    converted.currency_code = Some(target.to_string());

    debug!(
        "converted {} currency metrics for '{}' at rate {} ({})",
        originals.len(),
        record.entity_slug,
        rate,
        quarter
    );

    let mut rates_used = BTreeMap::new();
    rates_used.insert(quarter.label(), rate);

    Ok(ConversionOutcome::Converted(ConvertedRecord {
        record: converted,
        original: OriginalCurrency {
            currency_code: record.currency_code.clone(),
            metrics: originals,
        },
        rates_used,
    }))
}
