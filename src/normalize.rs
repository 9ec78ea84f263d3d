//! Canonicalizes magnitudes, signs and units in a schema-conformant record.
//!
//! After normalization every currency-scaled metric is a finite number of
//! million-units in the record's declared currency; count fields are raw
//! integers. The normalizer never infers a missing value.

use crate::error::{ExtractError, Result};
use crate::record::{ExtractedRecord, MetricValue};
use crate::schema::{EntityProfile, FieldKind};
use log::debug;

#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    /// Statement-level declaration that amounts are expressed in thousands.
    /// Applies to every currency-scaled value without an explicit magnitude
    /// suffix; counts are exempt.
    pub amounts_in_thousands: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Magnitude {
    Thousand,
    Million,
    Billion,
}

impl Magnitude {
    /// Factor taking a suffixed currency value to million-units.
    fn to_millions(self) -> f64 {
        match self {
            Magnitude::Thousand => 0.001,
            Magnitude::Million => 1.0,
            Magnitude::Billion => 1000.0,
        }
    }

    /// Factor taking a suffixed count to an absolute unit count.
    fn to_units(self) -> f64 {
        match self {
            Magnitude::Thousand => 1_000.0,
            Magnitude::Million => 1_000_000.0,
            Magnitude::Billion => 1_000_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LenientNumber {
    mantissa: f64,
    suffix: Option<Magnitude>,
}

/// True if the text matches the lenient numeric grammar the normalizer can
/// resolve: optional parentheses or sign, thousands separators, a magnitude
/// suffix word/letter, a trailing loss marker.
pub fn is_numeric_like(raw: &str) -> bool {
    parse_lenient(raw).is_some()
}

fn parse_lenient(raw: &str) -> Option<LenientNumber> {
    let mut s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let mut negative = false;

    // Parenthesized numerals are accounting notation for a negative value.
    if s.starts_with('(') && s.ends_with(')') {
        negative = true;
        s = s[1..s.len() - 1].trim();
    }

    // An explicit loss marker negates a positive magnitude.
    let lower = s.to_ascii_lowercase();
    if let Some(stripped) = lower.strip_suffix("(loss)") {
        negative = true;
        s = s[..stripped.len()].trim_end();
    } else if let Some(stripped) = lower.strip_suffix(" loss") {
        negative = true;
        s = s[..stripped.len()].trim_end();
    }

    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest.trim_start();
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest.trim_start();
    }

    // Split a trailing alphabetic suffix off the numeric part.
    let split = s.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(s.len());
    let (number_part, suffix_part) = s.split_at(split);
    let suffix = match suffix_part.trim().to_ascii_lowercase().as_str() {
        "" => None,
        "k" | "thousand" | "thousands" => Some(Magnitude::Thousand),
        "m" | "mn" | "million" | "millions" => Some(Magnitude::Million),
        "b" | "bn" | "billion" | "billions" => Some(Magnitude::Billion),
        _ => return None,
    };

    let cleaned: String = number_part.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    Some(LenientNumber {
        mantissa: if negative { -value } else { value },
        suffix,
    })
}

/// Normalizes every metric field of the record in place.
pub fn normalize(
    record: &mut ExtractedRecord,
    profile: &EntityProfile,
    options: &NormalizeOptions,
) -> Result<()> {
    for field in profile.metric_fields() {
        let current = record
            .metrics
            .get(&field.name)
            .cloned()
            .unwrap_or(MetricValue::Null);
        let resolved = match field.kind {
            FieldKind::Currency => normalize_currency(&field.name, current, options)?,
            FieldKind::Count => normalize_count(&field.name, current)?,
            FieldKind::Ratio => MetricValue::Null,
            FieldKind::Text => continue,
        };
        record.metrics.insert(field.name.clone(), resolved);
    }

    resolve_totals(record, profile)?;
    Ok(())
}

fn normalize_currency(
    name: &str,
    value: MetricValue,
    options: &NormalizeOptions,
) -> Result<MetricValue> {
    match value {
        MetricValue::Null => Ok(MetricValue::Null),
        // A plain number is taken as already denominated per the statement:
        // millions by default, thousands when the statement declares so.
        MetricValue::Number(n) => {
            if options.amounts_in_thousands {
                Ok(MetricValue::Number(n / 1000.0))
            } else {
                Ok(MetricValue::Number(n))
            }
        }
        MetricValue::Pending(text) => {
            let parsed = parse_lenient(&text).ok_or_else(|| ExtractError::NormalizationAmbiguity {
                field: name.to_string(),
                details: format!("unresolvable numeric text '{}'", text),
            })?;
            let value = match parsed.suffix {
                // An explicit suffix fixes the denomination; the statement
                // modifier only covers unsuffixed values.
                Some(magnitude) => parsed.mantissa * magnitude.to_millions(),
                None if options.amounts_in_thousands => parsed.mantissa / 1000.0,
                None => parsed.mantissa,
            };
            debug!("normalized {}: '{}' -> {}M", name, text, value);
            Ok(MetricValue::Number(value))
        }
    }
}

fn normalize_count(name: &str, value: MetricValue) -> Result<MetricValue> {
    match value {
        MetricValue::Null => Ok(MetricValue::Null),
        MetricValue::Number(n) => Ok(MetricValue::Number(n.round())),
        MetricValue::Pending(text) => {
            let parsed = parse_lenient(&text).ok_or_else(|| ExtractError::NormalizationAmbiguity {
                field: name.to_string(),
                details: format!("unresolvable numeric text '{}'", text),
            })?;
            let units = match parsed.suffix {
                Some(magnitude) => parsed.mantissa * magnitude.to_units(),
                None => parsed.mantissa,
            };
            Ok(MetricValue::Number(units.round()))
        }
    }
}

/// Tie-break between an explicit total and its components breakdown: the
/// explicit total always wins; components are summed only when no total
/// arrived and the breakdown is complete.
pub fn resolve_totals(record: &mut ExtractedRecord, profile: &EntityProfile) -> Result<()> {
    for field in profile.fields.iter().filter(|f| !f.components.is_empty()) {
        if record.number(&field.name).is_some() {
            continue;
        }
        let values: Vec<Option<f64>> = field
            .components
            .iter()
            .map(|name| record.number(name))
            .collect();

        if values.iter().all(|v| v.is_some()) {
            let total: f64 = values.into_iter().flatten().sum();
            debug!(
                "no explicit '{}' total; summed {} components to {}",
                field.name,
                field.components.len(),
                total
            );
            record.set_metric(field.name.clone(), MetricValue::Number(total));
        } else if values.iter().any(|v| v.is_some()) {
            return Err(ExtractError::NormalizationAmbiguity {
                field: field.name.clone(),
                details: "partial components breakdown with no explicit total".to_string(),
            });
        }
    }
    Ok(())
}

/// Scans source statement text for a declaration that amounts are expressed
/// in thousands (e.g. "amounts in thousands", "S$'000").
pub fn detect_thousands_declaration(source_text: &str) -> bool {
    let lower = source_text.to_ascii_lowercase();
    lower.contains("amounts in thousands")
        || lower.contains("in thousands of")
        || lower.contains("expressed in thousands")
        || lower.contains("'000")
}
