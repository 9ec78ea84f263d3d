//! # Earnings Extractor
//!
//! A library for turning unreliable free-text model responses over earnings
//! reports into validated, normalized, schema-conformant financial records,
//! persisted with idempotent upsert semantics.
//!
//! ## Core Concepts
//!
//! - **Response repair**: an ordered chain of cheap textual fixes (fence
//!   stripping, boilerplate prefixes, brace extraction, `NULL` casing,
//!   missing commas) that recovers a JSON object without ever guessing a
//!   numeric value
//! - **Entity profiles**: data-driven schema descriptors; a new company is a
//!   new descriptor, never a new code path
//! - **Normalization**: every currency metric ends up as millions of the
//!   declared currency with correct sign; counts stay raw integers
//! - **Conversion**: quarter-keyed exchange rates, fail-closed, with the
//!   original values preserved alongside the converted artifact
//! - **Upsert**: one row per (entity_slug, period_date), full-field updates,
//!   insert races retried once
//!
//! ## Example
//!
//! ```rust,ignore
//! use earnings_extractor::*;
//!
//! let profile = builtin_profile("grab-com")?;
//! let rates = RateTable::from_json(r#"{"Q2 2024": 0.7401}"#)?;
//!
//! let raw = "```json\n{\"entity_slug\": \"grab-com\", \
//!            \"period_date\": \"2024-04-01\", \"group_revenue\": 653}\n```";
//!
//! let output = Pipeline::new(&profile)
//!     .with_rates(&rates, "USD")
//!     .run(raw, &NormalizeOptions::default())?;
//!
//! let store = MemoryStore::new();
//! let outcome = UpsertCoordinator::new(&store).push(
//!     output.final_record(),
//!     &profile,
//!     &UpsertContext::for_slug("grab-com"),
//! )?;
//! ```

pub mod convert;
pub mod error;
pub mod normalize;
pub mod record;
pub mod repair;
pub mod schema;
pub mod upsert;
pub mod validate;

#[cfg(feature = "openrouter")]
pub mod llm;

#[cfg(feature = "supabase")]
pub mod supabase;

pub use convert::{
    convert_record, needs_conversion, resolve_currency_code, ConversionOutcome, ConvertedRecord,
    OriginalCurrency, Quarter,
};
pub use error::{ExtractError, Result};
pub use normalize::{detect_thousands_declaration, is_numeric_like, normalize, NormalizeOptions};
pub use record::{quarter_start, ExtractedRecord, MetricValue};
pub use repair::{parse_response, parse_response_with, RepairOptions, DEFAULT_PREFIXES};
pub use schema::{
    builtin_profile, builtin_profiles, EntityProfile, FieldKind, FieldSpec, RateTable,
};
pub use upsert::{
    MemoryStore, RecordStore, UpsertContext, UpsertCoordinator, UpsertOutcome, UpsertStatus,
};
pub use validate::validate;

use log::{debug, info};

/// One extraction-and-normalization flow: raw response text in, a
/// schema-conformant record (and optionally a converted artifact) out.
pub struct Pipeline<'a> {
    profile: &'a EntityProfile,
    rates: Option<&'a RateTable>,
    target_currency: Option<String>,
    repair: RepairOptions,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub record: ExtractedRecord,
    pub conversion: Option<ConversionOutcome>,
}

impl PipelineOutput {
    /// The record to persist: the converted copy when conversion happened,
    /// otherwise the extracted record.
    pub fn final_record(&self) -> &ExtractedRecord {
        match &self.conversion {
            Some(ConversionOutcome::Converted(converted)) => &converted.record,
            _ => &self.record,
        }
    }

    /// True when conversion was wanted but no rate covered the quarter.
    pub fn rate_unavailable(&self) -> bool {
        matches!(
            self.conversion,
            Some(ConversionOutcome::RateUnavailable { .. })
        )
    }

    /// True when the declared currency could not be resolved to a
    /// convertible source currency.
    pub fn unsupported_currency(&self) -> bool {
        matches!(
            self.conversion,
            Some(ConversionOutcome::UnsupportedCurrency { .. })
        )
    }
}

impl<'a> Pipeline<'a> {
    pub fn new(profile: &'a EntityProfile) -> Self {
        Self {
            profile,
            rates: None,
            target_currency: None,
            repair: RepairOptions::default(),
        }
    }

    /// Enables currency conversion into `target` for records declaring a
    /// different reporting currency.
    pub fn with_rates(mut self, rates: &'a RateTable, target: impl Into<String>) -> Self {
        self.rates = Some(rates);
        self.target_currency = Some(target.into());
        self
    }

    pub fn with_repair_options(mut self, options: RepairOptions) -> Self {
        self.repair = options;
        self
    }

    pub fn run(&self, raw: &str, options: &NormalizeOptions) -> Result<PipelineOutput> {
        debug!(
            "running extraction pipeline for profile '{}' ({} bytes of raw text)",
            self.profile.slug,
            raw.len()
        );

        let parsed = repair::parse_response_with(raw, &self.repair)?;
        let mut record = validate::validate(&parsed, self.profile)?;
        normalize::normalize(&mut record, self.profile, options)?;

        let conversion = match (self.rates, &self.target_currency) {
            (Some(rates), Some(target)) if needs_conversion(&record, target) => {
                Some(convert_record(&record, self.profile, rates, target)?)
            }
            _ => None,
        };

        info!(
            "extracted record for '{}' at {}{}",
            record.entity_slug,
            record.period_date,
            match &conversion {
                Some(ConversionOutcome::Converted(_)) => " (converted)",
                Some(ConversionOutcome::RateUnavailable { .. }) => " (rate unavailable)",
                Some(ConversionOutcome::UnsupportedCurrency { .. }) => " (currency unsupported)",
                None => "",
            }
        );

        Ok(PipelineOutput { record, conversion })
    }
}

/// Convenience wrapper: repair, validate and normalize a raw response
/// without currency conversion.
pub fn process_response(
    raw: &str,
    profile: &EntityProfile,
    options: &NormalizeOptions,
) -> Result<ExtractedRecord> {
    let output = Pipeline::new(profile).run(raw, options)?;
    Ok(output.record)
}
