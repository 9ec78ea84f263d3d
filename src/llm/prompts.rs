//! Prompt assembly for financial metric extraction.
//!
//! The user prompt embeds the entity hint, the source text, and a field
//! manifest generated from the entity profile, so the expected key set is
//! always exactly the profile's field set.

use crate::schema::{EntityProfile, FieldKind};

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a precise financial data extraction assistant specialized in \
     extracting company financial metrics from earnings reports.";

/// Builds the extraction prompt for one entity profile.
pub fn extraction_prompt(profile: &EntityProfile, entity_hint: &str, source_text: &str) -> String {
    let hint = if entity_hint.trim().is_empty() {
        profile.name.as_str()
    } else {
        entity_hint
    };

    format!(
        "Company: {hint}\n\n\
         Report text:\n{source_text}\n\n\
         Extract the following metrics from the report text above and return \
         ONLY a JSON object with exactly these keys:\n\n{manifest}\n\
         Rules:\n\
         - \"entity_slug\" must be \"{slug}\".\n\
         - \"period_date\" must be the reporting period date in YYYY-MM-DD format.\n\
         - Report currency amounts in millions; if a value is a loss, make it negative.\n\
         - If a metric is not stated in the text, use null. Never invent a value.\n\
         - If both a total and its components are stated, extract both as written; \
           do not calculate anything.\n\
         - Include a \"currency_code\" key naming the reporting currency.\n\
         - Do not add any keys beyond those listed, and do not rename keys.",
        hint = hint,
        source_text = source_text,
        manifest = field_manifest(profile),
        slug = profile.slug,
    )
}

fn field_manifest(profile: &EntityProfile) -> String {
    let mut manifest = String::new();
    manifest.push_str("  \"entity_slug\": string\n");
    manifest.push_str("  \"period_date\": \"YYYY-MM-DD\"\n");
    manifest.push_str("  \"currency_code\": string\n");
    for field in &profile.fields {
        let kind = match field.kind {
            FieldKind::Currency => "number in millions, or null",
            FieldKind::Count => "integer count, or null",
            FieldKind::Ratio => "always null (calculated downstream)",
            FieldKind::Text => "string, or null",
        };
        manifest.push_str(&format!("  \"{}\": {}\n", field.name, kind));
    }
    manifest
}
