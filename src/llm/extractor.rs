use crate::error::Result;
use crate::llm::client::{OpenRouterClient, DEFAULT_MODEL};
use crate::llm::prompts;
use crate::normalize::{self, detect_thousands_declaration, NormalizeOptions};
use crate::record::ExtractedRecord;
use crate::repair::{self, RepairOptions};
use crate::schema::EntityProfile;
use crate::validate;
use log::warn;
use serde_json::Value;
use std::time::Duration;

/// Extracts a normalized financial record from report text via the
/// text-generation collaborator. One extractor per entity profile.
pub struct RecordExtractor<'a> {
    client: OpenRouterClient,
    model: String,
    profile: &'a EntityProfile,
    system_prompt: String,
    repair: RepairOptions,
}

impl<'a> RecordExtractor<'a> {
    pub fn new(client: OpenRouterClient, profile: &'a EntityProfile) -> Self {
        Self {
            client,
            model: DEFAULT_MODEL.to_string(),
            profile,
            system_prompt: prompts::DEFAULT_SYSTEM_PROMPT.to_string(),
            repair: RepairOptions::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the system prompt (e.g. for entity-specific phrasing).
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub async fn extract(
        &self,
        source_text: &str,
        entity_hint: &str,
        timeout: Duration,
    ) -> Result<ExtractedRecord> {
        let user_prompt = prompts::extraction_prompt(self.profile, entity_hint, source_text);
        let raw = self
            .client
            .chat_completion(&self.model, &self.system_prompt, &user_prompt, timeout)
            .await?;

        let mut parsed = repair::parse_response_with(&raw, &self.repair)?;

        // The generator sometimes writes the company name instead of the
        // slug; correct it here, the upsert guard still checks later.
        let reported_slug = parsed.get("entity_slug").and_then(Value::as_str);
        if reported_slug != Some(self.profile.slug.as_str()) {
            warn!(
                "extracted entity_slug {:?} does not match profile '{}'; correcting",
                reported_slug, self.profile.slug
            );
            parsed.insert(
                "entity_slug".to_string(),
                Value::String(self.profile.slug.clone()),
            );
        }

        let mut record = validate::validate(&parsed, self.profile)?;

        let options = NormalizeOptions {
            amounts_in_thousands: detect_thousands_declaration(source_text),
        };
        normalize::normalize(&mut record, self.profile, &options)?;

        Ok(record)
    }
}
