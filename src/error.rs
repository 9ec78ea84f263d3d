use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("malformed response: no parseable object recovered from generator output")]
    MalformedResponse {
        /// Residual text after every repair strategy, kept for operator diagnosis.
        residual: String,
    },

    #[error("schema violation against '{profile}' v{version}: {}", violations.join("; "))]
    SchemaViolation {
        profile: String,
        version: u32,
        violations: Vec<String>,
    },

    #[error("normalization ambiguity on field '{field}': {details}")]
    NormalizationAmbiguity { field: String, details: String },

    #[error("no exchange rate available for quarter {quarter}")]
    RateUnavailable { quarter: String },

    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("duplicate key conflict on ({entity_slug}, {period_date}) after retry")]
    DuplicateKeyConflict {
        entity_slug: String,
        period_date: String,
    },

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("unknown entity profile: {0}")]
    UnknownProfile(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[cfg(any(feature = "openrouter", feature = "supabase"))]
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    #[cfg(any(feature = "openrouter", feature = "supabase"))]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExtractError>;
