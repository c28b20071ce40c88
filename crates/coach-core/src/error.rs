//! Error taxonomy (§7). One variant per error kind in the specification's
//! table, each mapped to the external status code it carries.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CoachError {
    #[error("image fetch failed: {0}")]
    ImageFetch(String),

    #[error("LLM provider authentication failed: {0}")]
    LlmProviderAuth(String),

    #[error("LLM provider throttled: {0}")]
    LlmProviderThrottled(String),

    #[error("LLM JSON parse exhausted all strategies: {0}")]
    JsonParseExhausted(String),

    #[error("coordinate validation failed and could not be repaired: {0}")]
    ValidationRange(String),

    #[error("moderation rejected the reply set: {0}")]
    ModerationReject(String),

    #[error("moderation service unavailable: {0}")]
    ModerationUnavailable(String),

    #[error("reply generation exhausted {attempts} attempts: {reason}")]
    RetryExhausted { attempts: u32, reason: String },

    #[error("both race arms produced invalid output: {0}")]
    RaceBothArmsInvalid(String),

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("{component} failed: {source}")]
    Wrapped {
        component: &'static str,
        #[source]
        source: Box<CoachError>,
    },
}

impl CoachError {
    /// Wrap a lower-layer error with the name of the component that
    /// surfaced it, without masking the underlying kind (§7 propagation
    /// policy).
    pub fn wrapped(component: &'static str, source: CoachError) -> CoachError {
        CoachError::Wrapped {
            component,
            source: Box::new(source),
        }
    }

    /// External HTTP status mapping from the §7 table. `Wrapped` defers to
    /// the status of the error it wraps.
    pub fn status_code(&self) -> u16 {
        match self {
            CoachError::ImageFetch(_) => 422,
            CoachError::LlmProviderAuth(_) => 500,
            CoachError::LlmProviderThrottled(_) => 500,
            CoachError::JsonParseExhausted(_) => 500,
            CoachError::ValidationRange(_) => 500,
            CoachError::ModerationReject(_) => 500,
            CoachError::ModerationUnavailable(_) => 500,
            CoachError::RetryExhausted { .. } => 500,
            CoachError::RaceBothArmsInvalid(_) => 500,
            CoachError::QuotaExceeded => 402,
            CoachError::Timeout(_) => 504,
            CoachError::Wrapped { source, .. } => source.status_code(),
        }
    }

    /// Short machine-readable kind, independent of the human message.
    pub fn kind(&self) -> &'static str {
        match self {
            CoachError::ImageFetch(_) => "image_fetch",
            CoachError::LlmProviderAuth(_) => "llm_provider_auth",
            CoachError::LlmProviderThrottled(_) => "llm_provider_throttled",
            CoachError::JsonParseExhausted(_) => "json_parse_exhausted",
            CoachError::ValidationRange(_) => "validation_range",
            CoachError::ModerationReject(_) => "moderation_reject",
            CoachError::ModerationUnavailable(_) => "moderation_service_unavailable",
            CoachError::RetryExhausted { .. } => "retry_exhausted",
            CoachError::RaceBothArmsInvalid(_) => "race_both_arms_invalid",
            CoachError::QuotaExceeded => "quota_exceeded",
            CoachError::Timeout(_) => "timeout",
            CoachError::Wrapped { source, .. } => source.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoachError>;
