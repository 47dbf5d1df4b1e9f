// src/error.rs
// Error taxonomy for the turn pipeline

use thiserror::Error;

/// Canned message emitted when the model API reports throttling.
pub const RATE_LIMIT_MESSAGE: &str =
    "The system is receiving too many requests right now. Please wait a few seconds and try again.";

/// Canned message for every other turn-level failure.
pub const RETRY_LATER_MESSAGE: &str =
    "An internal error has occurred. Please try again later.";

/// Errors that can surface from a turn. Tool failures are NOT represented
/// here: they come back to the reasoning loop as observation strings.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("model call rate limited: {0}")]
    RateLimited(String),

    #[error("model call failed: {0}")]
    Model(String),

    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Classify a transport-level model failure. Azure reports throttling
    /// either as HTTP 429 or with a "RateLimitReached" error code in the body.
    pub fn from_model_failure(status: Option<reqwest::StatusCode>, detail: String) -> Self {
        let throttled = status.map(|s| s.as_u16() == 429).unwrap_or(false)
            || detail.contains("429")
            || detail.contains("RateLimitReached");
        if throttled {
            PipelineError::RateLimited(detail)
        } else {
            PipelineError::Model(detail)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            PipelineError::RateLimited(_) => true,
            PipelineError::Model(detail) => {
                detail.contains("429") || detail.contains("RateLimitReached")
            }
            _ => false,
        }
    }

    /// The one user-visible message for a failed turn.
    pub fn user_message(&self) -> &'static str {
        if self.is_rate_limited() {
            RATE_LIMIT_MESSAGE
        } else {
            RETRY_LATER_MESSAGE
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::from_model_failure(err.status(), err.to_string())
    }
}
