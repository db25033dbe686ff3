//! Error types for docchat.
//!
//! Nothing here is fatal to the process. Every variant is scoped to the
//! current turn or request.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or rejected API key. Carries the provider display name.
    #[error("Please enter a valid {0} API key.")]
    Credential(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Trace lookup failed: {0}")]
    TraceLookup(String),

    #[error("Invalid feedback score: {0}")]
    FeedbackValidation(String),

    #[error("A response is still streaming for this session")]
    Busy,

    #[error("No traced run is available for feedback")]
    NoActiveRun,

    #[error("Tracing is not enabled")]
    TracingDisabled,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors the user can fix by changing input, shown as warnings.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::Credential(_)
                | Error::Config(_)
                | Error::FeedbackValidation(_)
                | Error::Busy
                | Error::NoActiveRun
                | Error::TracingDisabled
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
