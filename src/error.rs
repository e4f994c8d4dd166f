use thiserror::Error;

/// Failure of a single call against the mailbox provider or Pub/Sub.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl ProviderError {
    /// Classify a non-success HTTP status from a Google API.
    pub fn from_status(status: reqwest::StatusCode, context: &str, body: &str) -> Self {
        let detail = format!("{context} ({status}): {body}");
        match status.as_u16() {
            404 => ProviderError::NotFound(detail),
            401 | 403 => ProviderError::Unauthorized(detail),
            _ => ProviderError::Unavailable(detail),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Unavailable(e.to_string())
    }
}

impl From<anyhow::Error> for ProviderError {
    // token acquisition failures surface through this path
    fn from(e: anyhow::Error) -> Self {
        ProviderError::Unauthorized(format!("{e:#}"))
    }
}

/// Error taxonomy of the ingestion -> delivery pipeline.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("malformed push payload: {0}")]
    MalformedPayload(String),
    #[error("message {0} not found")]
    NotFound(String),
    #[error("delivery failed after {attempts} attempt(s): {reason}")]
    DeliveryFailed { attempts: u32, reason: String },
    #[error("summarization failed: {0}")]
    SummarizationFailed(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("state store: {0}")]
    Store(String),
}

impl From<ProviderError> for RelayError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::NotFound(d) => RelayError::NotFound(d),
            other => RelayError::ProviderUnavailable(other.to_string()),
        }
    }
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;
