use thiserror::Error;

/// Core error type for chatrelay.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limited by backend")]
    RateLimited { retry_after: Option<u64> },

    #[error("backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("backend error: {code} {message}")]
    Backend { code: String, message: String },

    #[error("sse event exceeds {limit} bytes")]
    EventTooLarge { limit: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, RelayError>;

/// Terminal failure of one streaming call, as surfaced to callers that want `?`.
#[derive(Debug, Error)]
pub enum StreamFailure {
    #[error("backend reported error: {0}")]
    BackendReported(String),

    #[error("transport failure: {0}")]
    Transport(#[source] RelayError),

    #[error("malformed stream event ({reason}): {payload}")]
    MalformedEvent { payload: String, reason: String },

    #[error("downstream relay failed: {0}")]
    Relay(#[source] RelayError),

    #[error("stream cancelled")]
    Cancelled,
}

impl StreamFailure {
    /// Cancellation maps to a silent abort rather than an error response.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
