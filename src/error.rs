use thiserror::Error;

/// Failure modes of a single gateway call.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Network failure, timeout, rate limit, or a 5xx-equivalent. Retryable.
    #[error("transient gateway error: {0}")]
    Transient(String),

    /// The gateway returned something unusable: empty, non-JSON where JSON was
    /// requested, or schema-violating.
    #[error("malformed gateway output: {0}")]
    MalformedOutput(String),

    /// Terminal provider-side rejection (bad key, out of credits). Retrying
    /// will not help.
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transient(_) | GatewayError::MalformedOutput(_))
    }
}

/// Pipeline-level errors surfaced to callers.
#[derive(Debug, Error)]
pub enum SimError {
    /// Strict-mode extraction failure.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Structurally valid but out-of-policy content (wrong stakeholder count
    /// and similar). Production paths substitute a fallback instead.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Caller passed invalid arguments. Fails fast, never silently patched.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}
