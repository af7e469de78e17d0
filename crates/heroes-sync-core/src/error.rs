use thiserror::Error;

/// Failure causes behind the coarse `bool` / `Option` adapter contract.
///
/// The public `save`/`load`/`check_for_updates` methods collapse every variant into
/// "did not succeed"; the `try_*` methods keep the cause so callers and tests can tell
/// them apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Network failure, non-2xx response, or local storage I/O failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// No usable credential (or backend handle) is available.
    #[error("backend not configured: {0}")]
    NotConfigured(String),

    /// The resource or the tournament entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The stored document is not a payload, or belongs to another tournament.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The encoded payload does not fit the transport.
    #[error("payload too large: {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl SyncError {
    /// Stable short name of the variant, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Transport(_) => "transport",
            SyncError::NotConfigured(_) => "not_configured",
            SyncError::NotFound(_) => "not_found",
            SyncError::ShapeMismatch(_) => "shape_mismatch",
            SyncError::PayloadTooLarge { .. } => "payload_too_large",
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::ShapeMismatch(format!("invalid JSON: {}", e))
    }
}
