//! Error types shared across SpawnWatch crates.

use thiserror::Error;

/// Result alias for SpawnWatch operations.
pub type Result<T> = std::result::Result<T, SpawnWatchError>;

/// Top-level error taxonomy.
#[derive(Debug, Error)]
pub enum SpawnWatchError {
    /// Malformed input rejected at the boundary. Never reaches stored state.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown entity, tenant, or record.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage read or write failed.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a message transport.
///
/// Scheduler steps treat every variant as "attempted, not delivered".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The referenced message or destination no longer exists.
    #[error("message or destination not found")]
    NotFound,

    #[error("http error: {0}")]
    Http(String),

    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },

    /// The transport refused the call (disabled, closed DMs, injected failure).
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_converts() {
        let err: SpawnWatchError = TransportError::NotFound.into();
        assert!(matches!(err, SpawnWatchError::Transport(TransportError::NotFound)));
        assert_eq!(err.to_string(), "message or destination not found");
    }

    #[test]
    fn test_api_error_display() {
        let err = TransportError::Api {
            status: 429,
            body: "rate limited".into(),
        };
        assert_eq!(err.to_string(), "api error 429: rate limited");
    }
}
