//! Error types for the sync engine.

use fieldsync_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while submitting or replaying mutations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The local queue or cache could not be written.
    #[error("durability error: {0}")]
    Durability(#[from] StoreError),

    /// Network or transport failure. Transient by definition: the request
    /// may not have reached the server and is safe to retry as-is.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// The request did not complete within the configured deadline.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a definitive non-conflict rejection.
    #[error("server rejected request with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Raw response body, if any.
        body: Vec<u8>,
    },

    /// A resolution was requested for a conflict the engine is not holding.
    #[error("no recorded conflict for mutation {0}")]
    UnknownConflict(u64),

    /// An acknowledgment targeted a mutation that is not dead-lettered.
    #[error("mutation {0} is not dead-lettered")]
    NotDeadLettered(u64),

    /// The engine has been shut down.
    #[error("engine stopped")]
    Stopped,
}

impl EngineError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// True when retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transport { .. } | EngineError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(EngineError::transport("connection reset").is_transient());
        assert!(EngineError::Timeout.is_transient());
        assert!(!EngineError::Rejected {
            status: 403,
            body: Vec::new()
        }
        .is_transient());
        assert!(!EngineError::UnknownConflict(1).is_transient());
    }

    #[test]
    fn error_display() {
        let err = EngineError::Rejected {
            status: 422,
            body: b"bad payload".to_vec(),
        };
        assert!(err.to_string().contains("422"));
        assert_eq!(
            EngineError::UnknownConflict(7).to_string(),
            "no recorded conflict for mutation 7"
        );
    }
}
