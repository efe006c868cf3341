//! Error types for the shield engine
//!
//! Detections are never errors: they are [`SecurityEvent`](crate::SecurityEvent)s.
//! A `ShieldError` means the engine itself could not reach a decision, which
//! escalates to an emergency shutdown.

use thiserror::Error;

/// Result type for shield operations
pub type ShieldResult<T> = Result<T, ShieldError>;

/// Infrastructure errors raised inside the engine
#[derive(Error, Debug, Clone)]
pub enum ShieldError {
    #[error("Replay store failure: {0}")]
    ReplayStore(String),

    #[error("Profile store failure: {0}")]
    ProfileStore(String),

    #[error("Malformed JWT: {0}")]
    MalformedToken(String),

    #[error("JWT algorithm rejected: {0}")]
    AlgorithmRejected(String),

    #[error("JWT signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("Evaluation panicked: {0}")]
    Panic(String),
}

impl ShieldError {
    /// Whether this error indicates broken shared state rather than a bad token
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            ShieldError::ReplayStore(_)
                | ShieldError::ProfileStore(_)
                | ShieldError::Panic(_)
        )
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            ShieldError::ReplayStore(_) => "replay_store",
            ShieldError::ProfileStore(_) => "profile_store",
            ShieldError::MalformedToken(_) => "malformed_token",
            ShieldError::AlgorithmRejected(_) => "algorithm_rejected",
            ShieldError::SignatureVerification(_) => "signature_verification",
            ShieldError::Panic(_) => "panic",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for ShieldError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        ShieldError::SignatureVerification(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        let store_error = ShieldError::ReplayStore("connection reset".to_string());
        assert!(store_error.is_critical());
        assert_eq!(store_error.category(), "replay_store");

        let token_error = ShieldError::MalformedToken("missing segment".to_string());
        assert!(!token_error.is_critical());
        assert_eq!(token_error.category(), "malformed_token");
    }

    #[test]
    fn test_error_display() {
        let error = ShieldError::AlgorithmRejected("none".to_string());
        assert_eq!(error.to_string(), "JWT algorithm rejected: none");
    }
}
