//! Centralized error types for the fitness session core.
//!
//! A structured `thiserror` enum plus an [`ErrorCode`] trait for
//! machine-readable codes. There is no admin HTTP surface in this crate, so
//! there is no response-conversion impl to carry.

use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code, stable across releases.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the fitness session core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// A gateway frame could not be decoded into a `Sample`. Counted and
    /// dropped at the Normalizer boundary; never surfaces past ingestion.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A sample referenced a `deviceId` with no roster assignment.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The Zone Classifier was asked to classify against an empty zone table.
    #[error("unknown zone configuration for user {0}")]
    UnknownZone(String),

    /// A lifecycle command was invalid for the session's current state.
    #[error("invalid session state: {0}")]
    InvalidSessionState(String),

    /// Wall-clock skew exceeded the catch-up cap; the session is degraded.
    #[error("tick drift exceeded cap: {0}")]
    TickDrift(String),

    /// Persistence failed after exhausting the retry schedule.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Malformed or unrecognized persisted session document.
    #[error("invalid session document: {0}")]
    InvalidDocument(String),

    /// Configuration failed validation at construction time.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Internal invariant violation; should not happen in correct operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for CoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::MalformedFrame(_) => "malformed_frame",
            Self::UnknownDevice(_) => "unknown_device",
            Self::UnknownZone(_) => "unknown_zone",
            Self::InvalidSessionState(_) => "invalid_session_state",
            Self::TickDrift(_) => "tick_drift",
            Self::PersistenceError(_) => "persistence_error",
            Self::InvalidDocument(_) => "invalid_document",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Convenient Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_zone_has_stable_code() {
        let err = CoreError::UnknownZone("alice".into());
        assert_eq!(err.code(), "unknown_zone");
    }

    #[test]
    fn persistence_error_has_stable_code() {
        let err = CoreError::PersistenceError("disk full".into());
        assert_eq!(err.code(), "persistence_error");
    }
}
