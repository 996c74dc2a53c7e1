//! Error taxonomy for the capture pipeline

use std::time::Duration;
use thiserror::Error;

use crate::session::SessionState;

/// Camera/microphone acquisition failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaAccessError {
    /// The user (or OS policy) refused access. Needs explicit user action.
    #[error("Permission to use camera/microphone was denied")]
    PermissionDenied,

    /// No matching device is attached. May succeed once one is connected.
    #[error("No camera or microphone found")]
    NoDevice,

    #[error("Media device error: {0}")]
    Device(String),
}

impl MediaAccessError {
    /// Whether trying again later can succeed without user intervention
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoDevice)
    }
}

/// None of the candidate encodings is supported by the environment
#[derive(Debug, Clone, Error)]
#[error("None of the candidate encodings is supported: {}", tried.join(", "))]
pub struct EncodingUnsupportedError {
    pub tried: Vec<String>,
}

/// A persistence call exceeded its bound
#[derive(Debug, Clone, Error)]
#[error("{operation} timed out after {}s", after.as_secs_f64())]
pub struct NetworkTimeoutError {
    pub operation: String,
    pub after: Duration,
}

/// An auxiliary clip could not be decoded
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("Unrecognised audio container: {0}")]
    Format(String),

    #[error("Clip has no decodable audio track")]
    NoAudioTrack,

    #[error("Failed to decode clip: {0}")]
    Codec(String),

    #[error("Clip decoded to zero samples")]
    Empty,
}

/// Conversational transport failure
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Failed to connect conversational transport: {0}")]
    Connect(String),

    #[error("Conversational transport error: {0}")]
    Remote(String),
}

/// Operation not allowed in the orchestrator's current state
#[derive(Debug, Clone, Error)]
#[error("Invalid state transition: cannot {action} while in {current_state} state")]
pub struct InvalidStateTransition {
    pub current_state: SessionState,
    pub action: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_terminal() {
        assert!(!MediaAccessError::PermissionDenied.is_retryable());
        assert!(MediaAccessError::NoDevice.is_retryable());
        assert!(!MediaAccessError::Device("busy".into()).is_retryable());
    }

    #[test]
    fn timeout_message_names_operation() {
        let err = NetworkTimeoutError {
            operation: "artifact upload".to_string(),
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "artifact upload timed out after 30s");
    }
}
