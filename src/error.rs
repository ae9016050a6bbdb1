// CLASSIFICATION: COMMUNITY
// Filename: error.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Error type shared by every ABOX component.

use std::time::Duration;

use thiserror::Error;

use crate::calliope::CalliopeState;
use crate::qos::QosClass;

/// Errors returned by ABOX operations.
///
/// Variants are grouped the way callers react to them: transient conditions
/// are worth retrying, invalid input never is, and hardware faults are
/// escalated to the failsafe reporter by the component that detects them.
#[derive(Debug, Error)]
pub enum AboxError {
    /// IPC ring queue has no free slot.
    #[error("ipc queue full")]
    QueueFull,
    /// IPC ring queue holds no pending message.
    #[error("ipc queue empty")]
    QueueEmpty,
    /// Calliope cannot accept messages in its current state.
    #[error("calliope not ready: {0:?}")]
    NotReady(CalliopeState),
    /// Device still holds runtime power references.
    #[error("device busy: {usage} power references held")]
    Busy { usage: usize },

    /// Message does not fit in an IPC slot.
    #[error("invalid message: {size} bytes exceeds {max}")]
    InvalidMessage { size: usize, max: usize },
    /// Unknown IPC channel id.
    #[error("invalid ipc id: {0}")]
    InvalidIpcId(u32),
    /// Message bytes could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// QoS class has no free request slot.
    #[error("qos table full: {class:?} holds {capacity} requests")]
    QosTableFull { class: QosClass, capacity: usize },

    /// A bounded wait expired.
    #[error("{what} timed out after {after:?}")]
    Timeout { what: &'static str, after: Duration },
    /// The co-processor transport rejected a message.
    #[error("transport error: {0}")]
    Transport(String),
    /// Firmware could not be loaded onto the core.
    #[error("firmware error: {0}")]
    Firmware(String),
    /// Core did not reach standby.
    #[error("standby failed: {0}")]
    Standby(String),

    /// Operation is not allowed from the current state.
    #[error("invalid calliope state: {0:?}")]
    InvalidState(CalliopeState),

    /// Configuration could not be parsed or is inconsistent.
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AboxError {
    /// True for transient conditions that a caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AboxError::QueueFull | AboxError::NotReady(_) | AboxError::Busy { .. }
        )
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, AboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_retry() {
        assert!(AboxError::QueueFull.is_retryable());
        assert!(AboxError::Busy { usage: 2 }.is_retryable());
        assert!(!AboxError::InvalidMessage { size: 900, max: 768 }.is_retryable());
        assert!(!AboxError::Transport("nack".into()).is_retryable());
    }

    #[test]
    fn messages_carry_context() {
        let err = AboxError::Timeout {
            what: "boot done",
            after: Duration::from_millis(5),
        };
        assert_eq!(err.to_string(), "boot done timed out after 5ms");
    }
}
