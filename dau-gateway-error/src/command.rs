use std::time::Duration;
use thiserror::Error;

/// Failure of a single device-bound command.
///
/// Transport and framing problems are recovered inside the registry; only
/// these variants travel back to callers of the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// No live connection for the device, or the write to it failed.
    #[error("device {0} is not connected")]
    Unavailable(String),
    /// No correlated response arrived within the call's timeout.
    #[error("device {device} did not answer sequence {sequence} within {timeout:?}")]
    DeadlineExceeded {
        device: String,
        sequence: u32,
        timeout: Duration,
    },
    /// A response arrived but its shape does not belong to the request.
    #[error("internal: {0}")]
    Internal(String),
    /// The connection went away while the command could still not complete.
    #[error("connection to device {0} lost")]
    ConnectionLost(String),
    /// The device broke a protocol rule that is not tied to a single call.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// Well-formed response with a non-OK device status.
    #[error("device {device} rejected the command ({status}): {message}")]
    Rejected {
        device: String,
        status: String,
        message: String,
    },
}

impl CommandError {
    /// Stable short code used by the facade and the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::Unavailable(_) => "unavailable",
            CommandError::DeadlineExceeded { .. } => "deadline_exceeded",
            CommandError::Internal(_) => "internal",
            CommandError::ConnectionLost(_) => "connection_lost",
            CommandError::ProtocolViolation(_) => "protocol_violation",
            CommandError::Rejected { .. } => "rejected",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::DeadlineExceeded { .. })
    }
}
