//! Protocol errors

use thiserror::Error;

use super::frame::{ErrorCode, ResponseTag};

/// Errors that can occur during communication with the strip controller
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Not connected to controller")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(#[from] Violation),

    #[error("Controller reported error: {0}")]
    DeviceError(ErrorCode),

    #[error("Bulk payload mismatch: header declares {declared} bytes, payload holds {actual}")]
    PayloadMismatch { declared: usize, actual: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The ways an inbound frame can break the protocol
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    #[error("unknown response tag {0:#04x}")]
    UnknownResponseTag(u8),

    #[error("unknown error code {0}")]
    UnknownErrorCode(u8),

    #[error("expected {expected:?}, got {actual:?}")]
    UnexpectedResponse {
        expected: ResponseTag,
        actual: ResponseTag,
    },
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::Io(std::io::ErrorKind::TimedOut) => ProtocolError::Timeout,
            _ => ProtocolError::SerialError(e.to_string()),
        }
    }
}

impl ProtocolError {
    /// True for failures where the device never answered in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtocolError::Timeout)
    }
}
