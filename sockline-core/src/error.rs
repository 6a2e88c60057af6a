//! Error types for Sockline
//!
//! Every fault the protocol layer can detect lives here. A core [`Error`] is
//! always fatal for the connection it was raised on; recoverable conditions
//! such as sending on a closed connection are modelled by the server crate.

#![allow(missing_docs)]

use std::fmt;
use thiserror::Error;

/// Result type alias for Sockline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for Sockline operations
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame errors
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Message errors
    #[error("Message error: {0}")]
    Message(#[from] MessageError),
}

impl Error {
    /// Close status to report to the peer when this error fails a connection
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::Frame(FrameError::TooLarge { .. }) => CloseCode::TooBig,
            Error::Message(MessageError::TooLarge { .. }) => CloseCode::TooBig,
            Error::Message(MessageError::InvalidUtf8) => CloseCode::InvalidPayload,
            Error::Io(_) => CloseCode::Abnormal,
            _ => CloseCode::ProtocolError,
        }
    }

    /// Whether this error came from the underlying transport rather than the peer's bytes
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

/// Handshake-level protocol errors
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Missing required headers
    #[error("Missing required header: {0}")]
    MissingHeader(String),

    /// Invalid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Invalid format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Request headers exceeded the allowed size
    #[error("Handshake request exceeds {max} bytes")]
    RequestTooLarge { max: usize },
}

/// Frame parsing and processing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Insufficient data to parse frame
    #[error("Insufficient data: need {needed} bytes, have {have}")]
    InsufficientData { needed: usize, have: usize },

    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    TooLarge { size: u64, max: usize },

    /// Inbound frame without the mask bit
    #[error("Frame from client is not masked")]
    Unmasked,

    /// Reserved bits set
    #[error("Reserved bits set in frame")]
    ReservedBitsSet,

    /// Control frames cannot be fragmented
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload over 125 bytes
    #[error("Control frame payload too large: {0} bytes")]
    ControlFrameTooLarge(usize),
}

/// Message assembly errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Message too large
    #[error("Message too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// Continuation frame without a message in progress
    #[error("Continuation frame without a message in progress")]
    UnexpectedContinuation,

    /// Invalid UTF-8 in a text message
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,
}

/// WebSocket close codes as defined in RFC 6455
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Normal closure
    Normal,
    /// Going away
    Away,
    /// Protocol error
    ProtocolError,
    /// Unsupported data
    Unsupported,
    /// No status received
    NoStatus,
    /// Abnormal closure
    Abnormal,
    /// Invalid frame payload data
    InvalidPayload,
    /// Policy violation
    PolicyViolation,
    /// Message too big
    TooBig,
    /// Mandatory extension
    MandatoryExtension,
    /// Internal server error
    Internal,
    /// TLS handshake failure
    TlsHandshake,
    /// Application-specific close code
    Application(u16),
}

impl CloseCode {
    /// Create a CloseCode from a u16
    pub fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::TooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::Internal,
            1015 => CloseCode::TlsHandshake,
            code if (3000..=4999).contains(&code) => CloseCode::Application(code),
            _ => CloseCode::ProtocolError,
        }
    }

    /// Get the numeric value of the close code
    pub fn code(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::TooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::Internal => 1011,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Application(code) => *code,
        }
    }

    /// Reserved codes must never appear in a close frame on the wire
    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            CloseCode::NoStatus | CloseCode::Abnormal | CloseCode::TlsHandshake
        )
    }

    /// Check if this close code indicates an error
    pub fn is_error(&self) -> bool {
        !matches!(self, CloseCode::Normal | CloseCode::Away)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseCode::Normal => "normal",
            CloseCode::Away => "going away",
            CloseCode::ProtocolError => "protocol error",
            CloseCode::Unsupported => "unsupported data",
            CloseCode::NoStatus => "no status",
            CloseCode::Abnormal => "abnormal closure",
            CloseCode::InvalidPayload => "invalid payload",
            CloseCode::PolicyViolation => "policy violation",
            CloseCode::TooBig => "message too big",
            CloseCode::MandatoryExtension => "mandatory extension",
            CloseCode::Internal => "internal error",
            CloseCode::TlsHandshake => "TLS handshake failure",
            CloseCode::Application(_) => "application",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_conversion() {
        assert_eq!(CloseCode::from(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from(3000), CloseCode::Application(3000));
        assert_eq!(CloseCode::from(999), CloseCode::ProtocolError);
        assert_eq!(CloseCode::TooBig.code(), 1009);
        assert!(CloseCode::Abnormal.is_reserved());
    }

    #[test]
    fn test_close_code_display() {
        assert_eq!(CloseCode::Normal.to_string(), "normal (1000)");
        assert_eq!(CloseCode::Application(4001).to_string(), "application (4001)");
    }

    #[test]
    fn test_error_close_code_mapping() {
        let err = Error::from(FrameError::ReservedBitsSet);
        assert_eq!(err.close_code(), CloseCode::ProtocolError);

        let err = Error::from(FrameError::TooLarge { size: 10, max: 5 });
        assert_eq!(err.close_code(), CloseCode::TooBig);

        let err = Error::from(MessageError::InvalidUtf8);
        assert_eq!(err.close_code(), CloseCode::InvalidPayload);

        let err = Error::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(err.is_transport());
        assert_eq!(err.close_code(), CloseCode::Abnormal);
    }

    #[test]
    fn test_error_display() {
        let err = Error::Protocol(ProtocolError::MissingHeader("Sec-WebSocket-Key".into()));
        assert_eq!(
            err.to_string(),
            "Protocol error: Missing required header: Sec-WebSocket-Key"
        );
    }
}
