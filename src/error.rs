//! Error types for the channel multiplexer.
//!
//! The routing engine itself never surfaces errors: malformed or unroutable
//! packets are dropped and logged. The variants below cover the host-facing
//! operations that can genuinely fail (binding the server, upgrading a
//! socket, writing to a membership whose connection is gone) plus the decode
//! reasons used internally by packet dispatch.
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Connection | [`Error::ConnectionClosed`], [`Error::WebSocket`] |
//! | Membership | [`Error::MembershipClosed`] |
//! | Protocol | [`Error::Protocol`] |
//! | Decode | [`Error::Json`] |
//! | External | [`Error::Io`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::MembershipId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The physical connection is gone.
    ///
    /// Returned when writing to a connection whose event loop has stopped.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Membership Errors
    // ========================================================================
    /// The virtual connection was already ended.
    #[error("Membership closed: {id}")]
    MembershipClosed {
        /// Membership id of the ended virtual connection.
        id: MembershipId,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Packet could not be decoded.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Inbound frame is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket upgrade or transport failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a membership closed error.
    #[inline]
    pub fn membership_closed(id: MembershipId) -> Self {
        Self::MembershipClosed { id }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::WebSocket(_))
    }

    /// Returns `true` if this error came from decoding a packet.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Json(_))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::protocol("not an array");
        assert_eq!(err.to_string(), "Protocol error: not an array");
    }

    #[test]
    fn test_membership_closed_display() {
        let err = Error::membership_closed(MembershipId::new("x1"));
        assert_eq!(err.to_string(), "Membership closed: x1");
    }

    #[test]
    fn test_is_connection_error() {
        let ws_err = Error::from(WsError::ConnectionClosed);

        assert!(ws_err.is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::protocol("test").is_connection_error());
        assert!(!Error::membership_closed(MembershipId::new("a")).is_connection_error());
    }

    #[test]
    fn test_is_protocol_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();

        assert!(Error::protocol("not an array").is_protocol_error());
        assert!(Error::from(json_err).is_protocol_error());
        assert!(!Error::ConnectionClosed.is_protocol_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::AddrInUse, "port taken");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
