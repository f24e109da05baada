//! Error types for avrcp-session-core

use std::io;
use thiserror::Error;

/// Result type alias using AvrcpError
pub type Result<T> = std::result::Result<T, AvrcpError>;

/// Reasons a registration or command can be rejected locally or by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// A registration for this event id is already Requested or Active
    AlreadyPending,
    /// The peer answered with an AVRCP status code other than Success
    PeerStatus(u8),
    /// The event id is not supported by this endpoint
    UnsupportedEvent,
    /// Local policy refused the command
    Policy(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::AlreadyPending => write!(f, "registration already pending"),
            RejectReason::PeerStatus(code) => write!(f, "peer status 0x{:02x}", code),
            RejectReason::UnsupportedEvent => write!(f, "event not supported"),
            RejectReason::Policy(msg) => write!(f, "policy: {}", msg),
        }
    }
}

/// AVRCP session engine error types
///
/// Decode and fragmentation errors are local and non-fatal: the offending
/// frame is dropped and the session continues. Only a connection-state
/// change tears a session down, cascading `Cancelled` to every outstanding
/// transaction.
#[derive(Debug, Error)]
pub enum AvrcpError {
    /// I/O error from the underlying transport
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed frame; dropped without touching session state
    #[error("Decode error: {0}")]
    Decode(String),

    /// Out-of-order fragment; in-progress reassembly aborted
    #[error("Fragmentation error: {0}")]
    Fragmentation(String),

    /// All 16 transaction labels are outstanding
    #[error("Transaction labels exhausted")]
    LabelsExhausted,

    /// Peer or local policy rejection
    #[error("Rejected: {0}")]
    Rejected(RejectReason),

    /// Browsing index range invalid or out of bounds
    #[error("Range error: {0}")]
    Range(String),

    /// No response within the configured deadline
    #[error("Command timed out")]
    TimedOut,

    /// Session torn down while the transaction was in flight
    #[error("Command cancelled")]
    Cancelled,

    /// ChangePath(Up) at the folder root
    #[error("Invalid direction: already at folder root")]
    InvalidDirection,

    /// The remote content tree changed since the cursor was established
    #[error("UID counter stale: expected {expected}, peer reported {actual}")]
    UidCounterStale { expected: u16, actual: u16 },

    /// No session exists for the given device address
    #[error("Device not connected: {0}")]
    NotConnected(String),

    /// A session for this device already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Handler already registered for a PDU id
    #[error("Handler error: {0}")]
    Handler(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl AvrcpError {
    /// Create a Decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a Fragmentation error
    pub fn fragmentation(msg: impl Into<String>) -> Self {
        Self::Fragmentation(msg.into())
    }

    /// Create a Range error
    pub fn range(msg: impl Into<String>) -> Self {
        Self::Range(msg.into())
    }

    /// Create a NotConnected error
    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::NotConnected(msg.into())
    }

    /// Create a Handler error
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    /// Create an Other error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error leaves the session usable
    ///
    /// Everything except `Cancelled` is recoverable: decode errors drop a
    /// frame, timeouts surface to the caller, exhaustion invites a retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AvrcpError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AvrcpError::decode("parameter length mismatch");
        assert_eq!(err.to_string(), "Decode error: parameter length mismatch");

        let err = AvrcpError::UidCounterStale {
            expected: 3,
            actual: 4,
        };
        assert!(err.to_string().contains("expected 3"));
    }

    #[test]
    fn test_reject_reason_display() {
        let err = AvrcpError::Rejected(RejectReason::AlreadyPending);
        assert_eq!(err.to_string(), "Rejected: registration already pending");

        let err = AvrcpError::Rejected(RejectReason::PeerStatus(0x0b));
        assert!(err.to_string().contains("0x0b"));
    }

    #[test]
    fn test_recoverable() {
        assert!(AvrcpError::TimedOut.is_recoverable());
        assert!(AvrcpError::LabelsExhausted.is_recoverable());
        assert!(!AvrcpError::Cancelled.is_recoverable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err: AvrcpError = io_err.into();
        assert!(matches!(err, AvrcpError::Io(_)));
    }
}
