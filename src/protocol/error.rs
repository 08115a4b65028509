//! Protocol error types.

use thiserror::Error;

/// Errors related to wire message handling.
///
/// Everything here is swallowed at the receive path with a one-line log;
/// the medium is lossy by design and a malformed datagram is just more
/// loss.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid message kind: 0x{0:02x}")]
    InvalidMessageKind(u8),

    #[error("bad frame length: expected {expected}, got {got}")]
    BadFrameLength { expected: usize, got: usize },

    #[error("message too short: expected at least {expected}, got {got}")]
    MessageTooShort { expected: usize, got: usize },

    #[error("payload too long: max {max}, got {got}")]
    PayloadTooLong { max: usize, got: usize },

    #[error("string field too long: max {max}, got {got}")]
    StringTooLong { max: usize, got: usize },

    #[error("malformed message: {0}")]
    Malformed(String),
}
