//! Error taxonomy for the bridge.
//!
//! Everything except [`BridgeError::ExecutionFailed`] is a fault of the
//! connection or the peer and leaves the session unusable.

use revm::primitives::Bytes;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failures while framing or decoding a protocol message.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Length prefix is zero or above the configured cap.
    #[error("invalid frame length {len} (max {max})")]
    InvalidLength { len: u32, max: u32 },

    /// Frame carries a protocol version we do not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Stream ended in the middle of a frame.
    #[error("truncated frame: expected {expected} bytes")]
    Truncated { expected: usize },

    /// Payload did not decode into the expected message (unknown tag, bad field).
    #[error("malformed payload: {0}")]
    Malformed(#[from] bincode::Error),

    /// Payload decoded but left unread bytes behind.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Errors surfaced by [`Session::call`](crate::Session::call) and
/// [`Session::create`](crate::Session::create).
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Dial, read or write failure on the transport.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    /// Undecodable message from the engine.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The engine sent nothing within the read deadline.
    #[error("engine did not respond within {0:?}")]
    EngineTimeout(Duration),

    /// The engine executed the request and reported failure. No state was committed.
    #[error("execution failed ({} bytes of return data, {gas_left} gas left)", .return_data.len())]
    ExecutionFailed { return_data: Bytes, gas_left: u64 },

    /// Hello could not be encoded or written.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The engine broke the message contract (e.g. create without an address).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An earlier fatal error left the engine in an unknown state.
    #[error("session is unusable after an earlier fatal error")]
    SessionPoisoned,
}

impl BridgeError {
    /// Whether the session that produced this error must be discarded.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BridgeError::ExecutionFailed { .. })
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_execution_failure_is_recoverable() {
        let failed = BridgeError::ExecutionFailed { return_data: Bytes::new(), gas_left: 7 };
        assert!(!failed.is_fatal());
        assert!(BridgeError::EngineTimeout(Duration::from_secs(1)).is_fatal());
        assert!(BridgeError::SessionPoisoned.is_fatal());
        assert!(BridgeError::Codec(CodecError::UnsupportedVersion(9)).is_fatal());
    }

    #[test]
    fn display_mentions_gas_left() {
        let failed = BridgeError::ExecutionFailed {
            return_data: Bytes::from_static(&[1, 2, 3]),
            gas_left: 42,
        };
        assert_eq!(failed.to_string(), "execution failed (3 bytes of return data, 42 gas left)");
    }
}
