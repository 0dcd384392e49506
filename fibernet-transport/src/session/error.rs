//! RPC error types.

use std::time::Duration;

use fibernet_core::{CodecError, error_code};

use crate::channel::ChannelError;

/// Errors returned by session calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The response carried an error code in the raising range.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Application error code.
        code: i32,
        /// Error detail from the response, possibly empty.
        message: String,
    },

    /// The session was torn down before the call completed.
    #[error("session closed (error {error})")]
    SessionClosed {
        /// Error code the session was disposed with.
        error: i32,
    },

    /// No response within the deadline.
    #[error("call {name} timed out after {after:?}")]
    Timeout {
        /// Request type name.
        name: &'static str,
        /// Deadline that elapsed.
        after: Duration,
    },

    /// A response arrived for the call with an unexpected opcode.
    #[error("expected response opcode {expected}, got {actual}")]
    ResponseMismatch {
        /// Opcode of the declared response type.
        expected: u16,
        /// Opcode actually received.
        actual: u16,
    },

    /// Body encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Codec failure description.
        message: String,
    },

    /// The channel refused the packet.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl RpcError {
    /// Error code equivalent, for replies and logs.
    pub fn error_code(&self) -> i32 {
        match self {
            RpcError::Remote { code, .. } => *code,
            RpcError::SessionClosed { error } => *error,
            RpcError::Timeout { .. } => error_code::ERR_RPC_TIMEOUT,
            RpcError::ResponseMismatch { .. } | RpcError::Codec { .. } => error_code::ERR_CODEC,
            RpcError::Channel(e) => e.error_code(),
        }
    }
}

impl From<CodecError> for RpcError {
    fn from(error: CodecError) -> Self {
        RpcError::Codec {
            message: error.to_string(),
        }
    }
}

/// Result type for session operations.
pub type RpcResult<T> = Result<T, RpcError>;
