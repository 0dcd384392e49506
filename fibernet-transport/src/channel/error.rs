//! Error types for channel operations.

use std::io;
use thiserror::Error;

use crate::wire::WireError;
use fibernet_core::error_code;

/// Errors that can occur during channel operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel was closed, locally or after an earlier error.
    #[error("channel closed")]
    Closed,

    /// The remote end closed the stream.
    #[error("connection closed by peer")]
    PeerClosed,

    /// Connection attempt did not finish in time.
    #[error("connect to {address} timed out")]
    ConnectTimeout {
        /// Address being connected to.
        address: String,
    },

    /// Connection attempt failed.
    #[error("connect to {address} failed: {message}")]
    ConnectFailed {
        /// Address being connected to.
        address: String,
        /// Underlying error.
        message: String,
    },

    /// I/O operation failed.
    #[error("I/O error ({kind:?}): {message}")]
    Io {
        /// Error kind.
        kind: io::ErrorKind,
        /// Error description.
        message: String,
    },

    /// Framing error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

impl ChannelError {
    /// Error code reported to sessions torn down by this error.
    pub fn error_code(&self) -> i32 {
        match self {
            ChannelError::Wire(WireError::PacketTooLarge { .. }) => {
                error_code::ERR_PACKET_TOO_LARGE
            }
            _ => error_code::ERR_PEER_DISCONNECTED,
        }
    }
}

impl From<io::Error> for ChannelError {
    fn from(error: io::Error) -> Self {
        ChannelError::Io {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
