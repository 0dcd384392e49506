//! Lockstep errors.

use thiserror::Error;

use fibernet_core::CodecError;

/// Errors from the frame buffer, client and server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockStepError {
    /// Frame outside the buffered window.
    #[error("frame {frame} outside buffered window {oldest}..={newest}")]
    FrameOutOfRange {
        /// Requested frame.
        frame: u32,
        /// Oldest frame still buffered.
        oldest: u32,
        /// Newest frame buffered.
        newest: u32,
    },

    /// Frames must arrive and advance one at a time.
    #[error("expected frame {expected}, got {got}")]
    UnexpectedFrame {
        /// The only acceptable frame.
        expected: u32,
        /// Frame received.
        got: u32,
    },

    /// Storing the frame would evict frames that have not been replayed.
    #[error("frame {frame} is {capacity} or more frames ahead of simulated frame {simulated}")]
    ReplayBacklogFull {
        /// Authoritative frame rejected.
        frame: u32,
        /// Newest frame simulated locally.
        simulated: u32,
        /// Buffer capacity.
        capacity: u32,
    },

    /// Local world hash differs from the authority's.
    #[error("desync at frame {frame}: local hash {local:#010x}, authority {remote:#010x}")]
    Desync {
        /// Frame compared.
        frame: u32,
        /// Hash computed locally.
        local: u32,
        /// Hash reported by the authority.
        remote: u32,
    },

    /// World snapshot could not be encoded or restored.
    #[error("snapshot codec error: {message}")]
    Codec {
        /// Codec failure description.
        message: String,
    },
}

impl From<CodecError> for LockStepError {
    fn from(error: CodecError) -> Self {
        LockStepError::Codec {
            message: error.to_string(),
        }
    }
}
