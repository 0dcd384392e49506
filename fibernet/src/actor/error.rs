//! Error types for actor dispatch.

use thiserror::Error;

use crate::lock::LockError;
use fibernet_core::{AddressError, CodecError, error_code};
use fibernet_transport::{ChannelError, RegistryError, RpcError};

/// Errors from routing, sending and calling actors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The target fiber is not registered in this process.
    #[error("fiber {fiber} not registered in process {process}")]
    FiberNotFound {
        /// Local process id.
        process: u32,
        /// Missing fiber id.
        fiber: u32,
    },

    /// A fiber with this id is already registered.
    #[error("fiber {fiber} already registered")]
    FiberExists {
        /// Contested fiber id.
        fiber: u32,
    },

    /// No outbound path to another process.
    #[error("no route to process {process}")]
    NoRoute {
        /// Unreachable process id.
        process: u32,
    },

    /// A handler is already registered for this entity type and opcode.
    #[error("handler for opcode {opcode} on {entity} registered twice")]
    DuplicateHandler {
        /// Opcode of the message.
        opcode: u16,
        /// Entity type name.
        entity: &'static str,
    },

    /// A location key has no registered actor.
    #[error("location {key} not found")]
    LocationNotFound {
        /// The location key.
        key: u64,
    },

    /// Address does not fit the wire encoding.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// Call failed (remote error, timeout, transport fault).
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Inter-process link failure.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Lock wait failed.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Registration conflict in the opcode table.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Body encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Codec failure description.
        message: String,
    },
}

impl DispatchError {
    /// Error code equivalent, for replies and logs.
    pub fn error_code(&self) -> i32 {
        match self {
            DispatchError::FiberNotFound { .. } | DispatchError::LocationNotFound { .. } => {
                error_code::ERR_NOT_FOUND_ACTOR
            }
            DispatchError::NoRoute { .. } => error_code::ERR_PEER_DISCONNECTED,
            DispatchError::Rpc(e) => e.error_code(),
            DispatchError::Channel(e) => e.error_code(),
            DispatchError::Lock(e) => e.error_code(),
            DispatchError::Codec { .. } | DispatchError::Address(_) => error_code::ERR_CODEC,
            DispatchError::FiberExists { .. }
            | DispatchError::DuplicateHandler { .. }
            | DispatchError::Registry(_) => error_code::ERR_HANDLER_FAILED,
        }
    }
}

impl From<CodecError> for DispatchError {
    fn from(error: CodecError) -> Self {
        DispatchError::Codec {
            message: error.to_string(),
        }
    }
}

/// Failure reported by a request handler.
///
/// Turned into a response carrying `code` and `message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler failed with {code}: {message}")]
pub struct HandlerError {
    /// Error code placed in the response.
    pub code: i32,
    /// Detail placed in the response.
    pub message: String,
}

impl HandlerError {
    /// Create a handler error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<DispatchError> for HandlerError {
    fn from(error: DispatchError) -> Self {
        Self::new(error.error_code(), error.to_string())
    }
}
