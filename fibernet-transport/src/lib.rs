//! # fibernet-transport
//!
//! Byte-stream transport for the fibernet framework.
//!
//! This crate provides:
//! - **Buffers**: [`ChunkBuffer`], a pooled chunk queue for socket I/O
//! - **Wire format**: length-prefixed outer and inner frames, parsed
//!   incrementally by [`PacketParser`]
//! - **Channels**: [`Channel`], a framed connection driven by local reader
//!   and writer tasks
//! - **Sessions**: [`Session`], request/response correlation with
//!   cancellation, timeouts and idle reaping
//! - **Server**: [`NetServer`], accept loop and [`SessionRegistry`]

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core types for convenience
pub use fibernet_core::{
    ActorId, Address, CodecError, JsonCodec, Message, MessageCodec, NetworkProvider, Providers,
    Request, Response, StreamListener, TaskProvider, TimeProvider, TokioNetworkProvider,
    TokioProviders, TokioTaskProvider, TokioTimeProvider, error_code,
};

/// Pooled chunk buffer.
pub mod buffer;

/// Framed connections.
pub mod channel;

/// Opcode registry.
pub mod registry;

/// Listener and session registry.
pub mod server;

/// Request/response sessions.
pub mod session;

/// Length-prefixed wire format.
pub mod wire;

pub use buffer::{BufferError, ChunkBuffer, DEFAULT_CHUNK_SIZE};
pub use channel::{Channel, ChannelConfig, ChannelError, ChannelEvent, ChannelEvents};
pub use registry::{MessageKind, MessageRegistry, RegistryError};
pub use server::{NetServer, NetServerConfig, SessionRegistry};
pub use session::{IdleChecker, RpcError, RpcResult, Session, SessionConfig, SessionHandler};
pub use wire::{
    MAX_PACKET_SIZE, Packet, PacketParser, ServiceType, WireError, decode_packet, encode_into,
    encode_packet,
};
