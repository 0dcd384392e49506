//! # fibernet
//!
//! Actor messaging and lockstep simulation on single-threaded fibers.
//!
//! ## Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              fibernet (this crate)                          │
//! │  • CoroutineLock: per-key FIFO mutual exclusion             │
//! │  • Fibers, ProcessRouter, NetInner: actor dispatch          │
//! │  • Lockstep: prediction, authority, rollback                │
//! ├─────────────────────────────────────────────────────────────┤
//! │              fibernet-transport                             │
//! │  • ChunkBuffer, PacketParser, wire format                   │
//! │  • Channel, Session (RPC), NetServer                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │              fibernet-core                                  │
//! │  Provider traits: Time, Task, Network                       │
//! │  Core types: Address, ActorId, Message, error codes         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! let router = ProcessRouter::new(1);
//! let fiber = Fiber::new(providers, router, 1, registry, JsonCodec, FiberConfig::default())?;
//! fiber.register_request_handler(PingHandler)?;
//! let pinger = fiber.add_entity(Pinger::default(), MailboxKind::Ordered)?;
//! fiber.spawn();
//!
//! let pong = fiber.call(pinger, Ping::new("hello")).await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export the lower layers
pub use fibernet_core;
pub use fibernet_transport;

pub use fibernet_core::{
    ActorId, Address, JsonCodec, Message, MessageCodec, Providers, Request, Response,
    TokioProviders, error_code, failure_response,
};
pub use fibernet_transport::{MessageKind, MessageRegistry, RpcError};

/// Location-transparent actor dispatch.
pub mod actor;

/// Process configuration.
pub mod config;

/// Cooperative per-key locks.
pub mod lock;

/// Lockstep frame buffer, client and server.
pub mod lockstep;

pub use actor::{
    ActorContext, ActorEnvelope, ActorMessageHandler, ActorRequestHandler, ActorSender,
    DispatchError, Fiber, FiberConfig, HandlerError, InMemoryLocationDirectory, InboundItem,
    LocationDirectory, LocationSender, MailboxKind, NetInner, ProcessRouter,
};
pub use config::{ConfigError, ProcessConfig};
pub use lock::{CoroutineLock, CoroutineLockManager, CoroutineLockType, LockError, WaitLock};
pub use lockstep::{
    AuthorityFrameMessage, FrameBuffer, FrameInputMessage, HashCheckMessage, LockStepClient,
    LockStepConfig, LockStepError, LockStepServer, LockStepWorld, OneFrameInputs, Reconcile,
    RollbackNode,
};
