//! # fibernet-core
//!
//! Core abstractions shared by the fibernet crates:
//!
//! - **Provider traits**: time, task spawning and networking, swappable in
//!   tests ([`Providers`], [`TokioProviders`])
//! - **Addressing**: [`Address`], [`ActorId`] and its 64-bit wire encoding
//! - **Message contracts**: [`Message`], [`Request`], [`Response`] and the
//!   [`error_code`] space
//! - **Codec**: pluggable body serialization ([`MessageCodec`], [`JsonCodec`])

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
pub mod error_code;
mod message;
mod network;
mod providers;
mod task;
mod time;
mod types;

pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use message::{Message, Request, Response, failure_response, must_raise};
pub use network::{NetworkProvider, StreamListener, TokioListener, TokioNetworkProvider};
pub use providers::{Providers, TokioProviders};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};
pub use types::{
    ActorId, Address, AddressError, FIBER_BITS, INSTANCE_BITS, InstanceIdGenerator, MAX_FIBER,
    MAX_INSTANCE, MAX_PROCESS, PROCESS_BITS,
};
