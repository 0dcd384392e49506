//! Location-transparent actor dispatch.
//!
//! A process runs one [`ProcessRouter`] and any number of [`Fiber`]s, each
//! on a single thread. Entities live on a fiber and are addressed by
//! [`ActorId`](fibernet_core::ActorId); the router moves encoded
//! [`ActorEnvelope`]s between fibers, and [`NetInner`] moves them between
//! processes.
//!
//! ```text
//! Fiber::call(target, req)
//!   ↓ encode, stamp rpc id
//! ProcessRouter::route ──(other process)──▶ NetInner ──▶ remote NetInner
//!   ↓ (same process)                                      ↓
//! target fiber inbound queue  ◀───────────────────────────┘
//!   ↓
//! mailbox lock → re-validate entity → handler → reply to `from`
//! ```

mod context;
mod entity;
mod envelope;
mod error;
mod fiber;
mod handlers;
mod location;
mod net_inner;
mod router;
mod sender;

pub use context::ActorContext;
pub use entity::MailboxKind;
pub use envelope::{ActorEnvelope, InboundItem};
pub use error::{DispatchError, HandlerError};
pub use fiber::{Fiber, FiberConfig};
pub use handlers::{ActorMessageHandler, ActorRequestHandler};
pub use location::{InMemoryLocationDirectory, LocationDirectory, LocationSender};
pub use net_inner::{DEFAULT_IN_FLIGHT_TTL, NetInner};
pub use router::ProcessRouter;
pub use sender::ActorSender;
