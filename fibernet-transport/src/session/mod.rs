//! Request/response sessions over a [`Channel`](crate::Channel).
//!
//! A [`Session`] correlates requests with responses by a per-session
//! `rpc_id`. Every call ends exactly once:
//!
//! - **response**: delivered, or turned into [`RpcError::Remote`] when its
//!   error code is in the raising range
//! - **cancellation**: a locally built response carrying `ERR_CANCEL`
//! - **timeout**: [`RpcError::Timeout`]
//! - **teardown**: [`RpcError::SessionClosed`]
//!
//! Non-response packets go to the session's [`SessionHandler`].

mod config;
mod core;
mod error;
mod idle;

pub use config::SessionConfig;
pub use self::core::{Session, SessionHandler};
pub use error::{RpcError, RpcResult};
pub use idle::IdleChecker;
