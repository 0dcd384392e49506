//! Socket adapter.
//!
//! A [`Channel`] owns one byte stream and turns it into packets:
//!
//! ```text
//!   send() ──► outbound ChunkBuffer ──► writer task ──► stream
//!                                                          │
//!   events ◄── PacketParser ◄── inbound ChunkBuffer ◄── reader task
//! ```
//!
//! `send` never blocks: it frames into the outbound buffer and wakes the
//! writer if no drain loop is running. The writer pushes at most one chunk
//! per write and starts the next write only after the previous completed.
//!
//! Any framing error, socket error or EOF closes the channel. Exactly one
//! [`ChannelEvent::Error`] is emitted, after every packet that was parsed
//! before it. Later sends return [`ChannelError::Closed`].

/// Core channel implementation and background tasks
pub mod core;

/// Configuration structures for channel behavior
pub mod config;

/// Error types specific to channel operations
pub mod error;

pub use config::ChannelConfig;
pub use self::core::{Channel, ChannelEvent, ChannelEvents};
pub use error::{ChannelError, ChannelResult};
