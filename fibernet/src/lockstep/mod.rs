//! Lockstep simulation with client-side prediction.
//!
//! The server ([`LockStepServer`]) collects every player's input per frame
//! and broadcasts the authoritative set. A client ([`LockStepClient`]) does
//! not wait for it: it predicts up to `prediction_count` frames ahead by
//! repeating the previous inputs with its own input overwritten, keeping a
//! snapshot of the world after each frame in a [`FrameBuffer`].
//!
//! ```text
//!              real_frame          predict_frame
//!                  │                     │
//! ... ─ 98 ─ 99 ─ 100 ─ 101 ─ 102 ─ 103 ─┘
//!   confirmed ─────┘   └──── predicted ───┘
//! ```
//!
//! When the authoritative frame `real_frame + 1` arrives it is compared with
//! the prediction. A match just advances `real_frame`. A mismatch restores
//! the snapshot of `real_frame`, applies the server's inputs, re-simulates
//! the remaining predicted frames and notifies the [`RollbackNode`] tree.

mod buffer;
mod client;
mod config;
mod error;
mod frame;
mod rollback;
mod server;

pub use buffer::FrameBuffer;
pub use client::{LockStepClient, Reconcile};
pub use config::LockStepConfig;
pub use error::LockStepError;
pub use frame::{
    AUTHORITY_FRAME_OPCODE, AuthorityFrameMessage, FRAME_INPUT_OPCODE, FrameInputMessage,
    HASH_CHECK_OPCODE, HashCheckMessage, LockStepInput, LockStepWorld, OneFrameInputs,
};
pub use rollback::{RollbackNode, walk_rollback};
pub use server::LockStepServer;
