//! Frame inputs, the world contract and the lockstep wire messages.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use fibernet_core::Message;

/// Opcode of [`FrameInputMessage`].
pub const FRAME_INPUT_OPCODE: u16 = 20_001;
/// Opcode of [`AuthorityFrameMessage`].
pub const AUTHORITY_FRAME_OPCODE: u16 = 20_002;
/// Opcode of [`HashCheckMessage`].
pub const HASH_CHECK_OPCODE: u16 = 20_003;

/// Bounds a player input must satisfy.
///
/// `Default` is the input of a player that never sent one.
pub trait LockStepInput:
    Clone + PartialEq + Default + Debug + Serialize + DeserializeOwned + 'static
{
}

impl<T> LockStepInput for T where
    T: Clone + PartialEq + Default + Debug + Serialize + DeserializeOwned + 'static
{
}

/// Inputs of every player for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneFrameInputs<I> {
    /// Frame the inputs belong to.
    pub frame: u32,
    /// Input per player id.
    pub inputs: BTreeMap<u64, I>,
}

impl<I> OneFrameInputs<I> {
    /// No inputs for `frame`.
    pub fn new(frame: u32) -> Self {
        Self {
            frame,
            inputs: BTreeMap::new(),
        }
    }

    /// Add or replace a player's input.
    pub fn with_input(mut self, player: u64, input: I) -> Self {
        self.inputs.insert(player, input);
        self
    }

    /// A player's input.
    pub fn get(&self, player: u64) -> Option<&I> {
        self.inputs.get(&player)
    }
}

/// Deterministic simulation driven by frame inputs.
///
/// The world is snapshotted by encoding it with the session codec; two
/// worlds are in sync when their encodings hash the same.
pub trait LockStepWorld: Serialize + DeserializeOwned + 'static {
    /// Per-player input.
    type Input: LockStepInput;

    /// Advance one frame.
    fn step(&mut self, inputs: &OneFrameInputs<Self::Input>);
}

/// A player's input for one frame, client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "I: LockStepInput")]
pub struct FrameInputMessage<I> {
    /// Frame the input is for.
    pub frame: u32,
    /// Sending player.
    pub player: u64,
    /// The input.
    pub input: I,
}

impl<I: LockStepInput> Message for FrameInputMessage<I> {
    const OPCODE: u16 = FRAME_INPUT_OPCODE;
}

/// The authoritative inputs of one frame, server to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "I: LockStepInput")]
pub struct AuthorityFrameMessage<I> {
    /// Inputs of every player.
    pub inputs: OneFrameInputs<I>,
}

impl<I: LockStepInput> Message for AuthorityFrameMessage<I> {
    const OPCODE: u16 = AUTHORITY_FRAME_OPCODE;
}

/// World hash after a frame, server to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashCheckMessage {
    /// Frame the hash was taken after.
    pub frame: u32,
    /// CRC32C of the encoded world.
    pub hash: u32,
}

impl Message for HashCheckMessage {
    const OPCODE: u16 = HASH_CHECK_OPCODE;
}
