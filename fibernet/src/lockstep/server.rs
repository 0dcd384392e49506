//! Authoritative frame producer.

use std::collections::{BTreeMap, BTreeSet};

use super::config::LockStepConfig;
use super::error::LockStepError;
use super::frame::{
    AuthorityFrameMessage, FrameInputMessage, HashCheckMessage, LockStepWorld, OneFrameInputs,
};
use fibernet_core::MessageCodec;

/// Collects player inputs and steps the authoritative world.
///
/// A player whose input for a frame has not arrived by the time the frame
/// is produced is assumed to repeat their last input. Inputs for frames
/// already produced are ignored.
pub struct LockStepServer<W: LockStepWorld, C: MessageCodec> {
    world: W,
    codec: C,
    players: BTreeSet<u64>,
    frame: u32,
    horizon: u32,
    pending: BTreeMap<u32, BTreeMap<u64, W::Input>>,
    last_inputs: BTreeMap<u64, W::Input>,
}

impl<W: LockStepWorld, C: MessageCodec> LockStepServer<W, C> {
    /// Serve `players`, starting at frame 0.
    pub fn new(
        world: W,
        codec: C,
        players: impl IntoIterator<Item = u64>,
        config: &LockStepConfig,
    ) -> Self {
        Self {
            world,
            codec,
            players: players.into_iter().collect(),
            frame: 0,
            horizon: u32::try_from(config.buffer_capacity).unwrap_or(u32::MAX),
            pending: BTreeMap::new(),
            last_inputs: BTreeMap::new(),
        }
    }

    /// Current authoritative world.
    pub fn world(&self) -> &W {
        &self.world
    }

    /// Last produced frame.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Accept a player's input. Returns `false` if it was ignored: late,
    /// too far ahead, or from an unknown player.
    pub fn on_input(&mut self, message: FrameInputMessage<W::Input>) -> bool {
        if !self.players.contains(&message.player) {
            tracing::warn!(player = message.player, "input from unknown player ignored");
            return false;
        }
        if message.frame <= self.frame {
            tracing::debug!(
                player = message.player,
                frame = message.frame,
                current = self.frame,
                "late input ignored"
            );
            return false;
        }
        if message.frame - self.frame > self.horizon {
            tracing::warn!(
                player = message.player,
                frame = message.frame,
                current = self.frame,
                "input too far ahead ignored"
            );
            return false;
        }
        self.pending
            .entry(message.frame)
            .or_default()
            .insert(message.player, message.input);
        true
    }

    /// Produce the next frame.
    ///
    /// Returns the authoritative inputs to broadcast and the world hash
    /// after applying them.
    ///
    /// # Errors
    ///
    /// [`LockStepError::Codec`] if the world cannot be encoded for hashing.
    pub fn tick(
        &mut self,
    ) -> Result<(AuthorityFrameMessage<W::Input>, HashCheckMessage), LockStepError> {
        let frame = self.frame + 1;
        let mut received = self.pending.remove(&frame).unwrap_or_default();

        let mut inputs = OneFrameInputs::new(frame);
        for &player in &self.players {
            let input = match received.remove(&player) {
                Some(input) => input,
                None => self.last_inputs.get(&player).cloned().unwrap_or_default(),
            };
            self.last_inputs.insert(player, input.clone());
            inputs.inputs.insert(player, input);
        }

        self.world.step(&inputs);
        self.frame = frame;
        let hash = crc32c::crc32c(&self.codec.encode(&self.world)?);

        Ok((
            AuthorityFrameMessage { inputs },
            HashCheckMessage { frame, hash },
        ))
    }
}
