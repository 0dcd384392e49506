//! Client-side prediction and reconciliation.

use std::time::Duration;

use super::buffer::FrameBuffer;
use super::config::LockStepConfig;
use super::error::LockStepError;
use super::frame::{
    AuthorityFrameMessage, FrameInputMessage, HashCheckMessage, LockStepWorld, OneFrameInputs,
};
use super::rollback::{RollbackNode, walk_rollback};
use fibernet_core::MessageCodec;

/// What an authoritative frame did to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// The frame had not been predicted; it is replayed by the next ticks.
    Stored {
        /// The authoritative frame.
        frame: u32,
    },
    /// The prediction matched.
    Confirmed {
        /// The confirmed frame.
        frame: u32,
    },
    /// The prediction differed; the world was restored and re-simulated.
    RolledBack {
        /// The corrected frame.
        frame: u32,
        /// Predicted frames simulated again after the correction.
        resimulated: u32,
    },
}

/// Predicts frames ahead of the server and corrects itself when the
/// authority disagrees.
///
/// - `real_frame`: newest frame confirmed by the server.
/// - `predict_frame`: newest frame simulated locally.
///
/// Frames in `real_frame + 1..=predict_frame` are predictions: the previous
/// frame's inputs with this player's input overwritten.
pub struct LockStepClient<W: LockStepWorld, C: MessageCodec> {
    world: W,
    codec: C,
    player: u64,
    config: LockStepConfig,
    buffer: FrameBuffer<W::Input>,
    real_frame: u32,
    predict_frame: u32,
    prediction_count: u32,
    rollback_root: Option<Box<dyn RollbackNode>>,
    rollbacks: u64,
}

impl<W: LockStepWorld, C: MessageCodec> LockStepClient<W, C> {
    /// Start at frame 0 with `world` as its state.
    ///
    /// # Errors
    ///
    /// [`LockStepError::Codec`] if the world cannot be snapshotted.
    pub fn new(
        world: W,
        codec: C,
        player: u64,
        config: LockStepConfig,
    ) -> Result<Self, LockStepError> {
        let mut buffer = FrameBuffer::new(config.buffer_capacity);
        buffer.save_snapshot(0, codec.encode(&world)?)?;
        Ok(Self {
            prediction_count: config.min_prediction,
            world,
            codec,
            player,
            config,
            buffer,
            real_frame: 0,
            predict_frame: 0,
            rollback_root: None,
            rollbacks: 0,
        })
    }

    /// Install the tree notified on rollback.
    pub fn set_rollback_root(&mut self, root: Box<dyn RollbackNode>) {
        self.rollback_root = Some(root);
    }

    /// Current world state.
    pub fn world(&self) -> &W {
        &self.world
    }

    /// This client's player id.
    pub fn player(&self) -> u64 {
        self.player
    }

    /// Newest frame confirmed by the server.
    pub fn real_frame(&self) -> u32 {
        self.real_frame
    }

    /// Newest frame simulated locally.
    pub fn predict_frame(&self) -> u32 {
        self.predict_frame
    }

    /// How many frames prediction may run ahead of `real_frame`.
    pub fn prediction_count(&self) -> u32 {
        self.prediction_count
    }

    /// Number of rollbacks so far.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks
    }

    /// Frame buffer, for inspection.
    pub fn buffer(&self) -> &FrameBuffer<W::Input> {
        &self.buffer
    }

    /// Resize the prediction window from a measured round-trip time.
    pub fn update_rtt(&mut self, rtt: Duration) {
        self.prediction_count = self.config.prediction_count(rtt);
    }

    /// Advance one local frame.
    ///
    /// Replays the next authoritative frame if the simulation is behind the
    /// server. Otherwise predicts the next frame with `local_input` and
    /// returns the input to send, or `None` if the prediction window is
    /// full.
    ///
    /// # Errors
    ///
    /// A codec error while snapshotting, or a buffer error.
    pub fn tick(
        &mut self,
        local_input: W::Input,
    ) -> Result<Option<FrameInputMessage<W::Input>>, LockStepError> {
        if self.predict_frame < self.real_frame {
            let frame = self.predict_frame + 1;
            let inputs = self.buffer.inputs(frame)?.clone();
            self.simulate(frame, &inputs)?;
            self.predict_frame = frame;
            return Ok(None);
        }

        if self.predict_frame - self.real_frame >= self.prediction_count {
            return Ok(None);
        }

        let frame = self.predict_frame + 1;
        let mut inputs = self.buffer.inputs(self.predict_frame)?.clone();
        inputs.frame = frame;
        inputs.inputs.insert(self.player, local_input.clone());

        self.buffer.move_forward(frame)?;
        self.buffer.set_inputs(frame, inputs.clone())?;
        self.simulate(frame, &inputs)?;
        self.predict_frame = frame;

        Ok(Some(FrameInputMessage {
            frame,
            player: self.player,
            input: local_input,
        }))
    }

    /// Apply the server's inputs for the frame after `real_frame`.
    ///
    /// A frame beyond `predict_frame` is stored for [`tick`](Self::tick) to
    /// replay. The backlog of stored frames is bounded by the buffer: a
    /// frame that would push the oldest unreplayed frame out is rejected
    /// and `real_frame` stays put, so the caller can tick and resend it.
    ///
    /// # Errors
    ///
    /// [`LockStepError::UnexpectedFrame`] unless the frame is
    /// `real_frame + 1`; [`LockStepError::ReplayBacklogFull`] when the
    /// backlog is full; codec or buffer errors during rollback.
    pub fn on_authoritative_frame(
        &mut self,
        message: AuthorityFrameMessage<W::Input>,
    ) -> Result<Reconcile, LockStepError> {
        let authority = message.inputs;
        let frame = authority.frame;
        let expected = self.real_frame + 1;
        if frame != expected {
            return Err(LockStepError::UnexpectedFrame {
                expected,
                got: frame,
            });
        }

        if frame > self.predict_frame {
            let capacity = u32::try_from(self.buffer.capacity()).unwrap_or(u32::MAX);
            if frame - self.predict_frame >= capacity {
                tracing::warn!(
                    player = self.player,
                    frame,
                    simulated = self.predict_frame,
                    capacity,
                    "replay backlog full, authoritative frame rejected"
                );
                return Err(LockStepError::ReplayBacklogFull {
                    frame,
                    simulated: self.predict_frame,
                    capacity,
                });
            }
            if frame > self.buffer.max_frame() {
                self.buffer.move_forward(frame)?;
            }
            self.buffer.set_inputs(frame, authority)?;
            self.real_frame = frame;
            return Ok(Reconcile::Stored { frame });
        }

        if *self.buffer.inputs(frame)? == authority {
            self.real_frame = frame;
            return Ok(Reconcile::Confirmed { frame });
        }

        tracing::debug!(
            player = self.player,
            frame,
            predicted = self.predict_frame,
            "prediction diverged, rolling back"
        );
        let resimulated = self.rollback(frame, authority)?;
        Ok(Reconcile::RolledBack { frame, resimulated })
    }

    /// Compare the server's world hash with the local one.
    ///
    /// # Errors
    ///
    /// [`LockStepError::Desync`] on mismatch; [`LockStepError::FrameOutOfRange`]
    /// if the frame is not confirmed and simulated, or already evicted.
    pub fn check_hash(&self, message: HashCheckMessage) -> Result<(), LockStepError> {
        let frame = message.frame;
        if frame > self.real_frame.min(self.predict_frame) {
            return Err(LockStepError::FrameOutOfRange {
                frame,
                oldest: self.buffer.oldest_frame(),
                newest: self.real_frame.min(self.predict_frame),
            });
        }
        let local = self.buffer.hash(frame)?;
        if local != message.hash {
            tracing::warn!(
                player = self.player,
                frame,
                local,
                remote = message.hash,
                "world desync"
            );
            return Err(LockStepError::Desync {
                frame,
                local,
                remote: message.hash,
            });
        }
        Ok(())
    }

    /// Restore the world at `frame - 1`, apply `authority` and re-simulate
    /// the remaining predicted frames with this player's inputs kept.
    fn rollback(
        &mut self,
        frame: u32,
        authority: OneFrameInputs<W::Input>,
    ) -> Result<u32, LockStepError> {
        self.world = self.codec.decode(self.buffer.snapshot(frame - 1)?)?;

        self.buffer.set_inputs(frame, authority.clone())?;
        self.simulate(frame, &authority)?;
        self.real_frame = frame;

        let mut previous = authority;
        for next in frame + 1..=self.predict_frame {
            let own = self.buffer.inputs(next)?.get(self.player).cloned();
            let mut inputs = previous.clone();
            inputs.frame = next;
            if let Some(own) = own {
                inputs.inputs.insert(self.player, own);
            }
            self.buffer.set_inputs(next, inputs.clone())?;
            self.simulate(next, &inputs)?;
            previous = inputs;
        }

        self.rollbacks += 1;
        if let Some(root) = self.rollback_root.as_deref_mut() {
            walk_rollback(root, frame - 1);
        }
        Ok(self.predict_frame - frame)
    }

    fn simulate(
        &mut self,
        frame: u32,
        inputs: &OneFrameInputs<W::Input>,
    ) -> Result<(), LockStepError> {
        self.world.step(inputs);
        let snapshot = self.codec.encode(&self.world)?;
        self.buffer.save_snapshot(frame, snapshot)?;
        Ok(())
    }
}
