//! Ring buffer of frames.

use super::error::LockStepError;
use super::frame::OneFrameInputs;

struct FrameSlot<I> {
    inputs: OneFrameInputs<I>,
    snapshot: Vec<u8>,
    hash: u32,
}

impl<I> FrameSlot<I> {
    fn empty(frame: u32) -> Self {
        Self {
            inputs: OneFrameInputs::new(frame),
            snapshot: Vec::new(),
            hash: 0,
        }
    }
}

/// The last `capacity` frames: inputs, world snapshot and its hash.
///
/// Starts at frame 0 and only grows one frame at a time through
/// [`move_forward`](Self::move_forward); moving forward recycles the slot of
/// the oldest frame.
pub struct FrameBuffer<I> {
    slots: Vec<FrameSlot<I>>,
    max_frame: u32,
}

impl<I: Clone> FrameBuffer<I> {
    /// Create a buffer holding `capacity` frames (at least 2).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            slots: (0..capacity).map(|_| FrameSlot::empty(0)).collect(),
            max_frame: 0,
        }
    }

    /// Number of frames kept.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Newest buffered frame.
    pub fn max_frame(&self) -> u32 {
        self.max_frame
    }

    /// Oldest frame still buffered.
    pub fn oldest_frame(&self) -> u32 {
        let span = u32::try_from(self.slots.len() - 1).unwrap_or(u32::MAX);
        self.max_frame.saturating_sub(span)
    }

    /// Check that `frame` is buffered.
    ///
    /// # Errors
    ///
    /// [`LockStepError::FrameOutOfRange`] otherwise.
    pub fn check_frame(&self, frame: u32) -> Result<(), LockStepError> {
        if frame > self.max_frame || frame < self.oldest_frame() {
            return Err(LockStepError::FrameOutOfRange {
                frame,
                oldest: self.oldest_frame(),
                newest: self.max_frame,
            });
        }
        Ok(())
    }

    fn index(&self, frame: u32) -> usize {
        frame as usize % self.slots.len()
    }

    /// Open `frame`, which must directly follow the newest frame.
    ///
    /// # Errors
    ///
    /// [`LockStepError::UnexpectedFrame`] for any other frame.
    pub fn move_forward(&mut self, frame: u32) -> Result<(), LockStepError> {
        let expected = self.max_frame.saturating_add(1);
        if frame != expected {
            return Err(LockStepError::UnexpectedFrame {
                expected,
                got: frame,
            });
        }
        self.max_frame = frame;
        let index = self.index(frame);
        self.slots[index] = FrameSlot::empty(frame);
        Ok(())
    }

    /// Inputs of `frame`.
    ///
    /// # Errors
    ///
    /// [`LockStepError::FrameOutOfRange`] if not buffered.
    pub fn inputs(&self, frame: u32) -> Result<&OneFrameInputs<I>, LockStepError> {
        self.check_frame(frame)?;
        Ok(&self.slots[self.index(frame)].inputs)
    }

    /// Replace the inputs of `frame`.
    ///
    /// # Errors
    ///
    /// [`LockStepError::FrameOutOfRange`] if not buffered.
    pub fn set_inputs(
        &mut self,
        frame: u32,
        mut inputs: OneFrameInputs<I>,
    ) -> Result<(), LockStepError> {
        self.check_frame(frame)?;
        inputs.frame = frame;
        let index = self.index(frame);
        self.slots[index].inputs = inputs;
        Ok(())
    }

    /// Store the world snapshot taken after `frame` and return its hash.
    ///
    /// # Errors
    ///
    /// [`LockStepError::FrameOutOfRange`] if not buffered.
    pub fn save_snapshot(&mut self, frame: u32, snapshot: Vec<u8>) -> Result<u32, LockStepError> {
        self.check_frame(frame)?;
        let hash = crc32c::crc32c(&snapshot);
        let index = self.index(frame);
        let slot = &mut self.slots[index];
        slot.snapshot = snapshot;
        slot.hash = hash;
        Ok(hash)
    }

    /// World snapshot taken after `frame`. Empty if none was saved.
    ///
    /// # Errors
    ///
    /// [`LockStepError::FrameOutOfRange`] if not buffered.
    pub fn snapshot(&self, frame: u32) -> Result<&[u8], LockStepError> {
        self.check_frame(frame)?;
        Ok(&self.slots[self.index(frame)].snapshot)
    }

    /// Hash of the snapshot taken after `frame`.
    ///
    /// # Errors
    ///
    /// [`LockStepError::FrameOutOfRange`] if not buffered.
    pub fn hash(&self, frame: u32) -> Result<u32, LockStepError> {
        self.check_frame(frame)?;
        Ok(self.slots[self.index(frame)].hash)
    }
}
