//! Lockstep configuration.

use std::time::Duration;

/// Tuning for [`LockStepClient`](super::LockStepClient) and
/// [`LockStepServer`](super::LockStepServer).
#[derive(Debug, Clone)]
pub struct LockStepConfig {
    /// Simulated time per frame.
    pub frame_interval: Duration,
    /// Number of frames the buffer keeps.
    pub buffer_capacity: usize,
    /// Prediction window used before any round-trip measurement, and its
    /// floor afterwards.
    pub min_prediction: u32,
}

impl Default for LockStepConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(50),
            buffer_capacity: 128,
            min_prediction: 3,
        }
    }
}

impl LockStepConfig {
    /// Set the frame interval.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Set the buffer capacity (at least 2 frames).
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(2);
        self
    }

    /// Set the prediction floor.
    pub fn with_min_prediction(mut self, frames: u32) -> Self {
        self.min_prediction = frames.max(1);
        self
    }

    /// Prediction window for a measured round-trip time.
    ///
    /// One frame more than the one-way latency in frames, never below
    /// `min_prediction` and never more than half the buffer.
    pub fn prediction_count(&self, rtt: Duration) -> u32 {
        let interval = self.frame_interval.as_micros().max(1);
        let one_way = (rtt / 2).as_micros();
        let frames = u32::try_from(one_way.div_ceil(interval)).unwrap_or(u32::MAX);
        let cap = u32::try_from(self.buffer_capacity / 2).unwrap_or(u32::MAX).max(1);
        frames
            .saturating_add(1)
            .max(self.min_prediction)
            .min(cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_count_floor() {
        let config = LockStepConfig::default();
        assert_eq!(config.prediction_count(Duration::ZERO), 3);
        assert_eq!(config.prediction_count(Duration::from_millis(60)), 3);
    }

    #[test]
    fn test_prediction_count_from_rtt() {
        let config = LockStepConfig::default();
        // 150ms one-way at 50ms per frame: 3 frames + 1.
        assert_eq!(config.prediction_count(Duration::from_millis(300)), 4);
        // 110ms one-way rounds up to 3 frames.
        assert_eq!(config.prediction_count(Duration::from_millis(220)), 4);
    }

    #[test]
    fn test_prediction_count_capped_at_half_buffer() {
        let config = LockStepConfig::default().with_buffer_capacity(16);
        assert_eq!(config.prediction_count(Duration::from_secs(10)), 8);
    }
}
