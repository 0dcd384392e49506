//! Configuration structures for channel behavior.

use std::time::Duration;

use crate::buffer::DEFAULT_CHUNK_SIZE;

/// Configuration for a [`Channel`](super::Channel).
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Chunk size of the inbound and outbound buffers.
    pub chunk_size: usize,

    /// Timeout for outbound connection attempts.
    pub connect_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(20),
        }
    }
}

impl ChannelConfig {
    /// Override the buffer chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Override the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Create a configuration for low-latency local networking.
    pub fn local_network() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout: Duration::from_millis(500),
        }
    }
}
