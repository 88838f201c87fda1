//! Server and connection configuration.

use std::time::Duration;

use crate::frame::MAX_PAYLOAD_LEN;

/// TCP keepalive parameters applied to every accepted socket.
#[derive(Clone, Copy, Debug)]
pub struct KeepAliveConfig {
    /// Idle time before the first keepalive probe.
    pub time: Duration,
    /// Interval between unanswered probes.
    pub interval: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            time: Duration::from_secs(60),
            interval: Duration::from_secs(10),
        }
    }
}

/// Tunables shared by all connections of a server.
///
/// The queue capacities are the high-water marks of the per-connection pump
/// channels; a full channel applies backpressure to its producer.
#[derive(Clone, Copy, Debug)]
pub struct ServerConfig {
    keep_alive: KeepAliveConfig,
    max_frame_length: usize,
    chunk_queue_capacity: usize,
    send_queue_capacity: usize,
    receive_buffer_size: usize,
    pool_capacity: usize,
}

impl ServerConfig {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Replace the keepalive parameters.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: KeepAliveConfig) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Cap the payload size accepted or produced by the frame codec.
    ///
    /// Clamped to the largest value the 3-byte header can express.
    #[must_use]
    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length.min(MAX_PAYLOAD_LEN);
        self
    }

    /// Bound the receive-side chunk channel.
    #[must_use]
    pub fn with_chunk_queue_capacity(mut self, capacity: usize) -> Self {
        self.chunk_queue_capacity = capacity.max(1);
        self
    }

    /// Bound the send channel.
    #[must_use]
    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity.max(1);
        self
    }

    /// Set the fixed capacity of pooled receive buffers.
    #[must_use]
    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size.max(64);
        self
    }

    /// Bound the number of pooled receive buffers, and therefore the number
    /// of simultaneously live connections.
    #[must_use]
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity.max(1);
        self
    }

    /// Keepalive parameters.
    #[must_use]
    pub const fn keep_alive(&self) -> KeepAliveConfig { self.keep_alive }

    /// Maximum frame payload length.
    #[must_use]
    pub const fn max_frame_length(&self) -> usize { self.max_frame_length }

    /// Chunk channel capacity.
    #[must_use]
    pub const fn chunk_queue_capacity(&self) -> usize { self.chunk_queue_capacity }

    /// Send channel capacity.
    #[must_use]
    pub const fn send_queue_capacity(&self) -> usize { self.send_queue_capacity }

    /// Pooled receive buffer capacity in bytes.
    #[must_use]
    pub const fn receive_buffer_size(&self) -> usize { self.receive_buffer_size }

    /// Maximum pooled receive buffers.
    #[must_use]
    pub const fn pool_capacity(&self) -> usize { self.pool_capacity }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            keep_alive: KeepAliveConfig::default(),
            max_frame_length: MAX_PAYLOAD_LEN,
            chunk_queue_capacity: 64,
            send_queue_capacity: 64,
            receive_buffer_size: 8 * 1024,
            pool_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::frame::MAX_PAYLOAD_LEN;

    #[rstest]
    fn max_frame_length_is_clamped_to_header_range() {
        let config = ServerConfig::new().with_max_frame_length(usize::MAX);
        assert_eq!(config.max_frame_length(), MAX_PAYLOAD_LEN);
    }

    #[rstest]
    fn queue_capacities_stay_positive() {
        let config = ServerConfig::new()
            .with_chunk_queue_capacity(0)
            .with_send_queue_capacity(0);
        assert_eq!(config.chunk_queue_capacity(), 1);
        assert_eq!(config.send_queue_capacity(), 1);
    }
}
