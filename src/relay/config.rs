//! Relay configuration

/// Relay configuration options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Frames a subscriber may have queued before it is evicted
    pub client_queue_capacity: usize,

    /// Frame-size announcements buffered between a run and the relay
    pub announce_capacity: usize,

    /// Buffer size of the shared byte stream
    pub stream_buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            // ~13s of audio at 26ms per MP3 frame
            client_queue_capacity: 512,
            announce_capacity: 64,
            stream_buffer_size: 64 * 1024,
        }
    }
}

impl RelayConfig {
    /// Set the per-subscriber queue capacity
    pub fn client_queue_capacity(mut self, capacity: usize) -> Self {
        self.client_queue_capacity = capacity.max(1);
        self
    }

    /// Set the announcement channel capacity
    pub fn announce_capacity(mut self, capacity: usize) -> Self {
        self.announce_capacity = capacity.max(1);
        self
    }

    /// Set the shared stream buffer size
    pub fn stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.client_queue_capacity, 512);
        assert_eq!(config.announce_capacity, 64);
        assert_eq!(config.stream_buffer_size, 65536);
    }

    #[test]
    fn test_builder_chaining() {
        let config = RelayConfig::default()
            .client_queue_capacity(8)
            .announce_capacity(4)
            .stream_buffer_size(1024);

        assert_eq!(config.client_queue_capacity, 8);
        assert_eq!(config.announce_capacity, 4);
        assert_eq!(config.stream_buffer_size, 1024);
    }

    #[test]
    fn test_zero_capacities_clamped() {
        // Channels cannot have zero capacity
        let config = RelayConfig::default()
            .client_queue_capacity(0)
            .announce_capacity(0)
            .stream_buffer_size(0);

        assert_eq!(config.client_queue_capacity, 1);
        assert_eq!(config.announce_capacity, 1);
        assert_eq!(config.stream_buffer_size, 1);
    }
}
