//! Transport configuration.

use std::time::Duration;

use silk_types::config::DEFAULT_PUBLISH_BUFFER_MS;

/// Socket endpoints and tuning for one node's transport.
///
/// Endpoint strings are passed through to the socket layer verbatim
/// (`tcp://host:port`, `ipc://path`).
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Router socket bind endpoint.
    pub router: String,
    /// Publish socket bind endpoint.
    pub pubsub: String,
    /// How long publish-socket sends are buffered after start before
    /// being flushed (slow-joiner mitigation).
    pub publish_buffer: Duration,
}

impl TransportConfig {
    /// Creates a config with the default publish buffer window.
    pub fn new(router: impl Into<String>, pubsub: impl Into<String>) -> Self {
        Self {
            router: router.into(),
            pubsub: pubsub.into(),
            publish_buffer: Duration::from_millis(DEFAULT_PUBLISH_BUFFER_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_publish_buffer() {
        let config = TransportConfig::new("tcp://127.0.0.1:5000", "tcp://127.0.0.1:5001");
        assert_eq!(config.publish_buffer, Duration::from_millis(200));
    }
}
