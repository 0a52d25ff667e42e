//! Node configuration with sensible defaults.
//!
//! All operational parameters are centralized here. Every value has a
//! documented default; embedders configure nodes exclusively through
//! this struct — no CLI flags, no environment variables.

use serde::{Deserialize, Serialize};

use crate::{NodeId, Result, SilkError};

/// Default keepalive broadcast period in milliseconds.
pub const DEFAULT_KEEPALIVE_PERIOD_MS: u64 = 1000;

/// Default base acknowledgement deadline in milliseconds.
pub const DEFAULT_ACK_BASE_MS: u64 = 100;

/// Default pending-ack sweeper tick in milliseconds.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;

/// Default cluster prune tick in milliseconds.
pub const DEFAULT_PRUNE_INTERVAL_MS: u64 = 100;

/// Default slow-joiner publish buffer window in milliseconds.
pub const DEFAULT_PUBLISH_BUFFER_MS: u64 = 200;

/// Default advertised reply period in milliseconds.
pub const DEFAULT_REPLY_PERIOD_MS: u64 = 1000;

/// Default advertised delivery attempts.
pub const DEFAULT_ATTEMPTS: u32 = 10;

/// Number of consecutive missed keepalives before a peer is presumed dead.
pub const KEEPALIVE_MISS_THRESHOLD: u32 = 3;

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// The two socket endpoints a node binds at start.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Router socket endpoint (direct messages, replies, acks).
    pub router: String,
    /// Publish socket endpoint (broadcasts, keepalives).
    #[serde(rename = "pub")]
    pub pubsub: String,
}

impl Endpoints {
    /// Creates an endpoint pair.
    pub fn new(router: impl Into<String>, pubsub: impl Into<String>) -> Self {
        Self {
            router: router.into(),
            pubsub: pubsub.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Construction options for a node.
///
/// Only the endpoints are mandatory; everything else defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node id. Generated randomly when absent.
    #[serde(default)]
    pub id: Option<NodeId>,

    /// Optional human-readable name, carried in the descriptor.
    #[serde(default)]
    pub name: Option<String>,

    /// Socket endpoints to bind at start.
    pub endpoints: Endpoints,

    /// Keepalive broadcast period in milliseconds.
    pub keepalive_period_ms: u64,

    /// Acknowledge every inbound application message.
    ///
    /// When `false`, only types listed in `ack_only` are acknowledged.
    pub ack_all: bool,

    /// Per-type acknowledgement overrides, consulted when `ack_all` is off.
    pub ack_only: Vec<String>,

    /// Base acknowledgement deadline in milliseconds, used when the
    /// receiver advertises no policy for the type.
    pub ack_base_ms: u64,

    /// Pending-ack sweeper tick in milliseconds.
    pub sweep_interval_ms: u64,

    /// Cluster prune tick in milliseconds.
    pub prune_interval_ms: u64,

    /// Slow-joiner publish buffer window in milliseconds.
    pub publish_buffer_ms: u64,
}

impl NodeConfig {
    /// Creates a config with the given endpoints and default tuning.
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            id: None,
            name: None,
            endpoints,
            keepalive_period_ms: DEFAULT_KEEPALIVE_PERIOD_MS,
            ack_all: true,
            ack_only: Vec::new(),
            ack_base_ms: DEFAULT_ACK_BASE_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            prune_interval_ms: DEFAULT_PRUNE_INTERVAL_MS,
            publish_buffer_ms: DEFAULT_PUBLISH_BUFFER_MS,
        }
    }

    /// Validates all configuration values.
    ///
    /// Returns an error if any value is outside its acceptable range.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.router.is_empty() {
            return Err(SilkError::Config {
                reason: "router endpoint must not be empty".into(),
            });
        }

        if self.endpoints.pubsub.is_empty() {
            return Err(SilkError::Config {
                reason: "pub endpoint must not be empty".into(),
            });
        }

        if self.endpoints.router == self.endpoints.pubsub {
            return Err(SilkError::Config {
                reason: "router and pub endpoints must differ".into(),
            });
        }

        if self.keepalive_period_ms == 0 {
            return Err(SilkError::Config {
                reason: "keepalive_period_ms must be greater than 0".into(),
            });
        }

        if self.ack_base_ms == 0 {
            return Err(SilkError::Config {
                reason: "ack_base_ms must be greater than 0".into(),
            });
        }

        if self.sweep_interval_ms == 0 {
            return Err(SilkError::Config {
                reason: "sweep_interval_ms must be greater than 0".into(),
            });
        }

        if self.prune_interval_ms == 0 {
            return Err(SilkError::Config {
                reason: "prune_interval_ms must be greater than 0".into(),
            });
        }

        if let Some(id) = &self.id {
            if id.as_str().is_empty() {
                return Err(SilkError::Config {
                    reason: "node id must not be empty".into(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> NodeConfig {
        NodeConfig::new(Endpoints::new(
            "tcp://127.0.0.1:5000",
            "tcp://127.0.0.1:5001",
        ))
    }

    #[test]
    fn default_config_is_valid() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn default_values() {
        let config = base();
        assert_eq!(config.keepalive_period_ms, 1000);
        assert!(config.ack_all);
        assert!(config.ack_only.is_empty());
        assert_eq!(config.ack_base_ms, 100);
        assert_eq!(config.sweep_interval_ms, 1000);
        assert_eq!(config.prune_interval_ms, 100);
        assert_eq!(config.publish_buffer_ms, 200);
    }

    #[test]
    fn empty_router_endpoint_rejected() {
        let mut config = base();
        config.endpoints.router.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn identical_endpoints_rejected() {
        let mut config = base();
        config.endpoints.pubsub = config.endpoints.router.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_keepalive_rejected() {
        let mut config = base();
        config.keepalive_period_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_prune_interval_rejected() {
        let mut config = base();
        config.prune_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_serde_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let config = base();
        let json = serde_json::to_string(&config)?;
        let parsed: NodeConfig = serde_json::from_str(&json)?;
        assert_eq!(parsed.endpoints, config.endpoints);
        assert_eq!(parsed.keepalive_period_ms, config.keepalive_period_ms);
        Ok(())
    }
}
