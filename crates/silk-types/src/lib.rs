//! Core shared types for the Silk peer-to-peer messaging fabric.
//!
//! This crate defines all fundamental types used across the workspace.
//! No other crate should define shared types — everything lives here.

pub mod config;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// Unique identifier for a node in the fabric.
///
/// An opaque textual id, unique per node. Freshly created nodes get a
/// random 128-bit id rendered as a uuid string; embedders may supply
/// their own stable id instead.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random node id (uuid v4, text form).
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = SilkError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SilkError::Config {
                reason: "node id must not be empty".into(),
            });
        }
        Ok(Self(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// Unique identifier for a message envelope.
///
/// Every envelope carries a fresh id; replies and acknowledgements refer
/// back to it through their `parent` field.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a message id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random message id (uuid v4, text form).
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ReplyPolicy
// ---------------------------------------------------------------------------

/// Advertised reply deadline and retry budget for one message type.
///
/// A node advertises a `ReplyPolicy` for every type it subscribes to;
/// senders read the *receiver's* advertised policy out of the cluster
/// view when registering acknowledgement deadlines.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReplyPolicy {
    /// Reply deadline in milliseconds.
    pub period: u64,
    /// Delivery retry budget.
    pub attempts: u32,
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self {
            period: config::DEFAULT_REPLY_PERIOD_MS,
            attempts: config::DEFAULT_ATTEMPTS,
        }
    }
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

/// Keepalive settings advertised in a node descriptor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Keepalive {
    /// Heartbeat broadcast period in milliseconds.
    pub period: u64,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            period: config::DEFAULT_KEEPALIVE_PERIOD_MS,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeDescriptor
// ---------------------------------------------------------------------------

/// Self-description a node hands to its peers during the handshake.
///
/// Uniquely keyed by `id` within a cluster view. Endpoint strings are
/// opaque to everything except the socket layer. The `messages` map
/// advertises which message types this node subscribes to, together
/// with the reply policy it promises for each.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Unique node id.
    pub id: NodeId,
    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Router socket endpoint (`tcp://…`, `ipc://…`).
    pub router: String,
    /// Publish socket endpoint.
    #[serde(rename = "pub")]
    pub pubsub: String,
    /// Keepalive settings.
    #[serde(default)]
    pub keepalive: Keepalive,
    /// Advertised message types with their reply policies.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub messages: BTreeMap<String, ReplyPolicy>,
}

impl NodeDescriptor {
    /// Returns the advertised reply policy for a message type, if any.
    pub fn policy_for(&self, kind: &str) -> Option<ReplyPolicy> {
        self.messages.get(kind).copied()
    }
}

// ---------------------------------------------------------------------------
// RetryProfile
// ---------------------------------------------------------------------------

/// Exponential backoff profile for delivery retries.
///
/// Immutable; profiles may be shared freely between pending entries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryProfile {
    /// Number of retries before giving up.
    pub retries: u32,
    /// Backoff floor.
    pub min_timeout: Duration,
    /// Backoff ceiling.
    pub max_timeout: Duration,
}

impl RetryProfile {
    /// Fast profile: 10 retries, 100 ms … 1 s.
    pub const fn fast() -> Self {
        Self {
            retries: 10,
            min_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_secs(1),
        }
    }

    /// Medium profile: 10 retries, 1 s … 10 s.
    pub const fn medium() -> Self {
        Self {
            retries: 10,
            min_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(10),
        }
    }

    /// Slow profile: 10 retries, 30 s … 3 m.
    pub const fn slow() -> Self {
        Self {
            retries: 10,
            min_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(180),
        }
    }

    /// Backoff delay before retry number `attempt` (0-based).
    ///
    /// Doubles from `min_timeout`, capped at `max_timeout`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.min(31);
        let raw = self
            .min_timeout
            .saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
        raw.min(self.max_timeout)
    }
}

impl Default for RetryProfile {
    fn default() -> Self {
        Self::fast()
    }
}

// ---------------------------------------------------------------------------
// NodeState
// ---------------------------------------------------------------------------

/// Lifecycle state of a node.
///
/// ```text
/// Stopped ──start()──▶ Started ──join()──▶ Joining ──reply──▶ Joined
///                         │                   │                  │
///                         └───────────────────┴──────stop()──────┴──▶ Stopped
/// ```
///
/// A stopped node cannot be restarted; a fresh instance is required.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum NodeState {
    /// Not running. Initial and terminal state.
    Stopped,
    /// Sockets bound, event loop active, not yet part of a cluster.
    Started,
    /// `_join` sent to a seed, awaiting its reply.
    Joining,
    /// Member of a cluster.
    Joined,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Started => write!(f, "started"),
            Self::Joining => write!(f, "joining"),
            Self::Joined => write!(f, "joined"),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeEvent
// ---------------------------------------------------------------------------

/// Lifecycle events emitted by the node engine to the embedder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NodeEvent {
    /// Sockets bound and the event loop is running.
    Started,
    /// The node has shut down; no further events follow.
    Stopped,
    /// The initial `_join` handshake completed.
    Joined,
    /// A peer entered the cluster view.
    PeerAdded {
        /// Id of the new peer.
        id: NodeId,
    },
    /// A peer left the cluster view (graceful `_leave` or keepalive expiry).
    PeerRemoved {
        /// Id of the removed peer.
        id: NodeId,
    },
}

// ---------------------------------------------------------------------------
// SilkError
// ---------------------------------------------------------------------------

/// Central error type for the Silk fabric.
///
/// All crates in the workspace convert their internal errors into
/// variants of this enum, ensuring a unified error handling surface.
#[derive(Debug, Error)]
pub enum SilkError {
    /// An endpoint could not be bound at start. Fatal to that node.
    #[error("failed to bind {endpoint}: {reason}")]
    Bind {
        /// The endpoint string that failed to bind.
        endpoint: String,
        /// Underlying socket error text.
        reason: String,
    },

    /// A malformed inbound envelope (bad JSON, missing `id` or `src`).
    #[error("bad payload: {reason}")]
    BadPayload {
        /// Why the envelope was rejected.
        reason: String,
    },

    /// A direct send named an id that is not in the cluster view.
    #[error("unknown peer: {id}")]
    UnknownPeer {
        /// The unknown peer id.
        id: NodeId,
    },

    /// A load-balanced send found no peer advertising the type.
    #[error("no subscribers for message type '{kind}'")]
    NoSubscribers {
        /// The message type with an empty peer set.
        kind: String,
    },

    /// No acknowledgement arrived after exhausting all retries.
    #[error("delivery failed for message {message_id}")]
    DeliveryFailed {
        /// Id of the undelivered message.
        message_id: MessageId,
    },

    /// The destination peer was evicted while a request was in flight.
    #[error("peer lost: {id}")]
    PeerLost {
        /// Id of the evicted peer.
        id: NodeId,
    },

    /// The node stopped while a request was outstanding.
    #[error("node stopped")]
    NodeStopped,

    /// An attempt to subscribe to a reserved (`_`-prefixed) type.
    #[error("message type '{kind}' is reserved for the protocol")]
    ReservedType {
        /// The rejected type string.
        kind: String,
    },

    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    Config {
        /// Human-readable description of the configuration problem.
        reason: String,
    },

    /// A socket-layer operation failed.
    #[error("transport error: {reason}")]
    Transport {
        /// Underlying socket error text.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Result alias
// ---------------------------------------------------------------------------

/// Convenience result type using [`SilkError`].
pub type Result<T> = std::result::Result<T, SilkError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let id = NodeId::random();
        let parsed: NodeId = id.as_str().parse()?;
        assert_eq!(id, parsed);
        Ok(())
    }

    #[test]
    fn node_id_random_is_unique() {
        assert_ne!(NodeId::random(), NodeId::random());
    }

    #[test]
    fn empty_node_id_rejected() {
        let result: std::result::Result<NodeId, _> = "".parse();
        assert!(result.is_err());
    }

    #[test]
    fn message_id_serde_is_plain_string() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let id = MessageId::new("abc-123");
        let json = serde_json::to_string(&id)?;
        assert_eq!(json, "\"abc-123\"");
        let parsed: MessageId = serde_json::from_str(&json)?;
        assert_eq!(id, parsed);
        Ok(())
    }

    #[test]
    fn descriptor_wire_field_names() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut messages = BTreeMap::new();
        messages.insert("check-temp".to_owned(), ReplyPolicy { period: 500, attempts: 3 });
        let desc = NodeDescriptor {
            id: NodeId::new("n1"),
            name: None,
            router: "tcp://127.0.0.1:5000".into(),
            pubsub: "tcp://127.0.0.1:5001".into(),
            keepalive: Keepalive { period: 750 },
            messages,
        };

        let json = serde_json::to_value(&desc)?;
        assert_eq!(json["pub"], "tcp://127.0.0.1:5001");
        assert_eq!(json["keepalive"]["period"], 750);
        assert_eq!(json["messages"]["check-temp"]["period"], 500);
        assert!(json.get("name").is_none(), "absent name must not serialize");

        let parsed: NodeDescriptor = serde_json::from_value(json)?;
        assert_eq!(parsed, desc);
        Ok(())
    }

    #[test]
    fn descriptor_policy_lookup() {
        let mut messages = BTreeMap::new();
        messages.insert("work".to_owned(), ReplyPolicy { period: 200, attempts: 2 });
        let desc = NodeDescriptor {
            id: NodeId::new("n1"),
            name: None,
            router: "tcp://a".into(),
            pubsub: "tcp://b".into(),
            keepalive: Keepalive::default(),
            messages,
        };
        assert_eq!(desc.policy_for("work"), Some(ReplyPolicy { period: 200, attempts: 2 }));
        assert_eq!(desc.policy_for("other"), None);
    }

    #[test]
    fn retry_backoff_doubles_and_caps() {
        let profile = RetryProfile::fast();
        assert_eq!(profile.backoff(0), Duration::from_millis(100));
        assert_eq!(profile.backoff(1), Duration::from_millis(200));
        assert_eq!(profile.backoff(2), Duration::from_millis(400));
        // 100ms * 2^10 far exceeds the 1 s ceiling.
        assert_eq!(profile.backoff(10), Duration::from_secs(1));
        // Huge attempt numbers must not overflow.
        assert_eq!(profile.backoff(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn retry_profiles_match_defaults() {
        let slow = RetryProfile::slow();
        assert_eq!(slow.retries, 10);
        assert_eq!(slow.min_timeout, Duration::from_secs(30));
        assert_eq!(slow.max_timeout, Duration::from_secs(180));
    }

    #[test]
    fn state_display() {
        assert_eq!(NodeState::Stopped.to_string(), "stopped");
        assert_eq!(NodeState::Joining.to_string(), "joining");
    }

    #[test]
    fn error_display() {
        let err = SilkError::NoSubscribers { kind: "work".into() };
        assert!(err.to_string().contains("work"));
    }
}
