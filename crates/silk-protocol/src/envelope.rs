//! The tagged wire envelope.
//!
//! Every message on the fabric — protocol or application — is one
//! UTF-8 JSON object with the fields of [`Envelope`]. Unknown fields
//! are accepted and ignored for forward compatibility. An envelope
//! without `id` or `src` is malformed and dropped at the socket
//! boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use silk_types::{MessageId, NodeId};

// ---------------------------------------------------------------------------
// Protocol kinds
// ---------------------------------------------------------------------------

/// Reserved message-type strings.
///
/// The `_` prefix marks a type as protocol-internal; user subscriptions
/// to such types are rejected.
pub mod kinds {
    /// Membership request sent to a seed node.
    pub const JOIN: &str = "_join";
    /// Mutual-addressability request sent to every non-seed member.
    pub const CONNECT: &str = "_connect";
    /// Graceful departure notice.
    pub const LEAVE: &str = "_leave";
    /// Keepalive heartbeat.
    pub const KEEPALIVE: &str = "_ka";
    /// Application-level reply, `parent` = request id.
    pub const REPLY: &str = "_reply";
    /// Delivery receipt, `parent` = acknowledged id.
    pub const ACK: &str = "_ack";
    /// Reserved name for the join/connect exchange.
    pub const HANDSHAKE: &str = "_handshake";
    /// Malformed-payload notice returned to an identifiable sender.
    pub const ERROR: &str = "_error";

    /// Prefix identifying protocol-internal types.
    pub const RESERVED_PREFIX: char = '_';

    /// Broadcast destination sentinel.
    pub const DEST_ALL: &str = "_all";

    /// Returns whether a type string is reserved for the protocol.
    pub fn is_reserved(kind: &str) -> bool {
        kind.starts_with(RESERVED_PREFIX)
    }
}

// ---------------------------------------------------------------------------
// Dest
// ---------------------------------------------------------------------------

/// Destination of an envelope: one named peer, or the whole cluster.
///
/// Serialized as the peer id string, or the `_all` sentinel.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Dest {
    /// Every interested peer (broadcast on the publish socket).
    All,
    /// A single peer (direct on the router socket).
    Node(NodeId),
}

impl From<String> for Dest {
    fn from(s: String) -> Self {
        if s == kinds::DEST_ALL {
            Self::All
        } else {
            Self::Node(NodeId::from(s))
        }
    }
}

impl From<Dest> for String {
    fn from(dest: Dest) -> Self {
        match dest {
            Dest::All => kinds::DEST_ALL.to_owned(),
            Dest::Node(id) => id.as_str().to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One message on the wire.
///
/// `id` and `src` are mandatory on every envelope. `parent` is present
/// on `_reply` and `_ack` and names the envelope being answered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message id, fresh on every envelope.
    pub id: MessageId,
    /// Originating node id.
    pub src: NodeId,
    /// Target peer, or `_all`. Absent on point-to-point frames where
    /// the socket identity already names the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<Dest>,
    /// Message type. The `_` prefix is reserved for the protocol.
    #[serde(rename = "type")]
    pub kind: String,
    /// Id of the message this one answers (`_reply`, `_ack`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<MessageId>,
    /// Arbitrary structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    /// Navigates a dotted path inside the payload.
    ///
    /// The path is rooted at the envelope: `"data.foo.bar"` descends
    /// into `data`. A missing step yields `None` rather than an error.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let rest = path.strip_prefix("data")?;
        let data = self.data.as_ref()?;
        match rest.strip_prefix('.') {
            None if rest.is_empty() => Some(data),
            None => None,
            Some(inner) => crate::path::get(data, inner),
        }
    }

    /// Returns whether this envelope is addressed to the whole cluster.
    pub fn is_broadcast(&self) -> bool {
        matches!(self.dest, Some(Dest::All))
    }
}

// ---------------------------------------------------------------------------
// JoinReply
// ---------------------------------------------------------------------------

/// Payload of the reply to a `_join`: the seed's current cluster view
/// plus the seed's own descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinReply {
    /// Descriptors of every member the seed knows, the joiner excluded.
    pub cluster: Vec<silk_types::NodeDescriptor>,
    /// The seed's own descriptor.
    pub me: silk_types::NodeDescriptor,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reserved_kind_detection() {
        assert!(kinds::is_reserved("_join"));
        assert!(kinds::is_reserved("_ka"));
        assert!(!kinds::is_reserved("check-temp"));
    }

    #[test]
    fn dest_all_sentinel_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let all: Dest = serde_json::from_value(json!("_all"))?;
        assert_eq!(all, Dest::All);
        assert_eq!(serde_json::to_value(Dest::All)?, json!("_all"));

        let node: Dest = serde_json::from_value(json!("n42"))?;
        assert_eq!(node, Dest::Node(NodeId::new("n42")));
        Ok(())
    }

    #[test]
    fn envelope_serde_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let env = Envelope {
            id: MessageId::new("m1"),
            src: NodeId::new("n1"),
            dest: Some(Dest::Node(NodeId::new("n2"))),
            kind: "check-temp".into(),
            parent: None,
            data: Some(json!({"gauge": "main"})),
        };

        let bytes = serde_json::to_vec(&env)?;
        let parsed: Envelope = serde_json::from_slice(&bytes)?;
        assert_eq!(parsed, env);
        Ok(())
    }

    #[test]
    fn wire_uses_type_field_name() -> Result<(), Box<dyn std::error::Error>> {
        let env = Envelope {
            id: MessageId::new("m1"),
            src: NodeId::new("n1"),
            dest: None,
            kind: "_ka".into(),
            parent: None,
            data: None,
        };
        let json = serde_json::to_value(&env)?;
        assert_eq!(json["type"], "_ka");
        assert!(json.get("kind").is_none());
        assert!(json.get("parent").is_none(), "absent parent must not serialize");
        Ok(())
    }

    #[test]
    fn unknown_fields_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let parsed: Envelope = serde_json::from_value(json!({
            "id": "m1",
            "src": "n1",
            "type": "hello",
            "someFutureField": {"nested": true},
        }))?;
        assert_eq!(parsed.kind, "hello");
        Ok(())
    }

    #[test]
    fn missing_src_is_an_error() {
        let result: Result<Envelope, _> = serde_json::from_value(json!({
            "id": "m1",
            "type": "hello",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn get_navigates_into_data() {
        let env = Envelope {
            id: MessageId::new("m1"),
            src: NodeId::new("n1"),
            dest: None,
            kind: "t".into(),
            parent: None,
            data: Some(json!({"foo": {"bar": 7}})),
        };
        assert_eq!(env.get("data.foo.bar"), Some(&json!(7)));
        assert_eq!(env.get("data.foo.missing"), None);
        assert_eq!(env.get("data"), Some(&json!({"foo": {"bar": 7}})));
    }
}
