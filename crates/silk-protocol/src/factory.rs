//! Outbound envelope construction.
//!
//! The [`EnvelopeFactory`] holds the per-node defaults — the fixed
//! `src` and a fresh-id generator — and stamps them onto every
//! outbound envelope. One factory per node; no process-global state.

use serde_json::Value;
use silk_types::{MessageId, NodeDescriptor, NodeId};

use crate::envelope::{kinds, Dest, Envelope};

// ---------------------------------------------------------------------------
// EnvelopeFactory
// ---------------------------------------------------------------------------

/// Stamps `src` and a fresh `id` onto outbound envelopes.
#[derive(Clone, Debug)]
pub struct EnvelopeFactory {
    src: NodeId,
}

impl EnvelopeFactory {
    /// Creates a factory producing envelopes originating at `src`.
    pub fn new(src: NodeId) -> Self {
        Self { src }
    }

    /// The node id stamped as `src`.
    pub fn src(&self) -> &NodeId {
        &self.src
    }

    /// Builds an envelope with a fresh id and this node as source.
    pub fn envelope(&self, kind: impl Into<String>, dest: Option<Dest>, data: Option<Value>) -> Envelope {
        Envelope {
            id: MessageId::random(),
            src: self.src.clone(),
            dest,
            kind: kind.into(),
            parent: None,
            data,
        }
    }

    /// `_join` carrying this node's descriptor, addressed to the seed.
    pub fn join(&self, seed: &NodeId, descriptor: &NodeDescriptor) -> Envelope {
        self.envelope(
            kinds::JOIN,
            Some(Dest::Node(seed.clone())),
            serde_json::to_value(descriptor).ok(),
        )
    }

    /// `_connect` carrying this node's descriptor.
    pub fn connect(&self, peer: &NodeId, descriptor: &NodeDescriptor) -> Envelope {
        self.envelope(
            kinds::CONNECT,
            Some(Dest::Node(peer.clone())),
            serde_json::to_value(descriptor).ok(),
        )
    }

    /// Broadcast `_leave` departure notice.
    pub fn leave(&self) -> Envelope {
        self.envelope(kinds::LEAVE, Some(Dest::All), None)
    }

    /// Broadcast `_ka` heartbeat.
    pub fn keepalive(&self) -> Envelope {
        self.envelope(kinds::KEEPALIVE, Some(Dest::All), None)
    }

    /// `_ack` receipt for `parent`, addressed back to its source.
    pub fn ack(&self, dest: &NodeId, parent: &MessageId) -> Envelope {
        let mut env = self.envelope(kinds::ACK, Some(Dest::Node(dest.clone())), None);
        env.parent = Some(parent.clone());
        env
    }

    /// `_reply` answering `parent`, addressed back to its source.
    pub fn reply(&self, dest: &NodeId, parent: &MessageId, data: Option<Value>) -> Envelope {
        let mut env = self.envelope(kinds::REPLY, Some(Dest::Node(dest.clone())), data);
        env.parent = Some(parent.clone());
        env
    }

    /// `_error` notice for a sender whose frame could not be parsed.
    pub fn error(&self, dest: &NodeId, reason: &str) -> Envelope {
        self.envelope(
            kinds::ERROR,
            Some(Dest::Node(dest.clone())),
            Some(serde_json::json!({ "error": reason })),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn factory() -> EnvelopeFactory {
        EnvelopeFactory::new(NodeId::new("n1"))
    }

    #[test]
    fn stamps_src_and_fresh_ids() {
        let f = factory();
        let a = f.envelope("x", None, None);
        let b = f.envelope("x", None, None);
        assert_eq!(a.src, NodeId::new("n1"));
        assert_eq!(b.src, NodeId::new("n1"));
        assert_ne!(a.id, b.id, "every envelope gets a fresh id");
    }

    #[test]
    fn ack_carries_parent() {
        let f = factory();
        let ack = f.ack(&NodeId::new("n2"), &MessageId::new("m9"));
        assert_eq!(ack.kind, kinds::ACK);
        assert_eq!(ack.parent, Some(MessageId::new("m9")));
        assert_eq!(ack.dest, Some(Dest::Node(NodeId::new("n2"))));
    }

    #[test]
    fn reply_carries_parent_and_data() {
        let f = factory();
        let reply = f.reply(&NodeId::new("n2"), &MessageId::new("m9"), Some(json!({"temp": 42})));
        assert_eq!(reply.kind, kinds::REPLY);
        assert_eq!(reply.parent, Some(MessageId::new("m9")));
        assert_eq!(reply.get("data.temp"), Some(&json!(42)));
    }

    #[test]
    fn keepalive_is_broadcast() {
        let ka = factory().keepalive();
        assert_eq!(ka.kind, kinds::KEEPALIVE);
        assert!(ka.is_broadcast());
    }

    #[test]
    fn join_embeds_descriptor() {
        let desc = NodeDescriptor {
            id: NodeId::new("n1"),
            name: Some("alpha".into()),
            router: "tcp://127.0.0.1:5000".into(),
            pubsub: "tcp://127.0.0.1:5001".into(),
            keepalive: Default::default(),
            messages: Default::default(),
        };
        let join = factory().join(&NodeId::new("seed"), &desc);
        assert_eq!(join.kind, kinds::JOIN);
        let embedded: NodeDescriptor =
            serde_json::from_value(join.data.expect("descriptor payload")).expect("parses back");
        assert_eq!(embedded, desc);
    }
}
