//! Router socket identities.
//!
//! A node's router identity is derived from its id — a fixed prefix
//! byte followed by the id's UTF-8 bytes — so remote peers can address
//! it without first learning a host-assigned identity.

use bytes::{BufMut, Bytes, BytesMut};
use silk_types::NodeId;

/// Prefix byte marking a Silk-derived router identity.
pub const IDENTITY_PREFIX: u8 = b'S';

/// Returns the router identity for a node id.
pub fn identity_for(id: &NodeId) -> Bytes {
    let id_bytes = id.as_str().as_bytes();
    let mut buf = BytesMut::with_capacity(1 + id_bytes.len());
    buf.put_u8(IDENTITY_PREFIX);
    buf.put_slice(id_bytes);
    buf.freeze()
}

/// Recovers the node id from a router identity, if it is Silk-derived.
pub fn node_id_from_identity(identity: &[u8]) -> Option<NodeId> {
    match identity.split_first() {
        Some((&IDENTITY_PREFIX, rest)) if !rest.is_empty() => {
            std::str::from_utf8(rest).ok().map(NodeId::from)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_roundtrip() {
        let id = NodeId::new("node-a");
        let identity = identity_for(&id);
        assert_eq!(identity[0], IDENTITY_PREFIX);
        assert_eq!(node_id_from_identity(&identity), Some(id));
    }

    #[test]
    fn foreign_identity_is_rejected(){
        assert_eq!(node_id_from_identity(b"xnode"), None);
        assert_eq!(node_id_from_identity(b""), None);
        assert_eq!(node_id_from_identity(&[IDENTITY_PREFIX]), None);
    }
}
