//! Keepalive emission and liveness pruning.
//!
//! Driven by the event loop's timers — this module does not spawn
//! tasks or own state. Each keepalive tick broadcasts a `_ka`; each
//! prune tick evicts peers whose liveness deadline has passed, so a
//! silent peer disappears within one prune interval of missing its
//! third keepalive.

use std::time::Instant;

use silk_protocol::Message;

use crate::dispatch;
use crate::node::NodeRuntime;

/// Broadcasts one `_ka` heartbeat on the publish socket.
pub(crate) fn emit_keepalive(rt: &mut NodeRuntime) {
    let envelope = rt.factory.keepalive();
    match Message::from_envelope(envelope).encode() {
        Ok(frame) => {
            if let Err(e) = rt.transport.publish(frame) {
                tracing::warn!(%e, "keepalive publish failed");
            }
        }
        Err(e) => tracing::warn!(%e, "keepalive encode failed"),
    }
}

/// Evicts every peer whose liveness deadline has passed.
///
/// Eviction behaves like a `_leave` received on the peer's behalf:
/// the peer leaves both indices, its transport endpoints are
/// disconnected, and in-flight requests targeting it fail with
/// `PeerLost`.
pub(crate) fn prune(rt: &mut NodeRuntime, now: Instant) {
    for id in rt.cluster.expired(now) {
        tracing::info!(peer = %id, "keepalive deadline elapsed — evicting peer");
        dispatch::remove_peer(rt, &id);
    }
}
