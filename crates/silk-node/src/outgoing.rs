//! Outbound send paths.
//!
//! Builds envelopes through the factory, registers pending entries
//! where a confirmation is expected, and hands frames to the
//! transport. All sends are queued — nothing here blocks on the
//! network.

use std::time::{Duration, Instant};

use serde_json::Value;
use silk_protocol::{Dest, Message};
use silk_types::config::DEFAULT_REPLY_PERIOD_MS;
use silk_types::{MessageId, NodeId, Result, RetryProfile, SilkError};
use tokio::sync::mpsc;

use crate::node::NodeRuntime;
use crate::pending::{AckEntry, ReplySink};

/// Sends a prebuilt envelope directly to `dest` on the router socket.
///
/// With a `sink`, the send is a request: a pending-reply entry and a
/// pending-ack entry (deadline from the receiver's advertised policy)
/// are registered before the frame leaves. Without one it is
/// fire-and-forget.
///
/// # Errors
///
/// `SilkError::UnknownPeer` if `dest` is not in the cluster view.
pub(crate) fn direct(
    rt: &mut NodeRuntime,
    dest: &NodeId,
    envelope: silk_protocol::Envelope,
    sink: Option<ReplySink>,
) -> Result<MessageId> {
    let record = rt.cluster.get(dest).ok_or_else(|| SilkError::UnknownPeer {
        id: dest.clone(),
    })?;
    let identity = record.identity.clone();
    let policy = record.descriptor.policy_for(&envelope.kind);

    let id = envelope.id.clone();
    let frame = Message::from_envelope(envelope).encode()?;

    if let Some(sink) = sink {
        let base = policy
            .map(|p| Duration::from_millis(p.period))
            .unwrap_or_else(|| Duration::from_millis(rt.config.ack_base_ms));
        let attempts = policy
            .map(|p| p.attempts)
            .unwrap_or_else(|| RetryProfile::fast().retries)
            .max(1);

        rt.replies.register(id.clone(), sink, None);
        rt.acks.register(
            id.clone(),
            AckEntry {
                dest: dest.clone(),
                identity: identity.clone(),
                frame: frame.clone(),
                expires_at: Instant::now() + base,
                attempts_left: attempts,
                attempt: 0,
                profile: RetryProfile::fast(),
            },
        );
    }

    if let Err(e) = rt.transport.send_to(identity, frame) {
        // Only reachable while the node is dying; settle the entries
        // rather than leaving the caller parked until stop.
        rt.acks.fulfill(&id);
        if let Some(sink) = rt.replies.fail(&id) {
            crate::dispatch::fail_sink(rt, sink, SilkError::NodeStopped);
        }
        return Err(e);
    }
    Ok(id)
}

/// Load-balanced choice: one peer, uniformly at random, among those
/// advertising `kind`.
pub(crate) fn pick_peer(rt: &NodeRuntime, kind: &str) -> Result<NodeId> {
    rt.cluster
        .pick_for_kind(kind, &mut rand::thread_rng())
        .ok_or_else(|| SilkError::NoSubscribers { kind: kind.to_owned() })
}

/// Fire-and-forget application send to one named peer.
pub(crate) fn send_to(
    rt: &mut NodeRuntime,
    dest: &NodeId,
    kind: &str,
    data: Option<Value>,
) -> Result<MessageId> {
    let envelope = rt
        .factory
        .envelope(kind, Some(Dest::Node(dest.clone())), data);
    direct(rt, dest, envelope, None)
}

/// Request to one named peer, expecting a single reply on `sink`.
pub(crate) fn request_to(
    rt: &mut NodeRuntime,
    dest: &NodeId,
    kind: &str,
    data: Option<Value>,
    sink: ReplySink,
) -> Result<MessageId> {
    let envelope = rt
        .factory
        .envelope(kind, Some(Dest::Node(dest.clone())), data);
    direct(rt, dest, envelope, Some(sink))
}

/// Broadcasts an envelope on the publish socket.
pub(crate) fn broadcast(rt: &mut NodeRuntime, envelope: silk_protocol::Envelope) -> Result<MessageId> {
    let id = envelope.id.clone();
    let frame = Message::from_envelope(envelope).encode()?;
    rt.transport.publish(frame)?;
    Ok(id)
}

/// Broadcast expecting a stream of replies.
///
/// The stream stays open for the longest reply period advertised by
/// current subscribers of `kind` (default when none advertise one),
/// then closes — empty if nobody answered.
pub(crate) fn request_all(
    rt: &mut NodeRuntime,
    kind: &str,
    data: Option<Value>,
) -> Result<mpsc::UnboundedReceiver<Message>> {
    let envelope = rt.factory.envelope(kind, Some(Dest::All), data);
    let id = envelope.id.clone();

    let period = rt
        .cluster
        .max_period_for_kind(kind)
        .unwrap_or(DEFAULT_REPLY_PERIOD_MS);
    let (tx, rx) = mpsc::unbounded_channel();
    rt.replies.register(
        id.clone(),
        ReplySink::Stream(tx),
        Some(Instant::now() + Duration::from_millis(period)),
    );

    if let Err(e) = broadcast(rt, envelope) {
        rt.replies.fail(&id);
        return Err(e);
    }
    Ok(rx)
}

/// Sends a `_reply` answering `parent` back to `dest`.
///
/// With a `sink`, pending entries are registered on the reply's own
/// id so replies-to-replies work.
pub(crate) fn reply_to(
    rt: &mut NodeRuntime,
    dest: &NodeId,
    parent: &MessageId,
    data: Option<Value>,
    sink: Option<ReplySink>,
) -> Result<MessageId> {
    let envelope = rt.factory.reply(dest, parent, data);
    direct(rt, dest, envelope, sink)
}

/// Sends an `_ack` receipt for `parent` back to `dest`.
///
/// Best-effort: failures are logged, never propagated — a lost ack
/// surfaces as a retransmit on the sender's side.
pub(crate) fn ack_to(rt: &mut NodeRuntime, dest: &NodeId, parent: &MessageId) {
    let envelope = rt.factory.ack(dest, parent);
    if let Err(e) = direct(rt, dest, envelope, None) {
        tracing::debug!(%dest, %parent, %e, "could not acknowledge");
    }
}
