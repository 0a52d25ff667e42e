//! Inbound message dispatch.
//!
//! Single entry point for frames from both socket paths. Envelopes
//! are classified by type: protocol messages (`_`-prefixed) drive the
//! membership and pending machinery; everything else is delivered to
//! user subscriptions and acknowledged per the node's ack policy.
//!
//! Malformed frames are dropped; when the router framing identifies
//! the sender, a `_error` notice goes back.

use std::time::Instant;

use bytes::Bytes;
use silk_protocol::{kinds, Envelope, JoinReply, Message};
use silk_transport::{node_id_from_identity, TransportEvent};
use silk_types::{NodeDescriptor, NodeEvent, NodeId, NodeState, Result, SilkError};

use crate::cluster::Upsert;
use crate::command::{Delivery, Responder};
use crate::node::NodeRuntime;
use crate::outgoing;
use crate::pending::{ReplyOutcome, ReplySink};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Dispatches one inbound frame from either socket path.
pub(crate) async fn handle_transport_event(rt: &mut NodeRuntime, event: TransportEvent) {
    match event {
        TransportEvent::Router { identity, payload } => {
            handle_frame(rt, Some(identity), payload).await;
        }
        TransportEvent::Published { payload } => {
            handle_frame(rt, None, payload).await;
        }
    }
}

async fn handle_frame(rt: &mut NodeRuntime, identity: Option<Bytes>, payload: Bytes) {
    let mut message = Message::from_bytes(payload);
    let envelope = match message.envelope() {
        Ok(env) => env.clone(),
        Err(e) => {
            on_bad_payload(rt, identity, &e);
            return;
        }
    };

    // A node never processes its own frames.
    if envelope.src == rt.descriptor.id {
        return;
    }

    tracing::trace!(kind = %envelope.kind, src = %envelope.src, id = %envelope.id, "inbound");

    match envelope.kind.as_str() {
        kinds::JOIN => on_join(rt, envelope).await,
        kinds::CONNECT => on_connect(rt, envelope).await,
        kinds::LEAVE => on_leave(rt, envelope),
        kinds::KEEPALIVE => on_keepalive(rt, envelope),
        kinds::ACK => on_ack(rt, envelope),
        kinds::REPLY => on_reply(rt, envelope, message).await,
        kinds::ERROR => {
            tracing::warn!(src = %envelope.src, data = ?envelope.data, "peer reported an error");
        }
        kind if kinds::is_reserved(kind) => {
            tracing::warn!(%kind, src = %envelope.src, "unknown protocol message dropped");
        }
        _ => on_application(rt, envelope),
    }
}

// ---------------------------------------------------------------------------
// Protocol handlers
// ---------------------------------------------------------------------------

/// `_join`: merge the joiner, ack, and answer with our view.
async fn on_join(rt: &mut NodeRuntime, envelope: Envelope) {
    let Some(descriptor) = descriptor_from(&envelope) else {
        return;
    };

    if let Err(e) = upsert_peer(rt, descriptor).await {
        tracing::warn!(peer = %envelope.src, %e, "could not connect to joiner");
        return;
    }

    outgoing::ack_to(rt, &envelope.src, &envelope.id);

    let cluster: Vec<NodeDescriptor> = rt
        .cluster
        .descriptors()
        .into_iter()
        .filter(|d| d.id != envelope.src)
        .collect();
    let payload = serde_json::to_value(JoinReply {
        cluster,
        me: rt.descriptor.clone(),
    })
    .ok();

    if let Err(e) = outgoing::reply_to(rt, &envelope.src, &envelope.id, payload, None) {
        tracing::warn!(peer = %envelope.src, %e, "join reply failed");
    }
}

/// `_connect`: merge the sender, ack, and answer with our descriptor.
async fn on_connect(rt: &mut NodeRuntime, envelope: Envelope) {
    let Some(descriptor) = descriptor_from(&envelope) else {
        return;
    };

    if let Err(e) = upsert_peer(rt, descriptor).await {
        tracing::warn!(peer = %envelope.src, %e, "could not connect back");
        return;
    }

    outgoing::ack_to(rt, &envelope.src, &envelope.id);

    let payload = serde_json::to_value(&rt.descriptor).ok();
    if let Err(e) = outgoing::reply_to(rt, &envelope.src, &envelope.id, payload, None) {
        tracing::warn!(peer = %envelope.src, %e, "connect reply failed");
    }
}

/// `_leave`: drop the sender. No reply, no ack.
fn on_leave(rt: &mut NodeRuntime, envelope: Envelope) {
    tracing::info!(peer = %envelope.src, "peer left");
    remove_peer(rt, &envelope.src);
}

/// `_ka`: push the sender's liveness deadline out.
fn on_keepalive(rt: &mut NodeRuntime, envelope: Envelope) {
    if !rt.cluster.refresh_deadline(&envelope.src, Instant::now()) {
        tracing::trace!(peer = %envelope.src, "keepalive from unknown peer");
    }
}

/// `_ack`: fulfil and drop the pending-ack entry for `parent`.
fn on_ack(rt: &mut NodeRuntime, envelope: Envelope) {
    let Some(parent) = envelope.parent else {
        tracing::warn!(src = %envelope.src, "ack without parent dropped");
        return;
    };
    if !rt.acks.fulfill(&parent) {
        tracing::trace!(%parent, "ack for unknown or already-settled message");
    }
}

/// `_reply`: complete the pending-reply entry for `parent`.
async fn on_reply(rt: &mut NodeRuntime, envelope: Envelope, message: Message) {
    let Some(parent) = envelope.parent.clone() else {
        tracing::warn!(src = %envelope.src, "reply without parent dropped");
        return;
    };

    match rt.replies.on_reply(&parent, message) {
        ReplyOutcome::Delivered => {}
        ReplyOutcome::NotFound => {
            tracing::debug!(%parent, src = %envelope.src, "reply with no pending request");
        }
        ReplyOutcome::Taken(sink, message) => run_sink(rt, sink, message).await,
    }
}

/// Application message: deliver to every handler, then ack per policy.
fn on_application(rt: &mut NodeRuntime, envelope: Envelope) {
    let src = envelope.src.clone();
    let id = envelope.id.clone();
    let kind = envelope.kind.clone();
    let internal = rt.internal_tx.clone();

    let delivered = rt.subs.deliver(&kind, || Delivery {
        envelope: envelope.clone(),
        responder: Responder::new(src.clone(), id.clone(), internal.clone()),
    });
    if delivered == 0 {
        tracing::debug!(%kind, %src, "no handlers for inbound message");
    }

    if rt.wants_ack(&kind) {
        outgoing::ack_to(rt, &src, &id);
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Runs a completed reply sink.
async fn run_sink(rt: &mut NodeRuntime, sink: ReplySink, message: Message) {
    match sink {
        ReplySink::Single(tx) => {
            let _ = tx.send(Ok(message));
        }
        // Streams are completed inside the table, never taken.
        ReplySink::Stream(_) => {}
        ReplySink::JoinSeed { seed, notify } => complete_join(rt, seed, notify, message).await,
        ReplySink::ConnectPeer { peer } => complete_connect(rt, peer, message).await,
    }
}

/// Fires a sink with a request-scoped failure.
pub(crate) fn fail_sink(rt: &mut NodeRuntime, sink: ReplySink, error: SilkError) {
    match sink {
        ReplySink::Single(tx) => {
            let _ = tx.send(Err(error));
        }
        // Dropping the sender closes the stream.
        ReplySink::Stream(_) => {}
        ReplySink::JoinSeed { seed, notify } => {
            tracing::warn!(%seed, %error, "join handshake failed");
            if rt.state == NodeState::Joining {
                rt.set_state(NodeState::Started);
            }
            let _ = notify.send(Err(error));
        }
        ReplySink::ConnectPeer { peer } => {
            tracing::warn!(%peer, %error, "connect handshake failed — dropping peer");
            remove_peer(rt, &peer);
        }
    }
}

// ---------------------------------------------------------------------------
// Join handshake continuations
// ---------------------------------------------------------------------------

/// Phase two of `join`: the seed replied with `{cluster, me}`.
///
/// Inserts the seed's descriptor, reports success to the caller, then
/// `_connect`s to every other member in parallel fire-and-forget
/// fashion — individual failures drop that peer but not the join.
async fn complete_join(
    rt: &mut NodeRuntime,
    seed: NodeId,
    notify: tokio::sync::oneshot::Sender<Result<()>>,
    mut message: Message,
) {
    let parsed = message
        .envelope()
        .ok()
        .and_then(|env| env.data.clone())
        .and_then(|data| serde_json::from_value::<JoinReply>(data).ok());

    let Some(join_reply) = parsed else {
        rt.set_state(NodeState::Started);
        let _ = notify.send(Err(SilkError::BadPayload {
            reason: "join reply without a cluster view".into(),
        }));
        return;
    };

    if let Err(e) = upsert_peer(rt, join_reply.me).await {
        tracing::warn!(%seed, %e, "could not refresh seed record");
    }

    rt.set_state(NodeState::Joined);
    rt.emit(NodeEvent::Joined);
    let _ = notify.send(Ok(()));

    let self_id = rt.descriptor.id.clone();
    for descriptor in join_reply.cluster {
        if descriptor.id == self_id || descriptor.id == seed {
            continue;
        }
        let peer = descriptor.id.clone();
        match upsert_peer(rt, descriptor).await {
            Ok(_) => {
                let envelope = rt.factory.connect(&peer, &rt.descriptor);
                if let Err(e) = outgoing::direct(
                    rt,
                    &peer,
                    envelope,
                    Some(ReplySink::ConnectPeer { peer: peer.clone() }),
                ) {
                    tracing::warn!(%peer, %e, "connect send failed — dropping peer");
                    remove_peer(rt, &peer);
                }
            }
            Err(e) => {
                tracing::warn!(%peer, %e, "could not reach member — dropping peer");
            }
        }
    }
}

/// A member answered our `_connect` with its descriptor.
async fn complete_connect(rt: &mut NodeRuntime, peer: NodeId, mut message: Message) {
    let parsed = message
        .envelope()
        .ok()
        .and_then(|env| env.data.clone())
        .and_then(|data| serde_json::from_value::<NodeDescriptor>(data).ok());

    match parsed {
        Some(descriptor) if descriptor.id == peer => {
            if let Err(e) = upsert_peer(rt, descriptor).await {
                tracing::warn!(%peer, %e, "could not refresh member record");
            }
        }
        _ => {
            tracing::warn!(%peer, "connect reply without a descriptor — dropping peer");
            remove_peer(rt, &peer);
        }
    }
}

// ---------------------------------------------------------------------------
// Peer lifecycle
// ---------------------------------------------------------------------------

/// Upserts a peer into the cluster view; first sightings also connect
/// the transport to both of the peer's endpoints and emit
/// [`NodeEvent::PeerAdded`]. A connect failure rolls the insert back.
pub(crate) async fn upsert_peer(rt: &mut NodeRuntime, descriptor: NodeDescriptor) -> Result<Upsert> {
    let id = descriptor.id.clone();
    let router = descriptor.router.clone();
    let pubsub = descriptor.pubsub.clone();

    let outcome = rt.cluster.add_or_update(descriptor, Instant::now());
    if outcome == Upsert::Added {
        if let Err(e) = rt.transport.connect_peer(&id, &router, &pubsub).await {
            rt.cluster.remove(&id);
            return Err(e);
        }
        tracing::info!(peer = %id, "peer added");
        rt.emit(NodeEvent::PeerAdded { id });
    }
    Ok(outcome)
}

/// Removes a peer: both indices, its transport endpoints, and every
/// in-flight request targeting it (failed with `PeerLost`).
pub(crate) fn remove_peer(rt: &mut NodeRuntime, id: &NodeId) {
    if rt.cluster.remove(id).is_none() {
        return;
    }
    rt.transport.disconnect_peer(id);

    for message_id in rt.acks.drop_for_peer(id) {
        if let Some(sink) = rt.replies.fail(&message_id) {
            fail_sink(rt, sink, SilkError::PeerLost { id: id.clone() });
        }
    }

    rt.emit(NodeEvent::PeerRemoved { id: id.clone() });
}

// ---------------------------------------------------------------------------
// Malformed frames
// ---------------------------------------------------------------------------

fn on_bad_payload(rt: &mut NodeRuntime, identity: Option<Bytes>, error: &SilkError) {
    tracing::warn!(%error, "dropping malformed envelope");

    // Notify the sender when the router framing identifies one.
    let Some(identity) = identity else { return };
    let Some(sender) = node_id_from_identity(&identity) else {
        return;
    };
    let notice = rt.factory.error(&sender, "bad payload");
    if let Ok(frame) = Message::from_envelope(notice).encode() {
        let _ = rt.transport.send_to(identity, frame);
    }
}

fn descriptor_from(envelope: &Envelope) -> Option<NodeDescriptor> {
    let parsed = envelope
        .data
        .clone()
        .and_then(|data| serde_json::from_value::<NodeDescriptor>(data).ok());

    match parsed {
        Some(descriptor) if descriptor.id == envelope.src => Some(descriptor),
        Some(descriptor) => {
            tracing::warn!(
                src = %envelope.src,
                claimed = %descriptor.id,
                "descriptor id does not match envelope source — dropped"
            );
            None
        }
        None => {
            tracing::warn!(src = %envelope.src, kind = %envelope.kind, "handshake without a descriptor");
            None
        }
    }
}
