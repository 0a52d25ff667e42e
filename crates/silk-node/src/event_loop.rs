//! Main event loop driving all node subsystems.
//!
//! [`run_event_loop`] is spawned as a tokio task by `Node::start`.
//! It uses `tokio::select!` to multiplex:
//!
//! 1. **Transport events** — inbound frames from both socket paths.
//! 2. **Commands** — the public API and handler responders.
//! 3. **Keepalive tick** — broadcast `_ka`.
//! 4. **Prune tick** — evict peers past their liveness deadline.
//! 5. **Sweep tick** — retransmit or give up on unacknowledged sends,
//!    close expired broadcast reply streams.
//! 6. **Shutdown signal** — graceful exit via `watch` channel.
//!
//! The loop owns every piece of mutable state (cluster view, pending
//! tables, subscriptions), so none of it needs locks.

use std::time::{Duration, Instant};

use silk_protocol::kinds;
use silk_types::{NodeEvent, NodeState, SilkError};

use crate::command::NodeCommand;
use crate::dispatch;
use crate::keepalive;
use crate::node::NodeRuntime;
use crate::outgoing;
use crate::pending::{ReplySink, SweepAction};

/// How long the departure notice gets to reach the wire at stop.
const LEAVE_DRAIN: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Event loop entry point
// ---------------------------------------------------------------------------

/// Runs the node event loop until shutdown is signalled.
pub(crate) async fn run_event_loop(mut rt: NodeRuntime) {
    tracing::info!(id = %rt.descriptor.id, "node event loop starting");

    rt.emit(NodeEvent::Started);

    let mut keepalive_tick =
        tokio::time::interval(Duration::from_millis(rt.config.keepalive_period_ms));
    let mut prune_tick =
        tokio::time::interval(Duration::from_millis(rt.config.prune_interval_ms));
    let mut sweep_tick =
        tokio::time::interval(Duration::from_millis(rt.config.sweep_interval_ms));

    loop {
        tokio::select! {
            // -----------------------------------------------------------
            // 1. Inbound frames.
            // -----------------------------------------------------------
            Some(event) = rt.transport_rx.recv() => {
                dispatch::handle_transport_event(&mut rt, event).await;
            }

            // -----------------------------------------------------------
            // 2. Commands from the public API.
            // -----------------------------------------------------------
            Some(cmd) = rt.command_rx.recv() => {
                handle_command(&mut rt, cmd).await;
            }

            // Handler responders and other loop-internal commands.
            Some(cmd) = rt.internal_rx.recv() => {
                handle_command(&mut rt, cmd).await;
            }

            // -----------------------------------------------------------
            // 3–5. Timers.
            // -----------------------------------------------------------
            _ = keepalive_tick.tick() => {
                keepalive::emit_keepalive(&mut rt);
            }

            _ = prune_tick.tick() => {
                keepalive::prune(&mut rt, Instant::now());
            }

            _ = sweep_tick.tick() => {
                sweep(&mut rt, Instant::now());
            }

            // -----------------------------------------------------------
            // 6. Shutdown signal.
            // -----------------------------------------------------------
            changed = rt.shutdown_rx.changed() => {
                if changed.is_err() || *rt.shutdown_rx.borrow() {
                    tracing::info!("shutdown signal received — exiting event loop");
                    break;
                }
            }
        }
    }

    shutdown_sequence(&mut rt).await;
    tracing::info!(id = %rt.descriptor.id, "node event loop exited");
}

// ---------------------------------------------------------------------------
// Command handling
// ---------------------------------------------------------------------------

/// Processes a single command. Replies go back through the command's
/// own channel; a dropped receiver is ignored.
async fn handle_command(rt: &mut NodeRuntime, cmd: NodeCommand) {
    match cmd {
        NodeCommand::Join { seed, reply } => {
            start_join(rt, seed, reply).await;
        }

        NodeCommand::Subscribe {
            kind,
            options,
            handler,
            reply,
        } => {
            let result = if kinds::is_reserved(&kind) {
                Err(SilkError::ReservedType { kind })
            } else {
                let id = rt.subs.add(&kind, options.policy, handler);
                rt.descriptor.messages.insert(kind, options.policy);
                Ok(id)
            };
            let _ = reply.send(result);
        }

        NodeCommand::Unsubscribe { kind, id, reply } => {
            let result = unsubscribe(rt, kind, id);
            let _ = reply.send(result);
        }

        NodeCommand::Send { kind, data, reply } => {
            let result = match outgoing::pick_peer(rt, &kind) {
                Ok(dest) => outgoing::send_to(rt, &dest, &kind, data),
                Err(e) => Err(e),
            };
            let _ = reply.send(result);
        }

        NodeCommand::Request { kind, data, reply } => {
            match outgoing::pick_peer(rt, &kind) {
                Ok(dest) => {
                    let _ = outgoing::request_to(rt, &dest, &kind, data, ReplySink::Single(reply));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            }
        }

        NodeCommand::SendTo {
            dest,
            kind,
            data,
            reply,
        } => {
            let result = outgoing::send_to(rt, &dest, &kind, data);
            let _ = reply.send(result);
        }

        NodeCommand::RequestTo {
            dest,
            kind,
            data,
            reply,
        } => {
            if rt.cluster.contains(&dest) {
                let _ = outgoing::request_to(rt, &dest, &kind, data, ReplySink::Single(reply));
            } else {
                let _ = reply.send(Err(SilkError::UnknownPeer { id: dest }));
            }
        }

        NodeCommand::SendAll { kind, data, reply } => {
            let envelope = rt
                .factory
                .envelope(&kind, Some(silk_protocol::Dest::All), data);
            let result = outgoing::broadcast(rt, envelope);
            let _ = reply.send(result);
        }

        NodeCommand::RequestAll { kind, data, reply } => {
            let result = outgoing::request_all(rt, &kind, data);
            let _ = reply.send(result);
        }

        NodeCommand::Reply {
            dest,
            parent,
            data,
            reply,
        } => {
            let result = outgoing::reply_to(rt, &dest, &parent, data, None);
            match reply {
                Some(reply) => {
                    let _ = reply.send(result);
                }
                None => {
                    if let Err(e) = result {
                        tracing::warn!(%dest, %parent, %e, "reply failed");
                    }
                }
            }
        }

        NodeCommand::ReplyRequest {
            dest,
            parent,
            data,
            reply,
        } => {
            if rt.cluster.contains(&dest) {
                let _ =
                    outgoing::reply_to(rt, &dest, &parent, data, Some(ReplySink::Single(reply)));
            } else {
                let _ = reply.send(Err(SilkError::UnknownPeer { id: dest }));
            }
        }

        NodeCommand::GetInfo { reply } => {
            let _ = reply.send(rt.descriptor.clone());
        }

        NodeCommand::GetPeers { reply } => {
            let _ = reply.send(rt.cluster.descriptors());
        }
    }
}

/// Removal semantics for `off`:
/// `(kind, id)` removes one handler, `(kind, None)` removes the type,
/// `(None, None)` removes everything. Withdrawn types leave the
/// descriptor.
fn unsubscribe(
    rt: &mut NodeRuntime,
    kind: Option<String>,
    id: Option<crate::subscriptions::SubscriptionId>,
) -> silk_types::Result<()> {
    match (kind, id) {
        (Some(kind), Some(id)) => {
            if rt.subs.remove(&kind, id) {
                rt.descriptor.messages.remove(&kind);
            }
            Ok(())
        }
        (Some(kind), None) => {
            if rt.subs.remove_kind(&kind) {
                rt.descriptor.messages.remove(&kind);
            }
            Ok(())
        }
        (None, None) => {
            rt.subs.clear();
            rt.descriptor.messages.clear();
            Ok(())
        }
        (None, Some(_)) => Err(SilkError::Config {
            reason: "removing a handler requires its message type".into(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Join
// ---------------------------------------------------------------------------

/// Phase one of `join`: connect to the seed and send `_join` with our
/// descriptor. The caller's channel is parked in the pending-reply
/// table and fires when the seed answers (or the request gives up).
async fn start_join(
    rt: &mut NodeRuntime,
    seed: silk_types::NodeDescriptor,
    reply: tokio::sync::oneshot::Sender<silk_types::Result<()>>,
) {
    if seed.id == rt.descriptor.id {
        let _ = reply.send(Err(SilkError::Config {
            reason: "a node cannot join through itself".into(),
        }));
        return;
    }

    rt.set_state(NodeState::Joining);

    let seed_id = seed.id.clone();
    if let Err(e) = dispatch::upsert_peer(rt, seed).await {
        rt.set_state(NodeState::Started);
        let _ = reply.send(Err(e));
        return;
    }

    let envelope = rt.factory.join(&seed_id, &rt.descriptor);
    if let Err(e) = outgoing::direct(
        rt,
        &seed_id,
        envelope,
        Some(ReplySink::JoinSeed {
            seed: seed_id.clone(),
            notify: reply,
        }),
    ) {
        tracing::warn!(seed = %seed_id, %e, "join send failed");
    }
}

// ---------------------------------------------------------------------------
// Sweep tick
// ---------------------------------------------------------------------------

/// One sweeper pass over both pending tables.
fn sweep(rt: &mut NodeRuntime, now: Instant) {
    for action in rt.acks.sweep(now) {
        match action {
            SweepAction::Resend {
                id,
                identity,
                frame,
            } => {
                tracing::debug!(message = %id, "no ack yet — retransmitting");
                if let Err(e) = rt.transport.send_to(identity, frame) {
                    tracing::warn!(message = %id, %e, "retransmit failed");
                }
            }
            SweepAction::GiveUp { id, dest } => {
                tracing::warn!(message = %id, peer = %dest, "retry budget exhausted");
                if let Some(sink) = rt.replies.fail(&id) {
                    dispatch::fail_sink(rt, sink, SilkError::DeliveryFailed { message_id: id });
                }
            }
        }
    }

    let closed = rt.replies.sweep(now);
    if closed > 0 {
        tracing::debug!(closed, "broadcast reply streams expired");
    }
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Graceful exit: publish `_leave`, fail every outstanding request
/// with `NodeStopped`, clear subscriptions, close the sockets.
async fn shutdown_sequence(rt: &mut NodeRuntime) {
    // Departure notice goes out while the sockets are still up, past
    // the slow-joiner buffer if it has not flushed yet.
    match silk_protocol::Message::from_envelope(rt.factory.leave()).encode() {
        Ok(frame) => {
            if let Err(e) = rt.transport.publish(frame) {
                tracing::debug!(%e, "leave publish failed");
            }
        }
        Err(e) => tracing::warn!(%e, "leave encode failed"),
    }
    rt.transport.flush_publishes().await;
    tokio::time::sleep(LEAVE_DRAIN).await;

    // Cancel outstanding work.
    let abandoned = rt.acks.drain().len();
    if abandoned > 0 {
        tracing::debug!(abandoned, "pending acks abandoned at stop");
    }
    for sink in rt.replies.drain() {
        dispatch::fail_sink(rt, sink, SilkError::NodeStopped);
    }

    rt.subs.clear();
    rt.descriptor.messages.clear();
    rt.transport.shutdown();

    rt.set_state(NodeState::Stopped);
    rt.emit(NodeEvent::Stopped);
}
