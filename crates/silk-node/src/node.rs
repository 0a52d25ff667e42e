//! Node lifecycle and public API.
//!
//! The [`Node`] is the embedding surface of the Silk fabric. It owns
//! the channels into the event loop; every method builds a
//! [`NodeCommand`], sends it, and awaits the loop's answer, so all
//! engine state stays single-writer inside the loop task.
//!
//! # State machine
//!
//! ```text
//! Stopped ──start()──▶ Started ──join()──▶ Joining ──reply──▶ Joined
//!                         └───────────────────┴────stop()────────┴──▶ Stopped
//! ```
//!
//! `start` is idempotent from `Started`; `stop` is idempotent from
//! `Stopped`. A stopped node cannot be restarted — create a fresh one.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde_json::Value;
use silk_protocol::{Envelope, EnvelopeFactory, Message};
use silk_transport::{Transport, TransportConfig, TransportEvent};
use silk_types::config::NodeConfig;
use silk_types::{
    Keepalive, MessageId, NodeDescriptor, NodeEvent, NodeId, NodeState, Result, SilkError,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::cluster::ClusterView;
use crate::command::{Handler, NodeCommand, SubscribeOptions};
use crate::event_loop;
use crate::pending::{PendingAcks, PendingReplies};
use crate::subscriptions::{SubscriptionId, SubscriptionTable};

// ---------------------------------------------------------------------------
// Channel buffer sizes
// ---------------------------------------------------------------------------

/// Bounded command channel capacity. Callers await backpressure if
/// the event loop is overloaded.
const COMMAND_CHANNEL_SIZE: usize = 256;

/// Bounded lifecycle event channel capacity. Events are dropped with
/// a warning when the consumer falls this far behind.
const EVENT_CHANNEL_SIZE: usize = 1024;

// ---------------------------------------------------------------------------
// NodeRuntime (internal)
// ---------------------------------------------------------------------------

/// Owned runtime state, moved into the event loop task at start.
pub(crate) struct NodeRuntime {
    pub config: NodeConfig,
    /// This node's descriptor; `messages` tracks live subscriptions.
    pub descriptor: NodeDescriptor,
    pub factory: EnvelopeFactory,
    pub transport: Transport,
    pub transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    pub cluster: ClusterView,
    pub acks: PendingAcks,
    pub replies: PendingReplies,
    pub subs: SubscriptionTable,
    pub state: NodeState,
    pub state_tx: watch::Sender<NodeState>,
    pub event_tx: mpsc::Sender<NodeEvent>,
    pub command_rx: mpsc::Receiver<NodeCommand>,
    pub internal_tx: mpsc::UnboundedSender<NodeCommand>,
    pub internal_rx: mpsc::UnboundedReceiver<NodeCommand>,
    pub shutdown_rx: watch::Receiver<bool>,
    /// Types acknowledged when `ack_all` is off.
    pub ack_only: HashSet<String>,
}

impl NodeRuntime {
    pub fn set_state(&mut self, state: NodeState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "state transition");
            self.state = state;
            let _ = self.state_tx.send(state);
        }
    }

    pub fn emit(&mut self, event: NodeEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            tracing::warn!(?event, "event channel full — dropping");
        }
    }

    /// Whether an inbound application message of `kind` gets an `_ack`.
    pub fn wants_ack(&self, kind: &str) -> bool {
        self.config.ack_all || self.ack_only.contains(kind)
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Pieces consumed when the event loop spawns.
struct PreStart {
    config: NodeConfig,
    command_rx: mpsc::Receiver<NodeCommand>,
    internal_rx: mpsc::UnboundedReceiver<NodeCommand>,
    event_tx: mpsc::Sender<NodeEvent>,
    state_tx: watch::Sender<NodeState>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Handle-side lifecycle, gating `start`/`stop` idempotence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Lifecycle {
    Created,
    Started,
    Stopped,
}

/// One participant in the fabric.
///
/// ```ignore
/// let mut node = Node::new(NodeConfig::new(Endpoints::new(
///     "tcp://127.0.0.1:5000",
///     "tcp://127.0.0.1:5001",
/// )))?;
/// node.start().await?;
/// node.join(seed_descriptor).await?;
/// node.on("check-temp", Default::default(), |delivery| {
///     let _ = delivery.responder.respond(Some(json!({"temp": 42})));
/// }).await?;
/// ```
pub struct Node {
    id: NodeId,
    lifecycle: Lifecycle,
    prestart: Option<PreStart>,
    command_tx: mpsc::Sender<NodeCommand>,
    internal_tx: mpsc::UnboundedSender<NodeCommand>,
    event_rx: Option<mpsc::Receiver<NodeEvent>>,
    state_rx: watch::Receiver<NodeState>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Node {
    /// Creates a node from validated options. Nothing binds until
    /// [`start`](Self::start).
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let id = config.id.clone().unwrap_or_else(NodeId::random);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (state_tx, state_rx) = watch::channel(NodeState::Stopped);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            id,
            lifecycle: Lifecycle::Created,
            prestart: Some(PreStart {
                config,
                command_rx,
                internal_rx,
                event_tx,
                state_tx,
                shutdown_rx,
            }),
            command_tx,
            internal_tx,
            event_rx: Some(event_rx),
            state_rx,
            shutdown_tx,
            task: None,
        })
    }

    /// Binds the router and publish sockets and spawns the event
    /// loop. Commands queued before start (including `join`) are
    /// flushed once the loop runs.
    ///
    /// Idempotent from `Started`.
    ///
    /// # Errors
    ///
    /// - `SilkError::Bind` if an endpoint cannot be bound; the node
    ///   stays startable.
    /// - `SilkError::NodeStopped` if the node was already stopped.
    pub async fn start(&mut self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Started => return Ok(()),
            Lifecycle::Stopped => return Err(SilkError::NodeStopped),
            Lifecycle::Created => {}
        }

        let pre = self.prestart.take().expect("prestart present before start");

        let transport_config = TransportConfig {
            router: pre.config.endpoints.router.clone(),
            pubsub: pre.config.endpoints.pubsub.clone(),
            publish_buffer: Duration::from_millis(pre.config.publish_buffer_ms),
        };
        let (transport, transport_rx) = match Transport::bind(&transport_config, &self.id).await {
            Ok(bound) => bound,
            Err(e) => {
                self.prestart = Some(pre);
                return Err(e);
            }
        };

        // Endpoints are resolved at bind time (wildcard ports become
        // concrete), so the descriptor advertises reachable addresses.
        let descriptor = NodeDescriptor {
            id: self.id.clone(),
            name: pre.config.name.clone(),
            router: transport.router_endpoint().to_owned(),
            pubsub: transport.pubsub_endpoint().to_owned(),
            keepalive: Keepalive {
                period: pre.config.keepalive_period_ms,
            },
            messages: BTreeMap::new(),
        };

        let ack_only: HashSet<String> = pre.config.ack_only.iter().cloned().collect();

        // Publish the transition before the loop task is scheduled so
        // `state()` is correct the moment `start` returns.
        let _ = pre.state_tx.send(NodeState::Started);

        let runtime = NodeRuntime {
            descriptor,
            factory: EnvelopeFactory::new(self.id.clone()),
            transport,
            transport_rx,
            cluster: ClusterView::new(),
            acks: PendingAcks::new(),
            replies: PendingReplies::new(),
            subs: SubscriptionTable::new(),
            state: NodeState::Started,
            state_tx: pre.state_tx,
            event_tx: pre.event_tx,
            command_rx: pre.command_rx,
            internal_tx: self.internal_tx.clone(),
            internal_rx: pre.internal_rx,
            shutdown_rx: pre.shutdown_rx,
            ack_only,
            config: pre.config,
        };

        self.task = Some(tokio::spawn(event_loop::run_event_loop(runtime)));
        self.lifecycle = Lifecycle::Started;
        Ok(())
    }

    /// Gracefully stops the node: publishes `_leave`, fails every
    /// outstanding request with `NodeStopped`, closes the sockets,
    /// and waits for the loop to exit.
    ///
    /// Idempotent. The node cannot be restarted afterwards.
    pub async fn stop(&mut self) {
        match self.lifecycle {
            Lifecycle::Stopped => return,
            Lifecycle::Created => {
                self.prestart = None;
                self.lifecycle = Lifecycle::Stopped;
                return;
            }
            Lifecycle::Started => {}
        }

        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.lifecycle = Lifecycle::Stopped;
    }

    /// Kills the node immediately: no `_leave`, no pending
    /// cancellation, sockets torn down mid-flight. Peers only find
    /// out through keepalive expiry. Meant for crash testing.
    pub fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.prestart = None;
        self.lifecycle = Lifecycle::Stopped;
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Joins a cluster through `seed`. Resolves once the seed's
    /// `_join` reply arrives; `_connect` handshakes with the other
    /// members proceed in the background (individual failures drop
    /// that peer, not the join).
    pub async fn join(&self, seed: NodeDescriptor) -> Result<()> {
        self.command(|reply| NodeCommand::Join { seed, reply })
            .await?
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Registers a handler for a message type and advertises the type
    /// (with `options.policy`) to the cluster on the next handshake.
    ///
    /// # Errors
    ///
    /// `SilkError::ReservedType` for `_`-prefixed types.
    pub async fn on(
        &self,
        kind: &str,
        options: SubscribeOptions,
        handler: impl FnMut(crate::command::Delivery) + Send + 'static,
    ) -> Result<SubscriptionId> {
        let handler: Handler = Box::new(handler);
        self.command(|reply| NodeCommand::Subscribe {
            kind: kind.to_owned(),
            options,
            handler,
            reply,
        })
        .await?
    }

    /// Removes one handler. When it was the last for its type, the
    /// type is withdrawn from this node's descriptor.
    pub async fn off(&self, kind: &str, id: SubscriptionId) -> Result<()> {
        self.command(|reply| NodeCommand::Unsubscribe {
            kind: Some(kind.to_owned()),
            id: Some(id),
            reply,
        })
        .await?
    }

    /// Removes every handler for a type.
    pub async fn off_kind(&self, kind: &str) -> Result<()> {
        self.command(|reply| NodeCommand::Unsubscribe {
            kind: Some(kind.to_owned()),
            id: None,
            reply,
        })
        .await?
    }

    /// Removes every handler.
    pub async fn off_all(&self) -> Result<()> {
        self.command(|reply| NodeCommand::Unsubscribe {
            kind: None,
            id: None,
            reply,
        })
        .await?
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Load-balanced fire-and-forget send to one peer, chosen
    /// uniformly at random among those subscribed to `kind`.
    ///
    /// # Errors
    ///
    /// `SilkError::NoSubscribers` when no peer advertises the type;
    /// no network activity happens in that case.
    pub async fn send(&self, kind: &str, data: Option<Value>) -> Result<MessageId> {
        self.command(|reply| NodeCommand::Send {
            kind: kind.to_owned(),
            data,
            reply,
        })
        .await?
    }

    /// Load-balanced request; resolves with the reply.
    pub async fn request(&self, kind: &str, data: Option<Value>) -> Result<Message> {
        self.command(|reply| NodeCommand::Request {
            kind: kind.to_owned(),
            data,
            reply,
        })
        .await?
    }

    /// Direct fire-and-forget send to a named peer.
    ///
    /// # Errors
    ///
    /// `SilkError::UnknownPeer` when `dest` is not in the cluster view.
    pub async fn send_to(&self, dest: &NodeId, kind: &str, data: Option<Value>) -> Result<MessageId> {
        self.command(|reply| NodeCommand::SendTo {
            dest: dest.clone(),
            kind: kind.to_owned(),
            data,
            reply,
        })
        .await?
    }

    /// Direct request to a named peer; resolves with the reply.
    ///
    /// Delivery is confirmed by `_ack` and retried with backoff;
    /// exhausting the budget fails with `DeliveryFailed`, eviction of
    /// the peer mid-flight with `PeerLost`.
    pub async fn request_to(&self, dest: &NodeId, kind: &str, data: Option<Value>) -> Result<Message> {
        self.command(|reply| NodeCommand::RequestTo {
            dest: dest.clone(),
            kind: kind.to_owned(),
            data,
            reply,
        })
        .await?
    }

    /// Broadcast to every subscribed peer, fire-and-forget.
    pub async fn send_all(&self, kind: &str, data: Option<Value>) -> Result<MessageId> {
        self.command(|reply| NodeCommand::SendAll {
            kind: kind.to_owned(),
            data,
            reply,
        })
        .await?
    }

    /// Broadcast expecting replies: the returned stream yields them
    /// in arrival order and closes when the reply period elapses —
    /// empty if nobody answered.
    pub async fn request_all(
        &self,
        kind: &str,
        data: Option<Value>,
    ) -> Result<mpsc::UnboundedReceiver<Message>> {
        self.command(|reply| NodeCommand::RequestAll {
            kind: kind.to_owned(),
            data,
            reply,
        })
        .await?
    }

    /// Answers `original` with a `_reply` carrying `data`.
    pub async fn reply(&self, original: &Envelope, data: Option<Value>) -> Result<MessageId> {
        self.command(|reply| NodeCommand::Reply {
            dest: original.src.clone(),
            parent: original.id.clone(),
            data,
            reply: Some(reply),
        })
        .await?
    }

    /// Answers `original` and waits for a reply to the reply.
    pub async fn reply_request(&self, original: &Envelope, data: Option<Value>) -> Result<Message> {
        self.command(|reply| NodeCommand::ReplyRequest {
            dest: original.src.clone(),
            parent: original.id.clone(),
            data,
            reply,
        })
        .await?
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// This node's id.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Current lifecycle state, as published by the event loop.
    pub fn state(&self) -> NodeState {
        *self.state_rx.borrow()
    }

    /// This node's descriptor — resolved endpoints and advertised
    /// types. Answered by the running event loop.
    pub async fn info(&self) -> Result<NodeDescriptor> {
        self.command(|reply| NodeCommand::GetInfo { reply }).await
    }

    /// Descriptors of every peer currently in the cluster view.
    pub async fn peers(&self) -> Result<Vec<NodeDescriptor>> {
        self.command(|reply| NodeCommand::GetPeers { reply }).await
    }

    /// Takes the lifecycle event receiver (once).
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<NodeEvent>> {
        self.event_rx.take()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn command<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> NodeCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(build(tx))
            .await
            .map_err(|_| SilkError::NodeStopped)?;
        rx.await.map_err(|_| SilkError::NodeStopped)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use silk_types::config::Endpoints;

    fn config() -> NodeConfig {
        NodeConfig::new(Endpoints::new(
            "tcp://127.0.0.1:7901",
            "tcp://127.0.0.1:7902",
        ))
    }

    #[test]
    fn new_assigns_random_id_when_absent() {
        let a = Node::new(config()).expect("valid config");
        let b = Node::new(config()).expect("valid config");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn new_keeps_explicit_id() {
        let mut cfg = config();
        cfg.id = Some(NodeId::new("stable-id"));
        let node = Node::new(cfg).expect("valid config");
        assert_eq!(node.id(), &NodeId::new("stable-id"));
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut cfg = config();
        cfg.keepalive_period_ms = 0;
        assert!(Node::new(cfg).is_err());
    }

    #[test]
    fn initial_state_is_stopped() {
        let node = Node::new(config()).expect("valid config");
        assert_eq!(node.state(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn stop_before_start_prevents_restart() {
        let mut node = Node::new(config()).expect("valid config");
        node.stop().await;
        node.stop().await; // idempotent
        assert!(matches!(node.start().await, Err(SilkError::NodeStopped)));
    }

    #[test]
    fn event_receiver_taken_once() {
        let mut node = Node::new(config()).expect("valid config");
        assert!(node.take_event_receiver().is_some());
        assert!(node.take_event_receiver().is_none());
    }
}
