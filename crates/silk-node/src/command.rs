//! Commands, handlers, and reply plumbing for external → engine
//! communication.
//!
//! [`NodeCommand`] is the channel message type the public [`Node`]
//! handle uses to drive the event loop. Each command that produces a
//! result carries a `tokio::sync::oneshot::Sender` for the reply.
//!
//! All commands are processed sequentially inside the event loop,
//! eliminating races between concurrent callers.
//!
//! [`Node`]: crate::node::Node

use serde_json::Value;
use silk_protocol::{Envelope, Message};
use silk_types::{MessageId, NodeDescriptor, NodeId, ReplyPolicy, Result, SilkError};
use tokio::sync::{mpsc, oneshot};

use crate::subscriptions::SubscriptionId;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// A user-registered message handler.
///
/// Handlers run on the node's event loop — keep them short. Longer
/// work should move the [`Delivery`] into a spawned task; the
/// [`Responder`] stays valid there.
pub type Handler = Box<dyn FnMut(Delivery) + Send + 'static>;

/// One inbound application message, as seen by a handler.
#[derive(Debug)]
pub struct Delivery {
    /// The parsed envelope.
    pub envelope: Envelope,
    /// Replies to the sender of this message.
    pub responder: Responder,
}

/// Sends a `_reply` back to the source of one specific message.
///
/// Cloneable and usable from any task; the reply is routed through
/// the node's event loop.
#[derive(Clone, Debug)]
pub struct Responder {
    dest: NodeId,
    parent: MessageId,
    commands: mpsc::UnboundedSender<NodeCommand>,
}

impl Responder {
    pub(crate) fn new(
        dest: NodeId,
        parent: MessageId,
        commands: mpsc::UnboundedSender<NodeCommand>,
    ) -> Self {
        Self {
            dest,
            parent,
            commands,
        }
    }

    /// Sends a `_reply` carrying `data` back to the message source.
    ///
    /// # Errors
    ///
    /// `SilkError::NodeStopped` if the node has shut down.
    pub fn respond(&self, data: Option<Value>) -> Result<()> {
        self.commands
            .send(NodeCommand::Reply {
                dest: self.dest.clone(),
                parent: self.parent.clone(),
                data,
                reply: None,
            })
            .map_err(|_| SilkError::NodeStopped)
    }

    /// Id of the node that sent the message being answered.
    pub fn src(&self) -> &NodeId {
        &self.dest
    }
}

// ---------------------------------------------------------------------------
// SubscribeOptions
// ---------------------------------------------------------------------------

/// Options recorded with a subscription.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubscribeOptions {
    /// Reply policy advertised for the type.
    pub policy: ReplyPolicy,
}

// ---------------------------------------------------------------------------
// NodeCommand
// ---------------------------------------------------------------------------

/// Commands accepted by the node event loop.
pub(crate) enum NodeCommand {
    /// Initiate membership through a seed node.
    Join {
        seed: NodeDescriptor,
        reply: oneshot::Sender<Result<()>>,
    },

    /// Register a handler for a message type.
    Subscribe {
        kind: String,
        options: SubscribeOptions,
        handler: Handler,
        reply: oneshot::Sender<Result<SubscriptionId>>,
    },

    /// Remove one handler, every handler for a type, or everything.
    Unsubscribe {
        kind: Option<String>,
        id: Option<SubscriptionId>,
        reply: oneshot::Sender<Result<()>>,
    },

    /// Load-balanced fire-and-forget send.
    Send {
        kind: String,
        data: Option<Value>,
        reply: oneshot::Sender<Result<MessageId>>,
    },

    /// Load-balanced request expecting one reply.
    Request {
        kind: String,
        data: Option<Value>,
        reply: oneshot::Sender<Result<Message>>,
    },

    /// Direct fire-and-forget send.
    SendTo {
        dest: NodeId,
        kind: String,
        data: Option<Value>,
        reply: oneshot::Sender<Result<MessageId>>,
    },

    /// Direct request expecting one reply.
    RequestTo {
        dest: NodeId,
        kind: String,
        data: Option<Value>,
        reply: oneshot::Sender<Result<Message>>,
    },

    /// Broadcast fire-and-forget send.
    SendAll {
        kind: String,
        data: Option<Value>,
        reply: oneshot::Sender<Result<MessageId>>,
    },

    /// Broadcast expecting a stream of replies.
    RequestAll {
        kind: String,
        data: Option<Value>,
        reply: oneshot::Sender<Result<mpsc::UnboundedReceiver<Message>>>,
    },

    /// Send a `_reply` answering `parent`.
    Reply {
        dest: NodeId,
        parent: MessageId,
        data: Option<Value>,
        reply: Option<oneshot::Sender<Result<MessageId>>>,
    },

    /// Send a `_reply` and expect a reply to the reply.
    ReplyRequest {
        dest: NodeId,
        parent: MessageId,
        data: Option<Value>,
        reply: oneshot::Sender<Result<Message>>,
    },

    /// Snapshot this node's descriptor.
    GetInfo {
        reply: oneshot::Sender<NodeDescriptor>,
    },

    /// Snapshot the cluster view.
    GetPeers {
        reply: oneshot::Sender<Vec<NodeDescriptor>>,
    },
}

// Manual Debug because handlers and oneshot senders do not implement it.
impl std::fmt::Debug for NodeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Join { seed, .. } => f.debug_struct("Join").field("seed", &seed.id).finish_non_exhaustive(),
            Self::Subscribe { kind, .. } => f.debug_struct("Subscribe").field("kind", kind).finish_non_exhaustive(),
            Self::Unsubscribe { kind, id, .. } => f
                .debug_struct("Unsubscribe")
                .field("kind", kind)
                .field("id", id)
                .finish_non_exhaustive(),
            Self::Send { kind, .. } => f.debug_struct("Send").field("kind", kind).finish_non_exhaustive(),
            Self::Request { kind, .. } => f.debug_struct("Request").field("kind", kind).finish_non_exhaustive(),
            Self::SendTo { dest, kind, .. } => f
                .debug_struct("SendTo")
                .field("dest", dest)
                .field("kind", kind)
                .finish_non_exhaustive(),
            Self::RequestTo { dest, kind, .. } => f
                .debug_struct("RequestTo")
                .field("dest", dest)
                .field("kind", kind)
                .finish_non_exhaustive(),
            Self::SendAll { kind, .. } => f.debug_struct("SendAll").field("kind", kind).finish_non_exhaustive(),
            Self::RequestAll { kind, .. } => f.debug_struct("RequestAll").field("kind", kind).finish_non_exhaustive(),
            Self::Reply { dest, parent, .. } => f
                .debug_struct("Reply")
                .field("dest", dest)
                .field("parent", parent)
                .finish_non_exhaustive(),
            Self::ReplyRequest { dest, parent, .. } => f
                .debug_struct("ReplyRequest")
                .field("dest", dest)
                .field("parent", parent)
                .finish_non_exhaustive(),
            Self::GetInfo { .. } => f.write_str("GetInfo"),
            Self::GetPeers { .. } => f.write_str("GetPeers"),
        }
    }
}
