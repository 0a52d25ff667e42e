//! The Silk node engine.
//!
//! A brokerless peer-to-peer messaging fabric: every [`Node`] is both
//! producer and consumer of typed messages. Nodes discover one
//! another through a `_join`/`_connect` handshake, keep a shared view
//! of membership alive with keepalives, and exchange messages three
//! ways:
//!
//! - [`Node::send_to`] / [`Node::request_to`] — direct to a named peer;
//! - [`Node::send`] / [`Node::request`] — load-balanced to one peer
//!   subscribed to the type;
//! - [`Node::send_all`] / [`Node::request_all`] — broadcast to every
//!   subscribed peer.
//!
//! Requests are confirmed by acknowledgements and retried with
//! exponential backoff, giving at-least-once request/reply semantics
//! over an otherwise fire-and-forget transport.

mod cluster;
mod command;
mod dispatch;
mod event_loop;
mod keepalive;
mod node;
mod outgoing;
mod pending;
mod subscriptions;

pub use command::{Delivery, Handler, Responder, SubscribeOptions};
pub use node::Node;
pub use subscriptions::SubscriptionId;

pub use silk_protocol::{kinds, Dest, Envelope, Message};
pub use silk_types::config::{Endpoints, NodeConfig};
pub use silk_types::{
    Keepalive, MessageId, NodeDescriptor, NodeEvent, NodeId, NodeState, ReplyPolicy, Result,
    RetryProfile, SilkError,
};
