//! Socket layer for the Silk fabric.
//!
//! Thin adapter over the pure-Rust `zeromq` crate. Each node owns one
//! [`Transport`]:
//!
//! - a **router** socket, bound at start with an identity derived from
//!   the node id, used bidirectionally for direct messages;
//! - a **publish** socket, bound at start, for broadcasts — with a
//!   short startup FIFO that defeats the slow-joiner drop;
//! - one **subscribe** socket per peer, connected to that peer's
//!   publish endpoint and subscribed to everything.
//!
//! Socket reader tasks forward inbound frames as
//! [`TransportEvent`](event::TransportEvent)s over a channel; outbound
//! sends are queued, never blocking the caller.

pub mod config;
pub mod event;
pub mod identity;
mod publish;
mod router;
mod subscribe;
mod transport;

pub use config::TransportConfig;
pub use event::TransportEvent;
pub use identity::{identity_for, node_id_from_identity};
pub use transport::Transport;
