//! Wire protocol for the Silk fabric.
//!
//! Defines the JSON [`Envelope`](envelope::Envelope) exchanged between
//! nodes, the lazily (de)serialized [`Message`](message::Message)
//! wrapper, dotted-path access into payloads, and the
//! [`EnvelopeFactory`](factory::EnvelopeFactory) that stamps outbound
//! defaults.

pub mod envelope;
pub mod factory;
pub mod message;
pub mod path;

pub use envelope::{kinds, Dest, Envelope, JoinReply};
pub use factory::EnvelopeFactory;
pub use message::Message;
