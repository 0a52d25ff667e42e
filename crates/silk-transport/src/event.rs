//! Events emitted by the socket layer.

use bytes::Bytes;

/// An inbound frame, delivered to the engine loop.
///
/// The payload is raw bytes; parsing happens lazily in the engine so
/// frames that are dropped are never deserialized.
#[derive(Debug)]
pub enum TransportEvent {
    /// A frame arrived on the router socket.
    Router {
        /// Identity of the sending peer, as framed by the socket.
        identity: Bytes,
        /// The envelope bytes.
        payload: Bytes,
    },
    /// A frame arrived on a subscribe socket.
    Published {
        /// The envelope bytes.
        payload: Bytes,
    },
}
