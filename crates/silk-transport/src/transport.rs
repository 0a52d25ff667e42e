//! The per-node transport handle.
//!
//! [`Transport::bind`] binds the router and publish sockets, spawns
//! their tasks, and hands back the inbound event channel. All send
//! paths queue onto unbounded channels — callers never block on the
//! network.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use zeromq::util::PeerIdentity;
use zeromq::{PubSocket, RouterSocket, Socket, SocketOptions, SubSocket};

use silk_types::{NodeId, Result, SilkError};

use crate::config::TransportConfig;
use crate::event::TransportEvent;
use crate::identity::identity_for;
use crate::publish::{self, PublishCmd};
use crate::router::{self, RouterCmd};
use crate::subscribe;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Owns the node's sockets through their tasks.
///
/// Dropping the transport (or calling [`shutdown`](Self::shutdown))
/// closes every socket; the crate has no linger, so close is
/// immediate.
pub struct Transport {
    router_tx: mpsc::UnboundedSender<RouterCmd>,
    publish_tx: mpsc::UnboundedSender<PublishCmd>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    /// Stop handle per peer subscribe task.
    subscribers: HashMap<NodeId, oneshot::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
    resolved_router: String,
    resolved_pubsub: String,
}

impl Transport {
    /// Binds both sockets and spawns the socket tasks.
    ///
    /// The router socket is bound with an identity derived from
    /// `local_id` so peers can address this node by id alone.
    ///
    /// # Errors
    ///
    /// `SilkError::Bind` when either endpoint cannot be bound —
    /// fatal to the node.
    pub async fn bind(
        config: &TransportConfig,
        local_id: &NodeId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let identity = identity_for(local_id);
        let peer_identity =
            PeerIdentity::try_from(identity.to_vec()).map_err(|e| SilkError::Config {
                reason: format!("node id unusable as socket identity: {e}"),
            })?;

        let mut options = SocketOptions::default();
        options.peer_identity(peer_identity);

        let mut router = RouterSocket::with_options(options);
        let router_endpoint =
            router
                .bind(&config.router)
                .await
                .map_err(|e| SilkError::Bind {
                    endpoint: config.router.clone(),
                    reason: e.to_string(),
                })?;

        let mut publisher = PubSocket::new();
        let pub_endpoint =
            publisher
                .bind(&config.pubsub)
                .await
                .map_err(|e| SilkError::Bind {
                    endpoint: config.pubsub.clone(),
                    reason: e.to_string(),
                })?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (router_tx, router_rx) = mpsc::unbounded_channel();
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();

        let tasks = vec![
            tokio::spawn(router::run_router(router, router_rx, events_tx.clone())),
            tokio::spawn(publish::run_publisher(
                publisher,
                publish_rx,
                config.publish_buffer,
            )),
        ];

        let resolved_router = router_endpoint.to_string();
        let resolved_pubsub = pub_endpoint.to_string();
        tracing::debug!(
            router = %resolved_router,
            pubsub = %resolved_pubsub,
            "transport bound"
        );

        let me = Self {
            router_tx,
            publish_tx,
            events_tx,
            subscribers: HashMap::new(),
            tasks,
            resolved_router,
            resolved_pubsub,
        };

        Ok((me, events_rx))
    }

    /// The router endpoint as actually bound (wildcard ports resolved).
    pub fn router_endpoint(&self) -> &str {
        &self.resolved_router
    }

    /// The publish endpoint as actually bound.
    pub fn pubsub_endpoint(&self) -> &str {
        &self.resolved_pubsub
    }

    /// Queues a direct send to the peer addressed by `identity`.
    pub fn send_to(&self, identity: Bytes, payload: Bytes) -> Result<()> {
        self.router_tx
            .send(RouterCmd::Send { identity, payload })
            .map_err(|_| SilkError::Transport {
                reason: "router task gone".into(),
            })
    }

    /// Queues a broadcast on the publish socket.
    pub fn publish(&self, payload: Bytes) -> Result<()> {
        self.publish_tx
            .send(PublishCmd::Publish(payload))
            .map_err(|_| SilkError::Transport {
                reason: "publish task gone".into(),
            })
    }

    /// Connects to a new peer: router outward to its router endpoint,
    /// and a fresh subscribe socket to its publish endpoint.
    pub async fn connect_peer(
        &mut self,
        id: &NodeId,
        router_endpoint: &str,
        pub_endpoint: &str,
    ) -> Result<()> {
        // Router connect, confirmed by the router task so sends that
        // follow address an established session.
        let (done_tx, done_rx) = oneshot::channel();
        self.router_tx
            .send(RouterCmd::Connect {
                endpoint: router_endpoint.to_owned(),
                done: done_tx,
            })
            .map_err(|_| SilkError::Transport {
                reason: "router task gone".into(),
            })?;
        done_rx
            .await
            .map_err(|_| SilkError::Transport {
                reason: "router task gone".into(),
            })?
            .map_err(|reason| SilkError::Transport { reason })?;

        // Subscribe socket for the peer's broadcasts.
        let mut sub = SubSocket::new();
        sub.connect(pub_endpoint)
            .await
            .map_err(|e| SilkError::Transport {
                reason: format!("subscribe connect to {pub_endpoint} failed: {e}"),
            })?;
        sub.subscribe("").await.map_err(|e| SilkError::Transport {
            reason: format!("subscribe to {pub_endpoint} failed: {e}"),
        })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        self.tasks.push(tokio::spawn(subscribe::run_subscriber(
            sub,
            self.events_tx.clone(),
            stop_rx,
        )));

        if let Some(old) = self.subscribers.insert(id.clone(), stop_tx) {
            let _ = old.send(());
        }

        tracing::debug!(peer = %id, router = %router_endpoint, pubsub = %pub_endpoint, "peer connected");
        Ok(())
    }

    /// Disconnects from a peer's broadcasts by closing its subscribe
    /// socket. Direct sends to the peer simply stop.
    pub fn disconnect_peer(&mut self, id: &NodeId) {
        if let Some(stop) = self.subscribers.remove(id) {
            let _ = stop.send(());
            tracing::debug!(peer = %id, "peer disconnected");
        }
    }

    /// Forces the publish buffer out and waits until every queued
    /// broadcast has been handed to the socket.
    pub async fn flush_publishes(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.publish_tx.send(PublishCmd::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Stops every socket task and closes the sockets.
    pub fn shutdown(&mut self) {
        for (_, stop) in self.subscribers.drain() {
            let _ = stop.send(());
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
