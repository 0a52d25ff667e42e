//! Publish socket task with slow-joiner mitigation.
//!
//! Subscribers that are still completing their connection handshake
//! silently miss early publishes. To keep a freshly started node's
//! first broadcasts (handshakes, keepalives) from vanishing, all
//! publish sends are held in a FIFO for a short window after start,
//! then flushed in order; afterwards sends go out directly.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use zeromq::{PubSocket, SocketSend, ZmqMessage};

/// Commands accepted by the publish task.
pub(crate) enum PublishCmd {
    /// Broadcast a single-frame payload.
    Publish(Bytes),
    /// Force-flush the startup buffer and confirm every queued send
    /// has been handed to the socket. Used at shutdown so a departure
    /// notice is not lost in the buffer.
    Flush(oneshot::Sender<()>),
}

/// Runs the publish task until the command channel closes.
pub(crate) async fn run_publisher(
    mut socket: PubSocket,
    mut commands: mpsc::UnboundedReceiver<PublishCmd>,
    buffer_window: Duration,
) {
    let mut buffered: Vec<Bytes> = Vec::new();
    let mut flushed = false;

    let flush_at = tokio::time::sleep(buffer_window);
    tokio::pin!(flush_at);

    loop {
        tokio::select! {
            _ = &mut flush_at, if !flushed => {
                if !buffered.is_empty() {
                    tracing::debug!(held = buffered.len(), "flushing publish buffer");
                }
                for payload in buffered.drain(..) {
                    send(&mut socket, payload).await;
                }
                flushed = true;
            }

            cmd = commands.recv() => {
                match cmd {
                    Some(PublishCmd::Publish(payload)) if flushed => {
                        send(&mut socket, payload).await;
                    }
                    Some(PublishCmd::Publish(payload)) => {
                        buffered.push(payload);
                    }
                    Some(PublishCmd::Flush(done)) => {
                        for payload in buffered.drain(..) {
                            send(&mut socket, payload).await;
                        }
                        flushed = true;
                        let _ = done.send(());
                    }
                    None => break,
                }
            }
        }
    }

    tracing::debug!("publish task exited");
}

async fn send(socket: &mut PubSocket, payload: Bytes) {
    if let Err(e) = socket.send(ZmqMessage::from(payload.to_vec())).await {
        tracing::warn!(%e, "publish send failed");
    }
}
