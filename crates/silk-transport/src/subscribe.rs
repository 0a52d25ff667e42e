//! Per-peer subscribe socket task.
//!
//! One `SubSocket` per peer, connected to that peer's publish endpoint
//! and subscribed to the empty prefix (everything). Dropping the task
//! closes the socket — that is the disconnect.

use tokio::sync::{mpsc, oneshot};
use zeromq::{SocketRecv, SubSocket};

use crate::event::TransportEvent;

/// Runs one peer's subscribe task until stopped or the socket fails.
pub(crate) async fn run_subscriber(
    mut socket: SubSocket,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => break,

            inbound = socket.recv() => {
                match inbound {
                    Ok(frame) => {
                        let Some(payload) = frame.get(0).cloned() else {
                            continue;
                        };
                        if events.send(TransportEvent::Published { payload }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(%e, "subscribe recv failed — closing");
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!("subscribe task exited");
}
