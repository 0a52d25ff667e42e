//! Router socket task.
//!
//! Owns the bound `RouterSocket` and multiplexes outbound commands
//! against inbound frames with `tokio::select!`. The router is used
//! bidirectionally: it receives frames from peers (layout
//! `[sender identity, empty delimiter, payload]`) and sends frames to
//! peers by prefixing the target identity.
//!
//! Send failures are logged, not propagated — a request that matters
//! is covered by the pending-ack retransmit machinery upstream.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use zeromq::{RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::event::TransportEvent;

/// Commands accepted by the router task.
pub(crate) enum RouterCmd {
    /// Send `payload` to the peer addressed by `identity`.
    Send {
        identity: Bytes,
        payload: Bytes,
    },
    /// Connect the router outward to a peer's router endpoint.
    Connect {
        endpoint: String,
        done: oneshot::Sender<Result<(), String>>,
    },
}

/// Runs the router task until the command channel closes.
pub(crate) async fn run_router(
    mut socket: RouterSocket,
    mut commands: mpsc::UnboundedReceiver<RouterCmd>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(RouterCmd::Send { identity, payload }) => {
                        let mut frame = ZmqMessage::from(payload.to_vec());
                        frame.push_front(Bytes::new());
                        frame.push_front(identity);
                        if let Err(e) = socket.send(frame).await {
                            tracing::warn!(%e, "router send failed");
                        }
                    }
                    Some(RouterCmd::Connect { endpoint, done }) => {
                        let result = socket
                            .connect(&endpoint)
                            .await
                            .map_err(|e| e.to_string());
                        if let Err(e) = &result {
                            tracing::warn!(%endpoint, %e, "router connect failed");
                        }
                        let _ = done.send(result);
                    }
                    None => break,
                }
            }

            inbound = socket.recv() => {
                match inbound {
                    Ok(frame) => {
                        if let Some((identity, payload)) = split_frames(frame) {
                            if events.send(TransportEvent::Router { identity, payload }).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%e, "router recv failed");
                    }
                }
            }
        }
    }

    tracing::debug!("router task exited");
}

/// Splits an inbound router frame into `(identity, payload)`.
///
/// Expected layout is `[identity, empty delimiter, payload]`; a frame
/// without the delimiter is tolerated. Anything shorter is dropped.
fn split_frames(frame: ZmqMessage) -> Option<(Bytes, Bytes)> {
    let frames = frame.into_vec();
    match frames.len() {
        0 | 1 => {
            tracing::warn!(frames = frames.len(), "short router frame dropped");
            None
        }
        2 => Some((frames[0].clone(), frames[1].clone())),
        n => Some((frames[0].clone(), frames[n - 1].clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(frames: &[&'static [u8]]) -> ZmqMessage {
        let mut iter = frames.iter();
        let mut msg = ZmqMessage::from(iter.next().expect("at least one frame").to_vec());
        for f in iter {
            msg.push_back(Bytes::from_static(f));
        }
        msg
    }

    #[test]
    fn splits_three_frame_layout() {
        let (identity, payload) =
            split_frames(message(&[b"Sn1", b"", b"{\"x\":1}"])).expect("split");
        assert_eq!(&identity[..], b"Sn1");
        assert_eq!(&payload[..], b"{\"x\":1}");
    }

    #[test]
    fn tolerates_missing_delimiter() {
        let (identity, payload) = split_frames(message(&[b"Sn1", b"{}"])).expect("split");
        assert_eq!(&identity[..], b"Sn1");
        assert_eq!(&payload[..], b"{}");
    }

    #[test]
    fn drops_single_frame() {
        assert!(split_frames(message(&[b"Sn1"])).is_none());
    }
}
