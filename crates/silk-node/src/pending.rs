//! Pending-acknowledgement and pending-reply tables.
//!
//! Both tables are plain in-memory maps owned by the event loop.
//! The ack table is swept by a periodic tick: expired entries are
//! retransmitted with exponential backoff until their attempt budget
//! runs out. The reply table completes single requests on first
//! `_reply` and streams broadcast replies until their deadline.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use silk_protocol::Message;
use silk_types::{MessageId, NodeId, Result, RetryProfile};
use tokio::sync::{mpsc, oneshot};

// ---------------------------------------------------------------------------
// Pending acks
// ---------------------------------------------------------------------------

/// One outbound message awaiting its `_ack`.
#[derive(Debug)]
pub(crate) struct AckEntry {
    /// Destination peer.
    pub dest: NodeId,
    /// Destination router identity, for retransmits.
    pub identity: Bytes,
    /// The encoded frame, retransmitted verbatim.
    pub frame: Bytes,
    /// Next expiry.
    pub expires_at: Instant,
    /// Remaining retry budget.
    pub attempts_left: u32,
    /// Retry ordinal, drives the backoff exponent.
    pub attempt: u32,
    /// Backoff bounds.
    pub profile: RetryProfile,
}

/// What the sweeper decided for one expired entry.
#[derive(Debug)]
pub(crate) enum SweepAction {
    /// Retransmit the frame; the entry was rescheduled.
    Resend {
        id: MessageId,
        identity: Bytes,
        frame: Bytes,
    },
    /// Budget exhausted; the entry was dropped.
    GiveUp { id: MessageId, dest: NodeId },
}

/// Outbound messages awaiting acknowledgement, keyed by message id.
#[derive(Default)]
pub(crate) struct PendingAcks {
    entries: HashMap<MessageId, AckEntry>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: MessageId, entry: AckEntry) {
        self.entries.insert(id, entry);
    }

    /// Marks an entry fulfilled and drops it. Returns whether it existed.
    pub fn fulfill(&mut self, id: &MessageId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// One sweeper tick: expired entries lose one attempt and are
    /// rescheduled with backoff, or dropped when the budget is gone.
    pub fn sweep(&mut self, now: Instant) -> Vec<SweepAction> {
        let mut actions = Vec::new();
        self.entries.retain(|id, entry| {
            if entry.expires_at > now {
                return true;
            }
            entry.attempts_left = entry.attempts_left.saturating_sub(1);
            if entry.attempts_left == 0 {
                actions.push(SweepAction::GiveUp {
                    id: id.clone(),
                    dest: entry.dest.clone(),
                });
                return false;
            }
            entry.expires_at = now + entry.profile.backoff(entry.attempt);
            entry.attempt += 1;
            actions.push(SweepAction::Resend {
                id: id.clone(),
                identity: entry.identity.clone(),
                frame: entry.frame.clone(),
            });
            true
        });
        actions
    }

    /// Abandons every entry targeting an evicted peer.
    pub fn drop_for_peer(&mut self, peer: &NodeId) -> Vec<MessageId> {
        let ids: Vec<MessageId> = self
            .entries
            .iter()
            .filter(|(_, e)| &e.dest == peer)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            self.entries.remove(id);
        }
        ids
    }

    /// Drops every entry (node stop).
    pub fn drain(&mut self) -> Vec<MessageId> {
        self.entries.drain().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Pending replies
// ---------------------------------------------------------------------------

/// Where a `_reply` for a given message id goes.
pub(crate) enum ReplySink {
    /// Single-reply request: completes on first reply.
    Single(oneshot::Sender<Result<Message>>),
    /// Broadcast: streams every reply until the deadline.
    Stream(mpsc::UnboundedSender<Message>),
    /// Continuation of the initial `_join` handshake.
    JoinSeed {
        seed: NodeId,
        notify: oneshot::Sender<Result<()>>,
    },
    /// Continuation of a `_connect` handshake with one member.
    ConnectPeer { peer: NodeId },
}

impl std::fmt::Debug for ReplySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(_) => f.write_str("Single"),
            Self::Stream(_) => f.write_str("Stream"),
            Self::JoinSeed { seed, .. } => f.debug_struct("JoinSeed").field("seed", seed).finish_non_exhaustive(),
            Self::ConnectPeer { peer } => f.debug_struct("ConnectPeer").field("peer", peer).finish(),
        }
    }
}

struct ReplyEntry {
    sink: ReplySink,
    /// Streams close at this deadline; other sinks have none.
    deadline: Option<Instant>,
}

/// What happened to an inbound `_reply`.
#[derive(Debug)]
pub(crate) enum ReplyOutcome {
    /// No entry for the parent id; the reply is dropped.
    NotFound,
    /// Delivered into a stream; the entry stays registered.
    Delivered,
    /// The entry completed; the caller runs the sink.
    Taken(ReplySink, Message),
}

/// Outbound requests awaiting replies, keyed by message id.
#[derive(Default)]
pub(crate) struct PendingReplies {
    entries: HashMap<MessageId, ReplyEntry>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: MessageId, sink: ReplySink, deadline: Option<Instant>) {
        self.entries.insert(id, ReplyEntry { sink, deadline });
    }

    /// Routes an inbound `_reply` for `parent`.
    pub fn on_reply(&mut self, parent: &MessageId, message: Message) -> ReplyOutcome {
        match self.entries.get(parent) {
            None => ReplyOutcome::NotFound,
            Some(entry) => match &entry.sink {
                ReplySink::Stream(tx) => {
                    if tx.send(message).is_err() {
                        // Receiver gone; close out the entry.
                        self.entries.remove(parent);
                    }
                    ReplyOutcome::Delivered
                }
                _ => {
                    let entry = self.entries.remove(parent).expect("present");
                    ReplyOutcome::Taken(entry.sink, message)
                }
            },
        }
    }

    /// Removes the entry for `id`, handing its sink back for failure
    /// delivery.
    pub fn fail(&mut self, id: &MessageId) -> Option<ReplySink> {
        self.entries.remove(id).map(|e| e.sink)
    }

    /// Drops expired stream entries; their receivers see end-of-stream.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.deadline.is_none_or(|d| d > now));
        before - self.entries.len()
    }

    /// Removes every entry (node stop).
    pub fn drain(&mut self) -> Vec<ReplySink> {
        self.entries.drain().map(|(_, e)| e.sink).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
