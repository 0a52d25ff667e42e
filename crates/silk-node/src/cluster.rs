//! The indexed cluster view.
//!
//! Two indices over known peers: id → peer record, and message type →
//! the set of peer ids advertising that type. Both are kept mutually
//! consistent by construction — every mutation goes through
//! [`ClusterView::add_or_update`] or [`ClusterView::remove`].

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::seq::IteratorRandom;
use silk_transport::identity_for;
use silk_types::config::KEEPALIVE_MISS_THRESHOLD;
use silk_types::{NodeDescriptor, NodeId, ReplyPolicy};

// ---------------------------------------------------------------------------
// PeerRecord
// ---------------------------------------------------------------------------

/// Everything known about one peer.
#[derive(Clone, Debug)]
pub(crate) struct PeerRecord {
    /// The peer's advertised descriptor.
    pub descriptor: NodeDescriptor,
    /// Router identity derived from the peer id.
    pub identity: Bytes,
    /// The peer is presumed dead once this deadline passes.
    pub deadline: Instant,
}

/// Outcome of an upsert.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Upsert {
    /// First sighting — the transport must connect to the peer.
    Added,
    /// Known peer, descriptor refreshed.
    Updated,
}

// ---------------------------------------------------------------------------
// ClusterView
// ---------------------------------------------------------------------------

/// A node's local understanding of current membership.
#[derive(Default)]
pub(crate) struct ClusterView {
    peers: HashMap<NodeId, PeerRecord>,
    by_kind: HashMap<String, HashSet<NodeId>>,
}

impl ClusterView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts a peer descriptor and refreshes its liveness deadline.
    pub fn add_or_update(&mut self, descriptor: NodeDescriptor, now: Instant) -> Upsert {
        let id = descriptor.id.clone();
        let existing = self.peers.contains_key(&id);

        if existing {
            self.unindex_kinds(&id);
        }
        for kind in descriptor.messages.keys() {
            self.by_kind.entry(kind.clone()).or_default().insert(id.clone());
        }

        let deadline = deadline_after(now, descriptor.keepalive.period);
        let identity = identity_for(&id);
        self.peers.insert(
            id,
            PeerRecord {
                descriptor,
                identity,
                deadline,
            },
        );

        if existing {
            Upsert::Updated
        } else {
            Upsert::Added
        }
    }

    /// Pushes a peer's liveness deadline out after a keepalive.
    pub fn refresh_deadline(&mut self, id: &NodeId, now: Instant) -> bool {
        match self.peers.get_mut(id) {
            Some(record) => {
                record.deadline = deadline_after(now, record.descriptor.keepalive.period);
                true
            }
            None => false,
        }
    }

    /// Removes a peer from both indices.
    pub fn remove(&mut self, id: &NodeId) -> Option<PeerRecord> {
        self.unindex_kinds(id);
        self.peers.remove(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.peers.contains_key(id)
    }

    /// Uniform random choice among peers advertising `kind`.
    pub fn pick_for_kind(&self, kind: &str, rng: &mut impl rand::Rng) -> Option<NodeId> {
        self.by_kind.get(kind)?.iter().choose(rng).cloned()
    }

    /// The reply policy `id` advertises for `kind`, if any.
    pub fn policy_for(&self, id: &NodeId, kind: &str) -> Option<ReplyPolicy> {
        self.peers.get(id)?.descriptor.policy_for(kind)
    }

    /// The longest reply period advertised for `kind` across the view.
    pub fn max_period_for_kind(&self, kind: &str) -> Option<u64> {
        let ids = self.by_kind.get(kind)?;
        ids.iter()
            .filter_map(|id| self.policy_for(id, kind))
            .map(|p| p.period)
            .max()
    }

    /// Peers whose liveness deadline has passed.
    pub fn expired(&self, now: Instant) -> Vec<NodeId> {
        self.peers
            .iter()
            .filter(|(_, record)| record.deadline < now)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Descriptors of every known peer.
    pub fn descriptors(&self) -> Vec<NodeDescriptor> {
        self.peers.values().map(|r| r.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    fn unindex_kinds(&mut self, id: &NodeId) {
        self.by_kind.retain(|_, ids| {
            ids.remove(id);
            !ids.is_empty()
        });
    }
}

/// Liveness deadline for a peer with the given keepalive period:
/// three consecutive missed keepalives marks it dead.
fn deadline_after(now: Instant, keepalive_period_ms: u64) -> Instant {
    now + Duration::from_millis(keepalive_period_ms.saturating_mul(u64::from(KEEPALIVE_MISS_THRESHOLD)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
