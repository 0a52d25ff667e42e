//! User subscription table.
//!
//! Per message type, an ordered list of handlers plus the reply
//! policy this node advertises for the type. Handlers are closures
//! and cannot be compared, so [`SubscriptionId`]s returned from
//! registration are the removal tokens.

use std::collections::HashMap;

use silk_types::ReplyPolicy;

use crate::command::{Delivery, Handler};

// ---------------------------------------------------------------------------
// SubscriptionId
// ---------------------------------------------------------------------------

/// Token identifying one registered handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SubscriptionId(u64);

// ---------------------------------------------------------------------------
// SubscriptionTable
// ---------------------------------------------------------------------------

struct KindEntry {
    policy: ReplyPolicy,
    handlers: Vec<(SubscriptionId, Handler)>,
}

/// Registered handlers, keyed by message type.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    next_id: u64,
    by_kind: HashMap<String, KindEntry>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler; the most recent registration's policy is
    /// the one advertised for the type.
    pub fn add(&mut self, kind: &str, policy: ReplyPolicy, handler: Handler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);

        let entry = self.by_kind.entry(kind.to_owned()).or_insert_with(|| KindEntry {
            policy,
            handlers: Vec::new(),
        });
        entry.policy = policy;
        entry.handlers.push((id, handler));
        id
    }

    /// Removes one handler. Returns `true` when the type has no
    /// handlers left and was withdrawn.
    pub fn remove(&mut self, kind: &str, id: SubscriptionId) -> bool {
        let Some(entry) = self.by_kind.get_mut(kind) else {
            return false;
        };
        entry.handlers.retain(|(hid, _)| *hid != id);
        if entry.handlers.is_empty() {
            self.by_kind.remove(kind);
            true
        } else {
            false
        }
    }

    /// Removes every handler for a type. Returns whether it existed.
    pub fn remove_kind(&mut self, kind: &str) -> bool {
        self.by_kind.remove(kind).is_some()
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.by_kind.clear();
    }

    /// Whether any handler is registered for the type.
    pub fn has(&self, kind: &str) -> bool {
        self.by_kind.contains_key(kind)
    }

    /// The advertised reply policy for a type.
    pub fn policy(&self, kind: &str) -> Option<ReplyPolicy> {
        self.by_kind.get(kind).map(|e| e.policy)
    }

    /// Invokes every handler for `kind` in registration order.
    ///
    /// `make_delivery` produces a fresh [`Delivery`] per handler.
    /// Returns the number of handlers invoked.
    pub fn deliver(&mut self, kind: &str, mut make_delivery: impl FnMut() -> Delivery) -> usize {
        let Some(entry) = self.by_kind.get_mut(kind) else {
            return 0;
        };
        for (_, handler) in entry.handlers.iter_mut() {
            handler(make_delivery());
        }
        entry.handlers.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Responder;
    use silk_protocol::Envelope;
    use silk_types::{MessageId, NodeId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn delivery() -> Delivery {
        let (tx, _rx) = mpsc::unbounded_channel();
        Delivery {
            envelope: Envelope {
                id: MessageId::new("m1"),
                src: NodeId::new("peer"),
                dest: None,
                kind: "work".into(),
                parent: None,
                data: None,
            },
            responder: Responder::new(NodeId::new("peer"), MessageId::new("m1"), tx),
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let mut table = SubscriptionTable::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for tag in [1, 2, 3] {
            let order = order.clone();
            table.add(
                "work",
                ReplyPolicy::default(),
                Box::new(move |_| order.lock().unwrap().push(tag)),
            );
        }

        let invoked = table.deliver("work", delivery);
        assert_eq!(invoked, 3);
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn remove_last_handler_withdraws_kind() {
        let mut table = SubscriptionTable::new();
        let a = table.add("work", ReplyPolicy::default(), Box::new(|_| {}));
        let b = table.add("work", ReplyPolicy::default(), Box::new(|_| {}));

        assert!(!table.remove("work", a), "one handler remains");
        assert!(table.has("work"));
        assert!(table.remove("work", b), "last removal withdraws the kind");
        assert!(!table.has("work"));
    }

    #[test]
    fn off_then_on_restores_delivery() {
        let mut table = SubscriptionTable::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let id = table.add("work", ReplyPolicy::default(), Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        table.deliver("work", delivery);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        table.remove("work", id);
        table.deliver("work", delivery);
        assert_eq!(count.load(Ordering::SeqCst), 1, "no delivery after removal");

        let c = count.clone();
        table.add("work", ReplyPolicy::default(), Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        table.deliver("work", delivery);
        assert_eq!(count.load(Ordering::SeqCst), 2, "delivery restored");
    }

    #[test]
    fn latest_policy_wins() {
        let mut table = SubscriptionTable::new();
        table.add("work", ReplyPolicy { period: 100, attempts: 1 }, Box::new(|_| {}));
        table.add("work", ReplyPolicy { period: 900, attempts: 4 }, Box::new(|_| {}));
        assert_eq!(table.policy("work"), Some(ReplyPolicy { period: 900, attempts: 4 }));
    }

    #[test]
    fn deliver_unknown_kind_is_noop() {
        let mut table = SubscriptionTable::new();
        assert_eq!(table.deliver("nothing", delivery), 0);
    }
}
