use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::MessageConsumer;

struct Subscriber {
    consumer: Arc<dyn MessageConsumer>,
    /// Subscription sequence; breaks ties between equal `order` values.
    seq: u64,
}

/// Subscriber list kept sorted by `(order, subscription sequence)`.
///
/// Dispatch works on a snapshot so the lock is never held across a handler
/// invocation; subscribing or unsubscribing mid-dispatch affects the next send.
#[derive(Default)]
pub(crate) struct SubscriberList {
    entries: RwLock<Vec<Subscriber>>,
    next_seq: AtomicU64,
}

impl SubscriberList {
    pub(crate) fn add(&self, consumer: Arc<dyn MessageConsumer>) -> bool {
        let mut entries = self.entries.write();
        if entries.iter().any(|s| s.consumer.id() == consumer.id()) {
            return false;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        entries.push(Subscriber { consumer, seq });
        entries.sort_by_key(|s| (s.consumer.order(), s.seq));
        true
    }

    pub(crate) fn remove(&self, consumer_id: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|s| s.consumer.id() != consumer_id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn MessageConsumer>> {
        self.entries
            .read()
            .iter()
            .map(|s| Arc::clone(&s.consumer))
            .collect()
    }
}
