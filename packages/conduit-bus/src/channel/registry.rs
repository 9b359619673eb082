//! Name-based channel lookup used for wiring and `replyChannel` resolution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::{ChannelRef, MessageChannel, ReplyChannel};

/// Concurrent map of channel name to channel.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: DashMap<String, ChannelRef>,
    temporary: AtomicUsize,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel under its own name. Returns `false` if the name is
    /// already taken; the existing channel is kept.
    pub fn register(&self, channel: ChannelRef) -> bool {
        match self.channels.entry(channel.name().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(channel);
                true
            }
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<ChannelRef> {
        self.channels.get(name).map(|entry| entry.value().clone())
    }

    /// Looks up the sending side of a channel by name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn MessageChannel>> {
        self.channels.get(name).map(|entry| entry.value().as_channel())
    }

    pub fn remove(&self, name: &str) -> Option<ChannelRef> {
        self.channels.remove(name).map(|(_, channel)| channel)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Registers a reply channel for the lifetime of the returned guard.
    pub fn register_temporary(self: &Arc<Self>, channel: Arc<ReplyChannel>) -> TemporaryChannelGuard {
        let name = channel.name().to_string();
        self.channels.insert(name.clone(), ChannelRef::Reply(channel));
        self.temporary.fetch_add(1, Ordering::Relaxed);
        TemporaryChannelGuard {
            registry: Arc::clone(self),
            name,
        }
    }

    /// Number of temporary reply channels currently registered.
    #[must_use]
    pub fn temporary_count(&self) -> usize {
        self.temporary.load(Ordering::Relaxed)
    }
}

/// Removes its temporary channel from the registry when dropped.
pub struct TemporaryChannelGuard {
    registry: Arc<ChannelRegistry>,
    name: String,
}

impl TemporaryChannelGuard {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TemporaryChannelGuard {
    fn drop(&mut self) {
        if self.registry.channels.remove(&self.name).is_some() {
            self.registry.temporary.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{DirectChannel, QueueChannel};

    #[test]
    fn register_rejects_duplicate_names() {
        let registry = ChannelRegistry::new();
        assert!(registry.register(ChannelRef::Queue(Arc::new(QueueChannel::new("a", 1)))));
        assert!(!registry.register(ChannelRef::Direct(Arc::new(DirectChannel::new("a")))));
        assert!(matches!(registry.get("a"), Some(ChannelRef::Queue(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_and_remove() {
        let registry = ChannelRegistry::new();
        registry.register(ChannelRef::Direct(Arc::new(DirectChannel::new("d"))));
        assert_eq!(registry.resolve("d").unwrap().name(), "d");
        assert!(registry.resolve("missing").is_none());
        assert!(registry.remove("d").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn temporary_channel_lives_as_long_as_guard() {
        let registry = Arc::new(ChannelRegistry::new());
        let (reply, _rx) = ReplyChannel::new();
        let guard = registry.register_temporary(reply);
        let name = guard.name().to_string();

        assert!(registry.resolve(&name).is_some());
        assert_eq!(registry.temporary_count(), 1);

        drop(guard);
        assert!(registry.resolve(&name).is_none());
        assert_eq!(registry.temporary_count(), 0);
    }

    #[test]
    fn names_are_sorted() {
        let registry = ChannelRegistry::new();
        registry.register(ChannelRef::Direct(Arc::new(DirectChannel::new("b"))));
        registry.register(ChannelRef::Direct(Arc::new(DirectChannel::new("a"))));
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
