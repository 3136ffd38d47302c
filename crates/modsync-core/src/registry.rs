//! Subscription registry: many consumers, one connection.
//!
//! Each consumer declares the queue IDs it cares about for as long as it is
//! mounted. The registry keeps those declarations and recomputes the union
//! from scratch on every change, so the subscribe/unsubscribe traffic is
//! always the exact set difference between the union before and after.
//! There is no per-queue reference counter that could drift.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::model::QueueId;

/// Opaque handle for one mounted consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerId(u64);

impl ConsumerId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// How the union moved after one registry operation. Both lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnionChange {
    /// Newly claimed: send `subscribe` for exactly these.
    pub added: Vec<QueueId>,
    /// No longer claimed by anyone: send `unsubscribe` for exactly these.
    pub removed: Vec<QueueId>,
}

impl UnionChange {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    fn between(before: &BTreeSet<QueueId>, after: &BTreeSet<QueueId>) -> Self {
        Self {
            added: after.difference(before).copied().collect(),
            removed: before.difference(after).copied().collect(),
        }
    }
}

/// Live consumer declarations.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    consumers: BTreeMap<ConsumerId, BTreeSet<QueueId>>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `consumer` with its declared queues.
    ///
    /// Mounting an id that is already live replaces its declaration.
    pub fn mount(
        &mut self,
        consumer: ConsumerId,
        queues: impl IntoIterator<Item = QueueId>,
    ) -> UnionChange {
        let declared: BTreeSet<QueueId> = queues.into_iter().collect();
        self.apply(|consumers| {
            consumers.insert(consumer, declared);
        })
    }

    /// Replace a live consumer's declaration. Unknown ids change nothing.
    pub fn update(
        &mut self,
        consumer: ConsumerId,
        queues: impl IntoIterator<Item = QueueId>,
    ) -> UnionChange {
        if !self.consumers.contains_key(&consumer) {
            return UnionChange::default();
        }
        self.mount(consumer, queues)
    }

    /// Drop `consumer` and everything only it was claiming.
    pub fn unmount(&mut self, consumer: ConsumerId) -> UnionChange {
        self.apply(|consumers| {
            consumers.remove(&consumer);
        })
    }

    /// Union of every live declaration.
    #[must_use]
    pub fn union(&self) -> BTreeSet<QueueId> {
        self.consumers.values().flatten().copied().collect()
    }

    /// The declaration of one consumer, if mounted.
    #[must_use]
    pub fn declared(&self, consumer: ConsumerId) -> Option<&BTreeSet<QueueId>> {
        self.consumers.get(&consumer)
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    fn apply(&mut self, mutate: impl FnOnce(&mut BTreeMap<ConsumerId, BTreeSet<QueueId>>)) -> UnionChange {
        let before = self.union();
        mutate(&mut self.consumers);
        let after = self.union();
        UnionChange::between(&before, &after)
    }
}
