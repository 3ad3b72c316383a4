//! Subscriber types for the reactive system.
//!
//! A Subscriber represents any computation that depends on reactive values.
//! This includes computed cells and effects.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::effect::Runner;

/// Unique identifier for a subscriber.
///
/// Each subscriber (computed or effect) gets a unique ID when created. This
/// ID is used to deduplicate subscriptions and batch queue entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Freshness of a subscriber relative to its sources.
///
/// Ordered so that a stronger mark never gets downgraded by a weaker one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    /// Up to date with every source.
    Clean,

    /// An upstream computed might have changed. Its sources have to be
    /// refreshed before we know whether to run.
    MaybeDirty,

    /// A direct source changed. The next refresh runs the computation.
    Dirty,
}

/// A computation that can be subscribed to reactive sources.
///
/// Implemented by effects and computed cells. The shared bookkeeping lives in
/// [`Runner`]; implementors only decide what "bringing themselves up to date"
/// means and who sits downstream of them.
pub(crate) trait Subscriber {
    /// The shared runner core.
    fn runner(&self) -> &Runner;

    /// Eager subscribers are queued when marked; lazy ones wait for a read.
    fn is_eager(&self) -> bool;

    /// Bring the subscriber up to date, running its body if a source changed.
    fn update_if_necessary(&self);

    /// Subscribers of this subscriber. Empty for effects.
    fn downstream(&self) -> Vec<Rc<dyn Subscriber>> {
        Vec::new()
    }
}

/// A reactive value that subscribers can read from.
pub(crate) trait Source {
    /// Remove a subscriber from this source.
    fn unsubscribe(&self, subscriber: SubscriberId);

    /// Bring the source up to date. A no-op for plain pulses.
    fn refresh(&self);
}

/// Insertion-ordered set of subscribers, keyed by id.
///
/// Entries are weak: a source never keeps its readers alive. Readers own
/// their sources through the closures they capture, so strong links only run
/// upstream.
#[derive(Default)]
pub(crate) struct SubscriberSet {
    entries: RefCell<IndexMap<SubscriberId, Weak<dyn Subscriber>>>,
}

impl SubscriberSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a subscriber. Re-inserting keeps its original position.
    pub(crate) fn insert(&self, subscriber: &Rc<dyn Subscriber>) {
        let id = subscriber.runner().key();
        self.entries
            .borrow_mut()
            .entry(id)
            .or_insert_with(|| Rc::downgrade(subscriber));
    }

    pub(crate) fn remove(&self, id: SubscriberId) {
        self.entries.borrow_mut().shift_remove(&id);
    }

    /// Copy the live subscribers out so that notification can mutate the set
    /// while iterating.
    pub(crate) fn snapshot(&self) -> Vec<Rc<dyn Subscriber>> {
        self.entries.borrow().values().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .borrow()
            .values()
            .filter(|subscriber| subscriber.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn node_state_ordering() {
        assert!(NodeState::Clean < NodeState::MaybeDirty);
        assert!(NodeState::MaybeDirty < NodeState::Dirty);
        assert_eq!(NodeState::Dirty.max(NodeState::MaybeDirty), NodeState::Dirty);
    }
}
