//! Pulse Implementation
//!
//! A Pulse is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Pulses Work
//!
//! 1. When a pulse is read within a reactive context (computed/effect), the
//!    pulse registers that context as a subscriber.
//!
//! 2. When a pulse's value changes, all subscribers are notified, in the order
//!    they subscribed.
//!
//! 3. Notifications trigger re-execution of dependent computations, or queue
//!    them if a batch is open.
//!
//! A write that the pulse's equality function considers unchanged notifies
//! nobody.
//!
//! # Memory Layout
//!
//! Each pulse consists of:
//! - A unique ID (8 bytes)
//! - The value (size depends on type, stored behind Rc)
//! - An ordered set of subscribers (grows with number of dependents)

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use super::context::ReactiveContext;
use super::runtime::Runtime;
use super::subscriber::{Source, SubscriberId, SubscriberSet};

/// Counter for generating unique source IDs, shared with computed cells.
static SOURCE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique source ID.
pub(crate) fn next_source_id() -> u64 {
    SOURCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

type Equals<T> = Box<dyn Fn(&T, &T) -> bool>;

struct PulseInner<T> {
    id: u64,
    value: RefCell<T>,
    equals: Equals<T>,
    subscribers: SubscriberSet,
}

impl<T: 'static> Source for PulseInner<T> {
    fn unsubscribe(&self, subscriber: SubscriberId) {
        self.subscribers.remove(subscriber);
    }

    fn refresh(&self) {}
}

/// A reactive cell holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let count = pulse(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// ```
pub struct Pulse<T: 'static> {
    inner: Rc<PulseInner<T>>,
}

impl<T: PartialEq + 'static> Pulse<T> {
    /// Create a new pulse compared with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_equals(value, |a, b| a == b)
    }
}

impl<T: 'static> Pulse<T> {
    /// Create a pulse whose writes are compared with `equals`.
    ///
    /// Pass `|_, _| false` to notify on every write.
    pub fn with_equals(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            inner: Rc::new(PulseInner {
                id: next_source_id(),
                value: RefCell::new(value),
                equals: Box::new(equals),
                subscribers: SubscriberSet::new(),
            }),
        }
    }

    /// Get the pulse's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    fn track(&self) {
        let weak: Weak<PulseInner<T>> = Rc::downgrade(&self.inner);
        ReactiveContext::track(weak, self.inner.id, &self.inner.subscribers);
    }

    /// Borrow the value, registering a dependency like [`Pulse::get`].
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        self.with_untracked(f)
    }

    /// Borrow the value without registering a dependency.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Write `value` and notify subscribers if it differs from the current
    /// value.
    pub fn set(&self, value: T) {
        {
            let current = self.inner.value.borrow();
            if (self.inner.equals)(&current, &value) {
                return;
            }
        }
        *self.inner.value.borrow_mut() = value;

        Runtime::notify(self.inner.subscribers.snapshot());
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

impl<T: Clone + 'static> Pulse<T> {
    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a subscriber.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    pub fn peek(&self) -> T {
        self.with_untracked(T::clone)
    }

    /// Update the value using a function of the current value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = self.with_untracked(f);
        self.set(next);
    }
}

impl<T: 'static> Clone for Pulse<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Pulse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pulse")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Create a pulse compared with `PartialEq`. See [`Pulse::new`].
pub fn pulse<T: PartialEq + 'static>(value: T) -> Pulse<T> {
    Pulse::new(value)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
