//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computed Cells Work
//!
//! 1. A lazy cell runs its derivation on first access and caches the result.
//!    An eager cell runs it at creation.
//!
//! 2. When accessed again, if no dependencies have changed, the cached value
//!    is returned without re-tracking.
//!
//! 3. When a direct dependency changes, the cell is marked `Dirty` and its own
//!    subscribers are marked `MaybeDirty`.
//!
//! 4. On next access, a `Dirty` cell recomputes. A `MaybeDirty` cell first
//!    refreshes its upstream computed cells and recomputes only if one of them
//!    produced a different value.
//!
//! 5. After recomputing, the new value is compared with the cached one.
//!    Only a real change promotes downstream subscribers from `MaybeDirty` to
//!    `Dirty`; an equal result stops the propagation there.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A pulse changes
//! - 10 computed cells depend on it
//! - Only the cells actually accessed will recompute
//! - Cells that are never read stay dirty (no wasted work)
//!
//! An eager cell trades that for being recomputed as soon as a dependency
//! changes, even if nobody reads it.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use super::context::ReactiveContext;
use super::effect::Runner;
use super::error::{catch, EffectError, ErrorHandler};
use super::owner;
use super::signal::next_source_id;
use super::subscriber::{NodeState, Source, Subscriber, SubscriberId, SubscriberSet};

/// When a computed cell re-evaluates after a dependency change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Evaluation {
    /// On the next read.
    #[default]
    Lazy,
    /// Immediately, like an effect.
    Eager,
}

/// Options accepted by [`computed_with`].
#[derive(Clone, Default)]
pub struct ComputedOptions {
    evaluation: Evaluation,
    id: Option<String>,
    on_error: Option<ErrorHandler>,
}

impl ComputedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` (the default) defers recomputation to the next read.
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.evaluation = if lazy { Evaluation::Lazy } else { Evaluation::Eager };
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Handle derivation failures locally.
    pub fn on_error(mut self, handler: impl Fn(&EffectError) + 'static) -> Self {
        self.on_error = Some(Rc::new(handler));
        self
    }
}

impl Debug for ComputedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedOptions")
            .field("evaluation", &self.evaluation)
            .field("id", &self.id)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

struct ComputedInner<T> {
    source_id: u64,
    runner: Runner,
    compute: Box<dyn Fn() -> T>,
    /// The cached value (None if never computed).
    value: RefCell<Option<T>>,
    evaluation: Evaluation,
    /// Subscribers that read this cell.
    subscribers: SubscriberSet,
    this: Weak<ComputedInner<T>>,
}

impl<T: PartialEq + 'static> ComputedInner<T> {
    fn recompute(&self) {
        let Some(me) = self.this.upgrade() else {
            return;
        };
        let Some(next) = self.runner.run(me, || catch(|| (self.compute)())) else {
            return;
        };

        let changed = self.value.borrow().as_ref() != Some(&next);
        if changed {
            *self.value.borrow_mut() = Some(next);
            for subscriber in self.subscribers.snapshot() {
                subscriber.runner().promote();
            }
        }
    }
}

impl<T: PartialEq + 'static> Subscriber for ComputedInner<T> {
    fn runner(&self) -> &Runner {
        &self.runner
    }

    fn is_eager(&self) -> bool {
        self.evaluation == Evaluation::Eager
    }

    fn update_if_necessary(&self) {
        if self.runner.needs_run() {
            self.recompute();
        }
    }

    fn downstream(&self) -> Vec<Rc<dyn Subscriber>> {
        self.subscribers.snapshot()
    }
}

impl<T: PartialEq + 'static> Source for ComputedInner<T> {
    fn unsubscribe(&self, subscriber: SubscriberId) {
        self.subscribers.remove(subscriber);
    }

    fn refresh(&self) {
        self.update_if_necessary();
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. The PartialEq bound is needed to
///   detect when the computed value actually changed (a derivation might
///   return the same value even if inputs changed).
///
/// # Example
///
/// ```rust,ignore
/// let count = pulse(2);
/// let doubled = computed({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T: PartialEq + 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: PartialEq + 'static> Computed<T> {
    /// Create a lazy computed cell.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self::with_options(compute, ComputedOptions::default())
    }

    pub fn with_options(compute: impl Fn() -> T + 'static, options: ComputedOptions) -> Self {
        let inner = Rc::new_cyclic(|this| ComputedInner {
            source_id: next_source_id(),
            runner: Runner::new(options.id, "computed", options.on_error),
            compute: Box::new(compute),
            value: RefCell::new(None),
            evaluation: options.evaluation,
            subscribers: SubscriberSet::new(),
            this: this.clone(),
        });
        owner::adopt(inner.clone());
        if inner.evaluation == Evaluation::Eager {
            inner.update_if_necessary();
        }
        Self { inner }
    }

    /// The cell's identifier, caller supplied or generated.
    pub fn id(&self) -> &str {
        self.inner.runner.id()
    }

    pub fn evaluation(&self) -> Evaluation {
        self.inner.evaluation
    }

    /// Get the current dirty state.
    pub fn state(&self) -> NodeState {
        self.inner.runner.state()
    }

    fn track(&self) {
        let weak: Weak<ComputedInner<T>> = Rc::downgrade(&self.inner);
        ReactiveContext::track(weak, self.inner.source_id, &self.inner.subscribers);
    }

    /// Borrow the up-to-date value, registering a dependency.
    ///
    /// # Panics
    ///
    /// Panics if the derivation has never completed successfully. Use
    /// [`Computed::try_get`] to handle that case.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.update_if_necessary();
        self.track();
        self.with_cached(f)
    }

    /// Borrow the up-to-date value without registering a dependency.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.update_if_necessary();
        self.with_cached(f)
    }

    fn with_cached<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.inner.value.borrow();
        match value.as_ref() {
            Some(value) => f(value),
            None => panic!(
                "computed `{}` has no value: its derivation never completed",
                self.id()
            ),
        }
    }

    /// Check if the cell has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Get the number of dependents.
    pub fn dependent_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Number of sources read during the most recent derivation.
    pub fn dependency_count(&self) -> usize {
        self.inner.runner.dependency_count()
    }

    /// Number of times the derivation has run.
    pub fn run_count(&self) -> usize {
        self.inner.runner.run_count()
    }

    /// Stop tracking. The last value stays readable.
    pub fn dispose(&self) {
        self.inner.runner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        !self.inner.runner.is_active()
    }
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Get the current value, recomputing if necessary.
    ///
    /// This is the main entry point for reading a computed cell.
    ///
    /// # Panics
    ///
    /// Panics if the derivation has never completed successfully. The panic
    /// happens in the caller, so inside a [`batch`](super::batch) body it
    /// unwinds through that batch (which still flushes). Read derivations
    /// that can fail with [`Computed::try_get`].
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    pub fn peek(&self) -> T {
        self.with_untracked(T::clone)
    }

    /// Like [`Computed::get`], but `None` when the derivation never produced
    /// a value.
    pub fn try_get(&self) -> Option<T> {
        self.inner.update_if_necessary();
        self.track();
        self.inner.value.borrow().clone()
    }
}

impl<T: PartialEq + 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: PartialEq + Debug + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("value", &*self.inner.value.borrow())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

/// Create a lazy computed cell. See [`Computed::new`].
///
/// A failing derivation is reported through the error channel and keeps the
/// previous value. Until a first value exists, [`Computed::get`] panics and
/// [`Computed::try_get`] returns `None`.
pub fn computed<T: PartialEq + 'static>(compute: impl Fn() -> T + 'static) -> Computed<T> {
    Computed::new(compute)
}

/// Create a computed cell with explicit options.
pub fn computed_with<T: PartialEq + 'static>(
    compute: impl Fn() -> T + 'static,
    options: ComputedOptions,
) -> Computed<T> {
    Computed::with_options(compute, options)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
