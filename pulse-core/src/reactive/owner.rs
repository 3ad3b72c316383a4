//! Ownership
//!
//! Every effect and computed cell has at most one owner, which keeps it
//! alive and disposes it.
//!
//! # How Ownership Works
//!
//! 1. A computation created while another one is running is adopted by the
//!    running one. Before the parent runs again, and when it is disposed, its
//!    children are disposed and released. An effect that creates effects
//!    therefore never accumulates stale children across runs.
//!
//! 2. A computation created inside [`Owner::with`] is adopted by that root
//!    scope. Disposing the owner, or dropping its last handle, disposes
//!    everything it owns and runs the cleanups registered in it.
//!
//! 3. A computation created with no owner lives as long as its handles do.
//!    Dropping the last handle disposes it.
//!
//! Pulses and computed cells only hold weak links to their subscribers, so
//! ownership is the only thing keeping a subscriber alive.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use super::context::{untrack, Parent, ReactiveContext};
use super::error::{self, catch, Cause, EffectError, EffectErrorKind};
use super::subscriber::{Subscriber, SubscriberId};

pub(crate) type Cleanup = Box<dyn FnOnce()>;

/// Children and cleanups collected by a runner or a root owner.
#[derive(Default)]
pub(crate) struct Scope {
    children: RefCell<Vec<Rc<dyn Subscriber>>>,
    cleanups: RefCell<SmallVec<[Cleanup; 2]>>,
}

impl Scope {
    pub(crate) fn adopt(&self, child: Rc<dyn Subscriber>) {
        self.children.borrow_mut().push(child);
    }

    pub(crate) fn push_cleanup(&self, cleanup: Cleanup) {
        self.cleanups.borrow_mut().push(cleanup);
    }

    pub(crate) fn child_count(&self) -> usize {
        self.children.borrow().len()
    }

    /// Dispose every child in adoption order, then release them.
    pub(crate) fn dispose_children(&self) {
        let children = std::mem::take(&mut *self.children.borrow_mut());
        for child in &children {
            child.runner().dispose();
        }
    }

    /// Run pending cleanups in reverse registration order.
    pub(crate) fn run_cleanups(&self, mut on_failure: impl FnMut(Cause)) {
        let pending = std::mem::take(&mut *self.cleanups.borrow_mut());
        for cleanup in pending.into_iter().rev() {
            if let Err(cause) = catch(cleanup) {
                on_failure(cause);
            }
        }
    }
}

struct OwnerInner {
    id: String,
    scope: Scope,
    active: Cell<bool>,
}

impl OwnerInner {
    fn dispose(&self) {
        if !self.active.replace(false) {
            return;
        }
        tracing::trace!(owner = %self.id, children = self.scope.child_count(), "owner disposed");
        self.scope.dispose_children();
        self.scope.run_cleanups(|cause| self.report(cause));
    }

    fn report(&self, cause: Cause) {
        let error = EffectError::new(&self.id, 0, EffectErrorKind::Cleanup(cause));
        untrack(|| error::report(error, None));
    }
}

impl Drop for OwnerInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A root ownership scope.
///
/// Effects and computed cells created inside [`Owner::with`] belong to the
/// owner and are disposed with it. Clones share the same scope; the scope is
/// disposed when [`Owner::dispose`] is called or the last clone is dropped.
///
/// # Example
///
/// ```rust,ignore
/// let owner = Owner::new();
/// owner.with(|| {
///     let _logger = effect(move || println!("{}", count.get()));
/// });
///
/// owner.dispose(); // the logger stops here
/// ```
#[derive(Clone)]
pub struct Owner {
    inner: Rc<OwnerInner>,
}

impl Owner {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(OwnerInner {
                id: format!("owner-{}", SubscriberId::new().raw()),
                scope: Scope::default(),
                active: Cell::new(true),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Run `f` with this owner as the owner of new computations.
    ///
    /// Dependency tracking is unaffected: reads inside `f` still register
    /// against the running computation, if any.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ctx = ReactiveContext::enter_scope(self.clone());
        f()
    }

    /// Dispose every owned computation and run the owner's cleanups.
    /// Calling it again does nothing.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        !self.inner.active.get()
    }

    /// Number of computations currently owned.
    pub fn child_count(&self) -> usize {
        self.inner.scope.child_count()
    }

    fn adopt(&self, child: Rc<dyn Subscriber>) {
        if self.is_disposed() {
            child.runner().dispose();
        } else {
            self.inner.scope.adopt(child);
        }
    }

    fn add_cleanup(&self, cleanup: Cleanup) {
        if self.is_disposed() {
            if let Err(cause) = catch(cleanup) {
                self.inner.report(cause);
            }
        } else {
            self.inner.scope.push_cleanup(cleanup);
        }
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("id", &self.id())
            .field("child_count", &self.child_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Hand a new computation to the current owner, if there is one.
pub(crate) fn adopt(child: Rc<dyn Subscriber>) {
    match ReactiveContext::owner() {
        Some(Parent::Runner(parent)) => parent.runner().adopt(child),
        Some(Parent::Scope(owner)) => owner.adopt(child),
        None => {}
    }
}

/// Register `cleanup` with the current owner.
///
/// Inside an effect or computed cell it runs before the next run of that
/// computation, or when it is disposed. Inside [`Owner::with`] it runs when
/// the owner is disposed. Anywhere else this does nothing and logs a warning.
pub fn on_cleanup(cleanup: impl FnOnce() + 'static) {
    match ReactiveContext::owner() {
        Some(Parent::Runner(owner)) => owner.runner().add_cleanup(Box::new(cleanup)),
        Some(Parent::Scope(owner)) => owner.add_cleanup(Box::new(cleanup)),
        None => tracing::warn!("on_cleanup called outside of a tracked function; ignored"),
    }
}
