//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a pulse is read,
//! we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When entering a reactive context (running a computed or effect), we push
//! the subscriber onto the stack. When the computation completes, we pop it.
//!
//! This design supports nested reactive contexts (e.g., a computed that reads
//! from another computed). An untracked frame (see [`untrack`]) hides the
//! running computation from reads made inside it. A scope frame (see
//! [`Owner::with`]) changes who owns new computations but not who tracks
//! reads.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::owner::Owner;
use super::subscriber::{Source, Subscriber, SubscriberId, SubscriberSet};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
enum Frame {
    /// A running effect or computed cell.
    Tracking(Rc<dyn Subscriber>),
    /// Reads register no dependencies.
    Untracked,
    /// New computations are owned by a root scope.
    Scope(Owner),
}

impl Frame {
    fn key(&self) -> Option<SubscriberId> {
        match self {
            Frame::Tracking(subscriber) => Some(subscriber.runner().key()),
            Frame::Untracked | Frame::Scope(_) => None,
        }
    }
}

/// Whatever owns computations created at this point of the stack.
pub(crate) enum Parent {
    Runner(Rc<dyn Subscriber>),
    Scope(Owner),
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
}

impl ReactiveContext {
    fn push(frame: Frame) -> Self {
        let subscriber_id = frame.key();
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(frame));
        Self { subscriber_id }
    }

    /// Enter a reactive context for the given subscriber.
    pub(crate) fn enter(subscriber: Rc<dyn Subscriber>) -> Self {
        Self::push(Frame::Tracking(subscriber))
    }

    /// Enter a frame in which reads register no dependencies.
    fn enter_untracked() -> Self {
        Self::push(Frame::Untracked)
    }

    pub(crate) fn enter_scope(owner: Owner) -> Self {
        Self::push(Frame::Scope(owner))
    }

    /// Check if a tracking computation is on top of the stack.
    pub fn is_active() -> bool {
        Self::current().is_some()
    }

    /// Get the ID of the current subscriber, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        Self::current().map(|subscriber| subscriber.runner().key())
    }

    /// Number of frames on the stack, untracked and scope frames included.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    /// The computation reads are tracked against. Scope frames are
    /// transparent; an untracked frame hides everything below it.
    pub(crate) fn current() -> Option<Rc<dyn Subscriber>> {
        CONTEXT_STACK.with(|stack| {
            for frame in stack.borrow().iter().rev() {
                match frame {
                    Frame::Tracking(subscriber) => return Some(Rc::clone(subscriber)),
                    Frame::Untracked => return None,
                    Frame::Scope(_) => {}
                }
            }
            None
        })
    }

    /// The innermost owner, looking through untracked frames.
    pub(crate) fn owner() -> Option<Parent> {
        CONTEXT_STACK.with(|stack| {
            stack.borrow().iter().rev().find_map(|frame| match frame {
                Frame::Tracking(subscriber) => Some(Parent::Runner(Rc::clone(subscriber))),
                Frame::Scope(owner) => Some(Parent::Scope(owner.clone())),
                Frame::Untracked => None,
            })
        })
    }

    /// Record that the current computation read `source`.
    ///
    /// Registers the computation in `subscribers` and the source in the
    /// computation's dependency set. Inactive computations are not recorded.
    pub(crate) fn track(source: Weak<dyn Source>, source_id: u64, subscribers: &SubscriberSet) {
        if let Some(current) = Self::current() {
            if current.runner().add_source(source_id, source) {
                subscribers.insert(&current);
            }
        }
    }

    /// Drop every frame. Outstanding guards become no-ops.
    pub(crate) fn clear() {
        let frames = CONTEXT_STACK.with(|stack| std::mem::take(&mut *stack.borrow_mut()));
        // Released outside the borrow: a frame may hold the last reference.
        drop(frames);
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        if let Some(frame) = popped {
            debug_assert_eq!(frame.key(), self.subscriber_id, "ReactiveContext mismatch");
        }
    }
}

/// Run `f` without registering any dependency for the current computation.
///
/// ```rust,ignore
/// effect(move || {
///     let tracked = a.get();
///     let ignored = untrack(|| b.get());
/// });
/// ```
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::enter_untracked();
    f()
}
