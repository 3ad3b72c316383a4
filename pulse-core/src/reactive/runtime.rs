//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects pulses, computed
//! cells, and effects. It propagates change marks through the subscriber graph
//! and decides when queued computations run.
//!
//! # How It Works
//!
//! 1. When a pulse's value changes, its direct subscribers are marked
//!    `Dirty`.
//!
//! 2. Marks propagate: every computed cell that goes from clean to marked
//!    passes `MaybeDirty` on to its own subscribers.
//!
//! 3. Eager subscribers (effects and eager computed cells) reached by a mark
//!    are queued, in subscription order, each at most once:
//!    a. Outside a batch the queue runs immediately on the writer's stack.
//!    b. Inside a batch the queue is merged into the pending set and runs
//!       when the outermost batch exits.
//!
//! 4. A queued subscriber that is only `MaybeDirty` first refreshes its
//!    upstream computed cells and runs only if one of them actually changed.
//!
//! # Thread Safety
//!
//! All state is thread-local. Each thread owns an independent reactive graph.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexMap;

use super::context::ReactiveContext;
use super::error;
use super::subscriber::{NodeState, Subscriber, SubscriberId};

#[derive(Default)]
struct BatchState {
    depth: usize,
    pending: IndexMap<SubscriberId, Rc<dyn Subscriber>>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// The per-thread reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Notify the direct subscribers of a changed source.
    pub(crate) fn notify(subscribers: Vec<Rc<dyn Subscriber>>) {
        if subscribers.is_empty() {
            return;
        }

        let mut queue = Vec::new();
        for subscriber in &subscribers {
            Self::mark(subscriber, NodeState::Dirty, &mut queue);
        }
        Self::dispatch(queue);
    }

    fn mark(
        subscriber: &Rc<dyn Subscriber>,
        state: NodeState,
        queue: &mut Vec<Rc<dyn Subscriber>>,
    ) {
        let runner = subscriber.runner();
        if !runner.is_active() {
            return;
        }

        // Already marked nodes are already queued and have already
        // propagated to their subscribers.
        if runner.mark(state) != NodeState::Clean {
            return;
        }

        if subscriber.is_eager() {
            queue.push(Rc::clone(subscriber));
        }
        for downstream in subscriber.downstream() {
            Self::mark(&downstream, NodeState::MaybeDirty, queue);
        }
    }

    fn dispatch(queue: Vec<Rc<dyn Subscriber>>) {
        if queue.is_empty() {
            return;
        }

        let queue = BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            if batch.depth == 0 {
                return Some(queue);
            }
            for subscriber in queue {
                batch
                    .pending
                    .entry(subscriber.runner().key())
                    .or_insert(subscriber);
            }
            None
        });

        if let Some(queue) = queue {
            for subscriber in queue {
                subscriber.update_if_necessary();
            }
        }
    }

    /// Run every pending subscriber once, first enqueued first.
    fn flush() {
        let pending = BATCH.with(|batch| std::mem::take(&mut batch.borrow_mut().pending));
        if pending.is_empty() {
            return;
        }

        tracing::debug!(pending = pending.len(), "flushing batch");
        for subscriber in pending.into_values() {
            if subscriber.runner().is_active() {
                subscriber.update_if_necessary();
            }
        }
    }

    /// Check if a batch is open on this thread.
    pub fn is_batching() -> bool {
        BATCH.with(|batch| batch.borrow().depth > 0)
    }

    /// Number of subscribers waiting for the outermost batch to exit.
    pub fn pending_count() -> usize {
        BATCH.with(|batch| batch.borrow().pending.len())
    }
}

/// Run `f` as one transaction.
///
/// Writes inside `f` queue their subscribers instead of running them. When
/// the outermost batch exits, each queued subscriber runs once. Nested batches
/// only adjust the depth. If `f` panics, the queue is still flushed before the
/// panic resumes.
///
/// ```rust,ignore
/// batch(|| {
///     x.set(1);
///     y.set(2);
/// }); // an effect reading x and y runs once here
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    BATCH.with(|batch| batch.borrow_mut().depth += 1);

    let result = panic::catch_unwind(AssertUnwindSafe(f));

    let outermost = BATCH.with(|batch| {
        let mut batch = batch.borrow_mut();
        batch.depth = batch.depth.saturating_sub(1);
        batch.depth == 0
    });
    if outermost {
        Runtime::flush();
    }

    match result {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Reset all reactive state of the current thread.
///
/// Clears the context stack, the global error handler, and any open batch
/// with its pending subscribers. Meant for isolating tests.
pub fn reset_context() {
    ReactiveContext::clear();
    error::clear_global_handler();
    let pending = BATCH.with(|batch| std::mem::take(&mut *batch.borrow_mut()));
    drop(pending);
    tracing::trace!("reactive context reset");
}
