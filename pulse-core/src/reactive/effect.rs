//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is re-run synchronously, or
//!    queued if a batch is open.
//!
//! 3. Before re-running, the effect runs the cleanups registered by the
//!    previous run, clears its old dependencies, and tracks new ones during
//!    execution.
//!
//! # Differences from Computed
//!
//! - Computed cells return a value; effects do not.
//! - Computed cells are lazy by default; effects are always eager.
//!
//! # Cleanup
//!
//! A tracked function can register callbacks with
//! [`on_cleanup`](super::on_cleanup). They run in reverse registration order
//! before the next run and when the effect is disposed. This is useful for
//! releasing resources like event listeners or timers.
//!
//! # Lifetime
//!
//! An effect created inside another effect or computed cell is owned by it
//! and disposed before the owner's next run. An effect created inside
//! [`Owner::with`](super::Owner::with) is disposed with that owner. Any other
//! effect is disposed when its last handle is dropped.
//!
//! # The runner core
//!
//! `Runner` holds the bookkeeping shared by effects and computed cells:
//! dependency set, owned children and cleanups, node state, re-entrancy
//! counter and error routing. The run protocol lives in `Runner::run`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::context::{untrack, ReactiveContext};
use super::error::{
    self, catch, BoxError, Cause, EffectError, EffectErrorKind, EffectOutcome, ErrorHandler,
};
use super::owner::{self, Cleanup, Scope};
use super::subscriber::{NodeState, Source, Subscriber, SubscriberId};
use crate::config::ReactiveConfig;

/// Shared state of a tracked computation.
pub(crate) struct Runner {
    key: SubscriberId,
    id: String,
    state: Cell<NodeState>,
    /// Sources read during the most recent run, keyed by source id.
    sources: RefCell<IndexMap<u64, Weak<dyn Source>>>,
    /// Computations created during the most recent run, and its cleanups.
    scope: Scope,
    active: Cell<bool>,
    /// Nested runs currently on the stack.
    depth: Cell<u32>,
    runs: Cell<usize>,
    on_error: Option<ErrorHandler>,
}

impl Runner {
    pub(crate) fn new(id: Option<String>, prefix: &str, on_error: Option<ErrorHandler>) -> Self {
        let key = SubscriberId::new();
        Self {
            key,
            id: id.unwrap_or_else(|| format!("{prefix}-{}", key.raw())),
            state: Cell::new(NodeState::Dirty),
            sources: RefCell::new(IndexMap::new()),
            scope: Scope::default(),
            active: Cell::new(true),
            depth: Cell::new(0),
            runs: Cell::new(0),
            on_error,
        }
    }

    pub(crate) fn key(&self) -> SubscriberId {
        self.key
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn state(&self) -> NodeState {
        self.state.get()
    }

    /// Raise the state to at least `state`. Returns the previous state.
    pub(crate) fn mark(&self, state: NodeState) -> NodeState {
        let previous = self.state.get();
        self.state.set(previous.max(state));
        previous
    }

    /// Promote a pending check to a definite re-run.
    pub(crate) fn promote(&self) {
        if self.state.get() == NodeState::MaybeDirty {
            self.state.set(NodeState::Dirty);
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.sources.borrow().len()
    }

    pub(crate) fn run_count(&self) -> usize {
        self.runs.get()
    }

    /// Record a source read. Returns `false` once the runner is disposed.
    pub(crate) fn add_source(&self, source_id: u64, source: Weak<dyn Source>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.sources.borrow_mut().entry(source_id).or_insert(source);
        true
    }

    pub(crate) fn add_cleanup(&self, cleanup: Cleanup) {
        if self.is_active() {
            self.scope.push_cleanup(cleanup);
        } else {
            // Nothing will ever run it later.
            if let Err(cause) = catch(cleanup) {
                self.report(EffectErrorKind::Cleanup(cause));
            }
        }
    }

    /// Take ownership of a computation created during this run.
    pub(crate) fn adopt(&self, child: Rc<dyn Subscriber>) {
        if self.is_active() {
            self.scope.adopt(child);
        } else {
            child.runner().dispose();
        }
    }

    pub(crate) fn child_count(&self) -> usize {
        self.scope.child_count()
    }

    /// Decide whether the body has to run, refreshing upstream computed
    /// cells when the state is only `MaybeDirty`.
    pub(crate) fn needs_run(&self) -> bool {
        if !self.is_active() {
            return false;
        }

        if self.state.get() == NodeState::MaybeDirty {
            let sources: Vec<Rc<dyn Source>> = self
                .sources
                .borrow()
                .values()
                .filter_map(Weak::upgrade)
                .collect();
            for source in sources {
                source.refresh();
                if self.state.get() == NodeState::Dirty {
                    break;
                }
            }
        }

        if self.state.get() == NodeState::Dirty {
            true
        } else {
            self.state.set(NodeState::Clean);
            false
        }
    }

    /// Execute `body` under the run protocol.
    ///
    /// Returns `None` when the run was abandoned or the body failed; the
    /// failure has already been reported.
    pub(crate) fn run<R>(
        &self,
        me: Rc<dyn Subscriber>,
        body: impl FnOnce() -> Result<R, Cause>,
    ) -> Option<R> {
        if !self.is_active() {
            return None;
        }

        let limit = ReactiveConfig::current().cycle_limit;
        let _reentry = Reentry::enter(&self.depth);
        // Checked before cleanups and unsubscription: an abandoned trigger
        // must leave the runner subscribed to what its last run read.
        if self.depth.get() > limit {
            self.state.set(NodeState::Clean);
            self.report(EffectErrorKind::Cycle { limit });
            return None;
        }

        self.scope.dispose_children();
        self.run_cleanups();
        // A cleanup may have disposed us.
        if !self.is_active() {
            return None;
        }
        self.clear_sources();
        self.state.set(NodeState::Clean);

        tracing::trace!(effect = %self.id, depth = self.depth.get(), "running");
        let result = {
            let _ctx = ReactiveContext::enter(me);
            body()
        };
        self.runs.set(self.runs.get() + 1);

        match result {
            Ok(value) => Some(value),
            Err(cause) => {
                self.report(EffectErrorKind::Execution(cause));
                None
            }
        }
    }

    /// Dispose owned computations, run final cleanups, unsubscribe everywhere
    /// and deactivate.
    pub(crate) fn dispose(&self) {
        if !self.active.replace(false) {
            return;
        }
        tracing::trace!(effect = %self.id, "disposed");
        self.scope.dispose_children();
        self.run_cleanups();
        self.clear_sources();
        self.state.set(NodeState::Clean);
    }

    fn run_cleanups(&self) {
        self.scope
            .run_cleanups(|cause| self.report(EffectErrorKind::Cleanup(cause)));
    }

    fn clear_sources(&self) {
        let sources = std::mem::take(&mut *self.sources.borrow_mut());
        for source in sources.values().filter_map(Weak::upgrade) {
            source.unsubscribe(self.key);
        }
    }

    pub(crate) fn report(&self, kind: EffectErrorKind) {
        let error = EffectError::new(&self.id, self.dependency_count(), kind);
        untrack(|| error::report(error, self.on_error.as_ref()));
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Counts a run on the re-entrancy counter for as long as it is alive.
struct Reentry<'a> {
    depth: &'a Cell<u32>,
}

impl<'a> Reentry<'a> {
    fn enter(depth: &'a Cell<u32>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for Reentry<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

// ----------------------------------------------------------------------------
// Effect
// ----------------------------------------------------------------------------

/// Options accepted by [`effect_with`].
#[derive(Clone, Default)]
pub struct EffectOptions {
    id: Option<String>,
    on_error: Option<ErrorHandler>,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `id` instead of a generated identifier.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Handle this effect's errors locally. The global handler is skipped.
    pub fn on_error(mut self, handler: impl Fn(&EffectError) + 'static) -> Self {
        self.on_error = Some(Rc::new(handler));
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("id", &self.id)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

struct EffectInner {
    runner: Runner,
    body: Box<dyn Fn() -> Result<(), BoxError>>,
    this: Weak<EffectInner>,
}

impl EffectInner {
    fn execute(&self) {
        let Some(me) = self.this.upgrade() else {
            return;
        };
        self.runner.run(me, || {
            catch(|| (self.body)()).and_then(|outcome| outcome.map_err(Cause::Error))
        });
    }
}

impl Subscriber for EffectInner {
    fn runner(&self) -> &Runner {
        &self.runner
    }

    fn is_eager(&self) -> bool {
        true
    }

    fn update_if_necessary(&self) {
        if self.runner.needs_run() {
            self.execute();
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// The handle doubles as the effect's disposer. An effect without an owner
/// is disposed when its last handle is dropped; an owned effect lives until
/// its owner disposes it or [`Effect::dispose`] is called.
///
/// # Example
///
/// ```rust,ignore
/// let count = pulse(0);
///
/// let handle = effect({
///     let count = count.clone();
///     move || println!("Count is: {}", count.get())
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// handle.dispose();
/// ```
#[derive(Clone)]
#[must_use = "an effect without an owner is disposed when its handle is dropped"]
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Create an effect and run it immediately.
    pub fn new<F, R>(run: F) -> Self
    where
        F: Fn() -> R + 'static,
        R: EffectOutcome,
    {
        Self::with_options(run, EffectOptions::default())
    }

    pub fn with_options<F, R>(run: F, options: EffectOptions) -> Self
    where
        F: Fn() -> R + 'static,
        R: EffectOutcome,
    {
        let inner = Rc::new_cyclic(|this| EffectInner {
            runner: Runner::new(options.id, "effect", options.on_error),
            body: Box::new(move || run().into_outcome()),
            this: this.clone(),
        });
        owner::adopt(inner.clone());
        inner.update_if_necessary();
        Self { inner }
    }

    /// The effect's identifier, caller supplied or generated.
    pub fn id(&self) -> &str {
        self.inner.runner.id()
    }

    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.runner.key()
    }

    /// Stop the effect. Runs final cleanups and unsubscribes from every
    /// source. Calling it again does nothing.
    pub fn dispose(&self) {
        self.inner.runner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        !self.inner.runner.is_active()
    }

    /// Number of times the body has run.
    pub fn run_count(&self) -> usize {
        self.inner.runner.run_count()
    }

    /// Number of sources read during the most recent run.
    pub fn dependency_count(&self) -> usize {
        self.inner.runner.dependency_count()
    }

    /// Number of effects and computed cells created by the most recent run.
    pub fn child_count(&self) -> usize {
        self.inner.runner.child_count()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Create an effect with default options. See [`Effect::new`].
pub fn effect<F, R>(run: F) -> Effect
where
    F: Fn() -> R + 'static,
    R: EffectOutcome,
{
    Effect::new(run)
}

/// Create an effect with explicit options.
pub fn effect_with<F, R>(run: F, options: EffectOptions) -> Effect
where
    F: Fn() -> R + 'static,
    R: EffectOutcome,
{
    Effect::with_options(run, options)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{batch, on_cleanup, on_effect_error, pulse, reset_context, ErrorPhase};

    fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let count = Rc::new(Cell::new(0));
        (count.clone(), count)
    }

    #[test]
    fn effect_runs_on_creation() {
        reset_context();
        let (runs, runs_clone) = counter();

        let effect = effect(move || runs_clone.set(runs_clone.get() + 1));

        assert_eq!(runs.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        reset_context();
        let source = pulse(1);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (source_clone, seen_clone) = (source.clone(), seen.clone());
        let _effect = effect(move || seen_clone.borrow_mut().push(source_clone.get()));

        source.set(1);
        source.set(2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn generated_and_custom_ids() {
        reset_context();
        let generated = effect(|| {});
        assert!(generated.id().starts_with("effect-"));

        let named = effect_with(|| {}, EffectOptions::new().id("sync-title"));
        assert_eq!(named.id(), "sync-title");
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        reset_context();
        let source = pulse(0);
        let (runs, runs_clone) = counter();

        let source_clone = source.clone();
        let effect = effect(move || {
            source_clone.get();
            runs_clone.set(runs_clone.get() + 1);
        });
        assert_eq!(source.subscriber_count(), 1);

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(source.subscriber_count(), 0);

        source.set(1);
        assert_eq!(runs.get(), 1);

        // Double disposal is a no-op
        effect.dispose();
        assert!(effect.is_disposed());
    }

    #[test]
    fn cleanups_run_in_reverse_before_next_run() {
        reset_context();
        let source = pulse(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let (source_clone, log_clone) = (source.clone(), log.clone());
        let _effect = effect(move || {
            let run = source_clone.get();
            log_clone.borrow_mut().push(format!("run {run}"));
            let first = log_clone.clone();
            on_cleanup(move || first.borrow_mut().push(format!("first {run}")));
            let second = log_clone.clone();
            on_cleanup(move || second.borrow_mut().push(format!("second {run}")));
        });

        source.set(1);
        assert_eq!(
            *log.borrow(),
            vec!["run 0", "second 0", "first 0", "run 1"]
        );
    }

    #[test]
    fn dispose_runs_final_cleanups() {
        reset_context();
        let (cleaned, cleaned_clone) = counter();

        let effect = effect(move || {
            let cleaned_clone = cleaned_clone.clone();
            on_cleanup(move || cleaned_clone.set(cleaned_clone.get() + 1));
        });
        assert_eq!(cleaned.get(), 0);

        effect.dispose();
        assert_eq!(cleaned.get(), 1);
        effect.dispose();
        assert_eq!(cleaned.get(), 1);
    }

    #[test]
    fn on_cleanup_outside_effect_is_ignored() {
        reset_context();
        let (called, called_clone) = counter();

        on_cleanup(move || called_clone.set(called_clone.get() + 1));

        let _effect = effect(|| {});
        assert_eq!(called.get(), 0);
    }

    #[test]
    fn conditional_reads_drop_stale_dependencies() {
        reset_context();
        let use_left = pulse(true);
        let left = pulse(1);
        let right = pulse(10);
        let (runs, runs_clone) = counter();

        let (flag, l, r) = (use_left.clone(), left.clone(), right.clone());
        let effect = effect(move || {
            runs_clone.set(runs_clone.get() + 1);
            if flag.get() {
                l.get();
            } else {
                r.get();
            }
        });
        assert_eq!(effect.dependency_count(), 2);

        use_left.set(false);
        assert_eq!(runs.get(), 2);
        assert_eq!(left.subscriber_count(), 0);
        assert_eq!(right.subscriber_count(), 1);

        // The stale branch no longer triggers
        left.set(2);
        assert_eq!(runs.get(), 2);
        right.set(11);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn dispose_from_inside_own_run() {
        reset_context();
        let source = pulse(0);
        let handle: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));
        let (runs, runs_clone) = counter();

        let (source_clone, handle_clone) = (source.clone(), handle.clone());
        let effect = effect(move || {
            runs_clone.set(runs_clone.get() + 1);
            if source_clone.peek() == 1 {
                if let Some(me) = handle_clone.borrow().as_ref() {
                    me.dispose();
                }
            }
            // Reads after disposal must not resubscribe
            source_clone.get();
        });
        *handle.borrow_mut() = Some(effect.clone());

        source.set(1);
        assert!(effect.is_disposed());
        assert_eq!(source.subscriber_count(), 0);

        source.set(2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn dispose_from_cleanup_callback() {
        reset_context();
        let source = pulse(0);
        let handle: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));
        let (runs, runs_clone) = counter();

        let (source_clone, handle_clone) = (source.clone(), handle.clone());
        let effect = effect(move || {
            runs_clone.set(runs_clone.get() + 1);
            source_clone.get();
            let handle_clone = handle_clone.clone();
            on_cleanup(move || {
                if let Some(me) = handle_clone.borrow().as_ref() {
                    me.dispose();
                }
            });
        });
        *handle.borrow_mut() = Some(effect.clone());

        // The cleanup disposes the effect, so the re-run never starts
        source.set(1);
        assert!(effect.is_disposed());
        assert_eq!(runs.get(), 1);
        assert_eq!(source.subscriber_count(), 0);

        source.set(2);
        assert_eq!(runs.get(), 1);
        handle.borrow_mut().take();
    }

    #[test]
    fn on_cleanup_after_disposal_runs_immediately() {
        reset_context();
        let handle: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));
        let trigger = pulse(false);
        let (called, called_clone) = counter();

        let (trigger_clone, handle_clone) = (trigger.clone(), handle.clone());
        let effect = effect(move || {
            if trigger_clone.get() {
                if let Some(me) = handle_clone.borrow().as_ref() {
                    me.dispose();
                }
                let called_clone = called_clone.clone();
                on_cleanup(move || called_clone.set(called_clone.get() + 1));
            }
        });
        *handle.borrow_mut() = Some(effect.clone());

        trigger.set(true);
        assert!(effect.is_disposed());
        assert_eq!(called.get(), 1);
    }

    #[test]
    fn returned_error_is_reported_with_dependency_count() {
        reset_context();
        let source = pulse(0);
        let errors = Rc::new(RefCell::new(Vec::new()));

        let errors_clone = errors.clone();
        let source_clone = source.clone();
        let _effect = effect_with(
            move || -> Result<(), String> {
                if source_clone.get() > 0 {
                    return Err("negative balance".to_string());
                }
                Ok(())
            },
            EffectOptions::new().id("balance").on_error(move |error| {
                errors_clone.borrow_mut().push((
                    error.effect_id().to_string(),
                    error.phase(),
                    error.dependency_count(),
                    error.to_string(),
                ));
            }),
        );
        assert!(errors.borrow().is_empty());

        source.set(5);
        let errors = errors.borrow();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "balance");
        assert_eq!(errors[0].1, ErrorPhase::Execution);
        assert_eq!(errors[0].2, 1);
        assert!(errors[0].3.contains("negative balance"));
    }

    #[test]
    fn failing_cleanup_does_not_stop_the_run() {
        reset_context();
        let source = pulse(0);
        let phases = Rc::new(RefCell::new(Vec::new()));
        let (runs, runs_clone) = counter();

        let phases_clone = phases.clone();
        on_effect_error(Some(Rc::new(move |error: &EffectError| {
            phases_clone.borrow_mut().push(error.phase());
        })));

        let source_clone = source.clone();
        let _effect = effect(move || {
            source_clone.get();
            runs_clone.set(runs_clone.get() + 1);
            on_cleanup(|| panic!("listener already removed"));
        });

        source.set(1);
        assert_eq!(runs.get(), 2);
        assert_eq!(*phases.borrow(), vec![ErrorPhase::Cleanup]);
        reset_context();
    }

    #[test]
    fn self_triggering_effect_stops_at_cycle_limit() {
        reset_context();
        let source = pulse(0);
        let cycles = Rc::new(Cell::new(0));
        let (runs, runs_clone) = counter();

        let cycles_clone = cycles.clone();
        let source_clone = source.clone();
        let _effect = effect_with(
            move || {
                runs_clone.set(runs_clone.get() + 1);
                let value = source_clone.get();
                source_clone.set(value + 1);
            },
            EffectOptions::new().on_error(move |error| {
                assert!(error.is_cycle());
                cycles_clone.set(cycles_clone.get() + 1);
            }),
        );

        assert_eq!(runs.get(), 100);
        assert_eq!(cycles.get(), 1);
        assert_eq!(source.peek(), 100);
    }

    #[test]
    fn effect_queued_in_batch_runs_once() {
        reset_context();
        let a = pulse(0);
        let (runs, runs_clone) = counter();

        let a_clone = a.clone();
        let _effect = effect(move || {
            a_clone.get();
            runs_clone.set(runs_clone.get() + 1);
        });

        batch(|| {
            a.set(1);
            a.set(2);
            a.set(3);
        });
        assert_eq!(runs.get(), 2);
    }
}
