//! Error channel for effect and computed runners.
//!
//! Failures inside a runner never unwind past the runner boundary. They are
//! wrapped in an [`EffectError`] and routed to the runner's own handler, else
//! to the global handler installed with [`on_effect_error`], else logged.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use thiserror::Error;

/// A boxed error returned by a tracked function.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Callback receiving every error routed through the channel.
pub type ErrorHandler = Rc<dyn Fn(&EffectError)>;

thread_local! {
    static GLOBAL_HANDLER: RefCell<Option<ErrorHandler>> = const { RefCell::new(None) };
}

/// The stage of the run protocol in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPhase {
    /// The tracked function itself.
    Execution,
    /// A callback registered with `on_cleanup`.
    Cleanup,
}

impl fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPhase::Execution => f.write_str("execution"),
            ErrorPhase::Cleanup => f.write_str("cleanup"),
        }
    }
}

/// What went wrong in a tracked function or cleanup.
#[derive(Debug, Error)]
pub enum Cause {
    /// The code panicked. The payload message is kept when it is a string.
    #[error("panicked: {0}")]
    Panic(String),

    /// The tracked function returned an error.
    #[error("{0}")]
    Error(BoxError),
}

impl Cause {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Cause::Panic(message)
    }

    /// The panic message, if this cause is a panic.
    pub fn panic_message(&self) -> Option<&str> {
        match self {
            Cause::Panic(message) => Some(message),
            Cause::Error(_) => None,
        }
    }
}

/// Kind of failure reported by a runner.
#[derive(Debug, Error)]
pub enum EffectErrorKind {
    #[error("tracked function failed: {0}")]
    Execution(#[source] Cause),

    #[error("cleanup callback failed: {0}")]
    Cleanup(#[source] Cause),

    /// The runner was re-entered more often than the cycle ceiling allows.
    #[error("circular dependency: re-entered more than {limit} times")]
    Cycle { limit: u32 },
}

/// A structured failure from a runner.
#[derive(Debug, Error)]
#[error("effect `{effect_id}` failed during {phase} with {dependency_count} dependencies: {kind}")]
pub struct EffectError {
    effect_id: String,
    phase: ErrorPhase,
    dependency_count: usize,
    #[source]
    kind: EffectErrorKind,
}

impl EffectError {
    pub(crate) fn new(effect_id: &str, dependency_count: usize, kind: EffectErrorKind) -> Self {
        let phase = match kind {
            EffectErrorKind::Cleanup(_) => ErrorPhase::Cleanup,
            EffectErrorKind::Execution(_) | EffectErrorKind::Cycle { .. } => ErrorPhase::Execution,
        };
        Self {
            effect_id: effect_id.to_string(),
            phase,
            dependency_count,
            kind,
        }
    }

    /// Identifier of the failing runner.
    pub fn effect_id(&self) -> &str {
        &self.effect_id
    }

    pub fn phase(&self) -> ErrorPhase {
        self.phase
    }

    /// Number of dependencies the runner had gathered when it failed.
    pub fn dependency_count(&self) -> usize {
        self.dependency_count
    }

    pub fn kind(&self) -> &EffectErrorKind {
        &self.kind
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self.kind, EffectErrorKind::Cycle { .. })
    }

    /// The original cause, absent for cycle errors.
    pub fn cause(&self) -> Option<&Cause> {
        match &self.kind {
            EffectErrorKind::Execution(cause) | EffectErrorKind::Cleanup(cause) => Some(cause),
            EffectErrorKind::Cycle { .. } => None,
        }
    }
}

/// Values a tracked function may return.
///
/// `()` always succeeds; `Result<(), E>` reports `Err` as an execution error.
pub trait EffectOutcome {
    fn into_outcome(self) -> Result<(), BoxError>;
}

impl EffectOutcome for () {
    fn into_outcome(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> EffectOutcome for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_outcome(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

/// Install a global error handler, or clear it with `None`.
///
/// Returns the previously installed handler so callers can restore it.
pub fn on_effect_error(handler: Option<ErrorHandler>) -> Option<ErrorHandler> {
    GLOBAL_HANDLER.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), handler))
}

pub(crate) fn clear_global_handler() {
    GLOBAL_HANDLER.with(|slot| slot.borrow_mut().take());
}

/// Run `f`, turning a panic into a [`Cause`].
pub(crate) fn catch<R>(f: impl FnOnce() -> R) -> Result<R, Cause> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(Cause::from_panic)
}

/// Route an error to the local handler, the global handler, or the log.
pub(crate) fn report(error: EffectError, local: Option<&ErrorHandler>) {
    let handler = match local {
        Some(handler) => Some(handler.clone()),
        None => GLOBAL_HANDLER.with(|slot| slot.borrow().clone()),
    };

    match handler {
        Some(handler) => {
            if let Err(cause) = catch(|| handler(&error)) {
                tracing::error!(
                    effect = %error.effect_id,
                    %cause,
                    original = %error,
                    "effect error handler failed"
                );
            }
        }
        None => {
            tracing::error!(
                effect = %error.effect_id,
                phase = %error.phase,
                dependencies = error.dependency_count,
                "{error}"
            );
        }
    }
}
