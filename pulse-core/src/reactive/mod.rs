//! Reactive Primitives
//!
//! This module implements the core reactive system: pulses, computed cells,
//! effects, and batches. These primitives form the foundation of the
//! framework's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Pulses
//!
//! A Pulse is a container for mutable state. When a pulse's value is read
//! within a tracking context (such as a computed cell or effect), the pulse
//! automatically registers that context as a dependent. When the pulse's
//! value changes, all dependents are notified.
//!
//! ## Computed Cells
//!
//! A Computed is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changes, by default on the next read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems, such as updating the DOM or logging.
//!
//! ## Batches
//!
//! A batch collapses any number of writes into a single notification wave.
//!
//! ## Owners
//!
//! Effects and computed cells created while another computation runs are
//! owned by it and disposed before it runs again. An [`Owner`] is a root
//! scope that disposes everything created inside it.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a pulse is read, we check if there is an active
//! tracking context and, if so, register the dependency.
//!
//! Failures inside effects and computed cells are caught at the runner
//! boundary and routed through the error channel (see [`on_effect_error`]),
//! so one broken effect never stops its siblings.

mod signal;
mod context;
mod subscriber;
mod computed;
mod effect;
mod owner;
mod error;
mod runtime;

pub use signal::{pulse, Pulse};
pub use context::{untrack, ReactiveContext};
pub use subscriber::{NodeState, SubscriberId};
pub use computed::{computed, computed_with, Computed, ComputedOptions, Evaluation};
pub use effect::{effect, effect_with, Effect, EffectOptions};
pub use owner::{on_cleanup, Owner};
pub use error::{
    on_effect_error, BoxError, Cause, EffectError, EffectErrorKind, EffectOutcome, ErrorHandler,
    ErrorPhase,
};
pub use runtime::{batch, reset_context, Runtime};
