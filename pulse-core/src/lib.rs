//! Pulse Core
//!
//! This crate provides the reactive dependency-tracking core that the rest of
//! the framework builds on. It implements:
//!
//! - Reactive primitives (pulses, computed cells, effects)
//! - Automatic dependency discovery through a context stack
//! - Transactional batching with a deduplicated flush
//! - Structured error and cleanup handling for effects
//! - Ownership scopes that dispose nested effects and computed cells
//!
//! Everything runs synchronously on the calling thread. Each thread owns an
//! independent reactive graph.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `config`: Runtime tunables such as the cycle ceiling
//!
//! # Example
//!
//! ```rust
//! use pulse_core::reactive::{batch, computed, effect, pulse};
//!
//! // Create a pulse
//! let count = pulse(0);
//!
//! // Create a derived value
//! let doubled = computed({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create an effect
//! let _logger = effect({
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     move || println!("Count: {}, Doubled: {}", count.get(), doubled.get())
//! });
//!
//! // Update the pulse
//! count.set(5);
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//!
//! // Several writes, one notification
//! batch(|| {
//!     count.set(6);
//!     count.set(7);
//! });
//! assert_eq!(doubled.get(), 14);
//! ```

pub mod config;
pub mod reactive;

pub use config::{configure, ReactiveConfig};
pub use reactive::{
    batch, computed, computed_with, effect, effect_with, on_cleanup, on_effect_error, pulse,
    reset_context, untrack, Computed, ComputedOptions, Effect, EffectError, EffectOptions, Owner,
    Pulse,
};
