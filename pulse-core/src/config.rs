//! Runtime configuration.
//!
//! The reactive core has a single tunable: the cycle ceiling that bounds how
//! many times a runner may be re-entered synchronously before the trigger is
//! abandoned. Consumers embedding the core can deserialize a
//! [`ReactiveConfig`] from their own configuration files and install it with
//! [`configure`].

use std::cell::Cell;

use serde::{Deserialize, Serialize};

/// Default cycle ceiling.
pub const DEFAULT_CYCLE_LIMIT: u32 = 100;

thread_local! {
    static CYCLE_LIMIT: Cell<u32> = const { Cell::new(DEFAULT_CYCLE_LIMIT) };
}

/// Tunables for the reactive runtime on the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactiveConfig {
    /// Maximum number of nested re-entrant runs of one runner.
    pub cycle_limit: u32,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            cycle_limit: DEFAULT_CYCLE_LIMIT,
        }
    }
}

impl ReactiveConfig {
    /// The configuration currently installed on this thread.
    pub fn current() -> Self {
        Self {
            cycle_limit: CYCLE_LIMIT.with(Cell::get),
        }
    }
}

/// Install `config` for the current thread and return the previous one.
///
/// A zero cycle limit is raised to one so that a runner can run at all.
pub fn configure(config: ReactiveConfig) -> ReactiveConfig {
    let previous = ReactiveConfig::current();
    CYCLE_LIMIT.with(|limit| limit.set(config.cycle_limit.max(1)));
    tracing::debug!(cycle_limit = config.cycle_limit, "reactive runtime configured");
    previous
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_ceiling_of_one_hundred() {
        assert_eq!(ReactiveConfig::default().cycle_limit, 100);
    }

    #[test]
    fn deserialize_fills_missing_fields() {
        let config: ReactiveConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ReactiveConfig::default());

        let config: ReactiveConfig = serde_json::from_str(r#"{"cycle_limit": 8}"#).unwrap();
        assert_eq!(config.cycle_limit, 8);
    }

    #[test]
    fn configure_returns_previous() {
        let previous = configure(ReactiveConfig { cycle_limit: 5 });
        assert_eq!(ReactiveConfig::current().cycle_limit, 5);

        let five = configure(previous);
        assert_eq!(five.cycle_limit, 5);
        assert_eq!(ReactiveConfig::current(), previous);
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        let previous = configure(ReactiveConfig { cycle_limit: 0 });
        assert_eq!(ReactiveConfig::current().cycle_limit, 1);
        configure(previous);
    }
}
