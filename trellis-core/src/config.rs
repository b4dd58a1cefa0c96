//! Runtime Configuration
//!
//! The runtime has very few knobs. They are kept per thread, like the rest of
//! the reactive state, and can be loaded from JSON.
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_json_str(r#"{ "recursion_limit": 50 }"#)?;
//! trellis_core::configure(config);
//! ```

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default number of times one job may run within a single flush.
pub const DEFAULT_RECURSION_LIMIT: usize = 100;

/// Per-thread runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of runs of a single job within one flush pass.
    /// Runs beyond the limit are skipped and reported.
    pub recursion_limit: usize,

    /// Whether misuse (readonly writes, stopped scopes, ...) is reported
    /// through `tracing`.
    pub warn_on_misuse: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            warn_on_misuse: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from a JSON document. Missing fields take their
    /// default values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

thread_local! {
    static CONFIG: RefCell<RuntimeConfig> = RefCell::new(RuntimeConfig::default());
}

/// Install a configuration for the current thread.
pub fn configure(config: RuntimeConfig) {
    CONFIG.with(|c| *c.borrow_mut() = config);
}

/// The configuration active on the current thread.
pub fn config() -> RuntimeConfig {
    CONFIG.with(|c| c.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config = RuntimeConfig::from_json_str(r#"{ "recursion_limit": 5 }"#).unwrap();
        assert_eq!(config.recursion_limit, 5);
        assert!(config.warn_on_misuse);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(RuntimeConfig::from_json_str("{ recursion_limit: }").is_err());
    }

    #[test]
    fn configure_is_per_thread() {
        configure(RuntimeConfig {
            recursion_limit: 3,
            warn_on_misuse: false,
        });
        assert_eq!(config().recursion_limit, 3);

        let other = std::thread::spawn(|| config().recursion_limit)
            .join()
            .unwrap();
        assert_eq!(other, DEFAULT_RECURSION_LIMIT);
    }
}
