//! Error Types
//!
//! Everything the runtime can complain about lives in [`ReactiveError`].
//!
//! Two kinds of failure exist:
//!
//! - **Misuse**: writing to a readonly computed, running a stopped scope and
//!   similar. These are reported through `tracing` and the operation becomes
//!   a no-op. The `try_*` variants of those operations return the error
//!   instead.
//! - **User code panics** inside an effect body, computed getter or watch
//!   callback. These unwind to whoever called `run()` or flushed the
//!   scheduler. They are not represented here.

use thiserror::Error;

use crate::config;
use crate::reactive::untracked;

/// Errors reported by the reactive runtime.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A value was written to a computed created without a setter.
    #[error("computed value is readonly")]
    ReadonlyComputed,

    /// `run` was called on a scope that has already been stopped.
    #[error("cannot run an inactive effect scope")]
    InactiveScope,

    /// `on_scope_dispose` was called while no scope was running.
    #[error("on_scope_dispose() is called when there is no active effect scope to be associated with")]
    NoActiveScope,

    /// A computed getter read its own value before producing one.
    #[error("computed getter read itself before producing a value")]
    CyclicComputed,

    /// A job re-queued itself more often than the configured limit allows
    /// within a single flush.
    #[error("maximum recursive updates exceeded ({limit}) for scheduler job {job}")]
    RecursionLimit {
        /// Raw id of the offending job.
        job: u64,
        /// The limit that was hit.
        limit: usize,
    },

    /// A runtime configuration document could not be parsed.
    #[error("invalid runtime config: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Report a misuse through the diagnostic channel.
///
/// Tracking is paused while the event is emitted so that subscribers which
/// format reactive values never register a dependency.
pub(crate) fn warn(err: &ReactiveError) {
    if !config::config().warn_on_misuse {
        return;
    }
    untracked(|| {
        tracing::warn!(target: "trellis::reactive", "[Reactivity] {err}");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_descriptive() {
        assert_eq!(
            ReactiveError::ReadonlyComputed.to_string(),
            "computed value is readonly"
        );
        let err = ReactiveError::RecursionLimit { job: 7, limit: 100 };
        assert_eq!(
            err.to_string(),
            "maximum recursive updates exceeded (100) for scheduler job 7"
        );
    }

    #[test]
    fn config_errors_convert() {
        let parse = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: ReactiveError = parse.into();
        assert!(matches!(err, ReactiveError::Config(_)));
    }
}
