//! Trellis Core
//!
//! This crate provides the core runtime for the Trellis reactive state
//! system. It implements:
//!
//! - Dependency tracking between observable cells and effects
//! - Lazily cached computeds that stop propagating unchanged values
//! - Effect scopes for bulk teardown
//! - A deduplicating job scheduler flushed on host-provided ticks
//! - Watchers built on top of effects and the scheduler
//!
//! Everything is single-threaded. Each thread has its own independent
//! runtime, and no handle is `Send`.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: dependency records, effects, computeds, signals, scopes
//! - `scheduler`: job queues and the tick primitive
//! - `watch`: watchers and deep traversal
//! - `config` / `error`: runtime settings and error types
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{computed, watch, Signal, WatchOptions};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = computed(move || c.get() * 2);
//!
//! // Watch it
//! let handle = watch(doubled.clone(), |new, old, _| {
//!     println!("doubled: {old:?} -> {new}");
//! }, WatchOptions::new().sync());
//!
//! // Update the signal
//! count.set(5);
//! // Watcher runs synchronously, prints: "doubled: Some(0) -> 10"
//! handle.stop();
//! ```

pub mod config;
pub mod error;
pub mod reactive;
pub mod scheduler;
pub mod watch;

pub use config::{config, configure, RuntimeConfig};
pub use error::{ReactiveError, Result};
pub use reactive::{
    batch, computed, computed_with_setter, current_scope, custom_ref, effect, effect_scope,
    enable_tracking, new_dependency_record, on_scope_dispose, pause_scheduling, pause_tracking,
    reset_tracking, resume_scheduling, resume_tracking, signal, track, trigger, trigger_ref,
    untracked, Computed, CustomRef, DebugInfo, DebuggerEvent, Dep, DirtyLevel, EffectScope,
    Operation, ReactiveEffect, RefHooks, Signal, Trackable,
};
pub use scheduler::{next_tick, queue_job, queue_post_flush_job, tick, SchedulerJob};
pub use watch::{
    watch, watch_effect, watch_many, watch_sync_effect, FlushMode, OnCleanup, WatchHandle,
    WatchOptions, WatchSource,
};
