//! Reactive Primitives
//!
//! This module implements the core reactive system: dependency records,
//! effects, computeds, signals and scopes. These primitives form the
//! foundation of Trellis's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Dependency Records
//!
//! A [`Dep`] is the set of effects subscribed to one observable cell. Cells
//! call [`track`] when read and [`trigger`] when written. Anything that owns
//! a dep implements [`Trackable`].
//!
//! ## Effects
//!
//! A [`ReactiveEffect`] is a computation whose reads are recorded while it
//! runs. When a recorded dep is triggered, the effect becomes dirty and its
//! scheduler is called, which by default reruns it.
//!
//! ## Computeds
//!
//! A [`Computed`] is a derived value that caches its result. It re-evaluates
//! lazily, only when an upstream cell actually changed, and stops propagating
//! when it recomputes to an equal value.
//!
//! ## Scopes
//!
//! An [`EffectScope`] groups the effects created while it runs so they can be
//! stopped together.
//!
//! # Implementation Notes
//!
//! The reactive system uses thread-local state to automatically detect
//! dependencies. When a cell is read, we check if there is an active effect
//! and, if so, register the dependency.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod computed;
mod context;
mod dep;
mod effect;
mod equality;
mod runtime;
mod scope;
mod signal;
mod subscriber;

pub use computed::{computed, computed_with_setter, Computed};
pub use context::ReactiveContext;
pub use dep::{new_dependency_record, Dep, Trackable};
pub use effect::{
    effect, track, trigger, DebugInfo, DebuggerEvent, DebuggerHook, DirtyLevel, Operation,
    ReactiveEffect,
};
pub use equality::{has_changed, same_value};
pub use runtime::{
    batch, enable_tracking, is_tracking, pause_scheduling, pause_tracking, reset_tracking,
    resume_scheduling, resume_tracking, untracked, EffectScheduler,
};
pub use scope::{
    current_scope, effect_scope, on_scope_dispose, try_on_scope_dispose, EffectScope,
    ScopeCleanup,
};
pub use signal::{custom_ref, signal, trigger_ref, CustomRef, RefHooks, Signal};
pub use subscriber::SubscriberId;

pub(crate) use effect::EffectCore;
