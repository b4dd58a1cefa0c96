//! Effect Implementation
//!
//! A [`ReactiveEffect`] is a unit of computation whose reads are recorded.
//! When one of the recorded dependency records is triggered, the effect is
//! marked dirty and its scheduler is invoked.
//!
//! # Dependency Bookkeeping
//!
//! Every run bumps the effect's `track_id` and resets a cursor into its
//! `deps` list. Each tracked read stamps the dep with the new `track_id` and
//! writes it at the cursor position, detaching whatever stale dep used to sit
//! there. After the run, entries past the cursor are detached and truncated.
//! The cost is proportional to the number of deps read in this run.
//!
//! # Dirty Levels
//!
//! Plain effects only move between `NotDirty` and `Dirty`. Effects that read
//! computeds may be `MaybeDirty`: an upstream computed *might* produce a new
//! value. [`ReactiveEffect::is_dirty`] resolves that by asking each upstream
//! computed to refresh, depth-first, stopping at the first real change.
//!
//! # Lifecycle
//!
//! Effects start `Dirty`, must be run once to collect dependencies, and are
//! torn down by `stop()`. A stop requested while the effect is running is
//! deferred until its outermost run returns.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::dep::Dep;
use super::runtime::{self, EffectScheduler, SchedulingPause, TrackingPause};
use super::scope;
use super::SubscriberId;

/// Staleness of an effect. Ordered: `NotDirty < MaybeDirty < Dirty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum DirtyLevel {
    /// Dependencies are unchanged since the last run.
    #[default]
    NotDirty,

    /// An upstream computed might have changed. Needs checking.
    MaybeDirty,

    /// A dependency definitely changed.
    Dirty,
}

/// The kind of access reported to debugger hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Get,
    Set,
    Add,
    Delete,
    Clear,
}

/// Optional description of a track or trigger, forwarded to debugger hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    pub operation: Operation,
    pub key: Option<String>,
}

impl DebugInfo {
    pub fn new(operation: Operation) -> Self {
        Self { operation, key: None }
    }

    pub fn with_key(operation: Operation, key: impl Into<String>) -> Self {
        Self {
            operation,
            key: Some(key.into()),
        }
    }
}

/// Event passed to `on_track` / `on_trigger` hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerEvent {
    pub effect: SubscriberId,
    pub info: Option<DebugInfo>,
}

pub type DebuggerHook = Rc<dyn Fn(&DebuggerEvent)>;

/// Where a trigger came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriggerOrigin {
    /// A cell was written, or a computed announced it may be stale.
    Write,
    /// A computed recomputed to a different value while being read.
    ComputedValue,
}

/// Untyped state of an effect. Dependency records and scopes refer to this;
/// the typed body lives in [`ReactiveEffect`].
pub(crate) struct EffectCore {
    id: SubscriberId,
    dirty_level: Cell<DirtyLevel>,
    track_id: Cell<u64>,
    running: Cell<u32>,
    querying: Cell<u32>,
    deps_length: Cell<usize>,
    deps: RefCell<SmallVec<[Dep; 4]>>,
    active: Cell<bool>,
    pending_stop: Cell<bool>,
    allow_recurse: Cell<bool>,
    scheduler: RefCell<Option<EffectScheduler>>,
    /// Synchronous hook run during trigger; computeds use it to forward
    /// staleness to their own subscribers.
    trigger_hook: RefCell<Option<Rc<dyn Fn()>>>,
    on_stop: RefCell<Option<Box<dyn FnOnce()>>>,
    on_track: RefCell<Option<DebuggerHook>>,
    on_trigger: RefCell<Option<DebuggerHook>>,
}

impl EffectCore {
    fn new() -> Rc<Self> {
        let core = Rc::new(Self {
            id: SubscriberId::new(),
            dirty_level: Cell::new(DirtyLevel::Dirty),
            track_id: Cell::new(0),
            running: Cell::new(0),
            querying: Cell::new(0),
            deps_length: Cell::new(0),
            deps: RefCell::new(SmallVec::new()),
            active: Cell::new(true),
            pending_stop: Cell::new(false),
            allow_recurse: Cell::new(false),
            scheduler: RefCell::new(None),
            trigger_hook: RefCell::new(None),
            on_stop: RefCell::new(None),
            on_track: RefCell::new(None),
            on_trigger: RefCell::new(None),
        });
        scope::record_effect(&core);
        core
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.get() > 0
    }

    pub(crate) fn dirty_level(&self) -> DirtyLevel {
        self.dirty_level.get()
    }

    pub(crate) fn set_dirty_level(&self, level: DirtyLevel) {
        self.dirty_level.set(level);
    }

    pub(crate) fn set_scheduler(&self, scheduler: Option<EffectScheduler>) {
        *self.scheduler.borrow_mut() = scheduler;
    }

    pub(crate) fn set_on_stop(&self, on_stop: Box<dyn FnOnce()>) {
        *self.on_stop.borrow_mut() = Some(on_stop);
    }

    pub(crate) fn set_allow_recurse(&self, allow: bool) {
        self.allow_recurse.set(allow);
    }

    pub(crate) fn dep_count(&self) -> usize {
        self.deps.borrow().len()
    }

    /// Resolve `MaybeDirty` by refreshing upstream computeds, then report
    /// whether the effect must rerun.
    pub(crate) fn is_dirty(&self) -> bool {
        if self.dirty_level.get() == DirtyLevel::MaybeDirty {
            self.dirty_level.set(DirtyLevel::NotDirty);
            let _query = QueryGuard::enter(self);
            let deps: SmallVec<[Dep; 4]> = self.deps.borrow().iter().cloned().collect();
            for dep in deps {
                if let Some(computed) = dep.computed() {
                    computed.refresh();
                    if self.dirty_level.get() >= DirtyLevel::Dirty {
                        break;
                    }
                }
            }
        }
        self.dirty_level.get() >= DirtyLevel::Dirty
    }

    pub(crate) fn pre_cleanup(&self) {
        self.track_id.set(self.track_id.get() + 1);
        self.deps_length.set(0);
    }

    /// Detach every dep past the cursor that was not re-confirmed this run.
    pub(crate) fn post_cleanup(&self) {
        let len = self.deps_length.get();
        let stale: SmallVec<[Dep; 4]> = {
            let mut deps = self.deps.borrow_mut();
            if deps.len() > len {
                deps.drain(len..).collect()
            } else {
                SmallVec::new()
            }
        };
        for dep in stale {
            cleanup_dep_effect(&dep, self);
        }
    }

    pub(crate) fn take_pending_stop(&self) -> bool {
        self.pending_stop.replace(false)
    }

    pub(crate) fn enter_run(&self) {
        self.running.set(self.running.get() + 1);
        self.pre_cleanup();
    }

    pub(crate) fn exit_run(&self) {
        self.post_cleanup();
        self.running.set(self.running.get().saturating_sub(1));
    }

    /// Detach from every dep, run `on_stop` and deactivate. Idempotent.
    pub(crate) fn stop(&self) {
        if self.is_running() {
            self.pending_stop.set(true);
            return;
        }
        if !self.active.replace(false) {
            return;
        }
        self.pre_cleanup();
        self.post_cleanup();
        // A stopped computed still evaluates once on its first read.
        if self.trigger_hook.borrow().is_none() {
            self.dirty_level.set(DirtyLevel::NotDirty);
        }
        let scheduler = self.scheduler.borrow_mut().take();
        let on_stop = self.on_stop.borrow_mut().take();
        tracing::trace!(target: "trellis::reactive", effect = %self.id, "effect stopped");
        if let Some(on_stop) = on_stop {
            on_stop();
        }
        drop(scheduler);
    }

    fn emit(&self, hook: &RefCell<Option<DebuggerHook>>, info: Option<&DebugInfo>) {
        let hook = hook.borrow().clone();
        if let Some(hook) = hook {
            hook(&DebuggerEvent {
                effect: self.id,
                info: info.cloned(),
            });
        }
    }
}

impl Drop for EffectCore {
    fn drop(&mut self) {
        for dep in self.deps.get_mut().drain(..) {
            dep.remove(self.id);
        }
    }
}

impl fmt::Debug for EffectCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectCore")
            .field("id", &self.id)
            .field("active", &self.active.get())
            .field("dirty_level", &self.dirty_level.get())
            .field("deps", &self.dep_count())
            .finish()
    }
}

/// Marks an effect as answering a dirty query, with tracking paused, for
/// the guard's lifetime.
struct QueryGuard<'a> {
    effect: &'a EffectCore,
    _pause: TrackingPause,
}

impl<'a> QueryGuard<'a> {
    fn enter(effect: &'a EffectCore) -> Self {
        effect.querying.set(effect.querying.get() + 1);
        Self {
            effect,
            _pause: TrackingPause::enter(),
        }
    }
}

impl Drop for QueryGuard<'_> {
    fn drop(&mut self) {
        self.effect
            .querying
            .set(self.effect.querying.get().saturating_sub(1));
    }
}

fn cleanup_dep_effect(dep: &Dep, effect: &EffectCore) {
    if dep.track_id_of(effect.id) != Some(effect.track_id.get()) {
        dep.remove(effect.id);
    }
}

/// Record a read of `dep` by the running effect.
///
/// A no-op when no effect is running or tracking is paused.
pub fn track(dep: &Dep, info: Option<&DebugInfo>) {
    if !runtime::should_track() {
        return;
    }
    if let Some(effect) = runtime::active_effect() {
        track_effect(&effect, dep, info);
    }
}

pub(crate) fn track_effect(effect: &Rc<EffectCore>, dep: &Dep, info: Option<&DebugInfo>) {
    let track_id = effect.track_id.get();
    if dep.track_id_of(effect.id) == Some(track_id) {
        return;
    }
    dep.stamp(effect, track_id);

    let index = effect.deps_length.get();
    let old = effect.deps.borrow().get(index).cloned();
    match old {
        Some(old) if old.ptr_eq(dep) => {}
        Some(old) => {
            cleanup_dep_effect(&old, effect);
            effect.deps.borrow_mut()[index] = dep.clone();
        }
        None => effect.deps.borrow_mut().push(dep.clone()),
    }
    effect.deps_length.set(index + 1);

    tracing::trace!(target: "trellis::reactive", effect = %effect.id, "dependency tracked");
    effect.emit(&effect.on_track, info);
}

/// Notify every subscriber of `dep` that it is stale at `level`.
///
/// Effects that were clean get their scheduler queued; the queue runs when
/// this call (or the outermost enclosing scheduling pause) finishes.
/// Computed subscribers forward staleness synchronously first, so effects
/// that rerun always observe resolved computed values.
pub fn trigger(dep: &Dep, level: DirtyLevel, info: Option<&DebugInfo>) {
    trigger_effects(dep, level, TriggerOrigin::Write, info);
}

pub(crate) fn trigger_effects(
    dep: &Dep,
    level: DirtyLevel,
    origin: TriggerOrigin,
    info: Option<&DebugInfo>,
) {
    let _pause = SchedulingPause::enter();
    let from_computed = origin == TriggerOrigin::ComputedValue;

    for effect in dep.subscribers() {
        // Detached by an earlier subscriber's hook.
        if !dep.contains(effect.id) {
            continue;
        }
        let running = effect.is_running();
        if running && !effect.allow_recurse.get() {
            continue;
        }
        if effect.dirty_level.get() >= level || (running && from_computed) {
            continue;
        }

        let last = effect.dirty_level.replace(level);
        if last != DirtyLevel::NotDirty {
            continue;
        }
        // A computed changed while this effect was asking whether it is
        // dirty: the level is the answer, nothing needs scheduling.
        if effect.querying.get() > 0 && from_computed {
            continue;
        }

        tracing::trace!(target: "trellis::reactive", effect = %effect.id, ?level, "effect triggered");
        effect.emit(&effect.on_trigger, info);

        let hook = effect.trigger_hook.borrow().clone();
        if let Some(hook) = hook {
            hook();
        }
        let scheduler = effect.scheduler.borrow().clone();
        if let Some(scheduler) = scheduler {
            runtime::push_scheduler(scheduler);
        }
    }
}

/// A tracked computation producing `T`.
///
/// Handles are cheap to clone and share the same effect. Dependency records
/// only hold weak references, so an effect lives as long as a handle or an
/// [`EffectScope`](super::EffectScope) owns it.
pub struct ReactiveEffect<T: 'static> {
    core: Rc<EffectCore>,
    body: Rc<dyn Fn() -> T>,
}

impl<T: 'static> ReactiveEffect<T> {
    /// Create an effect that reruns synchronously, once the current trigger
    /// completes, whenever a dependency changes.
    ///
    /// The body is not run; call [`run`](Self::run) to collect the initial
    /// dependencies.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let effect = Self::bare(Rc::new(body));
        let weak = Rc::downgrade(&effect.core);
        let body = effect.body.clone();
        effect.core.set_scheduler(Some(Rc::new(move || {
            if let Some(core) = weak.upgrade() {
                if core.is_active() && core.is_dirty() {
                    run_effect(&core, &*body);
                }
            }
        })));
        effect
    }

    /// Create an effect whose reruns are delegated to `scheduler`.
    pub fn with_scheduler<F, S>(body: F, scheduler: S) -> Self
    where
        F: Fn() -> T + 'static,
        S: Fn() + 'static,
    {
        let effect = Self::bare(Rc::new(body));
        effect.core.set_scheduler(Some(Rc::new(scheduler)));
        effect
    }

    /// Effect backing a computed: no scheduler, a synchronous trigger hook.
    pub(crate) fn for_computed<H>(body: Rc<dyn Fn() -> T>, hook: H) -> Self
    where
        H: Fn() + 'static,
    {
        let effect = Self::bare(body);
        *effect.core.trigger_hook.borrow_mut() = Some(Rc::new(hook));
        effect
    }

    fn bare(body: Rc<dyn Fn() -> T>) -> Self {
        Self {
            core: EffectCore::new(),
            body,
        }
    }

    pub(crate) fn core(&self) -> &Rc<EffectCore> {
        &self.core
    }

    /// Run the body, recording its reads as the new dependency set.
    ///
    /// On a stopped effect the body still runs, but nothing is tracked.
    pub fn run(&self) -> T {
        run_effect(&self.core, &*self.body)
    }

    /// Stop the effect: detach it from all deps and run `on_stop`.
    ///
    /// Idempotent. When called from inside the effect's own run, the stop
    /// happens after that run returns.
    pub fn stop(&self) {
        self.core.stop();
    }

    pub fn id(&self) -> SubscriberId {
        self.core.id
    }

    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    pub fn dirty_level(&self) -> DirtyLevel {
        self.core.dirty_level()
    }

    /// Whether the effect must rerun, resolving `MaybeDirty` through
    /// upstream computeds.
    pub fn is_dirty(&self) -> bool {
        self.core.is_dirty()
    }

    /// Force the dirty flag.
    pub fn set_dirty(&self, dirty: bool) {
        self.core.set_dirty_level(if dirty {
            DirtyLevel::Dirty
        } else {
            DirtyLevel::NotDirty
        });
    }

    pub fn allow_recurse(&self) -> bool {
        self.core.allow_recurse.get()
    }

    /// Let the effect be re-triggered by writes made during its own run.
    pub fn set_allow_recurse(&self, allow: bool) {
        self.core.set_allow_recurse(allow);
    }

    /// Callback run once when the effect is stopped.
    pub fn set_on_stop<F>(&self, on_stop: F)
    where
        F: FnOnce() + 'static,
    {
        self.core.set_on_stop(Box::new(on_stop));
    }

    pub fn set_on_track<F>(&self, hook: F)
    where
        F: Fn(&DebuggerEvent) + 'static,
    {
        *self.core.on_track.borrow_mut() = Some(Rc::new(hook));
    }

    pub fn set_on_trigger<F>(&self, hook: F)
    where
        F: Fn(&DebuggerEvent) + 'static,
    {
        *self.core.on_trigger.borrow_mut() = Some(Rc::new(hook));
    }

    /// Number of deps recorded by the last completed run.
    pub fn dep_count(&self) -> usize {
        self.core.dep_count()
    }
}

impl<T: 'static> Clone for ReactiveEffect<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            body: Rc::clone(&self.body),
        }
    }
}

impl<T: 'static> fmt::Debug for ReactiveEffect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveEffect")
            .field("id", &self.core.id)
            .field("active", &self.core.is_active())
            .field("dirty_level", &self.core.dirty_level())
            .field("dep_count", &self.core.dep_count())
            .finish()
    }
}

pub(crate) fn run_effect<T>(core: &Rc<EffectCore>, body: &dyn Fn() -> T) -> T {
    core.set_dirty_level(DirtyLevel::NotDirty);
    if !core.is_active() {
        return body();
    }
    let _ctx = ReactiveContext::enter(Rc::clone(core));
    body()
}

/// Create an effect, run it once, and return its handle.
///
/// The effect keeps itself alive until [`stop`](ReactiveEffect::stop) is
/// called, directly or through its scope.
pub fn effect<T, F>(body: F) -> ReactiveEffect<T>
where
    T: 'static,
    F: Fn() -> T + 'static,
{
    let effect = ReactiveEffect::bare(Rc::new(body));
    let owned = effect.clone();
    effect.core.set_scheduler(Some(Rc::new(move || {
        if owned.core.is_active() && owned.core.is_dirty() {
            owned.run();
        }
    })));
    effect.run();
    effect
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{pause_tracking, reset_tracking, Signal};
    use std::cell::Cell;

    fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let count = Rc::new(Cell::new(0));
        (count.clone(), count)
    }

    #[test]
    fn effect_starts_dirty_and_runs_on_demand() {
        let (runs, inner) = counter();
        let effect = ReactiveEffect::new(move || inner.set(inner.get() + 1));

        assert_eq!(effect.dirty_level(), DirtyLevel::Dirty);
        assert_eq!(runs.get(), 0);

        effect.run();
        assert_eq!(runs.get(), 1);
        assert_eq!(effect.dirty_level(), DirtyLevel::NotDirty);
    }

    #[test]
    fn run_returns_body_value() {
        let effect = ReactiveEffect::new(|| 21 * 2);
        assert_eq!(effect.run(), 42);
    }

    #[test]
    fn trigger_reruns_default_effect() {
        let source = Signal::new(1);
        let seen = Rc::new(Cell::new(0));

        let (s, out) = (source.clone(), seen.clone());
        let effect = ReactiveEffect::new(move || out.set(s.get()));
        effect.run();
        assert_eq!(seen.get(), 1);

        source.set(5);
        assert_eq!(seen.get(), 5);
        assert_eq!(effect.dep_count(), 1);
    }

    #[test]
    fn scheduler_replaces_rerun() {
        let source = Signal::new(0);
        let (runs, inner) = counter();
        let (scheduled, sched) = counter();

        let s = source.clone();
        let effect = ReactiveEffect::with_scheduler(
            move || {
                s.get();
                inner.set(inner.get() + 1);
            },
            move || sched.set(sched.get() + 1),
        );
        effect.run();

        source.set(1);
        assert_eq!(runs.get(), 1);
        assert_eq!(scheduled.get(), 1);
        assert!(effect.is_dirty());

        // Already dirty: a second write does not schedule again.
        source.set(2);
        assert_eq!(scheduled.get(), 1);
    }

    #[test]
    fn conditional_dependency_is_dropped() {
        let flag = Signal::new(true);
        let branch = Signal::new(0);
        let (runs, inner) = counter();

        let (f, b) = (flag.clone(), branch.clone());
        let effect = ReactiveEffect::new(move || {
            inner.set(inner.get() + 1);
            if f.get() {
                b.get();
            }
        });
        effect.run();
        assert_eq!(effect.dep_count(), 2);
        assert_eq!(branch.subscriber_count(), 1);

        flag.set(false);
        assert_eq!(runs.get(), 2);
        assert_eq!(effect.dep_count(), 1);
        assert_eq!(branch.subscriber_count(), 0);

        branch.set(10);
        assert_eq!(runs.get(), 2);
        assert_eq!(effect.dirty_level(), DirtyLevel::NotDirty);
    }

    #[test]
    fn repeated_reads_track_once() {
        let source = Signal::new(0);
        let s = source.clone();
        let effect = ReactiveEffect::new(move || s.get() + s.get() + s.get());
        effect.run();
        assert_eq!(effect.dep_count(), 1);
        assert_eq!(source.subscriber_count(), 1);
    }

    #[test]
    fn reordered_reads_keep_all_deps() {
        let first = Signal::new(true);
        let a = Signal::new(0);
        let b = Signal::new(0);

        let (f, sa, sb) = (first.clone(), a.clone(), b.clone());
        let effect = ReactiveEffect::new(move || {
            if f.get() {
                sa.get();
                sb.get();
            } else {
                sb.get();
                sa.get();
            }
        });
        effect.run();
        first.set(false);

        assert_eq!(effect.dep_count(), 3);
        assert_eq!(a.subscriber_count(), 1);
        assert_eq!(b.subscriber_count(), 1);
    }

    #[test]
    fn stop_detaches_and_calls_on_stop() {
        let source = Signal::new(0);
        let (runs, inner) = counter();
        let (stops, on_stop) = counter();

        let s = source.clone();
        let effect = ReactiveEffect::new(move || {
            s.get();
            inner.set(inner.get() + 1);
        });
        effect.set_on_stop(move || on_stop.set(on_stop.get() + 1));
        effect.run();

        effect.stop();
        effect.stop();
        assert!(!effect.is_active());
        assert_eq!(stops.get(), 1);
        assert_eq!(source.subscriber_count(), 0);

        source.set(1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn stopped_effect_runs_without_tracking() {
        let source = Signal::new(3);
        let s = source.clone();
        let effect = ReactiveEffect::new(move || s.get());
        effect.stop();

        assert_eq!(effect.run(), 3);
        assert_eq!(effect.dep_count(), 0);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn stop_during_run_is_deferred() {
        let source = Signal::new(0);
        let slot: Rc<RefCell<Option<ReactiveEffect<()>>>> = Rc::new(RefCell::new(None));
        let (stops, on_stop) = counter();

        let (s, handle) = (source.clone(), slot.clone());
        let effect = ReactiveEffect::new(move || {
            s.get();
            if let Some(me) = handle.borrow().as_ref() {
                me.stop();
                // Still running: nothing torn down yet.
                assert!(me.is_active());
            }
        });
        effect.set_on_stop(move || on_stop.set(on_stop.get() + 1));
        *slot.borrow_mut() = Some(effect.clone());

        effect.run();
        assert!(!effect.is_active());
        assert_eq!(stops.get(), 1);
        assert_eq!(source.subscriber_count(), 0);
        slot.borrow_mut().take();
    }

    #[test]
    fn sibling_stopped_mid_trigger_does_not_rerun() {
        let source = Signal::new(0);
        let (runs, inner) = counter();
        let slot: Rc<RefCell<Option<ReactiveEffect<()>>>> = Rc::new(RefCell::new(None));

        let (s, target) = (source.clone(), slot.clone());
        let _stopper = effect(move || {
            if s.get() == 1 {
                if let Some(other) = target.borrow().as_ref() {
                    other.stop();
                }
            }
        });
        let s = source.clone();
        let victim = effect(move || {
            s.get();
            inner.set(inner.get() + 1);
        });
        *slot.borrow_mut() = Some(victim.clone());
        assert_eq!(runs.get(), 1);

        source.set(1);
        assert!(!victim.is_active());
        assert_eq!(victim.dirty_level(), DirtyLevel::NotDirty);
        assert_eq!(runs.get(), 1);
        slot.borrow_mut().take();
    }

    #[test]
    fn self_write_does_not_recurse_by_default() {
        let source = Signal::new(0);
        let (runs, inner) = counter();

        let s = source.clone();
        let effect = ReactiveEffect::new(move || {
            inner.set(inner.get() + 1);
            let v = s.get();
            if v < 5 {
                s.set(v + 1);
            }
        });
        effect.run();
        assert_eq!(runs.get(), 1);
        assert_eq!(source.get_untracked(), 1);
    }

    #[test]
    fn paused_tracking_records_nothing() {
        let source = Signal::new(0);
        let s = source.clone();
        let effect = ReactiveEffect::new(move || {
            pause_tracking();
            s.get();
            reset_tracking();
        });
        effect.run();
        assert_eq!(effect.dep_count(), 0);
    }

    #[test]
    fn debugger_hooks_fire() {
        let source = Signal::new(0);
        let tracks = Rc::new(RefCell::new(Vec::new()));
        let triggers = Rc::new(RefCell::new(Vec::new()));

        let s = source.clone();
        let effect = ReactiveEffect::new(move || {
            s.get();
        });
        let (t, g) = (tracks.clone(), triggers.clone());
        effect.set_on_track(move |event| t.borrow_mut().push(event.clone()));
        effect.set_on_trigger(move |event| g.borrow_mut().push(event.clone()));
        effect.run();
        source.set(1);

        assert_eq!(tracks.borrow().len(), 2);
        assert_eq!(triggers.borrow().len(), 1);
        let info = triggers.borrow()[0].info.clone().unwrap();
        assert_eq!(info.operation, Operation::Set);
    }

    #[test]
    fn panicking_body_leaves_graph_consistent() {
        let source = Signal::new(0);
        let s = source.clone();
        let effect = ReactiveEffect::new(move || {
            if s.get() == 1 {
                panic!("boom");
            }
        });
        effect.run();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| source.set(1)));
        assert!(result.is_err());
        assert!(!effect.is_running());
        assert!(runtime::active_effect().is_none());
        assert_eq!(effect.dep_count(), 1);

        source.set(2);
        assert_eq!(effect.dirty_level(), DirtyLevel::NotDirty);
    }

    #[test]
    fn effect_helper_runs_immediately_and_owns_itself() {
        let source = Signal::new(0);
        let seen = Rc::new(Cell::new(-1));

        let (s, out) = (source.clone(), seen.clone());
        let handle = effect(move || out.set(s.get()));
        assert_eq!(seen.get(), 0);

        let stopper = handle.clone();
        drop(handle);
        source.set(4);
        assert_eq!(seen.get(), 4);

        stopper.stop();
        source.set(5);
        assert_eq!(seen.get(), 4);
    }

    #[test]
    fn dropping_the_last_handle_detaches() {
        let source = Signal::new(0);
        let s = source.clone();
        let effect = ReactiveEffect::new(move || {
            s.get();
        });
        effect.run();
        assert_eq!(source.subscriber_count(), 1);

        drop(effect);
        assert_eq!(source.subscriber_count(), 0);
    }
}
