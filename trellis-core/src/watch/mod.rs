//! Watchers
//!
//! A watcher is an effect whose reruns are handed to the scheduler as a job.
//! The job re-reads the source, compares the new value with the previous
//! one, and calls the user callback only when it changed.
//!
//! # Flush Timing
//!
//! - [`FlushMode::Sync`]: the job runs as soon as the triggering write
//!   completes.
//! - [`FlushMode::Deferred`] (default): the job is queued and runs on the
//!   next tick, once per tick however many writes happened.
//! - [`FlushMode::Post`]: like deferred, but after the main queue drains.
//!
//! # Ownership
//!
//! A watcher keeps itself alive until it is stopped, through its
//! [`WatchHandle`] or the scope it was created in. Dropping the handle does
//! not stop it.

mod traverse;

pub use traverse::{traverse, Seen, Traverse};

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::reactive::{has_changed, Computed, CustomRef, EffectCore, ReactiveEffect, Signal};
use crate::scheduler::{queue_job, queue_post_flush_job, SchedulerJob};

/// When a triggered watcher runs its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Synchronously, right after the triggering write.
    Sync,
    /// On the next tick.
    #[default]
    Deferred,
    /// On the next tick, after the main job queue.
    Post,
}

/// Options for [`watch`] and [`watch_many`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Call the callback once on creation, with no old value.
    pub immediate: bool,
    /// Track every cell nested in the value, and fire on every change.
    pub deep: bool,
    pub flush: FlushMode,
    /// Stop after the first callback.
    pub once: bool,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn flush(mut self, flush: FlushMode) -> Self {
        self.flush = flush;
        self
    }

    /// Shorthand for `flush(FlushMode::Sync)`.
    pub fn sync(self) -> Self {
        self.flush(FlushMode::Sync)
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

/// Something a watcher can read.
pub enum WatchSource<T: 'static> {
    Signal(Signal<T>),
    Computed(Computed<T>),
    Custom(CustomRef<T>),
    Getter(Rc<dyn Fn() -> T>),
}

impl<T: 'static> WatchSource<T> {
    /// A source computed by an arbitrary getter.
    pub fn getter<F>(getter: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::Getter(Rc::new(getter))
    }

    fn read(&self) -> T
    where
        T: Clone + PartialEq,
    {
        match self {
            Self::Signal(signal) => signal.get(),
            Self::Computed(computed) => computed.get(),
            Self::Custom(custom) => custom.get(),
            Self::Getter(getter) => getter(),
        }
    }

    /// Shallow signals notify on every write, so their watchers must fire
    /// even when the value compares equal.
    fn forces_trigger(&self) -> bool {
        matches!(self, Self::Signal(signal) if signal.is_shallow())
    }
}

impl<T: 'static> Clone for WatchSource<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Signal(signal) => Self::Signal(signal.clone()),
            Self::Computed(computed) => Self::Computed(computed.clone()),
            Self::Custom(custom) => Self::Custom(custom.clone()),
            Self::Getter(getter) => Self::Getter(Rc::clone(getter)),
        }
    }
}

impl<T: 'static> fmt::Debug for WatchSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Signal(_) => "Signal",
            Self::Computed(_) => "Computed",
            Self::Custom(_) => "Custom",
            Self::Getter(_) => "Getter",
        };
        f.debug_tuple("WatchSource").field(&kind).finish()
    }
}

impl<T: 'static> From<Signal<T>> for WatchSource<T> {
    fn from(signal: Signal<T>) -> Self {
        Self::Signal(signal)
    }
}

impl<T: 'static> From<&Signal<T>> for WatchSource<T> {
    fn from(signal: &Signal<T>) -> Self {
        Self::Signal(signal.clone())
    }
}

impl<T: 'static> From<Computed<T>> for WatchSource<T> {
    fn from(computed: Computed<T>) -> Self {
        Self::Computed(computed)
    }
}

impl<T: 'static> From<CustomRef<T>> for WatchSource<T> {
    fn from(custom: CustomRef<T>) -> Self {
        Self::Custom(custom)
    }
}

/// Slot for the cleanup a watcher callback registers.
///
/// The cleanup runs before the next callback, or when the watcher stops,
/// whichever comes first.
#[derive(Clone, Default)]
pub struct OnCleanup(Rc<RefCell<Option<Box<dyn FnOnce()>>>>);

impl OnCleanup {
    /// Register `cleanup`, replacing any previous one.
    pub fn register<F>(&self, cleanup: F)
    where
        F: FnOnce() + 'static,
    {
        *self.0.borrow_mut() = Some(Box::new(cleanup));
    }

    fn run(&self) {
        let cleanup = self.0.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

impl fmt::Debug for OnCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnCleanup")
            .field("registered", &self.0.borrow().is_some())
            .finish()
    }
}

/// Stops a watcher.
#[derive(Clone)]
pub struct WatchHandle {
    effect: Rc<EffectCore>,
}

impl WatchHandle {
    /// Stop the watcher and run its pending cleanup. Idempotent.
    pub fn stop(&self) {
        self.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("effect", &self.effect.id())
            .field("active", &self.is_active())
            .finish()
    }
}

type Callback<V> = Rc<dyn Fn(&V, Option<&V>, &OnCleanup)>;

struct Watcher<V: 'static> {
    effect: ReactiveEffect<V>,
    callback: Callback<V>,
    old: RefCell<Option<V>>,
    cleanup: OnCleanup,
    changed: fn(&V, &V) -> bool,
    force: bool,
    options: WatchOptions,
}

impl<V: Clone + 'static> Watcher<V> {
    fn job(&self) {
        let core = self.effect.core();
        if !core.is_active() || !core.is_dirty() {
            return;
        }
        let new = self.effect.run();
        let fire = self.options.deep
            || self.force
            || match &*self.old.borrow() {
                Some(old) => (self.changed)(&new, old),
                None => true,
            };
        if !fire {
            return;
        }

        self.cleanup.run();
        let old = self.old.replace(Some(new.clone()));
        (self.callback)(&new, old.as_ref(), &self.cleanup);
        if self.options.once {
            core.stop();
        }
    }
}

/// Route a watcher's reruns according to `flush`.
fn install_scheduler<J>(effect: &Rc<EffectCore>, flush: FlushMode, allow_recurse: bool, job: J)
where
    J: Fn() + 'static,
{
    let scheduler: Rc<dyn Fn()> = match flush {
        FlushMode::Sync => Rc::new(job),
        FlushMode::Deferred => {
            let job = SchedulerJob::new(job).with_allow_recurse(allow_recurse);
            Rc::new(move || queue_job(job.clone()))
        }
        FlushMode::Post => {
            let job = SchedulerJob::new(job).with_allow_recurse(allow_recurse);
            Rc::new(move || queue_post_flush_job(job.clone()))
        }
    };
    effect.set_scheduler(Some(scheduler));
}

fn create_watcher<V, G, C>(
    getter: G,
    callback: C,
    options: WatchOptions,
    force: bool,
    changed: fn(&V, &V) -> bool,
) -> WatchHandle
where
    V: Clone + Traverse + 'static,
    G: Fn() -> V + 'static,
    C: Fn(&V, Option<&V>, &OnCleanup) + 'static,
{
    let deep = options.deep;
    let effect = ReactiveEffect::with_scheduler(
        move || {
            let value = getter();
            if deep {
                traverse(&value);
            }
            value
        },
        || {},
    );

    let cleanup = OnCleanup::default();
    let on_stop = cleanup.clone();
    effect.set_on_stop(move || on_stop.run());

    let watcher = Rc::new(Watcher {
        effect: effect.clone(),
        callback: Rc::new(callback),
        old: RefCell::new(None),
        cleanup,
        changed,
        force,
        options,
    });

    let runner = Rc::clone(&watcher);
    install_scheduler(effect.core(), options.flush, true, move || runner.job());

    if options.immediate {
        watcher.job();
    } else {
        *watcher.old.borrow_mut() = Some(effect.run());
    }

    tracing::trace!(target: "trellis::reactive", effect = %effect.id(), ?options, "watcher created");
    WatchHandle {
        effect: Rc::clone(effect.core()),
    }
}

/// Watch one source and call `callback(new, old, on_cleanup)` when its value
/// changes.
///
/// ```rust,ignore
/// let count = Signal::new(0);
/// let handle = watch(&count, |new, old, _| println!("{old:?} -> {new}"), WatchOptions::new().sync());
/// count.set(1); // prints "Some(0) -> 1"
/// handle.stop();
/// ```
pub fn watch<T, S, C>(source: S, callback: C, options: WatchOptions) -> WatchHandle
where
    T: Clone + PartialEq + Traverse + 'static,
    S: Into<WatchSource<T>>,
    C: Fn(&T, Option<&T>, &OnCleanup) + 'static,
{
    let source = source.into();
    let force = source.forces_trigger();
    create_watcher(move || source.read(), callback, options, force, has_changed)
}

/// Watch several sources at once. The callback receives the values in source
/// order and fires when any of them changes.
pub fn watch_many<T, C>(sources: Vec<WatchSource<T>>, callback: C, options: WatchOptions) -> WatchHandle
where
    T: Clone + PartialEq + Traverse + 'static,
    C: Fn(&Vec<T>, Option<&Vec<T>>, &OnCleanup) + 'static,
{
    let force = sources.iter().any(WatchSource::forces_trigger);
    create_watcher(
        move || sources.iter().map(WatchSource::read).collect(),
        callback,
        options,
        force,
        any_changed,
    )
}

fn any_changed<T: PartialEq>(new: &Vec<T>, old: &Vec<T>) -> bool {
    new.len() != old.len() || new.iter().zip(old).any(|(a, b)| has_changed(a, b))
}

/// Run `body` now and again whenever something it read changes.
///
/// The cleanup registered through the `OnCleanup` argument runs before each
/// rerun and when the watcher stops.
pub fn watch_effect<F>(body: F, flush: FlushMode) -> WatchHandle
where
    F: Fn(&OnCleanup) + 'static,
{
    let cleanup = OnCleanup::default();
    let slot = cleanup.clone();
    let effect = ReactiveEffect::with_scheduler(
        move || {
            slot.run();
            body(&slot);
        },
        || {},
    );
    effect.set_on_stop(move || cleanup.run());

    let runner = effect.clone();
    install_scheduler(effect.core(), flush, false, move || {
        if runner.is_active() && runner.is_dirty() {
            runner.run();
        }
    });

    effect.run();
    WatchHandle {
        effect: Rc::clone(effect.core()),
    }
}

/// [`watch_effect`] with [`FlushMode::Sync`].
pub fn watch_sync_effect<F>(body: F) -> WatchHandle
where
    F: Fn(&OnCleanup) + 'static,
{
    watch_effect(body, FlushMode::Sync)
}
