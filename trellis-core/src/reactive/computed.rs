//! Computed Implementation
//!
//! A [`Computed`] is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. On first access, the computed runs its getter and caches the result.
//!
//! 2. When a cell it read is written, its inner effect becomes `Dirty` and
//!    it tells its own subscribers they are `MaybeDirty`.
//!
//! 3. When a subscriber then needs to know whether it is really stale, it
//!    asks the computed to refresh. The computed recomputes only if it is
//!    dirty itself (resolving its own upstream computeds first).
//!
//! 4. If the recomputed value is the same as the cached one, nothing is
//!    propagated: downstream computeds and effects stay clean.
//!
//! # Why This Matters
//!
//! A write deep in a chain of computeds only rebuilds the links whose inputs
//! actually changed, and computeds that are never read never run.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::dep::{Dep, Trackable};
use super::effect::{track, trigger_effects, DebugInfo, DirtyLevel, EffectCore, Operation, ReactiveEffect, TriggerOrigin};
use super::equality::same_value;
use super::runtime::SchedulingPause;
use crate::error::{self, ReactiveError, Result};

/// Lets a dirty check reach a computed without knowing its value type.
pub(crate) trait ComputedSource {
    /// Bring the cached value up to date, announcing a change if there was
    /// one.
    fn refresh(&self);
}

type Setter<T> = Box<dyn Fn(T)>;

struct ComputedInner<T: 'static> {
    effect: ReactiveEffect<T>,
    value: RefCell<Option<T>>,
    dep: Dep,
    setter: Option<Setter<T>>,
}

impl<T> ComputedInner<T>
where
    T: PartialEq + 'static,
{
    fn refresh_value(&self) {
        let core = self.effect.core();
        if !core.is_dirty() {
            return;
        }
        let _restore = DirtyOnUnwind(core);
        let new_value = self.effect.run();
        let changed = match &*self.value.borrow() {
            Some(old) => !same_value(old, &new_value),
            None => true,
        };
        *self.value.borrow_mut() = Some(new_value);
        if changed {
            trigger_effects(&self.dep, DirtyLevel::Dirty, TriggerOrigin::ComputedValue, None);
        }
    }
}

impl<T> ComputedSource for ComputedInner<T>
where
    T: PartialEq + 'static,
{
    fn refresh(&self) {
        self.refresh_value();
    }
}

/// A getter that panicked leaves the computed dirty, so the next read
/// retries instead of serving the old value as fresh.
struct DirtyOnUnwind<'a>(&'a Rc<EffectCore>);

impl Drop for DirtyOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.set_dirty_level(DirtyLevel::Dirty);
        }
    }
}

/// A lazily evaluated, cached derived value.
///
/// Cloning a `Computed` yields another handle to the same cache.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(2);
/// let c = count.clone();
/// let doubled = Computed::new(move || c.get() * 2);
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T: 'static>(Rc<ComputedInner<T>>);

impl<T> Computed<T>
where
    T: PartialEq + 'static,
{
    /// Create a readonly computed. The getter does not run until the first
    /// read.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(Rc::new(getter), None)
    }

    /// Create a computed whose writes are forwarded to `setter`.
    pub fn with_setter<F, S>(getter: F, setter: S) -> Self
    where
        F: Fn() -> T + 'static,
        S: Fn(T) + 'static,
    {
        Self::build(Rc::new(getter), Some(Box::new(setter)))
    }

    fn build(getter: Rc<dyn Fn() -> T>, setter: Option<Setter<T>>) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let source: Weak<dyn ComputedSource> = weak.clone();
            let dep = Dep::for_computed(source);
            let subscribers = dep.clone();
            let effect = ReactiveEffect::for_computed(getter, move || {
                trigger_effects(&subscribers, DirtyLevel::MaybeDirty, TriggerOrigin::Write, None);
            });
            ComputedInner {
                effect,
                value: RefCell::new(None),
                dep,
                setter,
            }
        });
        Self(inner)
    }

    /// Read the value, recomputing it first if it is stale.
    ///
    /// # Panics
    ///
    /// Panics if the getter reads this computed before it has ever produced
    /// a value. Use [`try_get`](Self::try_get) to handle that case.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Read the value, reporting a self-referential first evaluation as
    /// [`ReactiveError::CyclicComputed`].
    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the value, recomputing it first if it is stale.
    ///
    /// Effect reruns caused by writes inside `f` wait until the borrow is
    /// released. Reading this computed again from `f` after such a write
    /// panics.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        track(&self.0.dep, Some(&DebugInfo::with_key(Operation::Get, "value")));
        self.0.refresh_value();
        let _pause = SchedulingPause::enter();
        let value = self.0.value.borrow();
        let result = match value.as_ref() {
            Some(value) => Ok(f(value)),
            None => Err(ReactiveError::CyclicComputed),
        };
        drop(value);
        result
    }

    /// Read without tracking; still recomputes if stale.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        super::untracked(|| self.get())
    }

    /// Write through the setter. On a readonly computed this is reported
    /// and ignored.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            error::warn(&err);
        }
    }

    pub fn try_set(&self, value: T) -> Result<()> {
        match &self.0.setter {
            Some(setter) => {
                setter(value);
                Ok(())
            }
            None => Err(ReactiveError::ReadonlyComputed),
        }
    }

    pub fn is_readonly(&self) -> bool {
        self.0.setter.is_none()
    }

    /// Dirty level of the inner effect.
    pub fn dirty_level(&self) -> DirtyLevel {
        self.0.effect.dirty_level()
    }

    /// Stop the inner effect. The cached value is kept and never refreshed
    /// by writes again.
    pub fn stop(&self) {
        self.0.effect.stop();
    }

    /// Number of effects reading this computed.
    pub fn subscriber_count(&self) -> usize {
        self.0.dep.len()
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.0.value.borrow().is_some()
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl<T: 'static> Trackable for Computed<T> {
    fn dep(&self) -> &Dep {
        &self.0.dep
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

/// Handles compare by identity.
impl<T: 'static> PartialEq for Computed<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> fmt::Debug for Computed<T>
where
    T: fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("value", &self.0.value.borrow())
            .field("dirty_level", &self.0.effect.dirty_level())
            .field("subscribers", &self.0.dep.len())
            .finish()
    }
}

/// Create a readonly computed.
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Computed::new(getter)
}

/// Create a writable computed.
pub fn computed_with_setter<T, F, S>(getter: F, setter: S) -> Computed<T>
where
    T: PartialEq + 'static,
    F: Fn() -> T + 'static,
    S: Fn(T) + 'static,
{
    Computed::with_setter(getter, setter)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
