//! Signal Implementation
//!
//! A Signal is the fundamental observable cell. It holds a value and a
//! dependency record.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a running effect, the signal's dep
//!    records that effect as a subscriber.
//!
//! 2. When a signal's value changes, the dep is triggered.
//!
//! 3. Triggering marks subscribers dirty and schedules their reruns.
//!
//! [`CustomRef`] is the manual variant: the user decides when reads are
//! tracked and when writes trigger.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::dep::{Dep, Trackable};
use super::effect::{track, trigger, DebugInfo, DirtyLevel, Operation};
use super::equality::same_value;

/// Counter for generating unique signal IDs.
static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique signal ID.
fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct SignalInner<T> {
    id: u64,
    value: RefCell<T>,
    dep: Dep,
    shallow: bool,
}

/// A reactive cell holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// ```
pub struct Signal<T: 'static>(Rc<SignalInner<T>>);

impl<T: 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self::build(value, false)
    }

    /// Create a signal whose writes always trigger, even when the new value
    /// equals the old one. Watchers of a shallow signal fire on every write.
    pub fn shallow(value: T) -> Self {
        Self::build(value, true)
    }

    fn build(value: T, shallow: bool) -> Self {
        Self(Rc::new(SignalInner {
            id: next_signal_id(),
            value: RefCell::new(value),
            dep: Dep::new(),
            shallow,
        }))
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn is_shallow(&self) -> bool {
        self.0.shallow
    }

    fn track(&self) {
        track(&self.0.dep, Some(&DebugInfo::with_key(Operation::Get, "value")));
    }

    fn trigger(&self) {
        trigger(
            &self.0.dep,
            DirtyLevel::Dirty,
            Some(&DebugInfo::with_key(Operation::Set, "value")),
        );
    }

    /// Get the current value, tracking the read.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.0.value.borrow().clone()
    }

    /// Borrow the current value, tracking the read.
    ///
    /// The value stays borrowed while `f` runs; writing this signal from
    /// inside `f` panics.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.0.value.borrow())
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.0.value.borrow().clone()
    }

    /// Set a new value and notify subscribers.
    ///
    /// Writing a value equal to the current one is a no-op, unless the
    /// signal is shallow.
    pub fn set(&self, value: T)
    where
        T: PartialEq,
    {
        if !self.0.shallow && same_value(&*self.0.value.borrow(), &value) {
            return;
        }
        *self.0.value.borrow_mut() = value;
        self.trigger();
    }

    /// Mutate the value in place. Always notifies subscribers.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        f(&mut self.0.value.borrow_mut());
        self.trigger();
    }

    /// Notify subscribers without changing the value.
    pub fn notify(&self) {
        self.trigger();
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.0.dep.len()
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl<T: 'static> Trackable for Signal<T> {
    fn dep(&self) -> &Dep {
        &self.0.dep
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

/// Handles compare by identity, not by value.
impl<T: 'static> PartialEq for Signal<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Debug for Signal<T>
where
    T: Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.0.id)
            .field("value", &self.0.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Create a signal.
pub fn signal<T: 'static>(value: T) -> Signal<T> {
    Signal::new(value)
}

/// Trigger the record of any trackable cell, as if it had been written.
pub fn trigger_ref<R: Trackable + ?Sized>(cell: &R) {
    trigger(
        cell.dep(),
        DirtyLevel::Dirty,
        Some(&DebugInfo::with_key(Operation::Set, "value")),
    );
}

// ----------------------------------------------------------------------------
// Custom refs
// ----------------------------------------------------------------------------

/// Tracking hooks handed to a [`custom_ref`] factory.
#[derive(Clone, Debug)]
pub struct RefHooks {
    dep: Dep,
}

impl RefHooks {
    /// Record a read. A no-op when no effect is running.
    pub fn track(&self) {
        track(&self.dep, Some(&DebugInfo::with_key(Operation::Get, "value")));
    }

    /// Notify readers of a change.
    pub fn trigger(&self) {
        trigger(
            &self.dep,
            DirtyLevel::Dirty,
            Some(&DebugInfo::with_key(Operation::Set, "value")),
        );
    }
}

/// A cell whose tracking and triggering are controlled by user code, e.g.
/// to debounce writes.
pub struct CustomRef<T: 'static> {
    dep: Dep,
    getter: Rc<dyn Fn() -> T>,
    setter: Rc<dyn Fn(T)>,
}

impl<T: 'static> CustomRef<T> {
    pub fn get(&self) -> T {
        (self.getter)()
    }

    pub fn set(&self, value: T) {
        (self.setter)(value);
    }
}

impl<T: 'static> Trackable for CustomRef<T> {
    fn dep(&self) -> &Dep {
        &self.dep
    }
}

impl<T: 'static> Clone for CustomRef<T> {
    fn clone(&self) -> Self {
        Self {
            dep: self.dep.clone(),
            getter: Rc::clone(&self.getter),
            setter: Rc::clone(&self.setter),
        }
    }
}

impl<T: 'static> Debug for CustomRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRef").field("dep", &self.dep).finish()
    }
}

/// Build a [`CustomRef`] from a factory returning its getter and setter.
///
/// ```rust,ignore
/// let value = Rc::new(Cell::new(0));
/// let r = custom_ref(|hooks| {
///     let (read, write) = (value.clone(), value.clone());
///     let h = hooks.clone();
///     (
///         move || { hooks.track(); read.get() },
///         move |v| { write.set(v); h.trigger(); },
///     )
/// });
/// ```
pub fn custom_ref<T, F, G, S>(factory: F) -> CustomRef<T>
where
    T: 'static,
    F: FnOnce(RefHooks) -> (G, S),
    G: Fn() -> T + 'static,
    S: Fn(T) + 'static,
{
    let dep = Dep::new();
    let (getter, setter) = factory(RefHooks { dep: dep.clone() });
    CustomRef {
        dep,
        getter: Rc::new(getter),
        setter: Rc::new(setter),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
