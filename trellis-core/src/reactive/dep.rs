//! Dependency Records
//!
//! A [`Dep`] is the subscriber set of one observable cell. Reading the cell
//! inside a running effect calls [`track`](super::track) with its dep; writing
//! it calls [`trigger`](super::trigger).
//!
//! Subscribers are kept in insertion order so that notification order is
//! deterministic. Each entry carries the `track_id` of the effect run that
//! last confirmed it, which is how stale subscriptions are detected without
//! diffing dependency sets.
//!
//! Subscriptions hold weak references. A dep never keeps an effect alive.

use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::computed::ComputedSource;
use super::effect::EffectCore;
use super::SubscriberId;

struct Subscription {
    effect: Weak<EffectCore>,
    track_id: u64,
}

struct DepInner {
    subscribers: std::cell::RefCell<IndexMap<SubscriberId, Subscription>>,
    on_empty: Option<Box<dyn Fn()>>,
    computed: Option<Weak<dyn ComputedSource>>,
}

/// The set of effects subscribed to one observable cell.
///
/// Cloning a `Dep` yields another handle to the same record.
#[derive(Clone)]
pub struct Dep(Rc<DepInner>);

impl Dep {
    /// Create an empty dependency record.
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// Create a record whose `on_empty` callback runs every time the last
    /// subscriber leaves.
    pub fn with_on_empty<F>(on_empty: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::build(Some(Box::new(on_empty)), None)
    }

    /// Record owned by a computed, so that dirty checks can ask the computed
    /// to resolve itself.
    pub(crate) fn for_computed(computed: Weak<dyn ComputedSource>) -> Self {
        Self::build(None, Some(computed))
    }

    fn build(on_empty: Option<Box<dyn Fn()>>, computed: Option<Weak<dyn ComputedSource>>) -> Self {
        Self(Rc::new(DepInner {
            subscribers: std::cell::RefCell::new(IndexMap::new()),
            on_empty,
            computed,
        }))
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.0.subscribers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the given effect is currently subscribed.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.0.subscribers.borrow().contains_key(&id)
    }

    /// Whether both handles point at the same record.
    pub fn ptr_eq(&self, other: &Dep) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Whether this record belongs to a computed.
    pub fn is_computed(&self) -> bool {
        self.0.computed.is_some()
    }

    pub(crate) fn computed(&self) -> Option<Rc<dyn ComputedSource>> {
        self.0.computed.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn track_id_of(&self, id: SubscriberId) -> Option<u64> {
        self.0
            .subscribers
            .borrow()
            .get(&id)
            .map(|sub| sub.track_id)
    }

    /// Subscribe `effect` (or refresh its stamp). An existing subscriber keeps
    /// its position.
    pub(crate) fn stamp(&self, effect: &Rc<EffectCore>, track_id: u64) {
        self.0.subscribers.borrow_mut().insert(
            effect.id(),
            Subscription {
                effect: Rc::downgrade(effect),
                track_id,
            },
        );
    }

    /// Remove a subscriber. Runs `on_empty` if it was the last one.
    pub(crate) fn remove(&self, id: SubscriberId) {
        let emptied = {
            let mut subscribers = self.0.subscribers.borrow_mut();
            subscribers.shift_remove(&id).is_some() && subscribers.is_empty()
        };
        if emptied {
            if let Some(on_empty) = &self.0.on_empty {
                on_empty();
            }
        }
    }

    /// Snapshot of the live subscribers in notification order.
    pub(crate) fn subscribers(&self) -> SmallVec<[Rc<EffectCore>; 8]> {
        self.0
            .subscribers
            .borrow()
            .values()
            .filter_map(|sub| sub.effect.upgrade())
            .collect()
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("subscribers", &self.len())
            .field("computed", &self.is_computed())
            .finish()
    }
}

/// Create a dependency record, optionally with an `on_empty` callback.
pub fn new_dependency_record(on_empty: Option<Box<dyn Fn()>>) -> Dep {
    Dep::build(on_empty, None)
}

/// Anything backed by a dependency record.
///
/// Cells expose their record through this capability instead of hidden
/// marker fields, so adapters can track and trigger them uniformly.
pub trait Trackable {
    /// The record readers subscribe to.
    fn dep(&self) -> &Dep;
}

impl Trackable for Dep {
    fn dep(&self) -> &Dep {
        self
    }
}
