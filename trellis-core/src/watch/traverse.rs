//! Deep traversal for `deep` watchers.
//!
//! A deep watcher must be notified when any cell nested inside the watched
//! value changes. Traversing the value inside the watcher's effect reads
//! every nested cell, which subscribes the effect to all of them.
//!
//! Plain data has nothing to track, so the default method is a no-op.
//! Containers forward to their elements; cells read themselves and recurse.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::reactive::{Computed, CustomRef, Signal};

/// Cells already visited in one traversal, so shared and cyclic structures
/// are walked once.
#[derive(Debug, Default)]
pub struct Seen(HashSet<*const ()>);

impl Seen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `ptr` is seen.
    pub fn insert(&mut self, ptr: *const ()) -> bool {
        self.0.insert(ptr)
    }
}

/// A value whose nested cells can be read for tracking.
pub trait Traverse {
    fn traverse(&self, _seen: &mut Seen) {}
}

/// Read every cell reachable from `value`.
pub fn traverse<T: Traverse + ?Sized>(value: &T) {
    value.traverse(&mut Seen::new());
}

macro_rules! leaf {
    ($($ty:ty),* $(,)?) => {
        $(impl Traverse for $ty {})*
    };
}

leaf!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, &'static str,
);

impl<T: Traverse + 'static> Traverse for Signal<T> {
    fn traverse(&self, seen: &mut Seen) {
        if seen.insert(self.as_ptr()) {
            self.with(|value| value.traverse(seen));
        }
    }
}

impl<T> Traverse for Computed<T>
where
    T: Traverse + PartialEq + 'static,
{
    fn traverse(&self, seen: &mut Seen) {
        if seen.insert(self.as_ptr()) {
            // A computed that cannot produce a value has nothing nested.
            let _ = self.with(|value| value.traverse(seen));
        }
    }
}

impl<T: Traverse + 'static> Traverse for CustomRef<T> {
    fn traverse(&self, seen: &mut Seen) {
        self.get().traverse(seen);
    }
}

impl<T: Traverse> Traverse for Option<T> {
    fn traverse(&self, seen: &mut Seen) {
        if let Some(value) = self {
            value.traverse(seen);
        }
    }
}

impl<T: Traverse + ?Sized> Traverse for Box<T> {
    fn traverse(&self, seen: &mut Seen) {
        (**self).traverse(seen);
    }
}

impl<T: Traverse + ?Sized> Traverse for Rc<T> {
    fn traverse(&self, seen: &mut Seen) {
        (**self).traverse(seen);
    }
}

impl<T: Traverse> Traverse for [T] {
    fn traverse(&self, seen: &mut Seen) {
        for item in self {
            item.traverse(seen);
        }
    }
}

impl<T: Traverse> Traverse for Vec<T> {
    fn traverse(&self, seen: &mut Seen) {
        self.as_slice().traverse(seen);
    }
}

impl<T: Traverse> Traverse for VecDeque<T> {
    fn traverse(&self, seen: &mut Seen) {
        for item in self {
            item.traverse(seen);
        }
    }
}

impl<T: Traverse, S> Traverse for HashSet<T, S> {
    fn traverse(&self, seen: &mut Seen) {
        for item in self {
            item.traverse(seen);
        }
    }
}

impl<T: Traverse> Traverse for BTreeSet<T> {
    fn traverse(&self, seen: &mut Seen) {
        for item in self {
            item.traverse(seen);
        }
    }
}

impl<K, V: Traverse, S> Traverse for HashMap<K, V, S> {
    fn traverse(&self, seen: &mut Seen) {
        for value in self.values() {
            value.traverse(seen);
        }
    }
}

impl<K, V: Traverse> Traverse for BTreeMap<K, V> {
    fn traverse(&self, seen: &mut Seen) {
        for value in self.values() {
            value.traverse(seen);
        }
    }
}

impl<K, V: Traverse, S> Traverse for IndexMap<K, V, S> {
    fn traverse(&self, seen: &mut Seen) {
        for value in self.values() {
            value.traverse(seen);
        }
    }
}

macro_rules! tuple {
    ($($name:ident),+) => {
        impl<$($name: Traverse),+> Traverse for ($($name,)+) {
            #[allow(non_snake_case)]
            fn traverse(&self, seen: &mut Seen) {
                let ($($name,)+) = self;
                $($name.traverse(seen);)+
            }
        }
    };
}

tuple!(A);
tuple!(A, B);
tuple!(A, B, C);
tuple!(A, B, C, D);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ReactiveEffect;

    #[test]
    fn traversal_tracks_nested_signals() {
        let leaves = vec![Signal::new(1), Signal::new(2)];
        let root = Signal::new(leaves.clone());

        let r = root.clone();
        let effect = ReactiveEffect::new(move || traverse(&r));
        effect.run();

        assert_eq!(effect.dep_count(), 3);
        assert!(leaves.iter().all(|leaf| leaf.subscriber_count() == 1));
    }

    #[test]
    fn shared_cells_are_visited_once() {
        let shared = Signal::new(0);
        let pair = (shared.clone(), shared.clone());
        let mut seen = Seen::new();
        pair.traverse(&mut seen);
        assert!(!seen.insert(shared.as_ptr()));
    }

    #[test]
    fn maps_traverse_values() {
        let mut map = IndexMap::new();
        map.insert("a", Signal::new(1));
        let root = Signal::new(map);

        let r = root.clone();
        let effect = ReactiveEffect::new(move || traverse(&r));
        effect.run();
        assert_eq!(effect.dep_count(), 2);
    }
}
