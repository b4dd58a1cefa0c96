//! Value equality used to decide whether a write or a recomputation is an
//! actual change.

/// `SameValue` comparison: like `==`, except that two values which are each
/// unequal to themselves (`NaN`) are considered the same.
///
/// Signals skip writes of the same value, computeds stop propagating when
/// they recompute to the same value, and watchers only fire on change.
#[inline]
pub fn same_value<T: PartialEq + ?Sized>(a: &T, b: &T) -> bool {
    #[allow(clippy::eq_op)]
    let both_unordered = a != a && b != b;
    a == b || both_unordered
}

/// Negation of [`same_value`].
#[inline]
pub fn has_changed<T: PartialEq + ?Sized>(a: &T, b: &T) -> bool {
    !same_value(a, b)
}
