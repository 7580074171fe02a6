//! Order-property probes: where does a sequence stop being sorted, or stop
//! being a max-heap. Both reduce to a lowest-violation search over adjacent
//! or parent/child pairs.

use super::Policy;
use super::search::lowest_position;

/// Length of the longest sorted prefix under `less`. Returns `v.len()` when
/// the whole slice is sorted.
pub fn is_sorted_until<T, F>(policy: Policy, v: &[T], less: F) -> usize
where
    T: Sync,
    F: Fn(&T, &T) -> bool + Sync,
{
    let positions = v.len().saturating_sub(1);
    match lowest_position(policy, positions, "is_sorted_until", |pos| {
        less(&v[pos + 1], &v[pos])
    }) {
        Some(pos) => pos + 1,
        None => v.len(),
    }
}

/// Length of the longest prefix that is a max-heap under `less`. Returns
/// `v.len()` when the whole slice is a heap.
pub fn is_heap_until<T, F>(policy: Policy, v: &[T], less: F) -> usize
where
    T: Sync,
    F: Fn(&T, &T) -> bool + Sync,
{
    let positions = v.len().saturating_sub(1);
    match lowest_position(policy, positions, "is_heap_until", |pos| {
        let child = pos + 1;
        less(&v[(child - 1) / 2], &v[child])
    }) {
        Some(pos) => pos + 1,
        None => v.len(),
    }
}
