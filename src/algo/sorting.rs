//! Sorting entry points.
//!
//! Unlike the chunk-claiming algorithms, sorting does not plan a [`Team`]
//! here; the work-stealing unstable sort and the merge-tree stable sort carry
//! their own scheduling. This module only gates on the policy and the pool,
//! and falls back to the serial sorts when parallel setup reports
//! [`Exhausted`].
//!
//! [`Team`]: crate::partition::Team

use core::cmp::Ordering;

use crate::config::MIN_PARALLEL_LEN;
use crate::merge::parallel_stable_sort;
use crate::merge::stable_sort_serial;
use crate::pool::pool;
use crate::resource::Exhausted;
use crate::sort::parallel_sort;
use crate::sort::sort_serial;

use super::Policy;
use super::fall_back;

/// Sorts `v` in ascending order. Not stable.
pub fn sort<T>(policy: Policy, v: &mut [T])
where
    T: Ord + Send,
{
    sort_with(policy, v, &|a: &T, b: &T| a < b);
}

/// Sorts `v` by the ordering `compare` defines. Not stable.
pub fn sort_by<T, F>(policy: Policy, v: &mut [T], compare: F)
where
    T: Send,
    F: Fn(&T, &T) -> Ordering + Sync,
{
    sort_with(policy, v, &|a: &T, b: &T| compare(a, b) == Ordering::Less);
}

fn sort_with<T, F>(policy: Policy, v: &mut [T], is_less: &F)
where
    T: Send,
    F: Fn(&T, &T) -> bool + Sync,
{
    if policy.is_par() && v.len() >= MIN_PARALLEL_LEN {
        let workers = pool().size();
        if workers > 0 {
            match parallel_sort(v, is_less, workers, pool()) {
                Ok(()) => return,
                Err(Exhausted) => fall_back("sort"),
            }
        }
    }
    sort_serial(v, is_less);
}

/// Sorts `v` in ascending order, preserving the relative order of equal
/// elements.
pub fn stable_sort<T>(policy: Policy, v: &mut [T])
where
    T: Ord + Send,
{
    stable_sort_with(policy, v, &|a: &T, b: &T| a < b);
}

/// Sorts `v` by the ordering `compare` defines, preserving the relative
/// order of elements `compare` considers equal.
pub fn stable_sort_by<T, F>(policy: Policy, v: &mut [T], compare: F)
where
    T: Send,
    F: Fn(&T, &T) -> Ordering + Sync,
{
    stable_sort_with(policy, v, &|a: &T, b: &T| compare(a, b) == Ordering::Less);
}

fn stable_sort_with<T, F>(policy: Policy, v: &mut [T], is_less: &F)
where
    T: Send,
    F: Fn(&T, &T) -> bool + Sync,
{
    if policy.is_par() && v.len() >= MIN_PARALLEL_LEN {
        let workers = pool().size();
        if workers > 0 {
            match parallel_stable_sort(v, is_less, workers, pool()) {
                Ok(()) => return,
                Err(Exhausted) => fall_back("stable_sort"),
            }
        }
    }
    stable_sort_serial(v, is_less);
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    const POLICIES: [Policy; 3] = [Policy::Seq, Policy::Par, Policy::ParUnseq];

    fn scrambled(len: usize) -> Vec<u64> {
        let mut state = 0x2545_f491_4f6c_dd1du64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state
            })
            .collect()
    }

    #[test]
    fn sort_matches_the_standard_library() {
        for policy in POLICIES {
            let mut v = scrambled(80_000);
            let mut expected = v.clone();
            expected.sort_unstable();
            sort(policy, &mut v);
            assert_eq!(v, expected);
        }
    }

    #[test]
    fn sort_by_honors_the_comparator() {
        let mut v = scrambled(40_000);
        let mut expected = v.clone();
        expected.sort_unstable_by(|a, b| b.cmp(a));
        sort_by(Policy::Par, &mut v, |a, b| b.cmp(a));
        assert_eq!(v, expected);
    }

    #[test]
    fn stable_sort_preserves_insertion_order_of_equal_keys() {
        for policy in POLICIES {
            let mut v: Vec<(u8, usize)> = scrambled(60_000)
                .into_iter()
                .enumerate()
                .map(|(index, key)| ((key % 16) as u8, index))
                .collect();
            stable_sort_by(policy, &mut v, |a, b| a.0.cmp(&b.0));
            for pair in v.windows(2) {
                assert!(pair[0].0 <= pair[1].0);
                if pair[0].0 == pair[1].0 {
                    assert!(pair[0].1 < pair[1].1);
                }
            }
        }
    }

    #[test]
    fn tiny_and_degenerate_inputs() {
        for policy in POLICIES {
            let mut empty: Vec<u32> = Vec::new();
            sort(policy, &mut empty);
            stable_sort(policy, &mut empty);
            let mut one = [3u32];
            sort(policy, &mut one);
            let mut two = [9u32, 1];
            stable_sort(policy, &mut two);
            assert_eq!(two, [1, 9]);
        }
    }
}
