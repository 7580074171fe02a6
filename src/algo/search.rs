//! Short-circuiting searches.
//!
//! Detection races across chunks, but the reported match is always the
//! lowest-indexed (or, for [`find_end`], highest-indexed) one: the collectors
//! define the winner by position, and workers merely stop early once their
//! chunk can no longer win.

use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering;

use crate::cancel::CancelToken;
use crate::collect::HighIndex;
use crate::collect::LowIndex;
use crate::pool::BatchCtx;
use crate::resource::Exhausted;

use super::Policy;
use super::fall_back;
use super::plan;
use super::run_batch;

/// How many positions a worker scans between polls of the early-stop bound.
const POLL_BLOCK: usize = 256;

/// Finds the lowest position in `0..count` satisfying `hit`.
pub(super) fn lowest_position<P>(
    policy: Policy,
    count: usize,
    name: &'static str,
    hit: P,
) -> Option<usize>
where
    P: Fn(usize) -> bool + Sync,
{
    if let Some((team, extra)) = plan(policy, count) {
        let low = LowIndex::new();
        let work = |_: &BatchCtx<'_>| {
            while let Some(key) = team.next_key() {
                // Keys ascend, so once the bound precedes this chunk no
                // later chunk can win either.
                if low.bound() <= key.start {
                    break;
                }
                let mut pos = key.start;
                while pos < key.end() {
                    if low.bound() <= pos {
                        break;
                    }
                    let block_end = (pos + POLL_BLOCK).min(key.end());
                    if let Some(offset) = (pos..block_end).position(&hit) {
                        low.offer(pos + offset);
                        break;
                    }
                    pos = block_end;
                }
            }
        };
        match run_batch(extra, &work) {
            Ok(()) => return low.get(),
            Err(Exhausted) => fall_back(name),
        }
    }
    (0..count).find(|&pos| hit(pos))
}

/// Finds the highest position in `0..count` satisfying `hit`.
fn highest_position<P>(policy: Policy, count: usize, name: &'static str, hit: P) -> Option<usize>
where
    P: Fn(usize) -> bool + Sync,
{
    if let Some((team, extra)) = plan(policy, count) {
        let high = HighIndex::new();
        let work = |_: &BatchCtx<'_>| {
            while let Some(key) = team.next_key() {
                // Higher chunks may still improve the answer, so keep
                // claiming; only skip chunks the bound already covers.
                if high.bound() >= Some(key.end() - 1) {
                    continue;
                }
                for pos in (key.start..key.end()).rev() {
                    if high.bound() >= Some(pos) {
                        break;
                    }
                    if hit(pos) {
                        high.offer(pos);
                        break;
                    }
                }
            }
        };
        match run_batch(extra, &work) {
            Ok(()) => return high.get(),
            Err(Exhausted) => fall_back(name),
        }
    }
    (0..count).rev().find(|&pos| hit(pos))
}

/// Index of the first element equal to `target`.
pub fn find<T>(policy: Policy, v: &[T], target: &T) -> Option<usize>
where
    T: PartialEq + Sync,
{
    lowest_position(policy, v.len(), "find", |pos| v[pos] == *target)
}

/// Index of the first element satisfying `pred`.
pub fn find_if<T, P>(policy: Policy, v: &[T], pred: P) -> Option<usize>
where
    T: Sync,
    P: Fn(&T) -> bool + Sync,
{
    lowest_position(policy, v.len(), "find_if", |pos| pred(&v[pos]))
}

/// Index of the first element not satisfying `pred`.
pub fn find_if_not<T, P>(policy: Policy, v: &[T], pred: P) -> Option<usize>
where
    T: Sync,
    P: Fn(&T) -> bool + Sync,
{
    lowest_position(policy, v.len(), "find_if_not", |pos| !pred(&v[pos]))
}

/// Index of the first element equal to any of `candidates`.
pub fn find_first_of<T>(policy: Policy, v: &[T], candidates: &[T]) -> Option<usize>
where
    T: PartialEq + Sync,
{
    lowest_position(policy, v.len(), "find_first_of", |pos| {
        candidates.contains(&v[pos])
    })
}

/// Start of the first occurrence of `needle`. An empty needle matches at 0.
pub fn search<T>(policy: Policy, v: &[T], needle: &[T]) -> Option<usize>
where
    T: PartialEq + Sync,
{
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > v.len() {
        return None;
    }
    // Windows may extend past a chunk's end; reads of the shared slice are
    // unrestricted.
    let positions = v.len() - needle.len() + 1;
    lowest_position(policy, positions, "search", |pos| {
        v[pos..pos + needle.len()] == *needle
    })
}

/// Start of the first run of `n` consecutive elements equal to `value`.
pub fn search_n<T>(policy: Policy, v: &[T], n: usize, value: &T) -> Option<usize>
where
    T: PartialEq + Sync,
{
    if n == 0 {
        return Some(0);
    }
    if n > v.len() {
        return None;
    }
    let positions = v.len() - n + 1;
    lowest_position(policy, positions, "search_n", |pos| {
        v[pos..pos + n].iter().all(|x| x == value)
    })
}

/// Start of the last occurrence of `needle`. An empty needle matches at the
/// end.
pub fn find_end<T>(policy: Policy, v: &[T], needle: &[T]) -> Option<usize>
where
    T: PartialEq + Sync,
{
    if needle.is_empty() {
        return Some(v.len());
    }
    if needle.len() > v.len() {
        return None;
    }
    let positions = v.len() - needle.len() + 1;
    highest_position(policy, positions, "find_end", |pos| {
        v[pos..pos + needle.len()] == *needle
    })
}

/// Index of the first element for which `pred(&v[i], &v[i + 1])` holds.
pub fn adjacent_find<T, P>(policy: Policy, v: &[T], pred: P) -> Option<usize>
where
    T: Sync,
    P: Fn(&T, &T) -> bool + Sync,
{
    let positions = v.len().saturating_sub(1);
    lowest_position(policy, positions, "adjacent_find", |pos| {
        pred(&v[pos], &v[pos + 1])
    })
}

/// Length of the longest common prefix of `a` and `b`.
pub fn mismatch<T>(policy: Policy, a: &[T], b: &[T]) -> usize
where
    T: PartialEq + Sync,
{
    let count = a.len().min(b.len());
    lowest_position(policy, count, "mismatch", |pos| a[pos] != b[pos]).unwrap_or(count)
}

/// Whether `a` and `b` are elementwise equal. Differing lengths are unequal.
pub fn equal<T>(policy: Policy, a: &[T], b: &[T]) -> bool
where
    T: PartialEq + Sync,
{
    if a.len() != b.len() {
        return false;
    }
    if let Some((team, extra)) = plan(policy, a.len()) {
        let token = CancelToken::new();
        let all_equal = AtomicBool::new(true);
        let work = |_: &BatchCtx<'_>| {
            // Cancellation is checked before claiming; a claimed chunk
            // always runs to completion.
            while !token.is_canceled() && let Some(key) = team.next_key() {
                if a[key.start..key.end()] != b[key.start..key.end()] {
                    all_equal.store(false, Ordering::Relaxed);
                    token.cancel();
                }
            }
        };
        match run_batch(extra, &work) {
            Ok(()) => return all_equal.load(Ordering::Acquire),
            Err(Exhausted) => fall_back("equal"),
        }
    }
    a == b
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    const POLICIES: [Policy; 3] = [Policy::Seq, Policy::Par, Policy::ParUnseq];

    #[test]
    fn find_reports_the_lowest_match() {
        let mut v = alloc::vec![0u32; 50_000];
        v[831] = 7;
        v[49_000] = 7;
        for policy in POLICIES {
            assert_eq!(find(policy, &v, &7), Some(831));
            assert_eq!(find(policy, &v, &9), None);
            assert_eq!(find_if(policy, &v, |x| *x > 0), Some(831));
            assert_eq!(find_if_not(policy, &v, |x| *x == 0), Some(831));
        }
    }

    #[test]
    fn find_first_of_and_adjacent_find() {
        let v: Vec<u32> = (0..10_000).map(|i| i % 977).collect();
        for policy in POLICIES {
            assert_eq!(find_first_of(policy, &v, &[500, 400]), Some(400));
            assert_eq!(find_first_of(policy, &v, &[5000]), None);
            // 976 is followed by 0 at the period boundary.
            assert_eq!(adjacent_find(policy, &v, |a, b| a > b), Some(976));
        }
    }

    #[test]
    fn search_finds_first_and_find_end_finds_last() {
        let mut v = alloc::vec![1u8; 30_000];
        for base in [700, 8_000, 29_000] {
            v[base..base + 3].copy_from_slice(&[2, 3, 4]);
        }
        for policy in POLICIES {
            assert_eq!(search(policy, &v, &[2, 3, 4]), Some(700));
            assert_eq!(find_end(policy, &v, &[2, 3, 4]), Some(29_000));
            assert_eq!(search(policy, &v, &[9, 9]), None);
            assert_eq!(search(policy, &v, &[]), Some(0));
            assert_eq!(find_end(policy, &v, &[]), Some(v.len()));
        }
    }

    #[test]
    fn search_n_finds_runs() {
        let mut v = alloc::vec![0u8; 20_000];
        v[12_345..12_345 + 4].fill(6);
        for policy in POLICIES {
            assert_eq!(search_n(policy, &v, 4, &6), Some(12_345));
            assert_eq!(search_n(policy, &v, 5, &6), None);
            assert_eq!(search_n(policy, &v, 0, &6), Some(0));
        }
    }

    #[test]
    fn mismatch_and_equal() {
        let a: Vec<u32> = (0..40_000).collect();
        let mut b = a.clone();
        for policy in POLICIES {
            assert!(equal(policy, &a, &b));
            assert_eq!(mismatch(policy, &a, &b), a.len());
        }
        b[31_007] = 0;
        for policy in POLICIES {
            assert!(!equal(policy, &a, &b));
            assert_eq!(mismatch(policy, &a, &b), 31_007);
            assert!(!equal(policy, &a, &b[..100]));
            assert_eq!(mismatch(policy, &a, &b[..100]), 100);
        }
    }
}
