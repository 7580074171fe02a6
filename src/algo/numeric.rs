//! Counting and reductions.
//!
//! Each worker folds every chunk it claims into one partial and appends it to
//! a [`SumSlots`]; the caller folds the partials after the join. Partials may
//! combine in any order, so reduction operators must be associative and
//! order-insensitive (the `std::iter::Sum` contract, not the left-fold one).

use alloc::vec::Vec;

use crate::collect::SumSlots;
use crate::partition::Team;
use crate::pool::BatchCtx;
use crate::resource::Exhausted;

use super::Policy;
use super::fall_back;
use super::plan;
use super::run_batch;

/// Number of elements equal to `target`.
pub fn count<T>(policy: Policy, v: &[T], target: &T) -> usize
where
    T: PartialEq + Sync,
{
    count_if(policy, v, |x| x == target)
}

/// Number of elements satisfying `pred`.
pub fn count_if<T, P>(policy: Policy, v: &[T], pred: P) -> usize
where
    T: Sync,
    P: Fn(&T) -> bool + Sync,
{
    if let Some((team, extra)) = plan(policy, v.len()) {
        match try_count(&team, extra, v, &pred) {
            Ok(total) => return total,
            Err(Exhausted) => fall_back("count_if"),
        }
    }
    v.iter().filter(|x| pred(x)).count()
}

fn try_count<T, P>(team: &Team, extra: usize, v: &[T], pred: &P) -> Result<usize, Exhausted>
where
    T: Sync,
    P: Fn(&T) -> bool + Sync,
{
    let mut slots = SumSlots::new(extra + 1)?;
    run_batch(extra, &|_: &BatchCtx<'_>| {
        let mut local = 0;
        while let Some(key) = team.next_key() {
            local += v[key.start..key.end()].iter().filter(|x| pred(x)).count();
        }
        if local > 0 {
            slots.push(local);
        }
    })?;
    Ok(slots.drain().into_iter().sum())
}

/// Folds `v` with `op` starting from `init`.
///
/// `op` must be associative and insensitive to combination order; chunk
/// partials are merged in whatever order workers finish.
pub fn reduce<T, F>(policy: Policy, v: &[T], init: T, op: F) -> T
where
    T: Clone + Send + Sync,
    F: Fn(&T, &T) -> T + Sync,
{
    transform_reduce(policy, v, init, &op, T::clone)
}

/// Maps each element with `map`, then folds the results with `reduce_op`
/// starting from `init`. Same ordering contract as [`reduce`].
pub fn transform_reduce<T, U, F, M>(policy: Policy, v: &[T], init: U, reduce_op: F, map: M) -> U
where
    T: Sync,
    U: Send,
    F: Fn(&U, &U) -> U + Sync,
    M: Fn(&T) -> U + Sync,
{
    if let Some((team, extra)) = plan(policy, v.len()) {
        let fold_chunk = |acc: Option<U>, key_start: usize, key_end: usize| {
            v[key_start..key_end].iter().fold(acc, |acc, item| {
                let mapped = map(item);
                Some(match acc {
                    None => mapped,
                    Some(prev) => reduce_op(&prev, &mapped),
                })
            })
        };
        match try_reduce(&team, extra, &fold_chunk) {
            Ok(partials) => {
                return partials
                    .into_iter()
                    .fold(init, |acc, partial| reduce_op(&acc, &partial));
            }
            Err(Exhausted) => fall_back("transform_reduce"),
        }
    }
    v.iter().fold(init, |acc, item| reduce_op(&acc, &map(item)))
}

/// Maps pairs of elements from two equally-long slices with `map`, then folds
/// the results with `reduce_op` starting from `init` (a generalized dot
/// product). Same ordering contract as [`reduce`].
pub fn transform_reduce_zip<T, V, U, F, M>(
    policy: Policy,
    a: &[T],
    b: &[V],
    init: U,
    reduce_op: F,
    map: M,
) -> U
where
    T: Sync,
    V: Sync,
    U: Send,
    F: Fn(&U, &U) -> U + Sync,
    M: Fn(&T, &V) -> U + Sync,
{
    debug_assert_eq!(a.len(), b.len(), "transform_reduce_zip slices disagree");
    let len = a.len().min(b.len());
    if let Some((team, extra)) = plan(policy, len) {
        let fold_chunk = |acc: Option<U>, key_start: usize, key_end: usize| {
            a[key_start..key_end]
                .iter()
                .zip(&b[key_start..key_end])
                .fold(acc, |acc, (x, y)| {
                    let mapped = map(x, y);
                    Some(match acc {
                        None => mapped,
                        Some(prev) => reduce_op(&prev, &mapped),
                    })
                })
        };
        match try_reduce(&team, extra, &fold_chunk) {
            Ok(partials) => {
                return partials
                    .into_iter()
                    .fold(init, |acc, partial| reduce_op(&acc, &partial));
            }
            Err(Exhausted) => fall_back("transform_reduce_zip"),
        }
    }
    a[..len]
        .iter()
        .zip(&b[..len])
        .fold(init, |acc, (x, y)| reduce_op(&acc, &map(x, y)))
}

/// Claims chunks, folds each worker's claims into one partial via
/// `fold_chunk`, and returns the partials in completion order.
fn try_reduce<U, C>(team: &Team, extra: usize, fold_chunk: &C) -> Result<Vec<U>, Exhausted>
where
    U: Send,
    C: Fn(Option<U>, usize, usize) -> Option<U> + Sync,
{
    let mut slots = SumSlots::new(extra + 1)?;
    run_batch(extra, &|_: &BatchCtx<'_>| {
        let mut acc = None;
        while let Some(key) = team.next_key() {
            acc = fold_chunk(acc, key.start, key.end());
        }
        if let Some(partial) = acc {
            slots.push(partial);
        }
    })?;
    Ok(slots.drain())
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    const POLICIES: [Policy; 3] = [Policy::Seq, Policy::Par, Policy::ParUnseq];

    #[test]
    fn count_matches_the_filter_oracle() {
        let v: Vec<u32> = (0..60_000).map(|i| i % 7).collect();
        for policy in POLICIES {
            assert_eq!(count(policy, &v, &3), v.iter().filter(|x| **x == 3).count());
            assert_eq!(count_if(policy, &v, |x| *x < 2), 60_000 / 7 * 2 + 2);
            assert_eq!(count_if(policy, &v, |_| false), 0);
        }
    }

    #[test]
    fn reduce_sums_exactly() {
        let v: Vec<u64> = (1..=100_000).collect();
        for policy in POLICIES {
            assert_eq!(reduce(policy, &v, 0, |a, b| a + b), 100_000 * 100_001 / 2);
        }
        let empty: Vec<u64> = Vec::new();
        assert_eq!(reduce(Policy::Par, &empty, 11, |a, b| a + b), 11);
    }

    #[test]
    fn transform_reduce_maps_before_folding() {
        let v: Vec<u32> = (0..30_000).collect();
        let expected: u64 = v.iter().map(|x| u64::from(*x) * 2).sum();
        for policy in POLICIES {
            let got = transform_reduce(policy, &v, 0u64, |a, b| a + b, |x| u64::from(*x) * 2);
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn zip_reduce_is_a_dot_product() {
        let a: Vec<u64> = (0..20_000).collect();
        let b: Vec<u64> = (0..20_000).map(|x| x % 13).collect();
        let expected: u64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        for policy in POLICIES {
            let got = transform_reduce_zip(policy, &a, &b, 0u64, |s, t| s + t, |x, y| x * y);
            assert_eq!(got, expected);
        }
    }
}
