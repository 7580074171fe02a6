//! Prefix scans over the decoupled-lookback chain, plus adjacent_difference.
//!
//! Parallel scans are a single logical pass per chunk: scan the chunk locally
//! into the output, publish the chunk total, look back for the exclusive
//! prefix, publish the chunk's inclusive sum for successors, then rewrite the
//! chunk by composing the prefix in. Left-to-right order is preserved, so the
//! operator only needs to be associative, not commutative.

use core::mem;
use core::slice;

use crate::lookback::Chain;
use crate::partition::Team;
use crate::pool::BatchCtx;
use crate::resource::Exhausted;

use super::Policy;
use super::SyncPtr;
use super::fall_back;
use super::plan;
use super::run_batch;

fn scan_impl<T, U, F, M>(
    policy: Policy,
    input: &[T],
    output: &mut [U],
    init: U,
    op: F,
    map: M,
    inclusive: bool,
) where
    T: Sync,
    U: Clone + Send + Sync,
    F: Fn(&U, &U) -> U + Sync,
    M: Fn(&T) -> U + Sync,
{
    debug_assert_eq!(input.len(), output.len(), "scan slices disagree");
    let len = input.len().min(output.len());
    if let Some((team, extra)) = plan(policy, len) {
        match try_scan(&team, extra, input, output, &init, &op, &map, inclusive) {
            Ok(()) => return,
            Err(Exhausted) => fall_back("scan"),
        }
    }

    let mut running = init;
    if inclusive {
        for (slot, item) in output[..len].iter_mut().zip(input) {
            running = op(&running, &map(item));
            *slot = running.clone();
        }
    } else {
        for (slot, item) in output[..len].iter_mut().zip(input) {
            let next = op(&running, &map(item));
            *slot = mem::replace(&mut running, next);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn try_scan<T, U, F, M>(
    team: &Team,
    extra: usize,
    input: &[T],
    output: &mut [U],
    init: &U,
    op: &F,
    map: &M,
    inclusive: bool,
) -> Result<(), Exhausted>
where
    T: Sync,
    U: Clone + Send + Sync,
    F: Fn(&U, &U) -> U + Sync,
    M: Fn(&T) -> U + Sync,
{
    let chain: Chain<U> = Chain::new(team.chunks())?;
    let out = SyncPtr::new(output.as_mut_ptr());
    run_batch(extra, &|_: &BatchCtx<'_>| {
        while let Some(key) = team.next_key() {
            // SAFETY: Keys are disjoint; this chunk of the output belongs to
            // the claiming worker alone.
            let dst = unsafe { slice::from_raw_parts_mut(out.get().add(key.start), key.len) };
            let src = &input[key.start..key.end()];

            if key.chunk == 0 {
                // No predecessor: compose with the initial value directly
                // and publish the inclusive sum at once.
                let mut running = init.clone();
                if inclusive {
                    for (slot, item) in dst.iter_mut().zip(src) {
                        running = op(&running, &map(item));
                        *slot = running.clone();
                    }
                } else {
                    for (slot, item) in dst.iter_mut().zip(src) {
                        let next = op(&running, &map(item));
                        *slot = mem::replace(&mut running, next);
                    }
                }
                chain.publish_sum(0, running);
                continue;
            }

            // Local inclusive scan first, so the chunk total can be
            // published before we wait on predecessors.
            let mut acc = map(&src[0]);
            dst[0] = acc.clone();
            for (slot, item) in dst[1..].iter_mut().zip(&src[1..]) {
                acc = op(&acc, &map(item));
                *slot = acc.clone();
            }
            chain.publish_local(key.chunk, acc.clone());

            let Some(prefix) = chain.exclusive_prefix(key.chunk, op) else {
                continue;
            };
            // Unblock successors before rewriting the chunk.
            chain.publish_sum(key.chunk, op(&prefix, &acc));

            if inclusive {
                for slot in dst.iter_mut() {
                    *slot = op(&prefix, slot);
                }
            } else {
                for index in (1..dst.len()).rev() {
                    dst[index] = op(&prefix, &dst[index - 1]);
                }
                dst[0] = prefix.clone();
            }
        }
    })
}

/// Exclusive prefix scan: `output[i] = init ⊕ input[0] ⊕ … ⊕ input[i-1]`.
/// `op` must be associative.
pub fn exclusive_scan<T, F>(policy: Policy, input: &[T], output: &mut [T], init: T, op: F)
where
    T: Clone + Send + Sync,
    F: Fn(&T, &T) -> T + Sync,
{
    scan_impl(policy, input, output, init, op, T::clone, false);
}

/// Inclusive prefix scan: `output[i] = init ⊕ input[0] ⊕ … ⊕ input[i]`.
/// `op` must be associative.
pub fn inclusive_scan<T, F>(policy: Policy, input: &[T], output: &mut [T], init: T, op: F)
where
    T: Clone + Send + Sync,
    F: Fn(&T, &T) -> T + Sync,
{
    scan_impl(policy, input, output, init, op, T::clone, true);
}

/// [`exclusive_scan`] over `map(input[i])`.
pub fn transform_exclusive_scan<T, U, F, M>(
    policy: Policy,
    input: &[T],
    output: &mut [U],
    init: U,
    op: F,
    map: M,
) where
    T: Sync,
    U: Clone + Send + Sync,
    F: Fn(&U, &U) -> U + Sync,
    M: Fn(&T) -> U + Sync,
{
    scan_impl(policy, input, output, init, op, map, false);
}

/// [`inclusive_scan`] over `map(input[i])`.
pub fn transform_inclusive_scan<T, U, F, M>(
    policy: Policy,
    input: &[T],
    output: &mut [U],
    init: U,
    op: F,
    map: M,
) where
    T: Sync,
    U: Clone + Send + Sync,
    F: Fn(&U, &U) -> U + Sync,
    M: Fn(&T) -> U + Sync,
{
    scan_impl(policy, input, output, init, op, map, true);
}

/// `output[0] = input[0]`, `output[i] = op(&input[i], &input[i-1])`.
/// Embarrassingly parallel: every output element depends on at most two
/// input elements.
pub fn adjacent_difference<T, F>(policy: Policy, input: &[T], output: &mut [T], op: F)
where
    T: Clone + Send + Sync,
    F: Fn(&T, &T) -> T + Sync,
{
    debug_assert_eq!(input.len(), output.len(), "adjacent_difference slices disagree");
    let len = input.len().min(output.len());
    if len == 0 {
        return;
    }
    if let Some((team, extra)) = plan(policy, len) {
        let out = SyncPtr::new(output.as_mut_ptr());
        let work = |_: &BatchCtx<'_>| {
            while let Some(key) = team.next_key() {
                // SAFETY: Keys are disjoint.
                let dst =
                    unsafe { slice::from_raw_parts_mut(out.get().add(key.start), key.len) };
                for (offset, slot) in dst.iter_mut().enumerate() {
                    let index = key.start + offset;
                    *slot = if index == 0 {
                        input[0].clone()
                    } else {
                        op(&input[index], &input[index - 1])
                    };
                }
            }
        };
        match run_batch(extra, &work) {
            Ok(()) => return,
            Err(Exhausted) => fall_back("adjacent_difference"),
        }
    }
    output[0] = input[0].clone();
    for index in 1..len {
        output[index] = op(&input[index], &input[index - 1]);
    }
}
