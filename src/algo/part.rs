//! Partitioning and in-place removal.

use alloc::vec::Vec;
use core::ptr;
use core::slice;

use crate::cancel::CancelToken;
use crate::collect::HighIndex;
use crate::collect::LowIndex;
use crate::collect::SumSlots;
use crate::lookback::Chain;
use crate::partition::Team;
use crate::pool::BatchCtx;
use crate::resource::Exhausted;
use crate::resource::reserve_vec;

use super::Policy;
use super::SyncPtr;
use super::fall_back;
use super::plan;
use super::run_batch;

/// Reorders `v` so elements satisfying `pred` precede the rest. Returns the
/// partition point. Not stable.
///
/// The parallel path runs three batches: count the satisfying elements to fix
/// the partition point, collect the misplaced indices on each side of it,
/// then swap misplaced pairs. Any pairing of a misplaced low with a misplaced
/// high yields a valid partition, so pair order does not matter.
pub fn partition<T, F>(policy: Policy, v: &mut [T], pred: F) -> usize
where
    T: Send + Sync,
    F: Fn(&T) -> bool + Sync,
{
    if plan(policy, v.len()).is_some() {
        match try_partition(policy, v, &pred) {
            Ok(boundary) => return boundary,
            Err(Exhausted) => fall_back("partition"),
        }
    }

    let mut left = 0;
    let mut right = v.len();
    while left < right {
        if pred(&v[left]) {
            left += 1;
        } else {
            right -= 1;
            v.swap(left, right);
        }
    }
    left
}

fn try_partition<T, F>(policy: Policy, v: &mut [T], pred: &F) -> Result<usize, Exhausted>
where
    T: Send + Sync,
    F: Fn(&T) -> bool + Sync,
{
    let data: &[T] = v;

    // Phase 1: the partition point is the number of satisfying elements.
    let boundary = {
        let (team, extra) = plan(policy, data.len()).ok_or(Exhausted)?;
        let mut slots = SumSlots::new(extra + 1)?;
        run_batch(extra, &|_: &BatchCtx<'_>| {
            let mut local = 0;
            while let Some(key) = team.next_key() {
                local += data[key.start..key.end()].iter().filter(|x| pred(x)).count();
            }
            if local > 0 {
                slots.push(local);
            }
        })?;
        slots.drain().into_iter().sum::<usize>()
    };

    // Phase 2: collect indices on the wrong side of the point. Each chunk
    // writes its misplaced indices into its own region of scratch buffers
    // reserved fallibly up front, so workers never allocate; the regions are
    // compacted to the front after the join.
    let (team, extra) = plan(policy, data.len()).ok_or(Exhausted)?;
    let mut lows: Vec<usize> = reserve_vec(data.len())?;
    lows.resize(data.len(), 0);
    let mut highs: Vec<usize> = reserve_vec(data.len())?;
    highs.resize(data.len(), 0);
    let mut counts: Vec<(usize, usize)> = reserve_vec(team.chunks())?;
    counts.resize(team.chunks(), (0, 0));
    {
        let lows = SyncPtr::new(lows.as_mut_ptr());
        let highs = SyncPtr::new(highs.as_mut_ptr());
        let counts = SyncPtr::new(counts.as_mut_ptr());
        run_batch(extra, &|_: &BatchCtx<'_>| {
            while let Some(key) = team.next_key() {
                let mut misplaced = (0, 0);
                for (offset, item) in data[key.start..key.end()].iter().enumerate() {
                    let index = key.start + offset;
                    let satisfied = pred(item);
                    if index < boundary && !satisfied {
                        // SAFETY: Each chunk writes only its own region
                        // [key.start, key.end()) of the scratch buffers.
                        unsafe { *lows.get().add(key.start + misplaced.0) = index };
                        misplaced.0 += 1;
                    } else if index >= boundary && satisfied {
                        // SAFETY: As above; the region is private to the
                        // chunk, and at most `key.len` indices fit in it.
                        unsafe { *highs.get().add(key.start + misplaced.1) = index };
                        misplaced.1 += 1;
                    }
                }
                // SAFETY: The team issues each chunk number exactly once, so
                // this slot has no other writer.
                unsafe { *counts.get().add(key.chunk) = misplaced };
            }
        })?;
    }
    let mut total = (0, 0);
    for (chunk, &(n_low, n_high)) in counts.iter().enumerate() {
        let start = team.start_of(chunk);
        lows.copy_within(start..start + n_low, total.0);
        highs.copy_within(start..start + n_high, total.1);
        total.0 += n_low;
        total.1 += n_high;
    }
    lows.truncate(total.0);
    highs.truncate(total.1);
    debug_assert_eq!(lows.len(), highs.len());

    // Phase 3: swap the misplaced pairs.
    let base = SyncPtr::new(v.as_mut_ptr());
    match plan(policy, lows.len()) {
        Some((team, extra)) => {
            run_batch(extra, &|_: &BatchCtx<'_>| {
                while let Some(key) = team.next_key() {
                    for pair in key.start..key.end() {
                        // SAFETY: lows are below the partition point, highs
                        // at or above it, and each index appears in exactly
                        // one pair, so all swaps are disjoint.
                        unsafe {
                            ptr::swap(
                                base.get().add(lows[pair]),
                                base.get().add(highs[pair]),
                            );
                        }
                    }
                }
            })?;
        }
        None => {
            for (&low, &high) in lows.iter().zip(&highs) {
                v.swap(low, high);
            }
        }
    }
    Ok(boundary)
}

/// Whether no element satisfying `pred` appears after one that does not.
pub fn is_partitioned<T, F>(policy: Policy, v: &[T], pred: F) -> bool
where
    T: Sync,
    F: Fn(&T) -> bool + Sync,
{
    if let Some((team, extra)) = plan(policy, v.len()) {
        let token = CancelToken::new();
        let first_false = LowIndex::new();
        let last_true = HighIndex::new();
        let work = |_: &BatchCtx<'_>| {
            // Cancellation is checked before claiming, never after.
            while !token.is_canceled() && let Some(key) = team.next_key() {
                let mut chunk_false: Option<usize> = None;
                let mut chunk_true: Option<usize> = None;
                for (offset, item) in v[key.start..key.end()].iter().enumerate() {
                    let index = key.start + offset;
                    if pred(item) {
                        chunk_true = Some(index);
                        if chunk_false.is_some() {
                            // A satisfying element after a non-satisfying
                            // one inside a single chunk settles the answer.
                            token.cancel();
                            break;
                        }
                    } else if chunk_false.is_none() {
                        chunk_false = Some(index);
                    }
                }
                if let Some(index) = chunk_false {
                    first_false.offer(index);
                }
                if let Some(index) = chunk_true {
                    last_true.offer(index);
                }
            }
        };
        match run_batch(extra, &work) {
            Ok(()) => {
                return match (first_false.get(), last_true.get()) {
                    (Some(boundary), Some(hit)) => hit < boundary,
                    _ => true,
                };
            }
            Err(Exhausted) => fall_back("is_partitioned"),
        }
    }
    match v.iter().position(|x| !pred(x)) {
        Some(boundary) => v[boundary..].iter().all(|x| !pred(x)),
        None => true,
    }
}

/// Removes elements equal to `value` by compacting the kept elements to the
/// front. Returns the kept length; the tail keeps valid but unspecified
/// values.
pub fn remove<T>(policy: Policy, v: &mut [T], value: &T) -> usize
where
    T: PartialEq + Clone + Send + Sync,
{
    remove_if(policy, v, |x| x == value)
}

/// Removes elements satisfying `pred` by compacting the kept elements to the
/// front, preserving their order. Returns the kept length; the tail keeps
/// valid but unspecified values.
pub fn remove_if<T, F>(policy: Policy, v: &mut [T], pred: F) -> usize
where
    T: Clone + Send + Sync,
    F: Fn(&T) -> bool + Sync,
{
    if let Some((team, extra)) = plan(policy, v.len()) {
        match try_remove_if(&team, extra, v, &pred) {
            Ok(kept) => return kept,
            Err(Exhausted) => fall_back("remove_if"),
        }
    }

    let mut write = 0;
    for read in 0..v.len() {
        if !pred(&v[read]) {
            v.swap(write, read);
            write += 1;
        }
    }
    write
}

/// In-place parallel compaction.
///
/// Each chunk compacts its kept elements to its own front in parallel, then
/// the kept blocks slide left one chunk at a time: a chunk's block move waits
/// for its predecessor's published running total (which the predecessor
/// publishes only after its own move), because the destination may overlap a
/// predecessor's not-yet-moved source. The chain is used in sum-only mode;
/// no local partials are published.
fn try_remove_if<T, F>(team: &Team, extra: usize, v: &mut [T], pred: &F) -> Result<usize, Exhausted>
where
    T: Clone + Send + Sync,
    F: Fn(&T) -> bool + Sync,
{
    let chain: Chain<usize> = Chain::new(team.chunks())?;
    let base = SyncPtr::new(v.as_mut_ptr());
    run_batch(extra, &|_: &BatchCtx<'_>| {
        while let Some(key) = team.next_key() {
            // SAFETY: Keys are disjoint; the cross-chunk writes below are
            // ordered by the chain's sum publications.
            let chunk = unsafe { slice::from_raw_parts_mut(base.get().add(key.start), key.len) };
            let mut kept = 0;
            for read in 0..chunk.len() {
                if !pred(&chunk[read]) {
                    chunk.swap(kept, read);
                    kept += 1;
                }
            }

            if key.chunk == 0 {
                // Already at the front of the slice.
                chain.publish_sum(0, kept);
                continue;
            }
            // Blocks until the predecessor has published, which it does only
            // after moving its own block out of the way.
            let Some(offset) = chain.exclusive_prefix(key.chunk, |a, b| a + b) else {
                continue;
            };
            if offset != key.start {
                // SAFETY: The destination lies left of this chunk and every
                // predecessor's block has already moved out of it. Forward
                // iteration is safe when source and destination overlap, and
                // the clone-assign drops each overwritten value exactly once.
                unsafe {
                    for index in 0..kept {
                        let value = (*base.get().add(key.start + index)).clone();
                        *base.get().add(offset + index) = value;
                    }
                }
            }
            chain.publish_sum(key.chunk, offset + kept);
        }
    })?;
    Ok(chain.final_sum())
}
