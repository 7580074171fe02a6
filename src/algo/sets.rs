//! Sorted-sequence set operations.
//!
//! The parallel path chunks the first input, nudging every chunk boundary
//! past its equal-value run so runs never straddle chunks, and binary
//! searches the matching window of the second input. Each chunk merges into
//! its own region of a scratch buffer reserved before the batch starts and
//! publishes its kept count on a lookback chain; the running sum fixes the
//! chunk's write offset in the output. Multiset semantics match the classic
//! two-pointer walks because every run is paired against its complete
//! counterpart window.

use alloc::vec::Vec;
use core::mem::MaybeUninit;
use core::slice;

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

/// Copies the elements of sorted `a` not matched one-for-one in sorted `b`
/// into the front of `out`, returning how many were written.
///
/// `out` must hold at least `a.len()` elements.
pub fn set_difference<T>(policy: Policy, a: &[T], b: &[T], out: &mut [T]) -> usize
where
    T: Ord + Clone + Send + Sync,
{
    assert!(out.len() >= a.len(), "output shorter than the first input");
    if let Some((team, extra)) = plan(policy, a.len()) {
        match try_set_op(&team, extra, a, b, out, merge_difference::<T>) {
            Ok(written) => return written,
            Err(Exhausted) => fall_back("set_difference"),
        }
    }

    let mut i = 0;
    let mut j = 0;
    let mut written = 0;
    while i < a.len() {
        if j >= b.len() || a[i] < b[j] {
            out[written] = a[i].clone();
            written += 1;
            i += 1;
        } else if b[j] < a[i] {
            j += 1;
        } else {
            i += 1;
            j += 1;
        }
    }
    written
}

/// Copies the elements of sorted `a` matched one-for-one in sorted `b` into
/// the front of `out`, returning how many were written.
///
/// `out` must hold at least `min(a.len(), b.len())` elements.
pub fn set_intersection<T>(policy: Policy, a: &[T], b: &[T], out: &mut [T]) -> usize
where
    T: Ord + Clone + Send + Sync,
{
    assert!(
        out.len() >= a.len().min(b.len()),
        "output shorter than the smaller input"
    );
    if let Some((team, extra)) = plan(policy, a.len()) {
        match try_set_op(&team, extra, a, b, out, merge_intersection::<T>) {
            Ok(written) => return written,
            Err(Exhausted) => fall_back("set_intersection"),
        }
    }

    let mut i = 0;
    let mut j = 0;
    let mut written = 0;
    while i < a.len() && j < b.len() {
        if a[i] < b[j] {
            i += 1;
        } else if b[j] < a[i] {
            j += 1;
        } else {
            out[written] = a[i].clone();
            written += 1;
            i += 1;
            j += 1;
        }
    }
    written
}

/// Two-pointer difference walk of `a` against `b`, written into the front of
/// `out`. Returns the number of values written, at most `a.len()`.
fn merge_difference<T: Ord + Clone>(a: &[T], b: &[T], out: &mut [MaybeUninit<T>]) -> usize {
    let mut kept = 0;
    let mut i = 0;
    let mut j = 0;
    while i < a.len() {
        if j >= b.len() || a[i] < b[j] {
            out[kept].write(a[i].clone());
            kept += 1;
            i += 1;
        } else if b[j] < a[i] {
            j += 1;
        } else {
            i += 1;
            j += 1;
        }
    }
    kept
}

/// Two-pointer intersection walk of `a` against `b`, written into the front
/// of `out`. Returns the number of values written, at most `a.len()`.
fn merge_intersection<T: Ord + Clone>(a: &[T], b: &[T], out: &mut [MaybeUninit<T>]) -> usize {
    let mut kept = 0;
    let mut i = 0;
    let mut j = 0;
    while i < a.len() && j < b.len() {
        if a[i] < b[j] {
            i += 1;
        } else if b[j] < a[i] {
            j += 1;
        } else {
            out[kept].write(a[i].clone());
            kept += 1;
            i += 1;
            j += 1;
        }
    }
    kept
}

/// Moves `index` forward past the equal-value run it lands in, so the run
/// belongs entirely to the preceding chunk.
fn run_boundary<T: PartialEq>(v: &[T], mut index: usize) -> usize {
    while index > 0 && index < v.len() && v[index] == v[index - 1] {
        index += 1;
    }
    index
}

fn try_set_op<T>(
    team: &Team,
    extra: usize,
    a: &[T],
    b: &[T],
    out: &mut [T],
    merge: fn(&[T], &[T], &mut [MaybeUninit<T>]) -> usize,
) -> Result<usize, Exhausted>
where
    T: Ord + Clone + Send + Sync,
{
    let chain: Chain<usize> = Chain::new(team.chunks())?;
    // The whole merge scratch is reserved here, fallibly, so workers never
    // allocate; each chunk owns the region of it named by its run boundaries.
    let mut scratch: Vec<MaybeUninit<T>> = reserve_vec(a.len())?;
    scratch.resize_with(a.len(), MaybeUninit::uninit);
    let slots = SyncPtr::new(scratch.as_mut_ptr());
    let out = SyncPtr::new(out.as_mut_ptr());
    run_batch(extra, &|_: &BatchCtx<'_>| {
        while let Some(key) = team.next_key() {
            let lo = run_boundary(a, key.start);
            let hi = run_boundary(a, key.end());
            let kept = if lo < hi {
                // Run-whole boundaries make a[hi] (if any) strictly greater
                // than every chunk value, so this window holds every b
                // element that can pair with the chunk.
                let b_lo = b.partition_point(|x| x < &a[lo]);
                let b_hi = if hi < a.len() {
                    b.partition_point(|x| x < &a[hi])
                } else {
                    b.len()
                };
                // SAFETY: Run boundaries are monotonic in the input offset,
                // so the [lo, hi) scratch regions are disjoint across chunks.
                let slot = unsafe { slice::from_raw_parts_mut(slots.get().add(lo), hi - lo) };
                merge(&a[lo..hi], &b[b_lo..b_hi], slot)
            } else {
                0
            };

            let offset = if key.chunk == 0 {
                0
            } else {
                chain.publish_local(key.chunk, kept);
                let Some(prefix) = chain.exclusive_prefix(key.chunk, |x, y| x + y) else {
                    continue;
                };
                prefix
            };
            // The output is a separate buffer, so successors may proceed
            // before this chunk's copy lands; the batch join orders all
            // writes before the caller reads.
            chain.publish_sum(key.chunk, offset + kept);
            for index in 0..kept {
                // SAFETY: The merge initialized the first `kept` slots of the
                // chunk's region and each value is moved out exactly once;
                // chunk offsets partition the written prefix of the output,
                // so no two chunks write the same slot.
                unsafe {
                    *out.get().add(offset + index) =
                        (*slots.get().add(lo + index)).assume_init_read();
                }
            }
        }
    })?;
    Ok(chain.final_sum())
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    const POLICIES: [Policy; 3] = [Policy::Seq, Policy::Par, Policy::ParUnseq];

    #[test]
    fn difference_respects_multiset_counts() {
        let a = [1, 1, 1, 2, 3, 5, 5];
        let b = [1, 2, 2, 5];
        for policy in POLICIES {
            let mut out = [0; 7];
            let written = set_difference(policy, &a, &b, &mut out);
            assert_eq!(&out[..written], &[1, 1, 3, 5]);
        }
    }

    #[test]
    fn intersection_respects_multiset_counts() {
        let a = [1, 1, 2, 3, 3, 3, 7];
        let b = [1, 3, 3, 8];
        for policy in POLICIES {
            let mut out = [0; 4];
            let written = set_intersection(policy, &a, &b, &mut out);
            assert_eq!(&out[..written], &[1, 3, 3]);
        }
    }

    #[test]
    fn large_inputs_match_the_serial_walk() {
        // Heavy duplication so runs straddle naive chunk boundaries.
        let a: Vec<u32> = (0..60_000).map(|i| i / 7).collect();
        let b: Vec<u32> = (0..30_000).map(|i| i / 3).collect();

        let mut expected = alloc::vec![0u32; a.len()];
        let expected_len = set_difference(Policy::Seq, &a, &b, &mut expected);
        let mut got = alloc::vec![0u32; a.len()];
        let got_len = set_difference(Policy::Par, &a, &b, &mut got);
        assert_eq!(got_len, expected_len);
        assert_eq!(got[..got_len], expected[..expected_len]);

        let mut expected = alloc::vec![0u32; b.len()];
        let expected_len = set_intersection(Policy::Seq, &a, &b, &mut expected);
        let mut got = alloc::vec![0u32; b.len()];
        let got_len = set_intersection(Policy::Par, &a, &b, &mut got);
        assert_eq!(got_len, expected_len);
        assert_eq!(got[..got_len], expected[..expected_len]);
    }

    #[test]
    fn merge_walks_fill_only_the_kept_prefix() {
        let a = [1, 2, 2, 4, 6];
        let b = [2, 3, 6];
        let mut slot = [const { MaybeUninit::<i32>::uninit() }; 5];

        let kept = merge_difference(&a, &b, &mut slot);
        // SAFETY: The merge initialized the first `kept` slots.
        let written: Vec<i32> =
            slot[..kept].iter().map(|v| unsafe { v.assume_init_read() }).collect();
        assert_eq!(written, alloc::vec![1, 2, 4]);

        let kept = merge_intersection(&a, &b, &mut slot);
        // SAFETY: As above.
        let written: Vec<i32> =
            slot[..kept].iter().map(|v| unsafe { v.assume_init_read() }).collect();
        assert_eq!(written, alloc::vec![2, 6]);
    }

    #[test]
    fn empty_inputs() {
        let empty: [u32; 0] = [];
        let mut out = [0u32; 4];
        assert_eq!(set_difference(Policy::Par, &empty, &[1, 2], &mut out), 0);
        assert_eq!(set_intersection(Policy::Par, &[1, 2], &empty, &mut []), 0);
        let written = set_difference(Policy::Par, &[1, 2], &empty, &mut out);
        assert_eq!(&out[..written], &[1, 2]);
    }
}
