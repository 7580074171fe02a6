//! Stable sorting: a serial merge sort and a bottom-up parallel merge tree.
//!
//! The parallel driver splits the input into a power-of-two number of leaves,
//! sorts each leaf in place, then merges sibling blocks up a binary tree. One
//! atomic flag per internal node decides, between the two workers that finish
//! a node's children, which of them performs the merge; the loser of the race
//! retires to claim another leaf, so no worker ever blocks. Merges ping-pong
//! between the caller's buffer and one scratch allocation; the leaf count is
//! held to an even tree height so the final merge lands back in the caller's
//! buffer.
//!
//! When the scratch allocation fails, sorting degrades to an in-place
//! rotation-based merge rather than giving up.

use core::mem::MaybeUninit;
use core::ptr;
use core::slice;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering;

use tracing::trace;

use crate::algo::SyncPtr;
use crate::config::INSERTION_SORT_MAX;
use crate::config::OVERSUBSCRIPTION;
use crate::partition::Team;
use crate::pool::BatchCtx;
use crate::pool::ThreadPool;
use crate::resource::Exhausted;
use crate::resource::reserve_vec;
use crate::sort::insertion_sort;
use crate::unwind::AbortOnDrop;

// -----------------------------------------------------------------------------
// Buffered merging

/// Tracks the still-unmerged remainder of a buffered left run. If the
/// comparator panics mid-merge, the drop restores those elements into the gap
/// left in the destination, so every element exists in the slice exactly once
/// when the unwind reaches safe code.
struct MergeHole<T> {
    start: *mut T,
    end: *mut T,
    dst: *mut T,
}

impl<T> Drop for MergeHole<T> {
    fn drop(&mut self) {
        // SAFETY: `start..end` are the buffered elements not yet merged and
        // `dst` is the hole of exactly that size.
        unsafe {
            let remaining = self.end.offset_from(self.start) as usize;
            ptr::copy_nonoverlapping(self.start, self.dst, remaining);
        }
    }
}

/// Merges the sorted runs `v[..mid]` and `v[mid..]` using `buf` as temporary
/// storage for the left run.
///
/// # Safety
///
/// `buf` must be valid for `mid` writes and must not overlap `v`.
unsafe fn merge_with_buffer<T, F>(v: &mut [T], mid: usize, buf: *mut T, is_less: &F)
where
    F: Fn(&T, &T) -> bool,
{
    let len = v.len();
    let base = v.as_mut_ptr();
    // SAFETY: The left run is moved out to `buf` (caller guarantees room),
    // opening a hole at the front of `v` that the writes below fill strictly
    // behind the right-run read cursor.
    unsafe {
        ptr::copy_nonoverlapping(base, buf, mid);
        let mut hole = MergeHole {
            start: buf,
            end: buf.add(mid),
            dst: base,
        };
        let mut right = base.add(mid);
        let right_end = base.add(len);
        while hole.start < hole.end && right < right_end {
            // `<` on the right operand keeps equal elements in left-run
            // order, which is what makes the sort stable.
            if is_less(&*right, &*hole.start) {
                ptr::copy_nonoverlapping(right, hole.dst, 1);
                right = right.add(1);
            } else {
                ptr::copy_nonoverlapping(hole.start, hole.dst, 1);
                hole.start = hole.start.add(1);
            }
            hole.dst = hole.dst.add(1);
        }
        // Leftovers of the buffered run are restored by the hole's drop;
        // leftovers of the right run are already in position.
    }
}

/// Top-down merge sort of `v`, buffering left runs in `buf`.
///
/// # Safety
///
/// `buf` must be valid for `v.len() / 2` writes and must not overlap `v`.
unsafe fn sort_with_buffer<T, F>(v: &mut [T], buf: *mut T, is_less: &F)
where
    F: Fn(&T, &T) -> bool,
{
    if v.len() <= INSERTION_SORT_MAX {
        insertion_sort(v, is_less);
        return;
    }
    let mid = v.len() / 2;
    let (left, right) = v.split_at_mut(mid);
    // SAFETY: Both halves need at most `mid / 2 <= len / 2` buffered
    // elements, and the calls are sequential, so `buf` can be reused.
    unsafe {
        sort_with_buffer(left, buf, is_less);
        sort_with_buffer(right, buf, is_less);
        merge_with_buffer(v, mid, buf, is_less);
    }
}

// -----------------------------------------------------------------------------
// In-place merging

/// Merges the sorted runs `v[..mid]` and `v[mid..]` in place by symmetric
/// rotation. O(len * log(len)) comparisons, no allocation.
fn merge_in_place<T, F>(v: &mut [T], mid: usize, is_less: &F)
where
    F: Fn(&T, &T) -> bool,
{
    let len = v.len();
    if mid == 0 || mid == len {
        return;
    }
    if mid == 1 {
        // Insert the single left element into the right run.
        let (first, rest) = v.split_first_mut().unwrap_or_else(|| unreachable!());
        let pos = rest.partition_point(|x| is_less(x, first));
        v[..=pos].rotate_left(1);
        return;
    }
    if mid == len - 1 {
        // Insert the single right element into the left run.
        let (last, rest) = v.split_last_mut().unwrap_or_else(|| unreachable!());
        let pos = rest.partition_point(|x| !is_less(last, x));
        v[pos..].rotate_right(1);
        return;
    }

    // Symmetric binary search for the largest exchangeable prefix/suffix
    // pair around the center.
    let half = len / 2;
    let n = mid + half;
    let (mut lo, mut hi) = if mid > half {
        (n - len, half)
    } else {
        (0, mid)
    };
    let probe = n - 1;
    while lo < hi {
        let m = (lo + hi) / 2;
        if !is_less(&v[probe - m], &v[m]) {
            lo = m + 1;
        } else {
            hi = m;
        }
    }
    let end = n - lo;
    if lo < mid && mid < end {
        v[lo..end].rotate_left(mid - lo);
    }
    if 0 < lo && lo < half {
        merge_in_place(&mut v[..half], lo, is_less);
    }
    if half < end && end < len {
        merge_in_place(&mut v[half..], end - half, is_less);
    }
}

fn sort_in_place<T, F>(v: &mut [T], is_less: &F)
where
    F: Fn(&T, &T) -> bool,
{
    if v.len() <= INSERTION_SORT_MAX {
        insertion_sort(v, is_less);
        return;
    }
    let mid = v.len() / 2;
    let (left, right) = v.split_at_mut(mid);
    sort_in_place(left, is_less);
    sort_in_place(right, is_less);
    merge_in_place(v, mid, is_less);
}

/// The sequential stable sort shared by the sequential policy and by the
/// parallel path's fallback.
pub(crate) fn stable_sort_serial<T, F>(v: &mut [T], is_less: &F)
where
    F: Fn(&T, &T) -> bool,
{
    if v.len() <= INSERTION_SORT_MAX {
        insertion_sort(v, is_less);
        return;
    }
    match reserve_vec::<MaybeUninit<T>>(v.len() / 2) {
        // SAFETY: The reservation is exact and the scratch does not overlap.
        Ok(mut scratch) => unsafe { sort_with_buffer(v, scratch.as_mut_ptr().cast(), is_less) },
        Err(Exhausted) => {
            trace!("stable sort scratch unavailable; merging in place");
            sort_in_place(v, is_less);
        }
    }
}

// -----------------------------------------------------------------------------
// Parallel merge tree

/// Merges `src[start..mid]` and `src[mid..end]` into `dst[start..end]`.
///
/// # Safety
///
/// The caller must have exclusive access to both ranges, `src[start..end]`
/// must be initialized, and the buffers must not overlap. The merged range in
/// `src` is left as bitwise garbage that must not be read or dropped.
unsafe fn merge_between<T, F>(
    src: *mut T,
    dst: *mut T,
    start: usize,
    mid: usize,
    end: usize,
    is_less: &F,
) where
    F: Fn(&T, &T) -> bool,
{
    let mut a = start;
    let mut b = mid;
    let mut out = start;
    // SAFETY: `a`, `b`, and `out` stay within `start..end` per the loop
    // bounds; every source element is moved to `dst` exactly once.
    unsafe {
        while a < mid && b < end {
            if is_less(&*src.add(b), &*src.add(a)) {
                ptr::copy_nonoverlapping(src.add(b), dst.add(out), 1);
                b += 1;
            } else {
                ptr::copy_nonoverlapping(src.add(a), dst.add(out), 1);
                a += 1;
            }
            out += 1;
        }
        ptr::copy_nonoverlapping(src.add(a), dst.add(out), mid - a);
        ptr::copy_nonoverlapping(src.add(b), dst.add(out + (mid - a)), end - b);
    }
}

/// Climbs the merge tree from a completed leaf. At each internal node the
/// second worker to arrive merges the node's children and continues upward;
/// the first to arrive returns to claim fresh work.
fn ascend<T, F>(
    team: &Team,
    v: SyncPtr<T>,
    scratch: SyncPtr<T>,
    flags: &[AtomicBool],
    height: u32,
    leaf: usize,
    is_less: &F,
) where
    F: Fn(&T, &T) -> bool,
{
    let mut node = leaf;
    let mut level_offset = 0;
    let mut level_nodes = team.chunks() / 2;
    for level in 1..=height {
        node /= 2;
        // AcqRel: the release half publishes our child block, the acquire
        // half synchronizes with the sibling's completed block.
        if !flags[level_offset + node].swap(true, Ordering::AcqRel) {
            return;
        }
        let width = 1usize << level;
        let start = team.start_of(node * width);
        let mid = team.start_of(node * width + width / 2);
        let end = team.start_of((node + 1) * width);
        // Blocks at level `l` live in the caller's buffer when `l` is even
        // and in the scratch when odd; the even tree height puts the root
        // back in the caller's buffer.
        let (src, dst) = if level % 2 == 1 {
            (v, scratch)
        } else {
            (scratch, v)
        };
        // SAFETY: Winning the flag race grants exclusive access to both
        // child blocks, which are initialized at the source parity.
        unsafe { merge_between(src.get(), dst.get(), start, mid, end, is_less) };
        level_offset += level_nodes;
        level_nodes /= 2;
    }
}

fn merge_worker<T, F>(
    team: &Team,
    v: SyncPtr<T>,
    scratch: SyncPtr<T>,
    flags: &[AtomicBool],
    height: u32,
    is_less: &F,
) where
    F: Fn(&T, &T) -> bool,
{
    while let Some(key) = team.next_key() {
        // SAFETY: Keys are disjoint, and the scratch region mirroring the
        // key's range is reserved for this leaf's buffered merges.
        let leaf = unsafe { slice::from_raw_parts_mut(v.get().add(key.start), key.len) };
        let buf = unsafe { scratch.get().add(key.start) };
        // SAFETY: As above; the mirrored region has `key.len` slots.
        unsafe { sort_with_buffer(leaf, buf, is_less) };
        ascend(team, v, scratch, flags, height, key.chunk, is_less);
    }
}

/// Stable-sorts `v` on the pool, with the calling thread participating.
/// Inputs too short to fill a merge tree are sorted serially; allocation
/// failures surface as [`Exhausted`] before any work is distributed.
pub(crate) fn parallel_stable_sort<T, F>(
    v: &mut [T],
    is_less: &F,
    workers: usize,
    pool: &'static ThreadPool,
) -> Result<(), Exhausted>
where
    T: Send,
    F: Fn(&T, &T) -> bool + Sync,
{
    debug_assert!(workers > 0);
    let len = v.len();
    let target = ((workers + 1) * OVERSUBSCRIPTION)
        .min(len / INSERTION_SORT_MAX)
        .max(1);
    // Round down to a power of two with an even exponent: the merge tree's
    // height must be even for the root to land in the caller's buffer.
    let exponent = target.ilog2() & !1;
    let chunks = 1usize << exponent;
    if chunks < 4 {
        stable_sort_serial(v, is_less);
        return Ok(());
    }

    let team = Team::new(len, chunks);
    let mut scratch = reserve_vec::<MaybeUninit<T>>(len)?;
    let mut flags = reserve_vec(chunks - 1)?;
    flags.extend((0..chunks - 1).map(|_| AtomicBool::new(false)));

    let v_ptr = SyncPtr::new(v.as_mut_ptr());
    let scratch_ptr = SyncPtr::new(scratch.as_mut_ptr().cast::<T>());
    let work = |_: &BatchCtx<'_>| {
        merge_worker(&team, v_ptr, scratch_ptr, &flags, exponent, is_less);
    };

    let batch = pool.submit(workers.min(chunks - 1), &work)?;
    // A comparator panic on the calling thread aborts, matching pooled
    // workers.
    let guard = AbortOnDrop;
    work(&BatchCtx::caller());
    core::mem::forget(guard);
    drop(batch);
    Ok(())
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;
    use alloc::vec::Vec;

    use super::*;
    use crate::pool::ThreadPool;

    fn scrambled_pairs(len: usize, key_space: u64) -> Vec<(u64, usize)> {
        let mut state = 0x243f_6a88_85a3_08d3_u64;
        (0..len)
            .map(|seq| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state % key_space, seq)
            })
            .collect()
    }

    fn by_key(a: &(u64, usize), b: &(u64, usize)) -> bool {
        a.0 < b.0
    }

    /// Equal keys keep their original sequence order.
    fn assert_stably_sorted(v: &[(u64, usize)]) {
        for pair in v.windows(2) {
            assert!(pair[0].0 <= pair[1].0, "keys out of order");
            if pair[0].0 == pair[1].0 {
                assert!(pair[0].1 < pair[1].1, "equal keys reordered");
            }
        }
    }

    #[test]
    fn serial_stable_sort_is_stable() {
        let mut v = scrambled_pairs(10_000, 50);
        stable_sort_serial(&mut v, &by_key);
        assert_stably_sorted(&v);
    }

    #[test]
    fn in_place_fallback_is_stable() {
        let mut v = scrambled_pairs(3_000, 20);
        sort_in_place(&mut v, &by_key);
        assert_stably_sorted(&v);
    }

    #[test]
    fn merge_in_place_handles_unit_runs() {
        let mut v = alloc::vec![5, 1, 2, 3, 4];
        merge_in_place(&mut v, 1, &|a: &i32, b: &i32| a < b);
        assert_eq!(v, [1, 2, 3, 4, 5]);

        let mut v = alloc::vec![1, 2, 3, 4, 0];
        merge_in_place(&mut v, 4, &|a: &i32, b: &i32| a < b);
        assert_eq!(v, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn parallel_stable_sort_is_stable() {
        let pool: &'static ThreadPool = Box::leak(Box::new(ThreadPool::new()));
        pool.resize_to(3);

        let mut v = scrambled_pairs(100_000, 200);
        parallel_stable_sort(&mut v, &by_key, 3, pool).unwrap();
        assert_stably_sorted(&v);

        pool.resize_to(0);
    }

    /// Non-trivially-copyable elements survive the buffer ping-pong.
    #[test]
    fn parallel_stable_sort_moves_owned_values() {
        let pool: &'static ThreadPool = Box::leak(Box::new(ThreadPool::new()));
        pool.resize_to(2);

        let mut v: Vec<alloc::string::String> = scrambled_pairs(20_000, 1000)
            .into_iter()
            .map(|(key, _)| alloc::format!("{key:04}"))
            .collect();
        let mut expected = v.clone();
        expected.sort();
        parallel_stable_sort(&mut v, &|a, b| a < b, 2, pool).unwrap();
        assert_eq!(v, expected);

        pool.resize_to(0);
    }
}
