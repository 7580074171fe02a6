//! Unstable sorting: a serial introsort and a work-stealing parallel driver
//! over the same primitives.
//!
//! The parallel driver treats each pending subrange as a work item on a
//! [`StealTeam`]. Workers partition their own items depth-first, push one
//! half onto their own deque for siblings to steal, and continue with the
//! other. A division budget of about `1.5 * log2(len)` bounds quicksort's
//! pathological inputs; an exhausted budget switches the subrange to
//! heapsort, and subranges at or below [`INSERTION_SORT_MAX`] use insertion
//! sort. Every element is retired against the team's remaining-work counter
//! exactly once, which is how workers detect global completion.

use core::mem;
use core::ptr::NonNull;
use core::slice;
use std::thread;

use tracing::trace;

use crate::config::INSERTION_SORT_MAX;
use crate::deque::Deque;
use crate::pool::BatchCtx;
use crate::pool::ThreadPool;
use crate::resource::Exhausted;
use crate::steal::StealTeam;
use crate::steal::Stolen;
use crate::steal::Ticket;
use crate::unwind::AbortOnDrop;

// -----------------------------------------------------------------------------
// Serial primitives

pub(crate) fn insertion_sort<T, F>(v: &mut [T], is_less: &F)
where
    F: Fn(&T, &T) -> bool,
{
    for sorted_end in 1..v.len() {
        let mut hole = sorted_end;
        while hole > 0 && is_less(&v[hole], &v[hole - 1]) {
            v.swap(hole, hole - 1);
            hole -= 1;
        }
    }
}

fn sift_down<T, F>(v: &mut [T], mut node: usize, is_less: &F)
where
    F: Fn(&T, &T) -> bool,
{
    loop {
        let mut child = 2 * node + 1;
        if child >= v.len() {
            return;
        }
        if child + 1 < v.len() && is_less(&v[child], &v[child + 1]) {
            child += 1;
        }
        if !is_less(&v[node], &v[child]) {
            return;
        }
        v.swap(node, child);
        node = child;
    }
}

fn heap_sort<T, F>(v: &mut [T], is_less: &F)
where
    F: Fn(&T, &T) -> bool,
{
    for node in (0..v.len() / 2).rev() {
        sift_down(v, node, is_less);
    }
    for end in (1..v.len()).rev() {
        v.swap(0, end);
        sift_down(&mut v[..end], 0, is_less);
    }
}

fn median3<T, F>(v: &[T], a: usize, b: usize, c: usize, is_less: &F) -> usize
where
    F: Fn(&T, &T) -> bool,
{
    if is_less(&v[a], &v[b]) {
        if is_less(&v[b], &v[c]) {
            b
        } else if is_less(&v[a], &v[c]) {
            c
        } else {
            a
        }
    } else if is_less(&v[a], &v[c]) {
        a
    } else if is_less(&v[b], &v[c]) {
        c
    } else {
        b
    }
}

/// Median of three for short ranges, median of three medians (the "ninther")
/// once the range is long enough to afford the extra comparisons.
fn choose_pivot<T, F>(v: &[T], is_less: &F) -> usize
where
    F: Fn(&T, &T) -> bool,
{
    let len = v.len();
    let (a, b, c) = (len / 4, len / 2, len - 1 - len / 4);
    if len >= 128 {
        let lo = median3(v, a - 1, a, a + 1, is_less);
        let mid = median3(v, b - 1, b, b + 1, is_less);
        let hi = median3(v, c - 1, c, c + 1, is_less);
        median3(v, lo, mid, hi, is_less)
    } else {
        median3(v, a, b, c, is_less)
    }
}

/// Partitions `v` around a chosen pivot and returns the pivot's final index.
/// Elements left of the pivot are less than it; the pivot itself is in its
/// sorted position.
fn partition<T, F>(v: &mut [T], is_less: &F) -> usize
where
    F: Fn(&T, &T) -> bool,
{
    let last = v.len() - 1;
    let pivot = choose_pivot(v, is_less);
    v.swap(pivot, last);
    let mut store = 0;
    for index in 0..last {
        if is_less(&v[index], &v[last]) {
            v.swap(index, store);
            store += 1;
        }
    }
    v.swap(store, last);
    store
}

/// Divisions allowed before a subrange gives up on quicksort. About
/// `1.5 * log2(len)`, the classic introsort bound.
fn divide_budget(len: usize) -> u32 {
    (usize::BITS - len.leading_zeros()) * 3 / 2 + 1
}

fn introsort<T, F>(mut v: &mut [T], is_less: &F, mut budget: u32)
where
    F: Fn(&T, &T) -> bool,
{
    loop {
        if v.len() <= INSERTION_SORT_MAX {
            insertion_sort(v, is_less);
            return;
        }
        if budget == 0 {
            heap_sort(v, is_less);
            return;
        }
        budget -= 1;
        let mid = partition(v, is_less);
        let (left, rest) = mem::take(&mut v).split_at_mut(mid);
        let right = &mut rest[1..];
        // Recurse into the smaller half; loop on the larger. Keeps the stack
        // logarithmic.
        if left.len() < right.len() {
            introsort(left, is_less, budget);
            v = right;
        } else {
            introsort(right, is_less, budget);
            v = left;
        }
    }
}

/// The sequential unstable sort shared by the sequential policy and by
/// parallel paths that hit resource limits mid-sort.
pub(crate) fn sort_serial<T, F>(v: &mut [T], is_less: &F)
where
    F: Fn(&T, &T) -> bool,
{
    introsort(v, is_less, divide_budget(v.len() | 1));
}

// -----------------------------------------------------------------------------
// Parallel driver

/// One pending subrange. Items describe pairwise-disjoint windows of the
/// slice being sorted, so whoever pops or steals one has exclusive access.
struct SortItem<T> {
    base: NonNull<T>,
    len: usize,
    budget: u32,
}

// SAFETY: The item is exclusive ownership of a disjoint subrange; sending it
// transfers that ownership.
unsafe impl<T: Send> Send for SortItem<T> {}

impl<T> SortItem<T> {
    /// # Safety
    ///
    /// The item must be the unique live description of its subrange.
    unsafe fn as_slice(&self) -> &mut [T] {
        // SAFETY: Per the contract above.
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }
}

/// Sorts an item's subrange without further division. Returns the number of
/// elements retired.
fn sort_item_serial<T, F>(item: SortItem<T>, is_less: &F) -> usize
where
    F: Fn(&T, &T) -> bool,
{
    // SAFETY: The item was popped or handed back by a failed push, so this
    // thread is its unique holder.
    let v = unsafe { item.as_slice() };
    introsort(v, is_less, item.budget);
    v.len()
}

/// Repeatedly divides an item, pushing one half for siblings and continuing
/// with the other. Returns the number of elements this call retired.
fn process<T, F>(mut item: SortItem<T>, queue: &Deque<SortItem<T>>, is_less: &F) -> usize
where
    T: Send,
    F: Fn(&T, &T) -> bool,
{
    let mut retired = 0;
    loop {
        // SAFETY: Popped and stolen items are uniquely held.
        let v = unsafe { item.as_slice() };
        if v.len() <= INSERTION_SORT_MAX {
            insertion_sort(v, is_less);
            return retired + v.len();
        }
        if item.budget == 0 {
            heap_sort(v, is_less);
            return retired + v.len();
        }
        let mid = partition(v, is_less);
        // The pivot is in its final position.
        retired += 1;
        let budget = item.budget - 1;
        let left = SortItem {
            base: item.base,
            len: mid,
            budget,
        };
        let right = SortItem {
            // SAFETY: `mid < len`, so the offset stays in bounds.
            base: unsafe { NonNull::new_unchecked(item.base.as_ptr().add(mid + 1)) },
            len: item.len - mid - 1,
            budget,
        };
        // Offer the larger half to siblings, keep the smaller.
        let (kept, offered) = if left.len < right.len {
            (left, right)
        } else {
            (right, left)
        };
        if offered.len > 0
            && let Err(offered) = queue.push_bottom(offered)
        {
            // The deque could not grow. Finish that half here instead of
            // failing the whole sort.
            trace!("sort deque full; finishing a subrange serially");
            retired += sort_item_serial(offered, is_less);
        }
        item = kept;
    }
}

/// The per-thread sort loop: drain the own queue, then steal, then either
/// yield back to the pool or spin-yield (calling thread) until the team
/// reports completion.
fn drive<T, F>(
    team: &StealTeam<SortItem<T>>,
    ticket: &Ticket<'_, SortItem<T>>,
    is_less: &F,
    ctx: &BatchCtx<'_>,
) where
    T: Send,
    F: Fn(&T, &T) -> bool,
{
    let mut finished = 0;
    loop {
        while let Some(item) = ticket.queue().try_pop_bottom() {
            finished += process(item, ticket.queue(), is_less);
        }
        match team.steal(ticket.index(), mem::take(&mut finished)) {
            Stolen::Done => return,
            Stolen::Item(item) => finished += process(item, ticket.queue(), is_less),
            Stolen::Abort => {
                if ctx.resubmit() {
                    return;
                }
                thread::yield_now();
            }
        }
    }
}

fn sort_worker<T, F>(team: &StealTeam<SortItem<T>>, is_less: &F, ctx: &BatchCtx<'_>)
where
    T: Send,
    F: Fn(&T, &T) -> bool,
{
    let Some(ticket) = team.join() else {
        return;
    };
    drive(team, &ticket, is_less, ctx);
}

/// Sorts `v` on the pool, with the calling thread participating. Fails only
/// before any work is distributed; after that, local resource failures
/// degrade to serial sorting of the affected subranges.
pub(crate) fn parallel_sort<T, F>(
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
    let team: StealTeam<SortItem<T>> = StealTeam::new(workers + 1, v.len())?;
    let Some(ticket) = team.join() else {
        return Err(Exhausted);
    };
    let root = SortItem {
        base: NonNull::from(&mut *v).cast(),
        len: v.len(),
        budget: divide_budget(v.len() | 1),
    };
    if ticket.queue().push_bottom(root).is_err() {
        return Err(Exhausted);
    }

    let work = |ctx: &BatchCtx<'_>| sort_worker(&team, is_less, ctx);
    let batch = pool.submit(workers, &work)?;
    // A comparator panic on the calling thread aborts, matching pooled
    // workers.
    let guard = AbortOnDrop;
    drive(&team, &ticket, is_less, &BatchCtx::caller());
    mem::forget(guard);
    drop(batch);
    Ok(())
}
