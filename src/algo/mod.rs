//! The policy-parameterized algorithm entry points.
//!
//! Every entry point follows the same shape: gate on the policy, the input
//! length, and the pool size; if parallel execution is justified, build the
//! per-invocation scheduling structures, submit a batch, and participate from
//! the calling thread; if anything in that setup reports [`Exhausted`], or
//! the gate fails, run the plain sequential body over the whole input. The
//! caller never observes which path ran.

use tracing::debug;

use crate::config::CHUNKS_PER_WORKER;
use crate::config::MIN_PARALLEL_LEN;
use crate::partition::Team;
use crate::pool::BatchCtx;
use crate::pool::pool;
use crate::resource::Exhausted;
use crate::unwind::AbortOnDrop;

mod foreach;
mod numeric;
mod order;
mod part;
mod scan;
mod search;
mod sets;
mod sorting;

pub use foreach::for_each;
pub use foreach::for_each_iter;
pub use foreach::transform;
pub use numeric::count;
pub use numeric::count_if;
pub use numeric::reduce;
pub use numeric::transform_reduce;
pub use numeric::transform_reduce_zip;
pub use order::is_heap_until;
pub use order::is_sorted_until;
pub use part::is_partitioned;
pub use part::partition;
pub use part::remove;
pub use part::remove_if;
pub use scan::adjacent_difference;
pub use scan::exclusive_scan;
pub use scan::inclusive_scan;
pub use scan::transform_exclusive_scan;
pub use scan::transform_inclusive_scan;
pub use search::adjacent_find;
pub use search::equal;
pub use search::find;
pub use search::find_end;
pub use search::find_first_of;
pub use search::find_if;
pub use search::find_if_not;
pub use search::mismatch;
pub use search::search;
pub use search::search_n;
pub use sets::set_difference;
pub use sets::set_intersection;
pub use sorting::sort;
pub use sorting::sort_by;
pub use sorting::stable_sort;
pub use sorting::stable_sort_by;

/// Selects how an algorithm invocation may execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Plain sequential execution on the calling thread.
    Seq,
    /// Parallel execution across the worker pool.
    Par,
    /// Parallel execution with no intra-thread ordering promises. Scheduled
    /// identically to [`Policy::Par`].
    ParUnseq,
}

impl Policy {
    pub(crate) fn is_par(self) -> bool {
        !matches!(self, Policy::Seq)
    }
}

/// Decides whether an invocation of length `len` should fan out, and if so,
/// over how many chunks and with how many extra pool workers. `None` means
/// run the sequential body.
pub(crate) fn plan(policy: Policy, len: usize) -> Option<(Team, usize)> {
    if !policy.is_par() || len < MIN_PARALLEL_LEN {
        return None;
    }
    let workers = pool().size();
    if workers == 0 {
        return None;
    }
    let chunks = len.min((workers + 1) * CHUNKS_PER_WORKER);
    let extra = workers.min(chunks - 1);
    Some((Team::new(len, chunks), extra))
}

/// Submits `work` to the pool `extra` times and runs it once more on the
/// calling thread, joining before returning. Operator panics on this path
/// abort the process.
pub(crate) fn run_batch<F>(extra: usize, work: &F) -> Result<(), Exhausted>
where
    F: Fn(&BatchCtx<'_>) + Sync,
{
    let batch = pool().submit(extra, work)?;
    let guard = AbortOnDrop;
    work(&BatchCtx::caller());
    core::mem::forget(guard);
    drop(batch);
    Ok(())
}

/// Logs the decision to abandon a parallel attempt. The sequential body runs
/// next.
pub(crate) fn fall_back(algorithm: &'static str) {
    debug!(algorithm, "parallel setup exhausted; running sequentially");
}

/// A raw pointer that may be shared across the workers of one batch.
///
/// Workers derive disjoint sub-slices from it using partition keys; the
/// disjointness argument lives at each use site.
pub(crate) struct SyncPtr<T>(*mut T);

impl<T> SyncPtr<T> {
    pub fn new(ptr: *mut T) -> SyncPtr<T> {
        SyncPtr(ptr)
    }

    pub fn get(self) -> *mut T {
        self.0
    }
}

impl<T> Clone for SyncPtr<T> {
    fn clone(&self) -> SyncPtr<T> {
        *self
    }
}

impl<T> Copy for SyncPtr<T> {}

// SAFETY: Shared only among the workers of one batch, which access disjoint
// ranges; the batch join orders all accesses before the owner reuses the
// data.
unsafe impl<T: Send> Send for SyncPtr<T> {}
// SAFETY: As above.
unsafe impl<T: Send> Sync for SyncPtr<T> {}
