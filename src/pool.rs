//! The worker pool and the RAII work batch.
//!
//! Algorithms never talk to OS threads directly. They wrap their per-worker
//! chunk loop in a [`Batch`]: registration and submission happen in
//! [`ThreadPool::submit`], the calling thread always participates as one
//! worker, and the batch's drop is the universal join point, blocking until
//! every submitted callback has completed. Any registration failure is
//! reported as [`Exhausted`] before a single job is queued, letting the
//! algorithm restart sequentially.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cmp;
use core::marker::PhantomData;
use core::num::NonZero;
use core::ptr::NonNull;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::Once;
use std::thread::Builder as ThreadBuilder;
use std::thread::JoinHandle;
use std::thread::available_parallelism;

use tracing::debug;
use tracing::trace;

use crate::resource::Exhausted;
use crate::unwind;

// -----------------------------------------------------------------------------
// Type-erased jobs

/// A type-erased unit of work queued on the pool. Each `JobRef` is executed
/// exactly once.
pub(crate) struct JobRef {
    job_pointer: NonNull<()>,
    execute_fn: unsafe fn(NonNull<()>),
}

// SAFETY: !Send for raw pointers is not for safety, just as a lint.
unsafe impl Send for JobRef {}

impl JobRef {
    /// Creates a new `JobRef` from raw parts.
    ///
    /// # Safety
    ///
    /// The caller must ensure `job_pointer` remains valid to pass to
    /// `execute_fn` until the job is executed.
    unsafe fn new_raw(job_pointer: NonNull<()>, execute_fn: unsafe fn(NonNull<()>)) -> JobRef {
        JobRef {
            job_pointer,
            execute_fn,
        }
    }

    pub fn execute(self) {
        // SAFETY: The constructor of `JobRef` is required to ensure this is
        // valid, and consuming `self` makes the call unique.
        unsafe { (self.execute_fn)(self.job_pointer) }
    }
}

// -----------------------------------------------------------------------------
// The pool

/// A fixed pool of OS worker threads shared by all algorithm invocations.
///
/// The pool starts empty; [`pool`] lazily fills it to the available
/// parallelism on first use. It can be resized at any time, including to
/// zero, in which case every algorithm simply runs its sequential body.
pub struct ThreadPool {
    state: Mutex<PoolState>,
    job_is_ready: Condvar,
}

struct PoolState {
    injected: VecDeque<JobRef>,
    workers: Vec<ThreadControl>,
}

/// Used to manage the lifecycle of a worker thread.
struct ThreadControl {
    /// Tells the thread to shut down when set to true.
    halt: Arc<AtomicBool>,
    /// The handle used to wait for the thread to complete.
    handle: JoinHandle<()>,
}

#[allow(clippy::new_without_default)]
impl ThreadPool {
    /// Creates a new, empty thread pool.
    pub const fn new() -> ThreadPool {
        ThreadPool {
            state: Mutex::new(PoolState {
                injected: VecDeque::new(),
                workers: Vec::new(),
            }),
            job_is_ready: Condvar::new(),
        }
    }

    /// Current number of pool worker threads. The calling thread always
    /// participates in algorithms on top of this.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().workers.len()
    }

    /// Resizes the pool to one worker per available hardware thread, minus
    /// one for the calling thread. Returns the new size.
    pub fn resize_to_available(&'static self) -> usize {
        let available = available_parallelism().map(NonZero::get).unwrap_or(1);
        self.resize_to(available.saturating_sub(1))
    }

    /// Resizes the pool to the specified number of worker threads. Returns
    /// the new size, which may be smaller than requested if thread spawning
    /// fails.
    pub fn resize_to(&'static self, new_size: usize) -> usize {
        self.resize(|_| new_size)
    }

    /// Adds worker threads to the pool. Returns the new size.
    pub fn grow(&'static self, added: usize) -> usize {
        self.resize(|current| current + added)
    }

    /// Removes worker threads from the pool. Returns the new size.
    pub fn shrink(&'static self, removed: usize) -> usize {
        self.resize(|current| current.saturating_sub(removed))
    }

    /// Resizes the pool, and returns the new size.
    #[cold]
    fn resize<F>(&'static self, get_size: F) -> usize
    where
        F: Fn(usize) -> usize,
    {
        debug!("starting worker pool resize");

        // Resizing is a critical section; only one thread resizes at a time.
        let mut state = self.state.lock().unwrap();
        let current_size = state.workers.len();
        let new_size = get_size(current_size);

        trace!(
            "attempting to resize worker pool from {} to {} thread(s)",
            current_size, new_size
        );

        match new_size.cmp(&current_size) {
            cmp::Ordering::Equal => current_size,
            cmp::Ordering::Greater => {
                for index in current_size..new_size {
                    let halt = Arc::new(AtomicBool::new(false));
                    let worker_halt = halt.clone();
                    let spawned = ThreadBuilder::new()
                        .name(format!("tutti worker {index}"))
                        .spawn(move || worker_loop(self, worker_halt));
                    match spawned {
                        Ok(handle) => state.workers.push(ThreadControl { halt, handle }),
                        Err(_) => {
                            debug!("worker spawn failed; pool stays at {}", state.workers.len());
                            break;
                        }
                    }
                }
                state.workers.len()
            }
            cmp::Ordering::Less => {
                let terminating = state.workers.split_off(new_size);
                for worker in &terminating {
                    worker.halt.store(true, Ordering::Relaxed);
                }
                drop(state);
                // Wake sleeping workers so they observe the halt flag.
                self.job_is_ready.notify_all();
                for worker in terminating {
                    let _ = worker.handle.join();
                }
                // Submitted jobs must always run: execute anything the
                // departed workers left behind on this thread.
                while let Some(job) = self.try_pop() {
                    job.execute();
                }
                new_size
            }
        }
    }

    /// Claims one queued job, if any. Used by joining threads to help drain
    /// the queue.
    pub(crate) fn try_pop(&self) -> Option<JobRef> {
        self.state.lock().unwrap().injected.pop_front()
    }

    /// Registers `work` with the pool and queues `copies` jobs that each run
    /// it once. Fails before queueing anything when the pool has no workers
    /// or the queue reservation fails; the caller falls back to its
    /// sequential body.
    pub(crate) fn submit<'a, F>(
        &'static self,
        copies: usize,
        work: &'a F,
    ) -> Result<Batch<'a>, Exhausted>
    where
        F: Fn(&BatchCtx<'_>) + Sync,
    {
        if copies == 0 {
            return Err(Exhausted);
        }

        let inner = Box::new(BatchInner {
            pool: self,
            work: NonNull::from(work).cast(),
            run: run_erased::<F>,
            remaining: AtomicU32::new(copies as u32),
        });

        {
            let mut state = self.state.lock().unwrap();
            if state.workers.is_empty() {
                debug!("worker pool is empty; refusing batch submission");
                return Err(Exhausted);
            }
            if state.injected.try_reserve(copies).is_err() {
                debug!("job queue reservation failed; refusing batch submission");
                return Err(Exhausted);
            }
            for _ in 0..copies {
                // SAFETY: `BatchInner` is heap-allocated (stable across moves
                // of the `Batch`) and outlives every queued job because the
                // batch join blocks until `remaining` reaches zero.
                let job = unsafe {
                    JobRef::new_raw(NonNull::from(&*inner).cast(), BatchInner::execute)
                };
                state.injected.push_back(job);
            }
        }
        self.job_is_ready.notify_all();
        trace!(copies, "submitted work batch");

        Ok(Batch {
            inner,
            _borrow: PhantomData,
        })
    }
}

/// The main loop for pool workers: claim a queued job, run it with the lock
/// released, and sleep on the condvar when the queue is empty. The halt flag
/// is only honored between jobs.
fn worker_loop(pool: &'static ThreadPool, halt: Arc<AtomicBool>) {
    trace!("starting pool worker");
    let mut state = pool.state.lock().unwrap();
    loop {
        if let Some(job) = state.injected.pop_front() {
            drop(state);
            job.execute();
            state = pool.state.lock().unwrap();
            continue;
        }
        if halt.load(Ordering::Relaxed) {
            break;
        }
        state = pool.job_is_ready.wait(state).unwrap();
    }
    trace!("exiting pool worker");
}

/// Monomorphized trampoline recovering the closure type from the erased
/// pointer held in a [`BatchInner`].
unsafe fn run_erased<F>(work: NonNull<()>, ctx: &BatchCtx<'_>)
where
    F: Fn(&BatchCtx<'_>) + Sync,
{
    // SAFETY: `work` was created in `submit` from an `&F` that the `Batch`'s
    // lifetime parameter keeps borrowed until after the join.
    let work = unsafe { work.cast::<F>().as_ref() };
    work(ctx);
}

// -----------------------------------------------------------------------------
// Batches

/// Shared bookkeeping for one submitted batch. Jobs hold a raw pointer to
/// this; the owning [`Batch`] keeps it alive until the join completes.
pub(crate) struct BatchInner {
    pool: &'static ThreadPool,
    work: NonNull<()>,
    run: unsafe fn(NonNull<()>, &BatchCtx<'_>),
    /// Jobs submitted (or resubmitted) and not yet finished. Doubles as the
    /// futex the joining thread sleeps on.
    remaining: AtomicU32,
}

// SAFETY: `work` is a lifetime-erased shared borrow of a `Sync` closure.
unsafe impl Send for BatchInner {}
// SAFETY: As above.
unsafe impl Sync for BatchInner {}

impl BatchInner {
    /// Job entry point.
    ///
    /// # Safety
    ///
    /// `this` must point to a live `BatchInner`, which is guaranteed by the
    /// batch join blocking until `remaining` reaches zero.
    unsafe fn execute(this: NonNull<()>) {
        // SAFETY: Per the contract above.
        let inner = unsafe { this.cast::<BatchInner>().as_ref() };
        let ctx = BatchCtx { inner: Some(inner) };
        // A panic in the caller-supplied operator on a parallel path
        // terminates the process rather than unwinding across the scheduler.
        let guard = unwind::AbortOnDrop;
        // SAFETY: `run` was monomorphized for the closure `work` points to.
        unsafe { (inner.run)(inner.work, &ctx) };
        core::mem::forget(guard);
        inner.finish_one();
    }

    fn finish_one(&self) {
        if self.remaining.fetch_sub(1, Ordering::Release) == 1 {
            atomic_wait::wake_all(&self.remaining);
        }
    }

    /// Queues one more copy of this batch's job. Returns false when the
    /// queue reservation fails, in which case nothing was queued and the
    /// caller must keep working on its current thread.
    fn requeue(&self) -> bool {
        let mut state = self.pool.state.lock().unwrap();
        if state.injected.try_reserve(1).is_err() {
            return false;
        }
        // Raise `remaining` before queueing so the join cannot complete in
        // between.
        self.remaining.fetch_add(1, Ordering::Relaxed);
        // SAFETY: Same contract as in `submit`: the join keeps `self` alive
        // until this job has executed.
        let job = unsafe { JobRef::new_raw(NonNull::from(self).cast(), BatchInner::execute) };
        state.injected.push_back(job);
        drop(state);
        self.pool.job_is_ready.notify_one();
        true
    }
}

/// Handle passed to the batch closure, identifying how it is being run.
pub(crate) struct BatchCtx<'a> {
    inner: Option<&'a BatchInner>,
}

impl BatchCtx<'_> {
    /// Context for the calling thread's own participation in a batch.
    pub fn caller() -> BatchCtx<'static> {
        BatchCtx { inner: None }
    }

    /// Requeues this worker's slot on the pool so it can yield the OS thread
    /// instead of spinning. Returns false on the calling thread (which has
    /// nowhere to yield to) or when the queue cannot take another job; either
    /// way the current thread should keep working.
    pub fn resubmit(&self) -> bool {
        match self.inner {
            Some(inner) if inner.requeue() => {
                trace!("worker resubmitted itself to the pool");
                true
            }
            _ => false,
        }
    }
}

/// RAII handle for one submission. Dropping it is the universal join point:
/// the drop blocks until every submitted callback has completed, helping to
/// drain the queue so the join cannot deadlock on an undersized pool.
pub(crate) struct Batch<'a> {
    inner: Box<BatchInner>,
    _borrow: PhantomData<&'a ()>,
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        loop {
            let remaining = self.inner.remaining.load(Ordering::Acquire);
            if remaining == 0 {
                break;
            }
            if let Some(job) = self.inner.pool.try_pop() {
                job.execute();
                continue;
            }
            atomic_wait::wait(&self.inner.remaining, remaining);
        }
        trace!("work batch joined");
    }
}

// -----------------------------------------------------------------------------
// The global pool

static POOL: ThreadPool = ThreadPool::new();
static POOL_INIT: Once = Once::new();

/// Returns the global worker pool, filling it to the available parallelism
/// on first use. Resize it to control how many threads algorithms may use;
/// size zero forces every algorithm onto its sequential body.
pub fn pool() -> &'static ThreadPool {
    POOL_INIT.call_once(|| {
        POOL.resize_to_available();
    });
    &POOL
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicUsize;

    use super::*;

    // A private pool per test: resizing the global pool would interfere with
    // concurrently-running tests.
    fn with_pool(size: usize, test: impl FnOnce(&'static ThreadPool)) {
        let pool: &'static ThreadPool = Box::leak(Box::new(ThreadPool::new()));
        pool.resize_to(size);
        test(pool);
        pool.resize_to(0);
    }

    #[test]
    fn batch_runs_every_copy() {
        with_pool(2, |pool| {
            let runs = AtomicUsize::new(0);
            let work = |_: &BatchCtx<'_>| {
                runs.fetch_add(1, Ordering::Relaxed);
            };
            let batch = pool.submit(5, &work).unwrap();
            work(&BatchCtx::caller());
            drop(batch);
            assert_eq!(runs.load(Ordering::Acquire), 6);
        });
    }

    #[test]
    fn empty_pool_refuses_submission() {
        with_pool(0, |pool| {
            let work = |_: &BatchCtx<'_>| {};
            assert!(pool.submit(3, &work).is_err());
        });
    }

    #[test]
    fn join_helps_drain_an_undersized_pool() {
        with_pool(1, |pool| {
            let runs = AtomicUsize::new(0);
            let work = |_: &BatchCtx<'_>| {
                runs.fetch_add(1, Ordering::Relaxed);
            };
            // Many more copies than workers; the joining thread must help.
            let batch = pool.submit(64, &work).unwrap();
            drop(batch);
            assert_eq!(runs.load(Ordering::Acquire), 64);
        });
    }

    #[test]
    fn resubmit_requeues_pooled_workers() {
        with_pool(1, |pool| {
            let bounces = AtomicUsize::new(0);
            let work = |ctx: &BatchCtx<'_>| {
                if bounces.fetch_add(1, Ordering::Relaxed) < 3 {
                    assert!(ctx.resubmit());
                }
            };
            drop(pool.submit(1, &work).unwrap());
            assert_eq!(bounces.load(Ordering::Acquire), 4);
            assert!(!BatchCtx::caller().resubmit());
        });
    }
}
