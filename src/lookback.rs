//! The decoupled-lookback protocol: a single-pass, barrier-free coordination
//! scheme for parallel prefix scans.
//!
//! Each chunk owns one cell that moves monotonically through three states:
//! uninitialized, local partial available, prefix-inclusive sum available.
//! Publication is an atomic release store plus a futex wake; waiting blocks
//! on the futex rather than spinning. Chunk 0 composes directly with the
//! caller's initial value and publishes its sum immediately; every other
//! chunk publishes its local partial, then looks back through predecessors
//! until it finds a sum, composing the chain along the way. The protocol is
//! correct for associative but non-commutative operators and preserves
//! left-to-right order.

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

use crate::resource::Exhausted;
use crate::resource::reserve_vec;

const UNINIT: u32 = 0;
const LOCAL: u32 = 1;
const SUM: u32 = 2;

// -----------------------------------------------------------------------------
// Cells

/// One chunk's published state. The state only ever increases, and the sum is
/// defined exactly once, after both the chunk's own local value and its
/// predecessor chain's sum are known.
struct Cell<T> {
    state: AtomicU32,
    local: UnsafeCell<MaybeUninit<T>>,
    sum: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: Each value slot has one writer (the owning chunk's processor) and
// is read by others only after the release store that publishes it.
unsafe impl<T: Send + Sync> Sync for Cell<T> {}

impl<T: Clone> Cell<T> {
    fn new() -> Cell<T> {
        Cell {
            state: AtomicU32::new(UNINIT),
            local: UnsafeCell::new(MaybeUninit::uninit()),
            sum: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    fn publish(&self, slot: &UnsafeCell<MaybeUninit<T>>, value: T, state: u32) {
        // SAFETY: Only the owning chunk's processor writes this cell, and it
        // writes each slot at most once, before the release store below makes
        // the slot visible.
        unsafe { (*slot.get()).write(value) };
        self.state.store(state, Ordering::Release);
        // Wake every waiter; several successors may be blocked on this cell.
        atomic_wait::wake_all(&self.state);
    }

    /// Blocks until the cell has published at least its local value, then
    /// returns the observed state.
    fn wait_local(&self) -> u32 {
        loop {
            let state = self.state.load(Ordering::Acquire);
            if state != UNINIT {
                return state;
            }
            atomic_wait::wait(&self.state, state);
        }
    }

    /// # Safety
    ///
    /// The caller must have observed a state of at least `LOCAL`.
    unsafe fn read_local(&self) -> T {
        // SAFETY: Published by a release store observed by the caller.
        unsafe { (*self.local.get()).assume_init_ref().clone() }
    }

    /// # Safety
    ///
    /// The caller must have observed the `SUM` state.
    unsafe fn read_sum(&self) -> T {
        // SAFETY: Published by a release store observed by the caller.
        unsafe { (*self.sum.get()).assume_init_ref().clone() }
    }
}

impl<T> Drop for Cell<T> {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if state >= LOCAL {
            // SAFETY: Local was initialized when entering the LOCAL state.
            unsafe { self.local.get_mut().assume_init_drop() };
        }
        if state == SUM {
            // SAFETY: Sum was initialized when entering the SUM state.
            unsafe { self.sum.get_mut().assume_init_drop() };
        }
    }
}

// -----------------------------------------------------------------------------
// Chain

/// One cell per chunk, owned by a single operation invocation.
pub(crate) struct Chain<T> {
    cells: Box<[Cell<T>]>,
}

impl<T: Clone> Chain<T> {
    pub fn new(chunks: usize) -> Result<Chain<T>, Exhausted> {
        let mut cells = reserve_vec(chunks)?;
        for _ in 0..chunks {
            cells.push(Cell::new());
        }
        Ok(Chain {
            cells: cells.into_boxed_slice(),
        })
    }

    /// Publishes `chunk`'s local partial value. Not used for chunk 0, which
    /// goes straight to its sum.
    pub fn publish_local(&self, chunk: usize, value: T) {
        debug_assert!(chunk > 0);
        let cell = &self.cells[chunk];
        debug_assert_eq!(cell.state.load(Ordering::Relaxed), UNINIT);
        cell.publish(&cell.local, value, LOCAL);
    }

    /// Publishes `chunk`'s prefix-inclusive sum, waking any successor blocked
    /// on it.
    pub fn publish_sum(&self, chunk: usize, value: T) {
        let cell = &self.cells[chunk];
        cell.publish(&cell.sum, value, SUM);
    }

    /// Computes the exclusive prefix of `chunk`: the composition of
    /// everything to its left. Returns `None` for chunk 0.
    ///
    /// Walks backward through predecessors, accumulating local values until
    /// one with a published sum is found. Amortized O(1) per chunk, worst
    /// case O(chunks). Blocks (futex, not spin) on predecessors that have
    /// not yet published anything.
    pub fn exclusive_prefix(&self, chunk: usize, op: impl Fn(&T, &T) -> T) -> Option<T> {
        if chunk == 0 {
            return None;
        }
        let mut gathered: Option<T> = None;
        let mut back = chunk - 1;
        loop {
            let cell = &self.cells[back];
            let state = cell.wait_local();
            if state == SUM {
                // SAFETY: We observed the SUM state just above.
                let sum = unsafe { cell.read_sum() };
                return Some(match gathered {
                    None => sum,
                    Some(rest) => op(&sum, &rest),
                });
            }
            // SAFETY: `wait_local` observed at least the LOCAL state.
            let local = unsafe { cell.read_local() };
            gathered = Some(match gathered {
                None => local,
                Some(rest) => op(&local, &rest),
            });
            // Chunk 0 never stops at LOCAL, so the walk always terminates.
            debug_assert!(back > 0);
            back -= 1;
        }
    }

    /// The published sum of the final chunk, once every chunk has completed.
    /// Callable only after the operation's join point.
    pub fn final_sum(&self) -> T {
        let cell = &self.cells[self.cells.len() - 1];
        debug_assert_eq!(cell.state.load(Ordering::Relaxed), SUM);
        // SAFETY: After the join every cell has published its sum.
        unsafe { cell.read_sum() }
    }
}
