//! Collectors that combine per-chunk partial results with minimal contention.

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;

use crate::resource::Exhausted;
use crate::resource::reserve_vec;

// -----------------------------------------------------------------------------
// Atomic extreme indices

/// Keeps the numerically lowest offered index directly via a CAS retry loop.
/// Used when the winning value itself is safely atomic.
pub(crate) struct LowIndex {
    best: AtomicUsize,
}

impl LowIndex {
    pub fn new() -> LowIndex {
        LowIndex {
            best: AtomicUsize::new(usize::MAX),
        }
    }

    /// Offers a candidate; keeps it only if it improves on the current best.
    pub fn offer(&self, index: usize) {
        let mut current = self.best.load(Ordering::Relaxed);
        while index < current {
            match self.best.compare_exchange_weak(
                current,
                index,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Snapshot of the current best, usable as an early-stop bound.
    pub fn bound(&self) -> usize {
        self.best.load(Ordering::Relaxed)
    }

    pub fn get(&self) -> Option<usize> {
        match self.best.load(Ordering::Acquire) {
            usize::MAX => None,
            index => Some(index),
        }
    }
}

/// Keeps the numerically highest offered index. Indices are stored shifted
/// by one so that zero can mean "nothing offered yet".
pub(crate) struct HighIndex {
    best: AtomicUsize,
}

impl HighIndex {
    pub fn new() -> HighIndex {
        HighIndex {
            best: AtomicUsize::new(0),
        }
    }

    pub fn offer(&self, index: usize) {
        let candidate = index + 1;
        let mut current = self.best.load(Ordering::Relaxed);
        while candidate > current {
            match self.best.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Snapshot of the current best, usable as an early-stop bound.
    pub fn bound(&self) -> Option<usize> {
        self.best.load(Ordering::Relaxed).checked_sub(1)
    }

    pub fn get(&self) -> Option<usize> {
        self.best.load(Ordering::Acquire).checked_sub(1)
    }
}

// -----------------------------------------------------------------------------
// Generalized sum drop

/// A preallocated slot array sized to the worker count plus an atomic write
/// cursor. Each worker appends its single partial result exactly once; the
/// caller folds the slots sequentially after the pool join.
pub(crate) struct SumSlots<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    cursor: AtomicUsize,
}

// SAFETY: Every slot is written by exactly one worker (the atomic cursor
// hands out distinct indices) and only read after the thread-pool join, which
// orders the reads after all writes.
unsafe impl<T: Send> Sync for SumSlots<T> {}

impl<T> SumSlots<T> {
    pub fn new(workers: usize) -> Result<SumSlots<T>, Exhausted> {
        let mut slots = reserve_vec(workers)?;
        for _ in 0..workers {
            slots.push(UnsafeCell::new(MaybeUninit::uninit()));
        }
        Ok(SumSlots {
            slots: slots.into_boxed_slice(),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Appends one worker's partial result.
    pub fn push(&self, value: T) {
        // Relaxed suffices for the index: visibility of the slot contents to
        // the folding thread is established by the batch join.
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        assert!(index < self.slots.len(), "more partials than workers");
        // SAFETY: The cursor hands out each index exactly once, so this slot
        // is not concurrently accessed by any other thread.
        unsafe { (*self.slots[index].get()).write(value) };
    }

    /// Removes all appended partials, in append order.
    pub fn drain(&mut self) -> alloc::vec::Vec<T> {
        let filled = (*self.cursor.get_mut()).min(self.slots.len());
        let mut out = alloc::vec::Vec::with_capacity(filled);
        for slot in &mut self.slots[..filled] {
            // SAFETY: Slots below the cursor were initialized by `push`, and
            // resetting the cursor below prevents a second read in `drop`.
            out.push(unsafe { slot.get_mut().assume_init_read() });
        }
        *self.cursor.get_mut() = 0;
        out
    }
}

impl<T> Drop for SumSlots<T> {
    fn drop(&mut self) {
        let filled = (*self.cursor.get_mut()).min(self.slots.len());
        for slot in &mut self.slots[..filled] {
            // SAFETY: Slots below the cursor hold initialized values that
            // were not drained.
            unsafe { slot.get_mut().assume_init_drop() };
        }
    }
}
