//! A Chase-Lev work-stealing deque.
//!
//! The owning thread pushes and pops at the bottom; any other thread may
//! steal from the top. The buffer is an index-based ring over an owned
//! segment behind an `AtomicPtr`. Segments are doubled, never shrunk, and a
//! replaced segment is retired to a list owned by the deque rather than freed
//! immediately, so a stealer racing a grow can never observe freed memory.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::mem;
use core::mem::MaybeUninit;
use core::sync::atomic::AtomicIsize;
use core::sync::atomic::AtomicPtr;
use core::sync::atomic::Ordering;
use core::sync::atomic::fence;
use std::sync::Mutex;

use crate::resource::Exhausted;
use crate::resource::reserve_vec;

// -----------------------------------------------------------------------------
// Ring segments

struct Segment<T> {
    mask: usize,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

impl<T> Segment<T> {
    /// Allocates a segment with power-of-two capacity, reporting exhaustion
    /// instead of aborting.
    fn alloc(capacity: usize) -> Result<*mut Segment<T>, Exhausted> {
        debug_assert!(capacity.is_power_of_two());
        let mut slots = reserve_vec(capacity)?;
        for _ in 0..capacity {
            slots.push(UnsafeCell::new(MaybeUninit::uninit()));
        }
        Ok(Box::into_raw(Box::new(Segment {
            mask: capacity - 1,
            slots: slots.into_boxed_slice(),
        })))
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Reads the slot for ring index `index` as a bitwise copy.
    ///
    /// # Safety
    ///
    /// The caller must either own the element at `index` or discard the copy
    /// with `mem::forget` when a confirming CAS loses.
    unsafe fn read(&self, index: isize) -> T {
        let slot = self.slots[index as usize & self.mask].get();
        // SAFETY: Per the caller's contract the slot was initialized by a
        // prior `write` at this ring index.
        unsafe { (*slot).assume_init_read() }
    }

    /// Writes `value` into the slot for ring index `index`.
    ///
    /// # Safety
    ///
    /// Only the owning thread may call this, and only for an index outside
    /// the live `top..bottom` window.
    unsafe fn write(&self, index: isize, value: T) {
        let slot = self.slots[index as usize & self.mask].get();
        // SAFETY: The owner has exclusive write access to slots outside the
        // live window.
        unsafe { (*slot).write(value) };
    }
}

// -----------------------------------------------------------------------------
// Deque

/// Outcome of a steal attempt.
pub(crate) enum Steal<T> {
    /// Removed the top element.
    Success(T),
    /// Nothing to take.
    Empty,
    /// Lost a race; trying again may succeed.
    Retry,
}

/// The per-thread double-ended queue. `bottom` has a single writer (the
/// owner); `top` is contested and advanced by CAS.
pub(crate) struct Deque<T> {
    bottom: AtomicIsize,
    top: AtomicIsize,
    buffer: AtomicPtr<Segment<T>>,
    /// Replaced segments, freed only when the deque itself is dropped. This
    /// is the memory-safe stand-in for manual segment refcounting: retired
    /// segments stay readable for any stealer still holding the old pointer.
    retired: Mutex<Vec<*mut Segment<T>>>,
}

// SAFETY: The deque hands each element to exactly one consumer and the raw
// segment pointers are only freed with exclusive access in `drop`.
unsafe impl<T: Send> Send for Deque<T> {}
// SAFETY: As above; concurrent access is coordinated by bottom/top.
unsafe impl<T: Send> Sync for Deque<T> {}

impl<T> Deque<T> {
    /// Creates a deque with at least `capacity` slots.
    pub fn new(capacity: usize) -> Result<Deque<T>, Exhausted> {
        let capacity = capacity.next_power_of_two().max(2);
        // The segment doubles on every retirement, so the retired list never
        // holds more entries than the pointer width; reserving them here
        // keeps `grow` free of infallible allocation.
        let retired = reserve_vec(usize::BITS as usize)?;
        Ok(Deque {
            bottom: AtomicIsize::new(0),
            top: AtomicIsize::new(0),
            buffer: AtomicPtr::new(Segment::alloc(capacity)?),
            retired: Mutex::new(retired),
        })
    }

    /// Appends at the bottom. Owner-only. Returns the value back if the
    /// buffer needed to grow and the allocation failed; the caller completes
    /// that work serially instead.
    pub fn push_bottom(&self, value: T) -> Result<(), T> {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Acquire);
        // Only the owner stores to `buffer`, so a relaxed load is its own
        // latest value.
        let mut segment = self.buffer.load(Ordering::Relaxed);

        // SAFETY: `buffer` always points to a live segment; retired segments
        // are kept allocated until drop.
        let size = bottom - top;
        if size >= unsafe { (*segment).capacity() } as isize {
            match self.grow(segment, bottom, top) {
                Ok(bigger) => segment = bigger,
                Err(Exhausted) => return Err(value),
            }
        }

        // SAFETY: Ring index `bottom` is outside the live window until the
        // store below publishes it, and we are the owner.
        unsafe { (*segment).write(bottom, value) };
        self.bottom.store(bottom + 1, Ordering::Release);
        Ok(())
    }

    /// Removes the bottom element. Owner-only. A race against stealers for
    /// the final element is resolved by a CAS on `top`.
    pub fn try_pop_bottom(&self) -> Option<T> {
        let bottom = self.bottom.load(Ordering::Relaxed) - 1;
        let segment = self.buffer.load(Ordering::Relaxed);
        self.bottom.store(bottom, Ordering::Relaxed);
        // Order the speculative bottom decrement before reading top.
        fence(Ordering::SeqCst);
        let top = self.top.load(Ordering::Relaxed);

        if top > bottom {
            // Already empty; undo the decrement.
            self.bottom.store(top, Ordering::Relaxed);
            return None;
        }

        // SAFETY: `top <= bottom` means the slot at `bottom` is initialized,
        // and the decrement above excludes it from stealers' view unless this
        // is the final element (handled below).
        let value = unsafe { (*segment).read(bottom) };

        if top == bottom {
            // Single element left: a stealer may have claimed it already.
            let won = self
                .top
                .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(top + 1, Ordering::Relaxed);
            if !won {
                // The stealer owns the element; discard our bitwise copy.
                mem::forget(value);
                return None;
            }
        }
        Some(value)
    }

    /// Removes the top element. Callable from any thread.
    pub fn steal(&self) -> Steal<T> {
        let top = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let bottom = self.bottom.load(Ordering::Acquire);
        if top >= bottom {
            return Steal::Empty;
        }

        let segment = self.buffer.load(Ordering::Acquire);
        // Speculative read before the confirming CAS. The copy is discarded
        // if the CAS loses, and the segment cannot be freed under us because
        // replaced segments are retired, not freed.
        //
        // SAFETY: `top < bottom` means the slot was initialized; a concurrent
        // grow copies the live window, so the old segment still holds an
        // identical bitwise copy at this ring index.
        let value = unsafe { (*segment).read(top) };
        if self
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            Steal::Success(value)
        } else {
            mem::forget(value);
            Steal::Retry
        }
    }

    /// Doubles the segment, copying the live window. Owner-only.
    fn grow(
        &self,
        old: *mut Segment<T>,
        bottom: isize,
        top: isize,
    ) -> Result<*mut Segment<T>, Exhausted> {
        // SAFETY: `old` is the live segment and only the owner grows.
        let capacity = unsafe { (*old).capacity() };
        let bigger = Segment::alloc(capacity * 2)?;
        for index in top..bottom {
            // SAFETY: The live window is initialized in the old segment; the
            // new segment is private until the `buffer` store publishes it.
            // The element is logically moved: the stale bitwise copy left in
            // the old segment is never dropped (segments never drop slots).
            unsafe {
                let value = (*old).read(index);
                (*bigger).write(index, value);
            }
        }
        self.buffer.store(bigger, Ordering::Release);
        self.retired.lock().unwrap().push(old);
        Ok(bigger)
    }
}

impl<T> Drop for Deque<T> {
    fn drop(&mut self) {
        // Drop any elements never consumed.
        while self.try_pop_bottom().is_some() {}
        let segment = *self.buffer.get_mut();
        // SAFETY: We have exclusive access; the live segment and every
        // retired segment were created by `Box::into_raw` in `Segment::alloc`
        // and are freed exactly once here. Slot contents are `MaybeUninit`
        // and deliberately not dropped.
        unsafe {
            drop(Box::from_raw(segment));
            for retired in self.retired.get_mut().unwrap().drain(..) {
                drop(Box::from_raw(retired));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use core::sync::atomic::AtomicBool;
    use std::thread;

    use super::*;

    #[test]
    fn owner_sees_lifo_order() {
        let deque = Deque::new(4).unwrap();
        for value in 0..8 {
            deque.push_bottom(value).unwrap();
        }
        for value in (0..8).rev() {
            assert_eq!(deque.try_pop_bottom(), Some(value));
        }
        assert_eq!(deque.try_pop_bottom(), None);
    }

    #[test]
    fn stealers_see_fifo_order() {
        let deque = Deque::new(4).unwrap();
        for value in 0..4 {
            deque.push_bottom(value).unwrap();
        }
        assert!(matches!(deque.steal(), Steal::Success(0)));
        assert!(matches!(deque.steal(), Steal::Success(1)));
        assert_eq!(deque.try_pop_bottom(), Some(3));
        assert_eq!(deque.try_pop_bottom(), Some(2));
        assert!(matches!(deque.steal(), Steal::Empty));
    }

    #[test]
    fn growth_preserves_the_live_window() {
        let deque = Deque::new(2).unwrap();
        for value in 0..1000 {
            deque.push_bottom(value).unwrap();
        }
        let mut drained = Vec::new();
        while let Some(value) = deque.try_pop_bottom() {
            drained.push(value);
        }
        drained.reverse();
        let expected: Vec<i32> = (0..1000).collect();
        assert_eq!(drained, expected);
    }

    /// The multiset of elements removed equals the multiset pushed: no
    /// duplication, no loss, for concurrent push/pop/steal.
    #[test]
    fn concurrent_multiset_preservation() {
        const PUSHES: usize = 20_000;
        const STEALERS: usize = 4;

        let deque = Deque::new(8).unwrap();
        let done = AtomicBool::new(false);

        let (owner_got, stolen): (Vec<usize>, Vec<Vec<usize>>) = thread::scope(|s| {
            let handles: Vec<_> = (0..STEALERS)
                .map(|_| {
                    s.spawn(|| {
                        let mut got = Vec::new();
                        loop {
                            match deque.steal() {
                                Steal::Success(value) => got.push(value),
                                Steal::Retry => {}
                                Steal::Empty => {
                                    if done.load(Ordering::Acquire) {
                                        break;
                                    }
                                    thread::yield_now();
                                }
                            }
                        }
                        got
                    })
                })
                .collect();

            let mut got = Vec::new();
            for value in 0..PUSHES {
                if deque.push_bottom(value).is_err() {
                    panic!("allocation failure in test");
                }
                if value % 3 == 0
                    && let Some(popped) = deque.try_pop_bottom()
                {
                    got.push(popped);
                }
            }
            while let Some(popped) = deque.try_pop_bottom() {
                got.push(popped);
            }
            done.store(true, Ordering::Release);

            (got, handles.into_iter().map(|h| h.join().unwrap()).collect())
        });

        let mut all: Vec<usize> = owner_got;
        for batch in stolen {
            all.extend(batch);
        }
        all.sort_unstable();
        let expected: Vec<usize> = (0..PUSHES).collect();
        assert_eq!(all, expected);
    }
}
