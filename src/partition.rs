//! Static partitioning of a linear index range into near-equal chunks.
//!
//! A [`Team`] is created fresh for each algorithm invocation and hands out
//! [`Key`]s through a single atomic counter. Keys exactly tile `[0, count)`
//! and any two chunk sizes differ by at most one element.

use alloc::vec::Vec;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;

use crate::resource::Exhausted;
use crate::resource::reserve_vec;

// -----------------------------------------------------------------------------
// Partition keys

/// A claimed chunk: a contiguous sub-range of the input assigned to one
/// worker for sequential processing.
///
/// Keys are produced only by a [`Team`] and consumed by exactly one caller.
/// Once claimed, a chunk must be processed to completion; dropping a claimed
/// chunk is a correctness bug in the claiming algorithm, not a recoverable
/// condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Key {
    /// Position of this chunk in the partition, in `0..chunks`.
    pub chunk: usize,
    /// Offset of the first element of the chunk.
    pub start: usize,
    /// Number of elements in the chunk. Never zero when `count > 0`.
    pub len: usize,
}

impl Key {
    /// Offset one past the last element of the chunk.
    #[inline(always)]
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

// -----------------------------------------------------------------------------
// Partition team

/// Splits `count` elements into `chunks` near-equal pieces and hands them out
/// via an atomic counter.
///
/// `next_key` is the only mutator. It is safe under unbounded concurrent
/// calls and monotonic: each chunk number is issued exactly once, after which
/// the team returns `None` forever.
pub(crate) struct Team {
    chunks: usize,
    chunk_size: usize,
    remainder: usize,
    next: AtomicUsize,
}

impl Team {
    /// Creates a team over `count` elements split into `chunks` pieces.
    pub fn new(count: usize, chunks: usize) -> Team {
        debug_assert!(chunks >= 1);
        debug_assert!(chunks <= count.max(1));
        Team {
            chunks,
            chunk_size: count / chunks,
            remainder: count % chunks,
            next: AtomicUsize::new(0),
        }
    }

    /// Number of chunks this team will issue.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Computes the key for a given chunk number in O(1).
    ///
    /// The first `remainder` chunks carry one extra element, so the chunk
    /// sizes sum to `count` exactly.
    pub fn key(&self, chunk: usize) -> Key {
        debug_assert!(chunk < self.chunks);
        Key {
            chunk,
            start: self.start_of(chunk),
            len: self.chunk_size + usize::from(chunk < self.remainder),
        }
    }

    /// Offset of the first element of `chunk`. Accepts `chunk == chunks`,
    /// for which it returns `count`.
    pub fn start_of(&self, chunk: usize) -> usize {
        debug_assert!(chunk <= self.chunks);
        chunk * self.chunk_size + chunk.min(self.remainder)
    }

    /// Claims the next unissued chunk, or `None` once all chunks are taken.
    pub fn next_key(&self) -> Option<Key> {
        let chunk = self.next.fetch_add(1, Ordering::Relaxed);
        if chunk < self.chunks {
            Some(self.key(chunk))
        } else {
            None
        }
    }
}

// -----------------------------------------------------------------------------
// Forward partition range

/// Chunk bounds for a forward (cloneable, non-indexable) sequence.
///
/// Random-access inputs (slices) compute chunk bounds by arithmetic straight
/// from the [`Key`]. Forward sequences cannot be offset arithmetically, so
/// this walks the sequence once and records `chunks + 1` division points.
pub(crate) struct ForwardChunks<I> {
    points: Vec<I>,
}

impl<I> ForwardChunks<I>
where
    I: Iterator + Clone,
{
    /// Records the division points for `team` in one O(count) pass. Fails
    /// when the sequence runs out before the team's element count, sending the
    /// caller to its sequential body, which defines the semantics for
    /// iterators whose length is not reproducible.
    pub fn new(team: &Team, iter: I) -> Result<ForwardChunks<I>, Exhausted> {
        let mut points = reserve_vec(team.chunks() + 1)?;
        let mut cursor = iter;
        points.push(cursor.clone());
        for chunk in 0..team.chunks() {
            for _ in 0..team.key(chunk).len {
                if cursor.next().is_none() {
                    return Err(Exhausted);
                }
            }
            points.push(cursor.clone());
        }
        Ok(ForwardChunks { points })
    }

    /// Returns an iterator over the elements of the chunk named by `key`.
    pub fn chunk(&self, key: &Key) -> impl Iterator<Item = I::Item> {
        self.points[key.chunk].clone().take(key.len)
    }
}
