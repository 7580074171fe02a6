//! A team of per-thread work-stealing deques, used by the parallel sort
//! driver for divide-and-conquer load balancing.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;
use std::sync::Mutex;

use crate::deque::Deque;
use crate::deque::Steal;
use crate::resource::Exhausted;
use crate::resource::reserve_vec;

/// Outcome of a team-wide steal attempt.
pub(crate) enum Stolen<T> {
    /// All work units in the whole team are finished.
    Done,
    /// Took a work item from a sibling queue.
    Item(T),
    /// No sibling yielded work, but work remains somewhere. The caller
    /// should yield its thread (or resubmit itself to the pool) rather than
    /// spin.
    Abort,
}

/// Membership in the team. A ticket is a thread-local capability, not shared
/// mutable state; dropping it returns the queue index to the free pool.
pub(crate) struct Ticket<'team, T> {
    team: &'team StealTeam<T>,
    index: usize,
}

impl<T> Ticket<'_, T> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// The queue owned by this member.
    pub fn queue(&self) -> &Deque<T> {
        &self.team.queues[self.index]
    }
}

impl<T> Drop for Ticket<'_, T> {
    fn drop(&mut self) {
        self.team.leave(self.index);
    }
}

/// Per-thread deques plus the shared counters that coordinate them.
pub(crate) struct StealTeam<T> {
    queues: Box<[Deque<T>]>,
    /// One past the highest queue index ever joined; steals scan downward
    /// from here.
    watermark: AtomicUsize,
    /// Work units not yet completed across the whole team.
    remaining: AtomicUsize,
    /// Free queue indices, kept sorted descending so `pop` yields the lowest.
    free: Mutex<Vec<usize>>,
}

impl<T> StealTeam<T> {
    fn leave(&self, index: usize) {
        let mut free = self.free.lock().unwrap();
        free.push(index);
        // Keep descending order so the next join claims the lowest index.
        free.sort_unstable_by(|a, b| b.cmp(a));
    }
}

impl<T: Send> StealTeam<T> {
    /// Creates a team with `slots` member queues and `total_work` outstanding
    /// work units.
    pub fn new(slots: usize, total_work: usize) -> Result<StealTeam<T>, Exhausted> {
        debug_assert!(slots >= 1);
        let mut queues = reserve_vec(slots)?;
        for _ in 0..slots {
            queues.push(Deque::new(64)?);
        }
        let mut free = reserve_vec(slots)?;
        free.extend((0..slots).rev());
        Ok(StealTeam {
            queues: queues.into_boxed_slice(),
            watermark: AtomicUsize::new(0),
            remaining: AtomicUsize::new(total_work),
            free: Mutex::new(free),
        })
    }

    /// Joins the team, claiming the lowest free queue index and raising the
    /// watermark. Returns `None` when every slot is occupied.
    pub fn join(&self) -> Option<Ticket<'_, T>> {
        let index = self.free.lock().unwrap().pop()?;
        self.watermark.fetch_max(index + 1, Ordering::Release);
        Some(Ticket { team: self, index })
    }

    /// Retires `finished` work units, then tries to steal from a sibling.
    ///
    /// Scans sibling queues from the watermark down to (but excluding) the
    /// caller's own queue index.
    pub fn steal(&self, me: usize, finished: usize) -> Stolen<T> {
        if self.finish(finished) {
            return Stolen::Done;
        }
        let watermark = self.watermark.load(Ordering::Acquire);
        for victim in (0..watermark).rev() {
            if victim == me {
                continue;
            }
            loop {
                match self.queues[victim].steal() {
                    Steal::Success(item) => return Stolen::Item(item),
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }
        }
        if self.remaining.load(Ordering::Acquire) == 0 {
            Stolen::Done
        } else {
            Stolen::Abort
        }
    }

    /// Subtracts `finished` from the remaining-work counter. Returns true
    /// when the team's work is complete.
    fn finish(&self, finished: usize) -> bool {
        if finished == 0 {
            return self.remaining.load(Ordering::Acquire) == 0;
        }
        let before = self.remaining.fetch_sub(finished, Ordering::AcqRel);
        debug_assert!(before >= finished);
        before == finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_claims_lowest_free_index() {
        let team: StealTeam<u32> = StealTeam::new(3, 10).unwrap();
        let a = team.join().unwrap();
        let b = team.join().unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        drop(a);
        let c = team.join().unwrap();
        assert_eq!(c.index(), 0);
        let d = team.join().unwrap();
        assert_eq!(d.index(), 2);
        assert!(team.join().is_none());
    }

    #[test]
    fn steal_scans_siblings_and_reports_done() {
        let team: StealTeam<u32> = StealTeam::new(2, 3).unwrap();
        let a = team.join().unwrap();
        let b = team.join().unwrap();
        a.queue().push_bottom(7).unwrap();

        // B steals A's item; two units still outstanding afterward.
        match team.steal(b.index(), 1) {
            Stolen::Item(item) => assert_eq!(item, 7),
            _ => panic!("expected a stolen item"),
        }
        // Nothing left to steal but work remains.
        assert!(matches!(team.steal(b.index(), 1), Stolen::Abort));
        // Retiring the final unit reports completion.
        assert!(matches!(team.steal(a.index(), 1), Stolen::Done));
    }
}
