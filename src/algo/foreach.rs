//! Elementwise traversal and mapping.

use core::slice;

use crate::partition::ForwardChunks;
use crate::partition::Team;
use crate::pool::BatchCtx;
use crate::resource::Exhausted;

use super::Policy;
use super::SyncPtr;
use super::fall_back;
use super::plan;
use super::run_batch;

/// Applies `f` to every element.
pub fn for_each<T, F>(policy: Policy, v: &mut [T], f: F)
where
    T: Send,
    F: Fn(&mut T) + Sync,
{
    if let Some((team, extra)) = plan(policy, v.len()) {
        let base = SyncPtr::new(v.as_mut_ptr());
        let work = |_: &BatchCtx<'_>| {
            while let Some(key) = team.next_key() {
                // SAFETY: Keys are disjoint, so each worker holds the only
                // live reference into its chunk.
                let chunk =
                    unsafe { slice::from_raw_parts_mut(base.get().add(key.start), key.len) };
                for item in chunk {
                    f(item);
                }
            }
        };
        match run_batch(extra, &work) {
            Ok(()) => return,
            Err(Exhausted) => fall_back("for_each"),
        }
    }
    for item in v.iter_mut() {
        f(item);
    }
}

/// Applies `f` to every item of a forward (cloneable) iterator.
///
/// The parallel path walks the iterator once to record chunk division
/// points; each worker then re-walks only its own chunks.
pub fn for_each_iter<I, F>(policy: Policy, iter: I, f: F)
where
    I: Iterator + Clone + Sync,
    F: Fn(I::Item) + Sync,
{
    if policy.is_par()
        && let Some((team, extra)) = plan(policy, iter.clone().count())
    {
        match try_for_each_iter(&team, extra, iter.clone(), &f) {
            Ok(()) => return,
            Err(Exhausted) => fall_back("for_each_iter"),
        }
    }
    iter.for_each(f);
}

fn try_for_each_iter<I, F>(team: &Team, extra: usize, iter: I, f: &F) -> Result<(), Exhausted>
where
    I: Iterator + Clone + Sync,
    F: Fn(I::Item) + Sync,
{
    let chunks = ForwardChunks::new(team, iter)?;
    run_batch(extra, &|_: &BatchCtx<'_>| {
        while let Some(key) = team.next_key() {
            for item in chunks.chunk(&key) {
                f(item);
            }
        }
    })
}

/// Maps `input` into `output` elementwise. The slices must be equally long.
pub fn transform<T, U, F>(policy: Policy, input: &[T], output: &mut [U], f: F)
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync,
{
    debug_assert_eq!(input.len(), output.len(), "transform slices disagree");
    let len = input.len().min(output.len());
    if let Some((team, extra)) = plan(policy, len) {
        let out = SyncPtr::new(output.as_mut_ptr());
        let work = |_: &BatchCtx<'_>| {
            while let Some(key) = team.next_key() {
                let src = &input[key.start..key.end()];
                // SAFETY: Keys are disjoint; writes land in this chunk only.
                let dst =
                    unsafe { slice::from_raw_parts_mut(out.get().add(key.start), key.len) };
                for (slot, item) in dst.iter_mut().zip(src) {
                    *slot = f(item);
                }
            }
        };
        match run_batch(extra, &work) {
            Ok(()) => return,
            Err(Exhausted) => fall_back("transform"),
        }
    }
    for (slot, item) in output[..len].iter_mut().zip(&input[..len]) {
        *slot = f(item);
    }
}
