//! Policy-driven parallel slice algorithms.
//!
//! Tutti provides the classic slice algorithms (map, reduce, scan, sort,
//! partition, search, and sorted-set operations) behind a single [`Policy`]
//! knob: [`Policy::Seq`] runs the plain sequential body, while [`Policy::Par`]
//! and [`Policy::ParUnseq`] fan the work out over a shared worker pool with
//! the calling thread participating.
//!
//! Parallel execution is strictly an optimization. Every entry point returns
//! the same result under every policy, and if any resource needed to set up a
//! parallel run is unavailable (an empty pool, a failed allocation), the call
//! quietly degrades to the sequential body rather than reporting an error.
//!
//! The pool starts empty; size it once near startup:
//!
//! ```
//! tutti::pool().resize_to_available();
//!
//! let mut values: Vec<u64> = (0..1_000_000).rev().collect();
//! tutti::sort(tutti::Policy::Par, &mut values);
//! assert!(values.windows(2).all(|w| w[0] <= w[1]));
//! ```

#![no_std]

// -----------------------------------------------------------------------------
// Boilerplate for building without the standard library

extern crate alloc;
extern crate std;

// -----------------------------------------------------------------------------
// Modules

mod algo;
mod cancel;
mod collect;
mod config;
mod deque;
mod lookback;
mod merge;
mod partition;
mod pool;
mod resource;
mod sort;
mod steal;
mod unwind;

// -----------------------------------------------------------------------------
// Top-level exports

pub use algo::Policy;
pub use algo::adjacent_difference;
pub use algo::adjacent_find;
pub use algo::count;
pub use algo::count_if;
pub use algo::equal;
pub use algo::exclusive_scan;
pub use algo::find;
pub use algo::find_end;
pub use algo::find_first_of;
pub use algo::find_if;
pub use algo::find_if_not;
pub use algo::for_each;
pub use algo::for_each_iter;
pub use algo::inclusive_scan;
pub use algo::is_heap_until;
pub use algo::is_partitioned;
pub use algo::is_sorted_until;
pub use algo::mismatch;
pub use algo::partition;
pub use algo::reduce;
pub use algo::remove;
pub use algo::remove_if;
pub use algo::search;
pub use algo::search_n;
pub use algo::set_difference;
pub use algo::set_intersection;
pub use algo::sort;
pub use algo::sort_by;
pub use algo::stable_sort;
pub use algo::stable_sort_by;
pub use algo::transform;
pub use algo::transform_exclusive_scan;
pub use algo::transform_inclusive_scan;
pub use algo::transform_reduce;
pub use algo::transform_reduce_zip;
pub use pool::ThreadPool;
pub use pool::pool;
