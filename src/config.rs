//! Tuning constants for the parallel schedulers.
//!
//! These values are calibrated against the built-in worker pool. They are
//! deliberately exposed as named constants rather than scattered literals so
//! that a port to a different pool can re-tune them in one place.

/// Target number of sort chunks per hardware thread. Oversubscribing the
/// merge tree keeps workers busy when chunk costs are uneven.
pub const OVERSUBSCRIPTION: usize = 32;

/// Number of chunks handed to each worker by a static partition team.
/// Larger values smooth out per-element cost variance at the price of more
/// claims on the shared counter.
pub const CHUNKS_PER_WORKER: usize = 8;

/// Inputs shorter than this are never worth scheduling in parallel.
pub const MIN_PARALLEL_LEN: usize = 2;

/// Sub-ranges at or below this length are insertion-sorted in place.
pub const INSERTION_SORT_MAX: usize = 32;
