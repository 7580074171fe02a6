//! Panic containment for parallel execution paths.
//!
//! A panic in a caller-supplied operator while work is fanned out would leave
//! the operation in an ill-defined partially-parallel state, so it terminates
//! the process instead of unwinding across the scheduler. Sequential paths
//! let panics propagate normally.

use std::eprintln;
use std::process::abort;

/// Aborts the program when dropped. Forget it after the guarded region to
/// re-enable normal unwinding.
pub(crate) struct AbortOnDrop;

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        eprintln!("tutti: panic in a parallel worker; aborting");
        abort();
    }
}
