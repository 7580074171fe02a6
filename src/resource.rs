//! Internal resource-exhaustion plumbing.
//!
//! Running out of memory or pool capacity during parallel setup is never an
//! error the caller sees: the algorithm entry point catches [`Exhausted`] and
//! restarts the whole call with the plain sequential body.

use alloc::vec::Vec;

/// Parallelism resources were exhausted. Recoverable and internal-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Exhausted;

/// Allocates a `Vec` with room for exactly `n` elements, reporting
/// exhaustion instead of aborting the process.
pub(crate) fn reserve_vec<T>(n: usize) -> Result<Vec<T>, Exhausted> {
    let mut v = Vec::new();
    v.try_reserve_exact(n).map_err(|_| Exhausted)?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_vec_reports_capacity() {
        let v: Vec<u64> = reserve_vec(16).unwrap();
        assert!(v.capacity() >= 16);
        assert!(v.is_empty());
    }

    #[test]
    fn absurd_reservation_is_caught() {
        assert_eq!(reserve_vec::<u64>(usize::MAX).unwrap_err(), Exhausted);
    }
}
