//! A shared cooperative stop flag for short-circuiting searches.

use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering;

/// A one-directional cancellation flag shared by every chunk processor of a
/// single operation.
///
/// Cancellation is cooperative and approximate: chunk processors poll the
/// token opportunistically, and work claimed before cancellation was observed
/// may still run to completion. The caller simply discards such results.
/// Racing calls to [`CancelToken::cancel`] are harmless since only the
/// boolean matters.
pub(crate) struct CancelToken {
    canceled: AtomicBool,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken {
            canceled: AtomicBool::new(false),
        }
    }

    /// Idempotently requests cancellation.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// Checks the flag with acquire ordering.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}
