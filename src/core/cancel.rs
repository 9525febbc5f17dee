//! Cooperative cancellation.
//!
//! Every blocking operation takes a `Cancel` handle and checks it before
//! store calls, inside loops that read multiple blobs, in the CAS retry
//! loop, and during backoff sleeps. No background threads are owned by the
//! engine; cancellation is purely cooperative.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Returned by any operation interrupted by cancellation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("operation canceled")]
pub struct Canceled;

/// Clonable cancellation flag shared between a caller and the operations it
/// started.
#[derive(Clone, Debug, Default)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
}

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Boundary check: error out if cancellation was requested.
    pub fn check(&self) -> Result<(), Canceled> {
        if self.is_canceled() {
            Err(Canceled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early on cancellation.
    pub fn sleep(&self, duration: Duration) -> Result<(), Canceled> {
        const SLICE: Duration = Duration::from_millis(5);
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_live() {
        let cancel = Cancel::new();
        assert!(!cancel.is_canceled());
        assert!(cancel.check().is_ok());
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let cancel = Cancel::new();
        let other = cancel.clone();
        other.cancel();
        assert!(cancel.is_canceled());
        assert_eq!(cancel.check(), Err(Canceled));
    }

    #[test]
    fn sleep_returns_early_when_canceled() {
        let cancel = Cancel::new();
        cancel.cancel();
        let start = Instant::now();
        assert_eq!(cancel.sleep(Duration::from_secs(5)), Err(Canceled));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_completes_when_live() {
        let cancel = Cancel::new();
        assert!(cancel.sleep(Duration::from_millis(10)).is_ok());
    }
}
