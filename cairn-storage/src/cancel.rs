use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation represents a handle that can interrupt long running
/// scans and view refreshes. Work loops call `check` once per row.
#[derive(Debug, Clone)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

impl Default for Cancellation {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    #[inline]
    pub fn new() -> Self {
        Cancellation {
            inner: Arc::new(Inner::new()),
        }
    }

    /// Returns true only for the call that actually cancelled.
    #[inline]
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
struct Inner {
    flag: AtomicBool,
}

impl Inner {
    #[inline]
    const fn new() -> Self {
        Inner {
            flag: AtomicBool::new(false),
        }
    }

    #[inline]
    fn cancel(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
