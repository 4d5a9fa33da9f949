//! Cooperative cancellation for blocking operations.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::error::{ErrorKind, Result};

/// How often blocked waiters re-check their token.
pub(crate) const CANCELLATION_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A cloneable flag that asks blocking operations to give up.
///
/// Every clone observes the same flag. Pool acquisition and server selection check it while
/// they wait and fail with [`ErrorKind::Cancelled`] once it is set.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Cancelling twice has no further effect.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ErrorKind::Cancelled.into())
        } else {
            Ok(())
        }
    }
}
