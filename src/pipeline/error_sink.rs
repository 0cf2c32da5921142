//! First-failure latch shared by every pipeline task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::error::Failure;

/// Captures the first reported [`Failure`] and wakes the coordinator.
///
/// Reporting never blocks: the first caller wins the compare-and-set, stores its
/// failure and fires the notification; later failures are logged and dropped.
#[derive(Debug, Default)]
pub struct ErrorSink {
    tripped: AtomicBool,
    first: Mutex<Option<Failure>>,
    notify: CancellationToken,
}

impl ErrorSink {
    /// Create an untripped sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a failure; returns `true` if it was the first one
    pub fn report(&self, failure: Failure) -> bool {
        if self
            .tripped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::error!(
                stage = %failure.stage,
                context = %failure.context,
                error = %failure.error,
                "Error occurred"
            );
            *self.first.lock().unwrap_or_else(PoisonError::into_inner) = Some(failure);
            self.notify.cancel();
            true
        } else {
            tracing::debug!(
                stage = %failure.stage,
                context = %failure.context,
                error = %failure.error,
                "Additional failure absorbed"
            );
            false
        }
    }

    /// Whether any failure has been reported
    pub fn has_failed(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Resolves once the first failure has been stored
    pub async fn tripped(&self) {
        self.notify.cancelled().await
    }

    /// Take the first failure, leaving the sink tripped
    pub fn take_failure(&self) -> Option<Failure> {
        self.first
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
