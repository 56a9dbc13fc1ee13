//! Cancellation
//!
//! One abort handle per in-flight operation. The handle is held by the
//! caller, the signal is threaded through every suspension point of the
//! pipeline.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Marker returned when a guarded suspension point observed an abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

/// Caller side of the cancellation token
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the token. Returns `true` only for the call that fired it.
    pub fn abort(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::debug!("abort signalled");
        self.token.cancel();
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal observed by the pipeline
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            token: self.token.clone(),
        }
    }
}

/// Pipeline side of the cancellation token
#[derive(Debug, Clone)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail fast if the token already fired
    pub fn check(&self) -> Result<(), Aborted> {
        if self.is_aborted() { Err(Aborted) } else { Ok(()) }
    }

    /// Resolve once the token fires
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }

    /// Run `fut` until it completes or the token fires
    ///
    /// The future is dropped on abort, which cancels the underlying work.
    /// An abort observed on resumption wins over the future's own output.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Aborted> {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Aborted),
            output = fut => {
                self.check()?;
                Ok(output)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_abort_is_idempotent() {
        let handle = AbortHandle::new();
        assert!(!handle.is_aborted());
        assert!(handle.abort());
        assert!(!handle.abort());
        assert!(handle.is_aborted());
        assert!(handle.signal().is_aborted());
    }

    #[test]
    fn test_fresh_handles_are_independent() {
        let first = AbortHandle::new();
        first.abort();
        let second = AbortHandle::new();
        assert!(!second.signal().is_aborted());
    }

    #[tokio::test]
    async fn test_guard_passes_output_through() {
        let handle = AbortHandle::new();
        let out = handle.signal().guard(async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn test_guard_interrupts_pending_future() {
        let handle = AbortHandle::new();
        let signal = handle.signal();
        let task = tokio::spawn(async move { signal.guard(std::future::pending::<()>()).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.abort();
        assert_eq!(task.await.unwrap(), Err(Aborted));
    }

    #[tokio::test]
    async fn test_guard_after_abort_short_circuits() {
        let handle = AbortHandle::new();
        handle.abort();
        let out = handle.signal().guard(async { 1 }).await;
        assert_eq!(out, Err(Aborted));
    }
}
