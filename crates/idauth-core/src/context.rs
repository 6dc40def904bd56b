//! Cancellable, deadline-bearing execution context.
//!
//! Every network-bound call (discovery, grant execution) runs under a
//! [`CallContext`] handed down from the original caller. Cancelling the token
//! or passing the deadline aborts the in-flight future at its next await
//! point; nothing is written to any cache after that.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AuthError, Result};

/// Cancellation token plus optional deadline for one logical operation.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_at(Instant::now() + timeout)
    }

    /// Replace the cancellation token, e.g. to share one with other tasks.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Set an absolute deadline. An earlier existing deadline wins.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// The token observed by this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fail fast if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(AuthError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context is cancelled or its
    /// deadline passes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(AuthError::Cancelled),
                result = fut => result,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .map_err(|_| AuthError::DeadlineExceeded)?,
            None => guarded.await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_completes_without_limits() {
        let ctx = CallContext::background();
        let value = ctx.run(async { Ok::<_, AuthError>(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn run_fails_fast_when_already_cancelled() {
        let ctx = CallContext::background();
        ctx.cancel();
        let polled = std::sync::atomic::AtomicBool::new(false);
        let result = ctx
            .run(async {
                polled.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, AuthError>(())
            })
            .await;
        assert!(matches!(result, Err(AuthError::Cancelled)));
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_aborts_on_cancellation() {
        let ctx = CallContext::background();
        let token = ctx.cancellation_token().clone();

        let handle = tokio::spawn(async move {
            ctx.run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, AuthError>(())
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(AuthError::Cancelled)));
    }

    #[tokio::test]
    async fn run_reports_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_millis(20));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, AuthError>(())
            })
            .await;
        assert!(matches!(result, Err(AuthError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn inner_errors_pass_through() {
        let ctx = CallContext::with_timeout(Duration::from_secs(5));
        let result: Result<()> = ctx
            .run(async { Err(AuthError::validation("missing code")) })
            .await;
        assert!(matches!(result, Err(AuthError::Validation { .. })));
    }

    #[test]
    fn earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = CallContext::background()
            .deadline_at(now + Duration::from_secs(1))
            .deadline_at(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn context_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CallContext>();
    }
}
