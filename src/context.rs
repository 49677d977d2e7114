//! Caller-owned cancellation and overall deadline for a logical operation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AscError, Result};

#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the context to an externally owned token, such as one canceled on Ctrl-C.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Tightens the deadline; a later deadline than the current one is ignored.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A context canceled together with this one that can also be canceled on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.remaining().is_some_and(|left| left.is_zero())
    }

    pub fn check(&self) -> Result<()> {
        if self.is_done() {
            Err(AscError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Drives `fut` until it completes, the caller cancels, or the deadline passes.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.check()?;
        let deadline = self.deadline;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AscError::Canceled),
            _ = sleep_until_opt(deadline) => Err(AscError::Canceled),
            out = fut => Ok(out),
        }
    }

    /// Sleeps for `delay`, short-circuited by cancellation or the deadline.
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.run(tokio::time::sleep(delay)).await
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cancel_short_circuits_sleep() {
        let ctx = CallContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let started = Instant::now();
        let result = ctx.sleep(Duration::from_secs(60)).await;
        assert!(matches!(result, Err(AscError::Canceled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_as_canceled() {
        let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
        let result = ctx.run(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(AscError::Canceled)));
    }

    #[test]
    fn earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = CallContext::new()
            .with_deadline(now + Duration::from_secs(10))
            .with_deadline(now + Duration::from_secs(30));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn child_follows_parent_cancellation() {
        let parent = CallContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.check().is_err());
    }

    #[test]
    fn external_token_cancels_bound_context() {
        let interrupt = CancellationToken::new();
        let ctx = CallContext::with_cancellation(interrupt.clone());
        let child = ctx.child();
        assert!(!ctx.is_done());
        interrupt.cancel();
        assert!(ctx.is_done());
        assert!(matches!(child.check(), Err(AscError::Canceled)));
    }
}
