//! Caller-supplied cancellation and deadline for a single request.

use crate::error::{ClientError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Cancellation signal plus optional deadline, passed into every query call.
///
/// Cloning shares the token: cancelling any clone cancels them all. Use
/// [`RequestContext::child`] for a scope that can be cancelled on its own.
///
/// ```ignore
/// let ctx = RequestContext::new().with_timeout(Duration::from_secs(30));
/// let stream = client.query_with_context(&ctx, "SELECT 1").await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            ..Self::default()
        }
    }

    /// Attach a deadline `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self.timeout = Some(timeout);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A context whose token is a child of this one. Cancelling the child
    /// leaves the parent untouched.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            timeout: self.timeout,
        }
    }

    /// This context, or a child bounded by `default` if no deadline is set.
    pub(crate) fn or_default_timeout(&self, default: Option<Duration>) -> Self {
        match (self.deadline, default) {
            (None, Some(timeout)) => self.child().with_timeout(timeout),
            _ => self.clone(),
        }
    }

    /// Fail fast if the signal already fired.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(self.timeout_error());
            }
        }
        Ok(())
    }

    /// Resolves once the token is cancelled or the deadline passes.
    pub async fn done(&self) -> ClientError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => ClientError::Cancelled,
                _ = sleep_until(deadline) => self.timeout_error(),
            },
            None => {
                self.token.cancelled().await;
                ClientError::Cancelled
            }
        }
    }

    /// Drive `fut` unless the signal fires first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = fut => result,
        }
    }

    fn timeout_error(&self) -> ClientError {
        ClientError::Timeout(self.timeout.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_without_signal() {
        let ctx = RequestContext::new();
        let value = ctx.run(async { Ok::<_, ClientError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_returns_cancelled_when_already_cancelled() {
        let ctx = RequestContext::new();
        ctx.cancel();
        let result = ctx.run(async { Ok::<_, ClientError>(7) }).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(matches!(ctx.check(), Err(ClientError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let ctx = RequestContext::new().with_timeout(Duration::from_secs(5));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, ClientError>(())
            })
            .await;
        match result {
            Err(ClientError::Timeout(after)) => assert_eq!(after, Duration::from_secs(5)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = RequestContext::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_default_timeout_only_without_deadline() {
        let ctx = RequestContext::new();
        let bounded = ctx.or_default_timeout(Some(Duration::from_secs(600)));
        assert!(bounded.deadline().is_some());

        let explicit = RequestContext::new().with_timeout(Duration::from_secs(1));
        let kept = explicit.or_default_timeout(Some(Duration::from_secs(600)));
        assert_eq!(kept.deadline(), explicit.deadline());

        let unbounded = ctx.or_default_timeout(None);
        assert!(unbounded.deadline().is_none());
    }
}
