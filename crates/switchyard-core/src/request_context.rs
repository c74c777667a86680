//! Request context for router dispatch.
//!
//! `RequestContext` is the cancellable context that accompanies one logical
//! request: a request id for log correlation, a cancellation token, and an
//! optional deadline. The router races every adapter call and every
//! fallback-delay sleep against [`RequestContext::done`], so cancelling the
//! token (or passing the deadline) aborts the whole dispatch.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use switchyard_types::error::RouterError;

/// Cancellation and deadline scope for one dispatch.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request.
    pub request_id: Uuid,
    /// Cancellation token -- child tokens are derived from the parent.
    pub cancellation: CancellationToken,
    /// Point after which the request gives up.
    pub deadline: Option<Instant>,
    /// Timeout that produced `deadline`, reported in the deadline error.
    timeout: Option<Duration>,
}

impl RequestContext {
    /// Create a root context with a fresh request id and no deadline.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            cancellation: CancellationToken::new(),
            deadline: None,
            timeout: None,
        }
    }

    /// Create a context bound to an existing cancellation token.
    pub fn with_token(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..Self::new()
        }
    }

    /// Return a copy whose deadline is at most `timeout` from now.
    ///
    /// An earlier existing deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let mut ctx = self.clone();
        match self.deadline {
            Some(existing) if existing <= candidate => {}
            _ => {
                ctx.deadline = Some(candidate);
                ctx.timeout = Some(timeout);
            }
        }
        ctx
    }

    /// Derive a child context: same id and deadline, child cancellation token.
    ///
    /// Cancelling the parent cancels the child, but not vice versa.
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id,
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
            timeout: self.timeout,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel this context (and all child contexts derived from it).
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fail immediately if the context is already cancelled or expired.
    pub fn check(&self) -> Result<(), RouterError> {
        if self.is_cancelled() {
            return Err(RouterError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(self.deadline_error());
            }
        }
        Ok(())
    }

    /// Resolve once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> RouterError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.cancellation.cancelled() => RouterError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => self.deadline_error(),
                }
            }
            None => {
                self.cancellation.cancelled().await;
                RouterError::Cancelled
            }
        }
    }

    /// Sleep for `duration` unless the context ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), RouterError> {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn deadline_error(&self) -> RouterError {
        RouterError::DeadlineExceeded(self.timeout.unwrap_or_default())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_has_no_deadline() {
        let ctx = RequestContext::new();
        assert!(ctx.deadline.is_none());
        assert!(!ctx.is_cancelled());
        assert!(ctx.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_keeps_earlier_deadline() {
        let ctx = RequestContext::new().with_timeout(Duration::from_secs(5));
        let longer = ctx.with_timeout(Duration::from_secs(30));
        assert_eq!(longer.deadline, ctx.deadline);

        let shorter = ctx.with_timeout(Duration::from_secs(1));
        assert!(shorter.deadline < ctx.deadline);
    }

    #[test]
    fn test_child_cancelled_with_parent() {
        let parent = RequestContext::new();
        let child = parent.child();
        assert_eq!(child.request_id, parent.request_id);

        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.check(), Err(RouterError::Cancelled)));
    }

    #[test]
    fn test_cancel_child_does_not_cancel_parent() {
        let parent = RequestContext::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_resolves_at_deadline() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(250));
        let err = ctx.done().await;
        assert!(matches!(err, RouterError::DeadlineExceeded(d) if d == Duration::from_millis(250)));
        assert!(ctx.check().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let ctx = RequestContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result = ctx.sleep(Duration::from_secs(60)).await;
        assert!(matches!(result, Err(RouterError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancel() {
        let ctx = RequestContext::new();
        assert!(ctx.sleep(Duration::from_millis(100)).await.is_ok());
    }
}
