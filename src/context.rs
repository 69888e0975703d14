//! Per-call cancellation and deadline.
//!
//! A `CallContext` governs one `ProxyCore::execute` call tree. Cloning is
//! cheap and clones observe the same cancellation.

use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::UpstreamError;

/// Cancellation token plus optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that never ends unless canceled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. one shared with a request handler.
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token, deadline: None }
    }

    /// A context that expires `timeout` from now. A timeout too large to
    /// represent as an instant means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::new().deadline_at(deadline),
            None => Self::new(),
        }
    }

    /// Set (or tighten) the deadline.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The reason this context ended, or `None` while it is live.
    pub fn err(&self) -> Option<UpstreamError> {
        if self.token.is_cancelled() {
            return Some(UpstreamError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(UpstreamError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolve once the context is canceled or its deadline passes.
    pub async fn done(&self) -> UpstreamError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => UpstreamError::Canceled,
                    _ = time::sleep_until(deadline) => UpstreamError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                UpstreamError::Canceled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_is_observed_by_clones() {
        let ctx = CallContext::new();
        let clone = ctx.clone();
        assert!(clone.err().is_none());

        ctx.cancel();
        assert_eq!(clone.err(), Some(UpstreamError::Canceled));
        assert_eq!(clone.done().await, UpstreamError::Canceled);
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let ctx = CallContext::with_timeout(Duration::from_millis(20));
        assert!(!ctx.is_done());

        let reason = ctx.done().await;
        assert_eq!(reason, UpstreamError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(UpstreamError::DeadlineExceeded));
    }

    #[test]
    fn test_unrepresentable_timeout_has_no_deadline() {
        let ctx = CallContext::with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);
        assert_eq!(ctx.err(), None);
    }

    #[test]
    fn test_deadline_only_tightens() {
        let now = Instant::now();
        let ctx = CallContext::new()
            .deadline_at(now + Duration::from_secs(1))
            .deadline_at(now + Duration::from_secs(5));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }
}
