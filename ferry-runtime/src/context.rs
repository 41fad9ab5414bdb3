//! Per-invocation execution context

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline bookkeeping for one invocation
///
/// Created when a request arrives and dropped when it completes. Not `Clone`:
/// each invocation owns its deadline.
#[derive(Debug)]
pub struct ExecutionContext {
    started_at: Instant,
    deadline: Duration,
    shutdown: CancellationToken,
}

impl ExecutionContext {
    /// Create a context whose deadline is `deadline` from now
    pub fn new(deadline: Duration) -> Self {
        Self::with_shutdown(deadline, CancellationToken::new())
    }

    /// Create a context that also observes a process-wide shutdown token
    ///
    /// A child token is used so that the invocation can never cancel the
    /// parent.
    pub fn with_shutdown(deadline: Duration, shutdown: CancellationToken) -> Self {
        Self {
            started_at: Instant::now(),
            deadline,
            shutdown: shutdown.child_token(),
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Instant at which the deadline passes
    pub fn deadline_at(&self) -> Instant {
        self.started_at + self.deadline
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining_time(&self) -> Duration {
        self.deadline.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_time().is_zero()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_remaining_time_decreases() {
        let ctx = ExecutionContext::new(Duration::from_secs(30));
        assert_eq!(ctx.remaining_time(), Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(12)).await;
        assert_eq!(ctx.elapsed(), Duration::from_secs(12));
        assert_eq!(ctx.remaining_time(), Duration::from_secs(18));
        assert!(!ctx.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_instant_is_fixed_at_creation() {
        let ctx = ExecutionContext::new(Duration::from_secs(30));
        let expected = Instant::now() + Duration::from_secs(30);

        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(ctx.deadline_at(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_time_saturates() {
        let ctx = ExecutionContext::new(Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(ctx.remaining_time(), Duration::ZERO);
        assert!(ctx.is_expired());
    }

    #[tokio::test]
    async fn test_shutdown_propagates_from_parent() {
        let parent = CancellationToken::new();
        let ctx = ExecutionContext::with_shutdown(Duration::from_secs(5), parent.clone());
        assert!(!ctx.is_shutting_down());

        parent.cancel();
        assert!(ctx.is_shutting_down());
    }

    #[tokio::test]
    async fn test_child_token_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let ctx = ExecutionContext::with_shutdown(Duration::from_secs(5), parent.clone());

        ctx.shutdown_token().cancel();
        assert!(!parent.is_cancelled());
    }
}
