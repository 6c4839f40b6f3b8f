/// Retry limits and backoff sleeping
use async_trait::async_trait;
use std::time::Duration;

/// Limits on how hard the load balancer tries before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Conflict retries allowed per replica before falling back to the primary
    pub conflict_retry_factor: usize,
    /// Attempts against the primary when it fails with connection errors
    pub primary_retries: u32,
    /// Delay after the first failed primary attempt; squared for each next one
    pub primary_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            conflict_retry_factor: 3,
            primary_retries: 3,
            primary_retry_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Conflict retries allowed across a list of `host_count` replicas
    pub fn max_conflict_retries(&self, host_count: usize) -> usize {
        host_count.saturating_mul(self.conflict_retry_factor)
    }
}

/// Next backoff delay: the current one squared, in seconds (2s, 4s, 16s, ...)
pub fn next_delay(delay: Duration) -> Duration {
    let secs = delay.as_secs_f64();
    Duration::try_from_secs_f64(secs * secs).unwrap_or(Duration::MAX)
}

/// Suspends the current task between retries
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
