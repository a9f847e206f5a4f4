use std::time::Duration;

/// 1s, 5s, 30s, 5m, 15m.
pub const DEFAULT_BACKOFF_SECS: [u64; 5] = [1, 5, 30, 300, 900];

/// Retry strategy for webhook delivery
///
/// Delays come from a fixed schedule indexed by the retry count and plateau
/// at the last entry, however many retries the partner allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryStrategy {
    schedule: Vec<Duration>,
}

impl RetryStrategy {
    /// Build a strategy from an explicit schedule. An empty schedule means
    /// retries are due immediately.
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }

    pub fn from_secs(schedule: &[u64]) -> Self {
        Self::new(schedule.iter().copied().map(Duration::from_secs).collect())
    }

    /// Delay before the next attempt, given the retry count *after* the
    /// failure was recorded (so the first retry asks for `delay_for(1)`).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let Some(last) = self.schedule.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = (retry_count.saturating_sub(1) as usize).min(last);
        self.schedule[index]
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_BACKOFF_SECS)
    }
}
