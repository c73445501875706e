/// Backoff for failed process creation.
///
/// Only `fork` failures (EAGAIN, ENOMEM) go through here. A child that
/// starts and exits is restarted immediately, whatever its status.
use crate::config::BackoffConfig;
use std::time::Duration;

/// Calculate exponential backoff delay.
///
/// Returns `initial_delay * 2^consecutive_count`, capped at `max_delay`.
pub fn backoff_delay(initial_delay_ms: u64, consecutive_count: u32, max_delay_ms: u64) -> u64 {
    let shift = 1u64.checked_shl(consecutive_count).unwrap_or(u64::MAX);
    let delay = initial_delay_ms.saturating_mul(shift);
    delay.min(max_delay_ms)
}

/// Tracks consecutive spawn failures and hands out the next delay.
#[derive(Debug)]
pub struct SpawnBackoff {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    consecutive: u32,
}

impl SpawnBackoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            initial_delay_ms: config.initial_delay_ms,
            max_delay_ms: config.max_delay_ms,
            consecutive: 0,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let ms = backoff_delay(self.initial_delay_ms, self.consecutive, self.max_delay_ms);
        self.consecutive = self.consecutive.saturating_add(1);
        Duration::from_millis(ms)
    }

    /// Number of failures since the last successful spawn.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}
