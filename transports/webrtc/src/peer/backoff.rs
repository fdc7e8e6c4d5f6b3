//! Reconnect delay policy
//!
//! Delay for the next retry is `min(initial * 2^attempts, max)`, where
//! `attempts` counts retries since the last successful connection.

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Exponential backoff state for one guest lifecycle
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    attempts_before_toast: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay_ms: config.initial_delay_ms,
            max_delay_ms: config.max_delay_ms,
            attempts_before_toast: config.attempts_before_toast,
            attempts: 0,
        }
    }

    /// Delay before a retry when `attempts` retries already happened
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 2u64.checked_pow(attempts).unwrap_or(u64::MAX);
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Delay before the next retry
    pub fn next_delay(&self) -> Duration {
        self.delay_for(self.attempts)
    }

    /// Count a retry that is about to run
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    /// Forget past failures (connected, or a fresh lifecycle)
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True exactly when the failure streak reaches the notice threshold
    pub fn should_notify(&self) -> bool {
        self.attempts == self.attempts_before_toast
    }
}
