//! Reconnect policy: exponential backoff with jitter and a retry ceiling

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

use crate::config::WebSocketSettings;

/// Backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Consecutive failed handshakes tolerated (at least 1)
    pub max_attempts: u32,

    /// First delay
    pub base_delay: Duration,

    /// Delay cap
    pub max_delay: Duration,

    /// Randomization factor in [0, 1)
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl From<&WebSocketSettings> for ReconnectConfig {
    fn from(ws: &WebSocketSettings) -> Self {
        Self {
            max_attempts: ws.max_reconnect_attempts.max(1),
            base_delay: Duration::from_millis(ws.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(ws.reconnect_max_delay_ms),
            jitter: ws.reconnect_jitter,
        }
    }
}

/// Outcome of recording a failed handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then attempt handshake number `attempt + 1`
    Retry { attempt: u32, delay: Duration },
    /// Ceiling reached after `attempts` failures
    GiveUp { attempts: u32 },
}

/// Tracks consecutive failures and produces backoff delays
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    backoff: ExponentialBackoff,
    failures: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(config.base_delay)
            .with_multiplier(2.0)
            .with_max_interval(config.max_delay)
            .with_randomization_factor(config.jitter)
            .with_max_elapsed_time(None)
            .build();

        Self {
            config,
            backoff,
            failures: 0,
        }
    }

    /// Consecutive failed handshakes so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failed handshake
    pub fn record_failure(&mut self) -> RetryDecision {
        self.failures += 1;
        if self.failures >= self.config.max_attempts {
            return RetryDecision::GiveUp {
                attempts: self.failures,
            };
        }
        RetryDecision::Retry {
            attempt: self.failures,
            delay: self.next_delay(),
        }
    }

    /// Record a successful handshake
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.backoff.reset();
    }

    /// Next delay from the schedule
    pub fn next_delay(&mut self) -> Duration {
        self.backoff
            .next_backoff()
            .unwrap_or(self.config.max_delay)
            .min(self.max_jittered_delay())
    }

    fn max_jittered_delay(&self) -> Duration {
        self.config.max_delay.mul_f64(1.0 + self.config.jitter)
    }
}
