use crate::config::StreamConfig;
use std::time::Duration;
use tracing::{info, warn};

/// Recovery action to take after a transport failure
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Retry after a delay
    RetryAfterDelay(Duration),
    /// Give up permanently
    GiveUp,
}

/// Retry strategy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum consecutive failures; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to double the delay on each consecutive failure
    pub exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            exponential_backoff: false,
        }
    }
}

impl RetryPolicy {
    /// Bounded policy used by stream workers
    pub fn from_stream_config(config: &StreamConfig) -> Self {
        Self {
            max_attempts: Some(config.max_reconnect_attempts),
            base_delay: Duration::from_millis(config.retry_delay_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
            exponential_backoff: config.exponential_backoff,
        }
    }

    /// Policy that never gives up, for unattended recording
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            base_delay: delay,
            max_delay: delay,
            exponential_backoff: false,
        }
    }

    /// Delay before the retry following failure number `attempt` (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if !self.exponential_backoff {
            return self.base_delay;
        }

        let exponent = attempt.saturating_sub(1).min(16);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(2_u64.pow(exponent));
        let delay = Duration::from_millis(delay_ms);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Consecutive-failure tracker for one worker
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Record a failure and decide what to do next
    pub fn on_failure(&mut self, component: &str) -> RecoveryAction {
        self.failures = self.failures.saturating_add(1);

        if let Some(max) = self.policy.max_attempts {
            if self.failures >= max {
                warn!(
                    "Maximum reconnect attempts ({}) reached for {}",
                    max, component
                );
                return RecoveryAction::GiveUp;
            }
        }

        let delay = self.policy.calculate_delay(self.failures);
        match self.policy.max_attempts {
            Some(max) => info!(
                "Scheduling reconnect for {} in {:?} (attempt {}/{})",
                component, delay, self.failures, max
            ),
            None => info!(
                "Scheduling retry for {} in {:?} (attempt {})",
                component, delay, self.failures
            ),
        }
        RecoveryAction::RetryAfterDelay(delay)
    }

    /// Reset after a successful connection
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
