use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff and ceiling for automatic run restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// Automatic restarts allowed before the failure is surfaced as fatal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first restart.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Multiplier applied per subsequent attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound for the computed delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// How long a restarted run may stay `connecting` before another attempt.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_delay_ms() -> u64 {
    1_000
}

const fn default_backoff_factor() -> f64 {
    2.0
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_connect_timeout_ms() -> u64 {
    15_000
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl RestartPolicy {
    /// Never restart automatically.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    pub fn exponential(max_attempts: u32, initial_delay_ms: u64, backoff_factor: f64) -> Self {
        let initial = if initial_delay_ms == 0 {
            default_initial_delay_ms()
        } else {
            initial_delay_ms
        };
        let factor = if backoff_factor <= 0.0 {
            default_backoff_factor()
        } else {
            backoff_factor
        };
        Self {
            max_attempts,
            initial_delay_ms: initial,
            backoff_factor: factor,
            ..Self::default()
        }
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms.max(1);
        self
    }

    pub fn with_connect_timeout_ms(mut self, connect_timeout_ms: u64) -> Self {
        self.connect_timeout_ms = connect_timeout_ms.max(1);
        self
    }

    /// `attempt` is 1-based.
    pub fn can_attempt(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }

    /// Delay before the 1-based `attempt`: initial, initial*factor, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_factor
            .powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
        let base = (self.initial_delay_ms as f64 * exp).round() as u64;
        Duration::from_millis(base.min(self.max_delay_ms.max(1)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
