use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::status::RunStatus;

/// Liveness bounds for a streaming run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessPolicy {
    /// How often the monitor checks the activity clock.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Maximum silence between `start()` and the first frame.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Maximum silence between frames once streaming.
    #[serde(default = "default_streaming_timeout_ms")]
    pub streaming_timeout_ms: u64,
}

const fn default_check_interval_ms() -> u64 {
    10_000
}

const fn default_connect_timeout_ms() -> u64 {
    20_000
}

const fn default_streaming_timeout_ms() -> u64 {
    30_000
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            streaming_timeout_ms: default_streaming_timeout_ms(),
        }
    }
}

impl LivenessPolicy {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    /// Silence bound for `status`; `None` outside the active states.
    pub fn bound_for(&self, status: RunStatus) -> Option<Duration> {
        match status {
            RunStatus::Connecting => Some(Duration::from_millis(self.connect_timeout_ms)),
            RunStatus::Streaming => Some(Duration::from_millis(self.streaming_timeout_ms)),
            _ => None,
        }
    }
}

/// A liveness bound was exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessBreach {
    pub status: RunStatus,
    pub silent_for: Duration,
    pub bound: Duration,
}

impl LivenessBreach {
    pub fn message(&self) -> String {
        format!(
            "No activity for {}s while {} (limit {}s)",
            self.silent_for.as_secs(),
            self.status,
            self.bound.as_secs()
        )
    }
}

/// Activity clock plus the periodic check that supervises it.
///
/// The check timer only exists while armed, so a disarmed monitor holds no
/// timer at all.
#[derive(Debug)]
pub struct ActivityMonitor {
    policy: LivenessPolicy,
    last_activity: Instant,
    ticker: Option<Interval>,
}

impl ActivityMonitor {
    pub fn new(policy: LivenessPolicy) -> Self {
        Self {
            policy,
            last_activity: Instant::now(),
            ticker: None,
        }
    }

    /// Resets the clock and starts the periodic check.
    pub fn arm(&mut self, now: Instant) {
        self.last_activity = now;
        let period = self.policy.check_interval();
        let mut ticker = tokio::time::interval_at(now + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    pub fn disarm(&mut self) {
        self.ticker = None;
    }

    pub fn is_armed(&self) -> bool {
        self.ticker.is_some()
    }

    /// Records activity. The clock never moves backwards.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Resolves on the next check tick; pends forever while disarmed.
    pub async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Returns a breach when the silence since the last touch exceeds the
    /// bound for `status`.
    pub fn check(&self, status: RunStatus, now: Instant) -> Option<LivenessBreach> {
        if !self.is_armed() {
            return None;
        }
        let bound = self.policy.bound_for(status)?;
        let silent_for = now.saturating_duration_since(self.last_activity);
        (silent_for > bound).then_some(LivenessBreach {
            status,
            silent_for,
            bound,
        })
    }
}
