use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the run a session is attached to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Completed,
    Stopped,
    Failed,
    Error,
    AgentNotRunning,
}

impl RunStatus {
    /// Terminal states are sinks until the next `start()`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Stopped | Self::Failed | Self::Error | Self::AgentNotRunning
        )
    }

    /// States in which the activity monitor supervises the stream.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::AgentNotRunning => "agent_not_running",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative status holder. Every mutation reports whether the status changed.
#[derive(Debug, Default)]
pub struct StatusMachine {
    status: RunStatus,
}

impl StatusMachine {
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// `start()` from any state.
    pub fn begin_connecting(&mut self) -> bool {
        self.set(RunStatus::Connecting)
    }

    /// First valid frame moves `connecting` to `streaming`; no effect otherwise.
    pub fn frame_received(&mut self) -> bool {
        if self.status == RunStatus::Connecting {
            return self.set(RunStatus::Streaming);
        }
        false
    }

    /// Enters a terminal state. Refused when `status` is not terminal or the
    /// machine already sits in a terminal state.
    pub fn finish(&mut self, status: RunStatus) -> bool {
        if !status.is_terminal() || self.status.is_terminal() {
            return false;
        }
        self.set(status)
    }

    /// Back to `idle`, used before a restart creates a new run.
    pub fn reset(&mut self) -> bool {
        self.set(RunStatus::Idle)
    }

    fn set(&mut self, status: RunStatus) -> bool {
        if self.status == status {
            return false;
        }
        tracing::debug!(
            event = "stream.status_transition",
            domain = "stream",
            from = self.status.as_str(),
            to = status.as_str()
        );
        self.status = status;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut fsm = StatusMachine::default();
        assert_eq!(fsm.status(), RunStatus::Idle);
        assert!(fsm.begin_connecting());
        assert!(fsm.frame_received());
        assert_eq!(fsm.status(), RunStatus::Streaming);
        assert!(!fsm.frame_received());
        assert!(fsm.finish(RunStatus::Completed));
        assert_eq!(fsm.status(), RunStatus::Completed);
    }

    #[test]
    fn terminal_states_are_sinks() {
        let mut fsm = StatusMachine::default();
        fsm.begin_connecting();
        assert!(fsm.finish(RunStatus::Stopped));
        assert!(!fsm.finish(RunStatus::Error));
        assert!(!fsm.frame_received());
        assert_eq!(fsm.status(), RunStatus::Stopped);
        assert!(fsm.begin_connecting());
    }

    #[test]
    fn finish_rejects_non_terminal_targets() {
        let mut fsm = StatusMachine::default();
        assert!(!fsm.finish(RunStatus::Streaming));
        assert_eq!(fsm.status(), RunStatus::Idle);
    }

    #[test]
    fn serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::AgentNotRunning).expect("json"),
            "\"agent_not_running\""
        );
        assert!(RunStatus::Connecting.is_active());
        assert!(!RunStatus::Idle.is_active());
    }
}
