use serde::Serialize;

use crate::message::StreamMessage;
use crate::status::RunStatus;

/// Events delivered to the caller by `StreamSession::next_event`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session status changed.
    StatusChanged { status: RunStatus },
    /// A completed, addressable message.
    Message { message: StreamMessage },
    /// First frame of an assistant turn.
    AssistantStart,
    /// Incremental assistant text.
    AssistantChunk { content: String },
    /// Authoritative thread history fetched after a run closed.
    History { messages: Vec<StreamMessage> },
    /// A run failed. `recoverable` tells whether an automatic restart follows.
    Error { message: String, recoverable: bool },
    /// Transient notice: a restart is scheduled.
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Automatic recovery is exhausted or impossible; `StreamSession::retry` is available.
    Fatal { message: String },
    /// Exactly one per run: the run's final status.
    Closed { status: RunStatus },
}

impl SessionEvent {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}
