use tracing::debug;

use crate::message::{MessageType, StatusType, StreamMessage, StreamStatus, ToolCallState};

/// What the session should do after one message was routed.
#[derive(Clone, Debug, PartialEq)]
pub enum Dispatched {
    /// First frame of an assistant turn.
    AssistantStart,
    /// Incremental assistant text.
    Chunk(String),
    /// A completed, addressable message for the caller.
    Message(StreamMessage),
    /// The backend announced `thread_run_end`.
    RunEnded,
    /// The backend reported an error for this run.
    Failed(String),
}

/// Routes decoded messages and owns the transient per-run buffers.
#[derive(Debug, Default)]
pub struct Dispatcher {
    text: String,
    tool_call: Option<ToolCallState>,
    turn_open: bool,
    run_ended: bool,
    finish_reason: Option<String>,
}

impl Dispatcher {
    /// Text accumulated from chunks of the current assistant turn.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tool_call(&self) -> Option<&ToolCallState> {
        self.tool_call.as_ref()
    }

    pub fn run_ended(&self) -> bool {
        self.run_ended
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Drops all transient state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn dispatch(&mut self, message: StreamMessage) -> Vec<Dispatched> {
        let mut out = Vec::new();
        match message.message_type {
            MessageType::Assistant => self.assistant(message, &mut out),
            MessageType::Tool => {
                self.tool_call = None;
                out.push(Dispatched::Message(message));
            }
            MessageType::Status => self.status(&message, &mut out),
            MessageType::User | MessageType::System => out.push(Dispatched::Message(message)),
            MessageType::Unknown => {
                debug!(
                    event = "stream.message_ignored",
                    domain = "stream",
                    reason = "unknown_type"
                );
            }
        }
        out
    }

    fn assistant(&mut self, message: StreamMessage, out: &mut Vec<Dispatched>) {
        match message.parsed_metadata().stream_status() {
            Some(StreamStatus::Chunk) => {
                self.open_turn(out);
                if let Some(text) = message.parsed_content().text() {
                    self.text.push_str(text);
                    out.push(Dispatched::Chunk(text.to_string()));
                }
            }
            Some(StreamStatus::Complete) => {
                self.close_turn();
                if message.message_id.is_some() {
                    out.push(Dispatched::Message(message));
                } else {
                    debug!(
                        event = "stream.message_ignored",
                        domain = "stream",
                        reason = "complete_without_id"
                    );
                }
            }
            None => {
                self.open_turn(out);
                self.turn_open = false;
                out.push(Dispatched::Message(message));
            }
        }
    }

    fn status(&mut self, message: &StreamMessage, out: &mut Vec<Dispatched>) {
        let content = message.parsed_content();
        let Some(status_type) = content.status_type() else {
            return;
        };
        match status_type {
            StatusType::ToolStarted => {
                self.tool_call = Some(ToolCallState {
                    name: content.function_name.clone().unwrap_or_default(),
                    arguments: content.arguments.clone(),
                    xml_tag_name: content.xml_tag_name.clone(),
                    tool_index: content.tool_index,
                });
            }
            StatusType::ToolCompleted | StatusType::ToolFailed | StatusType::ToolError => {
                if self
                    .tool_call
                    .as_ref()
                    .is_some_and(|current| current.tool_index == content.tool_index)
                {
                    self.tool_call = None;
                } else {
                    debug!(
                        event = "stream.tool_event_stale",
                        domain = "stream",
                        tool_index = ?content.tool_index
                    );
                }
            }
            StatusType::ThreadRunEnd => {
                self.run_ended = true;
                out.push(Dispatched::RunEnded);
            }
            StatusType::Error => {
                let message = content
                    .message
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "agent run reported an error".to_string());
                out.push(Dispatched::Failed(message));
            }
            StatusType::Finish => {
                self.finish_reason = content.finish_reason.clone();
            }
            StatusType::Other(other) => {
                debug!(
                    event = "stream.status_ignored",
                    domain = "stream",
                    status_type = %other
                );
            }
        }
    }

    fn open_turn(&mut self, out: &mut Vec<Dispatched>) {
        if !self.turn_open {
            self.turn_open = true;
            out.push(Dispatched::AssistantStart);
        }
    }

    fn close_turn(&mut self) {
        self.text.clear();
        self.tool_call = None;
        self.turn_open = false;
    }
}
