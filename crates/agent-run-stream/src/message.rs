use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Kind of a stream envelope.
///
/// Unknown kinds decode to `Unknown` so a newer backend does not break older
/// clients; the dispatcher ignores them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Assistant,
    Tool,
    Status,
    User,
    System,
    #[serde(other)]
    Unknown,
}

/// One envelope delivered by the run's event feed or the history endpoint.
///
/// `content` and `metadata` are JSON-encoded strings on the wire; use
/// [`StreamMessage::parsed_content`] / [`StreamMessage::parsed_metadata`] for
/// decoded views.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub thread_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, deserialize_with = "json_text")]
    pub content: String,
    #[serde(default, deserialize_with = "json_text")]
    pub metadata: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl StreamMessage {
    /// Decodes `content` (fail-soft: malformed JSON yields an empty view).
    pub fn parsed_content(&self) -> ParsedContent {
        decode_soft(&self.content)
    }

    /// Decodes `metadata` (fail-soft: malformed JSON yields an empty view).
    pub fn parsed_metadata(&self) -> ParsedMetadata {
        decode_soft(&self.metadata)
    }
}

// History responses sometimes carry already-decoded objects instead of strings.
fn json_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Decodes a JSON-encoded string, returning `T::default()` on any failure.
pub fn decode_soft<T: DeserializeOwned + Default>(raw: &str) -> T {
    if raw.trim().is_empty() {
        return T::default();
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(
                event = "stream.payload_decode_failed",
                domain = "stream",
                error = %err,
                payload_len = raw.len() as u64
            );
            T::default()
        }
    }
}

/// Decoded view of a message's `content` field.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParsedContent {
    pub content: Option<serde_json::Value>,
    pub role: Option<String>,
    pub status_type: Option<String>,
    pub function_name: Option<String>,
    pub arguments: Option<serde_json::Value>,
    pub xml_tag_name: Option<String>,
    pub tool_index: Option<i64>,
    pub message: Option<String>,
    pub finish_reason: Option<String>,
}

impl ParsedContent {
    /// Text payload of an assistant chunk or message.
    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(|v| v.as_str())
    }

    /// Typed view of `status_type`.
    pub fn status_type(&self) -> Option<StatusType> {
        self.status_type.as_deref().map(StatusType::from_wire)
    }
}

/// `status_type` values the dispatcher acts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusType {
    ToolStarted,
    ToolCompleted,
    ToolFailed,
    ToolError,
    ThreadRunEnd,
    Error,
    Finish,
    Other(String),
}

impl StatusType {
    fn from_wire(value: &str) -> Self {
        match value {
            "tool_started" => Self::ToolStarted,
            "tool_completed" => Self::ToolCompleted,
            "tool_failed" => Self::ToolFailed,
            "tool_error" => Self::ToolError,
            "thread_run_end" => Self::ThreadRunEnd,
            "error" => Self::Error,
            "finish" => Self::Finish,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Decoded view of a message's `metadata` field.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParsedMetadata {
    pub stream_status: Option<String>,
    pub thread_run_id: Option<String>,
}

impl ParsedMetadata {
    /// Typed view of `stream_status`; unknown values read as absent.
    pub fn stream_status(&self) -> Option<StreamStatus> {
        match self.stream_status.as_deref() {
            Some("chunk") => Some(StreamStatus::Chunk),
            Some("complete") => Some(StreamStatus::Complete),
            _ => None,
        }
    }
}

/// Whether an assistant frame is a partial delta or a completed unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamStatus {
    Chunk,
    Complete,
}

/// The tool call currently being executed by the agent, if any.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallState {
    pub name: String,
    pub arguments: Option<serde_json::Value>,
    pub xml_tag_name: Option<String>,
    pub tool_index: Option<i64>,
}
