//! Wire-level parsing: byte chunks to lines, lines to typed frames.

use crate::message::StreamMessage;

/// Prefix carried by every JSON envelope line.
pub const DATA_PREFIX: &str = "data:";

const COMPLETION_LITERAL: &str =
    r#"{"type": "status", "status": "completed", "message": "Agent run completed successfully"}"#;

const COMPLETION_PHRASES: &[&str] = &[
    "Run data not available for streaming",
    "Stream ended with status: completed",
];

const SSE_FIELDS: &[&str] = &["event:", "id:", "retry:"];

/// One parsed unit of the event feed.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// A message envelope.
    Message(StreamMessage),
    /// Out-of-band signal that the run is over.
    Completion(CompletionSignal),
    /// Backend-level error envelope (`{"status": "error", "message": ...}`).
    ServerError(String),
}

/// Which sentinel class announced completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompletionSignal {
    /// The exact completion literal, or a control envelope with `status: completed`.
    Literal,
    /// A line containing one of the known completion phrases.
    Phrase(&'static str),
}

/// Returns true when the line is a frame rather than blank space or an SSE
/// comment / non-data field. Only such lines count as stream activity.
pub fn carries_payload(raw_line: &str) -> bool {
    let line = raw_line.trim();
    !line.is_empty()
        && !line.starts_with(':')
        && !SSE_FIELDS.iter().any(|field| line.starts_with(field))
}

/// Parses one raw protocol line.
///
/// Returns `None` for blank lines, comments, and malformed JSON. Malformed JSON is
/// logged and dropped so a single bad frame never ends the session.
pub fn parse_frame(raw_line: &str) -> Option<Frame> {
    if !carries_payload(raw_line) {
        return None;
    }
    let line = raw_line.trim();
    let payload = line
        .strip_prefix(DATA_PREFIX)
        .map(str::trim_start)
        .unwrap_or(line);
    if payload.is_empty() {
        return None;
    }

    if payload == COMPLETION_LITERAL {
        return Some(Frame::Completion(CompletionSignal::Literal));
    }
    if let Some(phrase) = COMPLETION_PHRASES
        .iter()
        .copied()
        .find(|p| payload.contains(*p))
    {
        return Some(Frame::Completion(CompletionSignal::Phrase(phrase)));
    }

    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(
                event = "stream.frame_invalid",
                domain = "stream",
                error = %err,
                frame_len = payload.len() as u64
            );
            return None;
        }
    };

    if let Some(frame) = control_envelope(&value) {
        return Some(frame);
    }

    match serde_json::from_value::<StreamMessage>(value) {
        Ok(message) => Some(Frame::Message(message)),
        Err(err) => {
            tracing::warn!(
                event = "stream.frame_invalid",
                domain = "stream",
                error = %err,
                frame_len = payload.len() as u64
            );
            None
        }
    }
}

// Envelopes with a top-level `status` are control signals, not messages.
fn control_envelope(value: &serde_json::Value) -> Option<Frame> {
    let status = value.get("status")?.as_str()?;
    let message = value
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    match status {
        "completed" => Some(Frame::Completion(CompletionSignal::Literal)),
        "error" => Some(Frame::ServerError(if message.is_empty() {
            "agent run reported an error".to_string()
        } else {
            message.to_string()
        })),
        _ => None,
    }
}

/// Longest line the decoder buffers before discarding it.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Splits a byte stream into text lines, buffering partial lines across chunks.
///
/// A line longer than the cap is dropped up to its terminating newline.
pub(crate) struct LineDecoder {
    buf: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_bytes,
            discarding: false,
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=idx).collect();
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if idx > self.max_line_bytes {
                self.warn_oversized(idx);
                continue;
            }
            let text = String::from_utf8_lossy(&line[..idx]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        if self.discarding || self.buf.len() > self.max_line_bytes {
            if !self.discarding {
                self.warn_oversized(self.buf.len());
            }
            self.buf.clear();
            self.discarding = true;
        }
        lines
    }

    /// Flushes a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if std::mem::take(&mut self.discarding) || self.buf.is_empty() {
            self.buf.clear();
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        let text = String::from_utf8_lossy(&rest);
        let text = text.trim_end_matches('\r');
        (!text.trim().is_empty()).then(|| text.to_string())
    }

    fn warn_oversized(&self, len: usize) {
        tracing::warn!(
            event = "stream.line_too_long",
            domain = "stream",
            line_len = len as u64,
            max_line_bytes = self.max_line_bytes as u64
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[test]
    fn line_decoder_handles_partial_chunk_boundaries() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push_chunk(b"data: {\"type\":\"assi").is_empty());
        let lines = decoder.push_chunk(b"stant\"}\r\n\r\ndata: tail");
        assert_eq!(lines, vec!["data: {\"type\":\"assistant\"}".to_string(), String::new()]);
        assert_eq!(decoder.finish().as_deref(), Some("data: tail"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn line_decoder_keeps_multibyte_text_split_across_chunks() {
        let mut decoder = LineDecoder::default();
        let bytes = "data: héllo\n".as_bytes();
        assert!(decoder.push_chunk(&bytes[..8]).is_empty());
        assert_eq!(decoder.push_chunk(&bytes[8..]), vec!["data: héllo".to_string()]);
    }

    #[test]
    fn line_decoder_drops_lines_over_the_cap_and_recovers() {
        let mut decoder = LineDecoder::with_max_line_bytes(8);
        assert!(decoder.push_chunk(b"data: 0123").is_empty());
        assert!(decoder.push_chunk(b"456789").is_empty());
        assert!(decoder.buf.is_empty());
        assert!(decoder.push_chunk(b"still the same line").is_empty());
        let lines = decoder.push_chunk(b"tail\ndata: ok\n");
        assert_eq!(lines, vec!["data: ok".to_string()]);

        let lines = decoder.push_chunk(b"data: far too long\ndata: x\n");
        assert_eq!(lines, vec!["data: x".to_string()]);

        assert!(decoder.push_chunk(b"data: 0123456789").is_empty());
        assert_eq!(decoder.finish(), None);
        assert_eq!(decoder.push_chunk(b"data: y\n"), vec!["data: y".to_string()]);
    }

    #[test]
    fn blank_and_comment_lines_are_no_ops() {
        assert_eq!(parse_frame(""), None);
        assert_eq!(parse_frame("   "), None);
        assert_eq!(parse_frame(": keep-alive"), None);
        assert_eq!(parse_frame("event: message"), None);
        assert_eq!(parse_frame("data: "), None);
        assert!(!carries_payload(": ping"));
        assert!(carries_payload("data: {}"));
    }

    #[test]
    fn sentinels_are_recognized_without_json_decode() {
        assert_eq!(
            parse_frame(&format!("data: {COMPLETION_LITERAL}")),
            Some(Frame::Completion(CompletionSignal::Literal))
        );
        assert_eq!(
            parse_frame("Run data not available for streaming"),
            Some(Frame::Completion(CompletionSignal::Phrase(
                "Run data not available for streaming"
            )))
        );
        assert!(matches!(
            parse_frame("data: Stream ended with status: completed (run r1)"),
            Some(Frame::Completion(CompletionSignal::Phrase(_)))
        ));
    }

    #[test]
    fn control_envelopes_map_to_completion_or_error() {
        assert_eq!(
            parse_frame(r#"data: {"type":"status","status":"completed"}"#),
            Some(Frame::Completion(CompletionSignal::Literal))
        );
        assert_eq!(
            parse_frame(r#"data: {"status":"error","message":"Agent run exceeded time limit"}"#),
            Some(Frame::ServerError("Agent run exceeded time limit".into()))
        );
    }

    #[test]
    fn malformed_json_is_dropped() {
        assert_eq!(parse_frame("data: {\"type\": "), None);
        assert_eq!(parse_frame("data: {\"no_type\": true}"), None);
    }

    #[test]
    fn envelope_lines_decode_with_or_without_prefix() {
        let body = r#"{"message_id":"m1","thread_id":"t1","type":"tool","content":"{}","metadata":"{}"}"#;
        for line in [format!("data: {body}"), format!("data:{body}"), body.to_string()] {
            match parse_frame(&line) {
                Some(Frame::Message(message)) => {
                    assert_eq!(message.message_type, MessageType::Tool);
                    assert_eq!(message.message_id.as_deref(), Some("m1"));
                }
                other => panic!("expected message frame, got {other:?}"),
            }
        }
    }
}
