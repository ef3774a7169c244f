//! Event-stream transport: opens a run's feed and yields raw protocol lines.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::control::{ControlApiConfig, Endpoints};
use crate::errors::{StreamError, TransportError};
use crate::frame::LineDecoder;

/// Ordered raw lines from one transport instance.
pub type LineStream = Pin<Box<dyn futures::Stream<Item = Result<String, TransportError>> + Send>>;

/// Opens the event feed for a run.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, run_id: &str) -> Result<LineStream, TransportError>;
}

/// Server-sent-events transport over `reqwest`.
pub struct HttpSseTransport {
    client: reqwest::Client,
    config: ControlApiConfig,
    endpoints: Endpoints,
}

impl HttpSseTransport {
    pub fn new(config: ControlApiConfig) -> Result<Self, StreamError> {
        let endpoints = config.endpoints()?;
        // No overall timeout: the feed is long-lived and liveness is supervised upstream.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build stream client: {e}")))?;
        Ok(Self {
            client,
            config,
            endpoints,
        })
    }

    pub fn from_env() -> Result<Self, StreamError> {
        Self::new(ControlApiConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl Transport for HttpSseTransport {
    async fn open(&self, run_id: &str) -> Result<LineStream, TransportError> {
        let url = self.endpoints.stream(run_id);
        debug!(event = "transport.open", domain = "transport", run_id = %run_id);
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(token) = self.config.token.as_deref() {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::connect(None, format!("event stream request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::connect(
                Some(status.as_u16()),
                format!("event stream failed with status {status}: {body}"),
            ));
        }
        Ok(Box::pin(line_stream(Box::pin(response.bytes_stream()))))
    }
}

/// Adapts a byte stream into a stream of lines.
pub(crate) fn line_stream<S, E>(
    bytes_stream: S,
) -> impl futures::Stream<Item = Result<String, TransportError>> + Send
where
    S: futures::Stream<Item = Result<bytes::Bytes, E>> + Send + Unpin + 'static,
    E: fmt::Display + Send + 'static,
{
    struct State<S> {
        bytes_stream: S,
        decoder: LineDecoder,
        pending: VecDeque<String>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: LineDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(line) = state.pending.pop_front() {
                    return Ok(Some((line, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        let lines = state.decoder.push_chunk(&chunk);
                        state.pending.extend(lines);
                    }
                    Some(Err(e)) => {
                        return Err(TransportError::read(format!("event stream read failed: {e}")));
                    }
                    None => {
                        state.done = true;
                        let rest = state.decoder.finish();
                        state.pending.extend(rest);
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn splits_chunks_into_lines_and_flushes_tail() {
        let chunks: Vec<Result<bytes::Bytes, std::io::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"data: {\"a\"")),
            Ok(bytes::Bytes::from_static(b":1}\n\ndata: Run data not")),
            Ok(bytes::Bytes::from_static(b" available for streaming")),
        ];
        let lines: Vec<_> = line_stream(stream::iter(chunks)).collect().await;
        let lines: Vec<String> = lines.into_iter().map(|l| l.expect("line")).collect();
        assert_eq!(
            lines,
            vec![
                "data: {\"a\":1}".to_string(),
                String::new(),
                "data: Run data not available for streaming".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn read_errors_end_the_stream_with_transport_error() {
        let chunks: Vec<Result<bytes::Bytes, std::io::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"data: x\n")),
            Err(std::io::Error::other("connection reset")),
        ];
        let mut lines = Box::pin(line_stream(stream::iter(chunks)));
        assert_eq!(lines.next().await, Some(Ok("data: x".to_string())));
        match lines.next().await {
            Some(Err(TransportError::Read { message })) => {
                assert!(message.contains("connection reset"))
            }
            other => panic!("expected read error, got {other:?}"),
        }
        assert_eq!(lines.next().await, None);
    }

    #[test]
    fn new_rejects_invalid_config() {
        assert!(HttpSseTransport::new(ControlApiConfig::new("not-a-url")).is_err());
    }
}
