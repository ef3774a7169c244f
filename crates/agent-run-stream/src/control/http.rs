use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{ControlApiError, StreamError};
use crate::message::StreamMessage;

use super::config::{ControlApiConfig, Endpoints};
use super::{ControlApi, RunStatusReport};

/// REST implementation of [`ControlApi`] backed by `reqwest`.
pub struct HttpControlApi {
    client: reqwest::Client,
    config: ControlApiConfig,
    endpoints: Endpoints,
}

impl HttpControlApi {
    /// Creates a client from explicit configuration.
    pub fn new(config: ControlApiConfig) -> Result<Self, StreamError> {
        let endpoints = config.endpoints()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build control client: {e}")))?;
        Ok(Self {
            client,
            config,
            endpoints,
        })
    }

    /// Creates a client using `AGENT_API_BASE_URL` / `AGENT_API_TOKEN`.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::new(ControlApiConfig::from_env()?)
    }

    pub fn config(&self) -> &ControlApiConfig {
        &self.config
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, ControlApiError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| ControlApiError::transport(format!("{what} request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ControlApiError::http(
                status.as_u16(),
                format!("{what} failed with status {status}: {body}"),
            ));
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, ControlApiError> {
        let response = self.send(request, what).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ControlApiError::transport(format!("{what} body read failed: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ControlApiError::protocol(format!("invalid {what} response: {e}")))
    }
}

#[async_trait::async_trait]
impl ControlApi for HttpControlApi {
    async fn run_status(&self, run_id: &str) -> Result<RunStatusReport, ControlApiError> {
        debug!(event = "control.run_status", domain = "control", run_id = %run_id);
        self.send_json(self.client.get(self.endpoints.run(run_id)), "run status")
            .await
    }

    async fn stop_run(&self, run_id: &str) -> Result<(), ControlApiError> {
        debug!(event = "control.stop_run", domain = "control", run_id = %run_id);
        self.send(self.client.post(self.endpoints.stop(run_id)), "stop run")
            .await
            .map(|_| ())
    }

    async fn start_run(&self, thread_id: &str) -> Result<String, ControlApiError> {
        debug!(event = "control.start_run", domain = "control", thread_id = %thread_id);
        let request = self
            .client
            .post(self.endpoints.start(thread_id))
            .json(&serde_json::json!({ "stream": true }));
        let body: serde_json::Value = self.send_json(request, "start run").await?;
        parse_start_body(&body)
    }

    async fn thread_messages(
        &self,
        thread_id: &str,
    ) -> Result<Vec<StreamMessage>, ControlApiError> {
        debug!(event = "control.thread_messages", domain = "control", thread_id = %thread_id);
        let body: serde_json::Value = self
            .send_json(
                self.client.get(self.endpoints.messages(thread_id)),
                "thread messages",
            )
            .await?;
        parse_messages_body(body)
    }
}

pub(crate) fn parse_start_body(body: &serde_json::Value) -> Result<String, ControlApiError> {
    body.get("agent_run_id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.trim().is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| ControlApiError::protocol("start run response missing agent_run_id"))
}

/// Accepts a bare array or an object with a `messages` array.
pub(crate) fn parse_messages_body(
    body: serde_json::Value,
) -> Result<Vec<StreamMessage>, ControlApiError> {
    let items = match body {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("messages") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(ControlApiError::protocol(
                    "thread messages response missing messages array",
                ));
            }
        },
        _ => {
            return Err(ControlApiError::protocol(
                "thread messages response is not a list",
            ));
        }
    };
    let mut messages = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<StreamMessage>(item) {
            Ok(message) => messages.push(message),
            Err(err) => debug!(
                event = "control.history_item_skipped",
                domain = "control",
                error = %err
            ),
        }
    }
    Ok(messages)
}
