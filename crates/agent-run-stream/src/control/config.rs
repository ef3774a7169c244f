use std::time::Duration;

use crate::errors::StreamError;

/// Configuration for the agent control API and its event-stream endpoint.
#[derive(Clone, Debug)]
pub struct ControlApiConfig {
    /// Base URL of the backend, for example `https://api.example.com/api`.
    pub base_url: String,
    /// Optional bearer token.
    pub token: Option<String>,
    /// Timeout for control requests. The event stream itself has no overall
    /// timeout; liveness is supervised by the session.
    pub timeout: Duration,
    /// Connect timeout used by the event-stream transport.
    pub connect_timeout: Duration,
}

impl ControlApiConfig {
    /// Creates a config with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Builds a config from `AGENT_API_BASE_URL` and optional `AGENT_API_TOKEN`.
    pub fn from_env() -> Result<Self, StreamError> {
        let base_url = std::env::var("AGENT_API_BASE_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(StreamError::Config(
                "missing AGENT_API_BASE_URL for the agent control API".into(),
            ));
        }
        let mut config = Self::new(base_url);
        if let Ok(token) = std::env::var("AGENT_API_TOKEN")
            && !token.trim().is_empty()
        {
            config.token = Some(token);
        }
        Ok(config)
    }

    /// Sets the bearer token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Overrides the control request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the stream connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Parses `base_url` into the set of endpoint URLs used by the clients.
    pub(crate) fn endpoints(&self) -> Result<Endpoints, StreamError> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(StreamError::Config("base_url must not be empty".into()));
        }
        let url = reqwest::Url::parse(base)
            .map_err(|e| StreamError::Config(format!("invalid base_url {base}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(StreamError::Config(format!(
                "base_url must be an http(s) URL: {base}"
            )));
        }
        Ok(Endpoints { base: url })
    }
}

/// Endpoint URLs under a validated base. Ids are percent-encoded as single
/// path segments.
#[derive(Clone, Debug)]
pub(crate) struct Endpoints {
    base: reqwest::Url,
}

impl Endpoints {
    fn join(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.base.clone();
        // Only fails for cannot-be-a-base URLs, which `endpoints()` rejects.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn run(&self, run_id: &str) -> reqwest::Url {
        self.join(&["agent-run", run_id])
    }

    pub fn stop(&self, run_id: &str) -> reqwest::Url {
        self.join(&["agent-run", run_id, "stop"])
    }

    pub fn stream(&self, run_id: &str) -> reqwest::Url {
        self.join(&["agent-run", run_id, "stream"])
    }

    pub fn start(&self, thread_id: &str) -> reqwest::Url {
        self.join(&["thread", thread_id, "agent", "start"])
    }

    pub fn messages(&self, thread_id: &str) -> reqwest::Url {
        self.join(&["thread", thread_id, "messages"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_joined_without_double_slashes() {
        let urls = ControlApiConfig::new("https://api.test/api/")
            .endpoints()
            .expect("endpoints");
        assert_eq!(urls.run("r1").as_str(), "https://api.test/api/agent-run/r1");
        assert_eq!(
            urls.stop("r1").as_str(),
            "https://api.test/api/agent-run/r1/stop"
        );
        assert_eq!(
            urls.stream("r1").as_str(),
            "https://api.test/api/agent-run/r1/stream"
        );
        assert_eq!(
            urls.start("t1").as_str(),
            "https://api.test/api/thread/t1/agent/start"
        );
        assert_eq!(
            urls.messages("t1").as_str(),
            "https://api.test/api/thread/t1/messages"
        );

        let root = ControlApiConfig::new("http://localhost:8000")
            .endpoints()
            .expect("endpoints");
        assert_eq!(root.run("r1").as_str(), "http://localhost:8000/agent-run/r1");
    }

    #[test]
    fn ids_are_encoded_as_single_path_segments() {
        let urls = ControlApiConfig::new("https://api.test/api")
            .endpoints()
            .expect("endpoints");
        assert_eq!(
            urls.stop("../a b").as_str(),
            "https://api.test/api/agent-run/..%2Fa%20b/stop"
        );
        assert_eq!(
            urls.messages("t?x=1#f").as_str(),
            "https://api.test/api/thread/t%3Fx=1%23f/messages"
        );
    }

    #[test]
    fn validate_rejects_empty_and_non_http_urls() {
        assert!(ControlApiConfig::new("  ").endpoints().is_err());
        assert!(ControlApiConfig::new("ftp://x").endpoints().is_err());
        assert!(ControlApiConfig::new("mailto:ops@example.com").endpoints().is_err());
        assert!(ControlApiConfig::new("http://localhost:8000").endpoints().is_ok());
    }
}
