/// Errors returned by a control API implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlApiError {
    /// The control API answered with a non-success HTTP status.
    #[error("control api error (status={status}): {message}")]
    Http { status: u16, message: String },
    /// The request could not be sent or the response could not be read.
    #[error("control api transport error: {message}")]
    Transport { message: String },
    /// The response body did not have the expected shape.
    #[error("control api protocol error: {message}")]
    Protocol { message: String },
}

impl ControlApiError {
    /// Creates an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns the HTTP status code when the error carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport { .. } | Self::Protocol { .. } => None,
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Http { message, .. }
            | Self::Transport { message }
            | Self::Protocol { message } => message,
        }
    }

    /// True when the run (or thread) does not exist on the server.
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404) || self.message().to_ascii_lowercase().contains("not found")
    }

    /// True for stop responses that mean the run had already ended.
    pub fn is_already_stopped(&self) -> bool {
        let lower = self.message().to_ascii_lowercase();
        matches!(self.status_code(), Some(404 | 409))
            || lower.contains("already stopped")
            || lower.contains("already completed")
            || lower.contains("not running")
    }

    /// Classifies this error for restart eligibility.
    pub fn classify(&self) -> FailureClass {
        classify_failure(self.message(), self.status_code())
    }
}

/// Errors produced while opening or reading a run's event stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Opening the stream failed (connection refused, HTTP error, etc.).
    #[error("stream connect failed: {message}")]
    Connect {
        status: Option<u16>,
        message: String,
    },
    /// Reading from an open stream failed.
    #[error("stream read failed: {message}")]
    Read { message: String },
}

impl TransportError {
    /// Creates a connect error.
    pub fn connect(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Connect {
            status,
            message: message.into(),
        }
    }

    /// Creates a read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    /// Returns the HTTP status attached to a connect failure.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Connect { status, .. } => *status,
            Self::Read { .. } => None,
        }
    }
}

/// Top-level error type for the public session API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The session was shut down and no longer accepts commands.
    #[error("stream session is closed")]
    Closed,
    /// Invalid caller input (for example an empty run id).
    #[error("validation error: {0}")]
    Validation(String),
    /// Invalid session or client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Control API failure surfaced outside the event stream.
    #[error(transparent)]
    ControlApi(#[from] ControlApiError),
    /// Transport failure surfaced outside the event stream.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Outcome of classifying a failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureClass {
    /// Stable diagnostic code, used as a structured log field.
    pub code: &'static str,
    /// Whether an automatic restart may be attempted.
    pub recoverable: bool,
}

const RECOVERABLE_PHRASES: &[(&str, &str)] = &[
    ("timed out", "stream.timeout"),
    ("timeout", "stream.timeout"),
    ("time limit", "stream.time_limit"),
    ("failed to initialize", "stream.initialization"),
    ("initialization failed", "stream.initialization"),
    ("failed to start", "stream.initialization"),
    ("network", "stream.network"),
    ("connection reset", "stream.network"),
    ("connection refused", "stream.network"),
    ("connection closed", "stream.network"),
    ("stream closed", "stream.network"),
    ("no activity", "stream.liveness"),
];

/// Decides whether a failure is a transient server-side condition.
///
/// HTTP 5xx statuses and timeout / time-limit / initialization / network phrases
/// are recoverable; everything else is fatal.
pub fn classify_failure(message: &str, status: Option<u16>) -> FailureClass {
    let status = status.or_else(|| extract_status_code(message));
    if let Some(code) = status {
        if (500..600).contains(&code) {
            return FailureClass {
                code: "stream.server_error.5xx",
                recoverable: true,
            };
        }
        if code == 401 || code == 403 {
            return FailureClass {
                code: "stream.auth",
                recoverable: false,
            };
        }
    }
    let lower = message.to_ascii_lowercase();
    for &(phrase, code) in RECOVERABLE_PHRASES {
        if lower.contains(phrase) {
            return FailureClass {
                code,
                recoverable: true,
            };
        }
    }
    FailureClass {
        code: "stream.fatal",
        recoverable: false,
    }
}

fn extract_status_code(message: &str) -> Option<u16> {
    let marker = "status=";
    let idx = message.find(marker)?;
    let tail = &message[idx + marker.len()..];
    let value: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_transient_phrases_are_recoverable() {
        assert!(classify_failure("upstream exploded", Some(503)).recoverable);
        assert!(classify_failure("control api error (status=502): bad gateway", None).recoverable);
        assert!(classify_failure("Agent run exceeded time limit", None).recoverable);
        assert!(classify_failure("Sandbox failed to initialize", None).recoverable);
        assert!(classify_failure("Network error while streaming", None).recoverable);
        assert_eq!(
            classify_failure("request timed out", None).code,
            "stream.timeout"
        );
    }

    #[test]
    fn auth_and_unknown_errors_are_fatal() {
        assert!(!classify_failure("timeout", Some(401)).recoverable);
        assert!(!classify_failure("billing limit reached", None).recoverable);
        assert_eq!(classify_failure("nope", None).code, "stream.fatal");
    }

    #[test]
    fn already_stopped_covers_conflict_and_not_found() {
        assert!(ControlApiError::http(409, "conflict").is_already_stopped());
        assert!(ControlApiError::http(404, "missing").is_already_stopped());
        assert!(ControlApiError::http(400, "Run is already stopped").is_already_stopped());
        assert!(!ControlApiError::http(500, "boom").is_already_stopped());
    }

    #[test]
    fn not_found_detects_status_and_message() {
        assert!(ControlApiError::http(404, "gone").is_not_found());
        assert!(ControlApiError::protocol("agent run not found").is_not_found());
        assert!(!ControlApiError::transport("connection refused").is_not_found());
    }
}
