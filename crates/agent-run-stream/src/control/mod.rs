//! Control API contract: run status, stop, run creation, and thread history.
mod config;
mod http;

pub use config::ControlApiConfig;
pub(crate) use config::Endpoints;
pub use http::HttpControlApi;

use serde::{Deserialize, Serialize};

use crate::errors::ControlApiError;
use crate::message::StreamMessage;
use crate::status::RunStatus;

/// Run status as reported by the control API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteRunStatus {
    Running,
    Completed,
    Stopped,
    Failed,
    #[serde(other)]
    Unknown,
}

impl RemoteRunStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Session status for a run the server is no longer executing.
    ///
    /// Unrecognized server states map to `AgentNotRunning`.
    pub fn terminal_status(&self) -> Option<RunStatus> {
        match self {
            Self::Running => None,
            Self::Completed => Some(RunStatus::Completed),
            Self::Stopped => Some(RunStatus::Stopped),
            Self::Failed => Some(RunStatus::Failed),
            Self::Unknown => Some(RunStatus::AgentNotRunning),
        }
    }
}

/// Body of a run-status response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatusReport {
    pub status: RemoteRunStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunStatusReport {
    pub fn new(status: RemoteRunStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }
}

/// Backend operations the session depends on.
#[async_trait::async_trait]
pub trait ControlApi: Send + Sync {
    /// Reads the authoritative status of a run.
    async fn run_status(&self, run_id: &str) -> Result<RunStatusReport, ControlApiError>;

    /// Requests that a run stop. Implementations may report "already stopped"
    /// as an error; callers treat [`ControlApiError::is_already_stopped`] as success.
    async fn stop_run(&self, run_id: &str) -> Result<(), ControlApiError>;

    /// Creates a new streaming run for a thread and returns its run id.
    async fn start_run(&self, thread_id: &str) -> Result<String, ControlApiError>;

    /// Fetches the persisted message history of a thread.
    async fn thread_messages(&self, thread_id: &str)
    -> Result<Vec<StreamMessage>, ControlApiError>;
}
