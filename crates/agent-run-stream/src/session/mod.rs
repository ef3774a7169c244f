//! The caller-facing stream session.
//!
//! A [`StreamSession`] owns one background task that holds every piece of
//! mutable state: the status machine, the dispatcher buffers, the activity
//! monitor, the attached transport and the restart bookkeeping. The handle only
//! sends commands and reads published snapshots and events.
mod actor;


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument as _;

use crate::activity::LivenessPolicy;
use crate::control::{ControlApi, ControlApiConfig, HttpControlApi};
use crate::errors::StreamError;
use crate::events::SessionEvent;
use crate::message::ToolCallState;
use crate::restart::RestartPolicy;
use crate::status::RunStatus;
use crate::transport::{HttpSseTransport, Transport};

use actor::{Command, SessionActor};

/// Configuration used to spawn a [`StreamSession`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Thread whose runs this session follows. Restarts create runs here.
    pub thread_id: String,
    #[serde(default)]
    pub liveness: LivenessPolicy,
    #[serde(default)]
    pub restart: RestartPolicy,
    /// Capacity of the caller-facing event channel.
    #[serde(default = "default_event_buffer_capacity")]
    pub event_buffer_capacity: usize,
}

const fn default_event_buffer_capacity() -> usize {
    256
}

impl SessionConfig {
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            liveness: LivenessPolicy::default(),
            restart: RestartPolicy::default(),
            event_buffer_capacity: default_event_buffer_capacity(),
        }
    }

    pub fn liveness(mut self, liveness: LivenessPolicy) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn event_buffer_capacity(mut self, capacity: usize) -> Self {
        self.event_buffer_capacity = capacity;
        self
    }

    fn validate(&self) -> Result<(), StreamError> {
        if self.thread_id.trim().is_empty() {
            return Err(StreamError::Config("thread_id must not be empty".into()));
        }
        if self.event_buffer_capacity == 0 {
            return Err(StreamError::Config(
                "event_buffer_capacity must be at least 1".into(),
            ));
        }
        if !self.restart.backoff_factor.is_finite() || self.restart.backoff_factor < 1.0 {
            return Err(StreamError::Config(
                "restart.backoff_factor must be a finite value >= 1.0".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of the session, published after every state change.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub status: RunStatus,
    /// Run currently attached, if any.
    pub run_id: Option<String>,
    /// Assistant text accumulated from chunks of the current turn.
    pub chunk_text: String,
    pub tool_call: Option<ToolCallState>,
    pub last_error: Option<String>,
    /// Automatic restarts consumed since the last caller `start()` or success.
    pub restart_attempt: u32,
    /// A restart delay is running or a replacement run is being created.
    pub restart_pending: bool,
    /// Automatic recovery gave up; [`StreamSession::retry`] is the way forward.
    pub retry_available: bool,
    pub transport_attached: bool,
    pub monitor_armed: bool,
    pub connect_guard_armed: bool,
    pub generation: u64,
    /// Events held back because the caller has not drained the event channel.
    pub pending_events: usize,
}

/// Handle to a running stream session.
///
/// Dropping the handle shuts the session down.
pub struct StreamSession {
    session_id: uuid::Uuid,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::Receiver<SessionEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
    closed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl StreamSession {
    /// Spawns the session task on the current tokio runtime.
    pub fn spawn(
        config: SessionConfig,
        control: Arc<dyn ControlApi>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let session_id = uuid::Uuid::new_v4();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer_capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let span = tracing::info_span!(
            "stream_session",
            session_id = %session_id,
            thread_id = %config.thread_id
        );
        let actor = SessionActor::new(config, control, transport, events_tx, snapshot_tx);
        let task = tokio::spawn(actor.run(commands_rx).instrument(span));

        Ok(Self {
            session_id,
            commands: commands_tx,
            events: events_rx,
            snapshot: snapshot_rx,
            closed: Arc::new(AtomicBool::new(false)),
            task,
        })
    }

    /// Spawns a session wired to the HTTP control API and SSE transport.
    pub fn connect(config: SessionConfig, api: ControlApiConfig) -> Result<Self, StreamError> {
        let control = HttpControlApi::new(api.clone())?;
        let transport = HttpSseTransport::new(api)?;
        Self::spawn(config, Arc::new(control), Arc::new(transport))
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Attaches to `run_id`, replacing whatever the session was doing.
    pub fn start(&self, run_id: impl Into<String>) -> Result<(), StreamError> {
        let run_id = run_id.into();
        if run_id.trim().is_empty() {
            return Err(StreamError::Validation("run_id must not be empty".into()));
        }
        self.send(Command::Start(run_id))
    }

    /// Stops the active run and cancels any pending restart.
    pub fn stop(&self) -> Result<(), StreamError> {
        self.send(Command::Stop)
    }

    /// Creates a fresh run for the thread and resets the automatic restart count.
    ///
    /// Ignored while a run is attached.
    pub fn retry(&self) -> Result<(), StreamError> {
        self.send(Command::Retry)
    }

    /// Detaches everything. Further commands fail with [`StreamError::Closed`].
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Shutdown);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.task.is_finished()
    }

    /// Next caller-facing event; `None` once the session task has exited.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> RunStatus {
        self.snapshot.borrow().status
    }

    /// Watch channel that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    fn send(&self, command: Command) -> Result<(), StreamError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }
        self.commands.send(command).map_err(|_| StreamError::Closed)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
