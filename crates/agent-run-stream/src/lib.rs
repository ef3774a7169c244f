//! Streaming session coordinator for remote agent runs.
//!
//! A [`StreamSession`] attaches to an agent run, decodes its line-oriented
//! event feed into typed messages, keeps the run's status authoritative, watches
//! the feed for silence, and restarts failed runs with exponential backoff.
//!
//! # Usage
//!
//! ```no_run
//! use agent_run_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! agent_run_stream::observability::init_observability();
//!
//! let mut session = StreamSession::connect(
//!     SessionConfig::for_thread("thread-123"),
//!     ControlApiConfig::from_env()?,
//! )?;
//! session.start("run-456")?;
//!
//! while let Some(event) = session.next_event().await {
//!     match event {
//!         SessionEvent::AssistantChunk { content } => print!("{content}"),
//!         SessionEvent::Closed { status } => {
//!             println!("\nrun closed: {status}");
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Activity clock and liveness bounds.
pub mod activity;
/// Control API contract and its HTTP implementation.
pub mod control;
/// Message routing and per-run transient buffers.
pub mod dispatch;
/// Error types and failure classification.
pub mod errors;
/// Caller-facing session events.
pub mod events;
/// Line and frame parsing.
pub mod frame;
/// Wire message model.
pub mod message;
/// Process-wide `tracing` setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Restart backoff policy.
pub mod restart;
/// Session handle, configuration and snapshots.
pub mod session;
/// Run status state machine.
pub mod status;
/// Event-stream transport contract and its SSE implementation.
pub mod transport;

pub use activity::{ActivityMonitor, LivenessBreach, LivenessPolicy};
pub use control::{
    ControlApi, ControlApiConfig, HttpControlApi, RemoteRunStatus, RunStatusReport,
};
pub use dispatch::{Dispatched, Dispatcher};
pub use errors::{ControlApiError, FailureClass, StreamError, TransportError, classify_failure};
pub use events::SessionEvent;
pub use frame::{CompletionSignal, Frame, carries_payload, parse_frame};
pub use message::{MessageType, StreamMessage, ToolCallState};
pub use restart::RestartPolicy;
pub use session::{SessionConfig, SessionSnapshot, StreamSession};
pub use status::{RunStatus, StatusMachine};
pub use transport::{HttpSseTransport, LineStream, Transport};
