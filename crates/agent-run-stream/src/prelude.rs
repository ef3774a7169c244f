//! Common imports for attaching to and consuming agent runs.
pub use crate::{
    ControlApi, ControlApiConfig, HttpControlApi, HttpSseTransport, LivenessPolicy, MessageType,
    RestartPolicy, RunStatus, SessionConfig, SessionEvent, SessionSnapshot, StreamError,
    StreamMessage, StreamSession, Transport,
};
