use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityMonitor;
use crate::control::{ControlApi, RunStatusReport};
use crate::dispatch::{Dispatched, Dispatcher};
use crate::errors::{ControlApiError, TransportError, classify_failure};
use crate::events::SessionEvent;
use crate::frame::{self, Frame};
use crate::message::StreamMessage;
use crate::status::{RunStatus, StatusMachine};
use crate::transport::Transport;

use super::{SessionConfig, SessionSnapshot};

/// Requests from the [`super::StreamSession`] handle.
#[derive(Debug)]
pub(crate) enum Command {
    Start(String),
    Stop,
    Retry,
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum StartOrigin {
    Caller,
    Restart,
}

/// Why a run status was requested.
#[derive(Debug)]
enum StatusCheck {
    /// `start()` verifies the run is live before opening the transport.
    Start,
    /// The backend announced `thread_run_end`.
    RunEnd,
    /// The transport dropped or went silent.
    Interruption { reason: String, restartable: bool },
}

/// Results of background work, tagged with the generation that spawned it.
///
/// History is keyed to the finished run instead: it belongs to the thread and
/// stays valid after a new run has been attached.
#[derive(Debug)]
enum Internal {
    Line {
        generation: u64,
        line: String,
    },
    TransportFailed {
        generation: u64,
        error: TransportError,
    },
    TransportClosed {
        generation: u64,
    },
    StatusChecked {
        generation: u64,
        run_id: String,
        check: StatusCheck,
        result: Result<RunStatusReport, ControlApiError>,
    },
    HistoryFetched {
        run_id: String,
        result: Result<Vec<StreamMessage>, ControlApiError>,
    },
    RestartDue {
        generation: u64,
    },
    RunCreated {
        generation: u64,
        result: Result<String, ControlApiError>,
    },
    ConnectGuardExpired {
        generation: u64,
        run_id: String,
    },
}

impl Internal {
    fn generation(&self) -> Option<u64> {
        match self {
            Self::Line { generation, .. }
            | Self::TransportFailed { generation, .. }
            | Self::TransportClosed { generation }
            | Self::StatusChecked { generation, .. }
            | Self::RestartDue { generation }
            | Self::RunCreated { generation, .. }
            | Self::ConnectGuardExpired { generation, .. } => Some(*generation),
            Self::HistoryFetched { .. } => None,
        }
    }
}

struct ActiveRun {
    run_id: String,
    reader: Option<JoinHandle<()>>,
    /// Transport is gone and a status check decides the final state.
    interrupted: bool,
}

/// Owns all session state. Runs as a single task; every mutation happens here.
pub(super) struct SessionActor {
    config: SessionConfig,
    control: Arc<dyn ControlApi>,
    transport: Arc<dyn Transport>,
    events: mpsc::Sender<SessionEvent>,
    /// Events the caller has not made room for yet, in emission order.
    outbox: VecDeque<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    fsm: StatusMachine,
    dispatcher: Dispatcher,
    monitor: ActivityMonitor,
    generation: u64,
    active: Option<ActiveRun>,
    last_finalized: Option<String>,
    restart_timer: Option<JoinHandle<()>>,
    creating_run: bool,
    connect_guard: Option<JoinHandle<()>>,
    restart_attempts: u32,
    retry_available: bool,
    last_error: Option<String>,
    last_frame_at: Option<Instant>,
}

impl SessionActor {
    pub(super) fn new(
        config: SessionConfig,
        control: Arc<dyn ControlApi>,
        transport: Arc<dyn Transport>,
        events: mpsc::Sender<SessionEvent>,
        snapshot: watch::Sender<SessionSnapshot>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let monitor = ActivityMonitor::new(config.liveness.clone());
        Self {
            config,
            control,
            transport,
            events,
            outbox: VecDeque::new(),
            snapshot,
            internal_tx,
            internal_rx,
            fsm: StatusMachine::default(),
            dispatcher: Dispatcher::default(),
            monitor,
            generation: 0,
            active: None,
            last_finalized: None,
            restart_timer: None,
            creating_run: false,
            connect_guard: None,
            restart_attempts: 0,
            retry_available: false,
            last_error: None,
            last_frame_at: None,
        }
    }

    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!(event = "stream.session_started", domain = "stream");
        // The select loop never waits on the caller: queued events are handed
        // over as channel capacity frees up, alongside commands and timers.
        let events = self.events.clone();
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.shutdown();
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                permit = events.reserve(), if !self.outbox.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(event) = self.outbox.pop_front() {
                            permit.send(event);
                        }
                    }
                    Err(_) => {
                        debug!(
                            event = "stream.event_receiver_gone",
                            domain = "stream",
                            dropped = self.outbox.len()
                        );
                        self.outbox.clear();
                    }
                },
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
                _ = self.monitor.tick() => self.check_liveness(),
            }
            self.publish();
        }
        self.flush_outbox();
        self.publish();
        debug!(event = "stream.session_stopped", domain = "stream");
    }

    /// Returns false once the session should exit.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start(run_id) => self.start(run_id, StartOrigin::Caller),
            Command::Stop => self.stop(),
            Command::Retry => self.retry(),
            Command::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    fn handle_internal(&mut self, message: Internal) {
        if let Some(generation) = message.generation()
            && generation != self.generation
        {
            debug!(
                event = "stream.stale_continuation",
                domain = "stream",
                generation,
                current = self.generation
            );
            if let Internal::RunCreated {
                result: Ok(run_id), ..
            } = message
            {
                // A replacement run nobody will attach to.
                self.stop_remote(run_id, "orphaned_restart");
            }
            return;
        }
        match message {
            Internal::Line { line, .. } => self.on_line(line),
            Internal::TransportFailed { error, .. } => {
                let restartable = match error.status_code() {
                    Some(status) => classify_failure(&error.to_string(), Some(status)).recoverable,
                    None => true,
                };
                self.interrupt(error.to_string(), restartable);
            }
            Internal::TransportClosed { .. } => {
                self.interrupt("event stream closed unexpectedly".to_string(), true)
            }
            Internal::StatusChecked {
                run_id,
                check,
                result,
                ..
            } => self.on_status_checked(run_id, check, result),
            Internal::HistoryFetched { run_id, result } => match result {
                Ok(messages) => {
                    debug!(
                        event = "stream.history_fetched",
                        domain = "stream",
                        run_id = %run_id,
                        count = messages.len()
                    );
                    self.emit(SessionEvent::History { messages });
                }
                Err(err) => warn!(
                    event = "stream.history_failed",
                    domain = "stream",
                    run_id = %run_id,
                    error = %err
                ),
            },
            Internal::RestartDue { .. } => self.on_restart_due(),
            Internal::RunCreated { result, .. } => self.on_run_created(result),
            Internal::ConnectGuardExpired { run_id, .. } => self.on_connect_guard(run_id),
        }
    }

    pub(super) fn start(&mut self, run_id: String, origin: StartOrigin) {
        self.detach();
        self.cancel_restart();
        if let Some(previous) = self.active.take() {
            info!(
                event = "stream.run_superseded",
                domain = "stream",
                previous_run_id = %previous.run_id,
                run_id = %run_id
            );
        }
        if origin == StartOrigin::Caller {
            self.restart_attempts = 0;
            self.retry_available = false;
        }
        self.last_finalized = None;
        self.last_error = None;
        self.last_frame_at = None;
        self.dispatcher.reset();
        self.active = Some(ActiveRun {
            run_id: run_id.clone(),
            reader: None,
            interrupted: false,
        });
        info!(
            event = "stream.run_start",
            domain = "stream",
            run_id = %run_id,
            generation = self.generation,
            origin = ?origin
        );

        if self.fsm.begin_connecting() {
            self.emit(SessionEvent::StatusChanged {
                status: RunStatus::Connecting,
            });
        }
        self.monitor.arm(Instant::now());
        if origin == StartOrigin::Restart {
            self.arm_connect_guard(run_id.clone());
        }
        self.query_status(run_id, StatusCheck::Start);
    }

    fn stop(&mut self) {
        if self.restart_timer.is_some() || self.creating_run {
            info!(event = "stream.restart_cancelled", domain = "stream");
            self.detach();
            self.cancel_restart();
        }
        let Some(run_id) = self.active.as_ref().map(|a| a.run_id.clone()) else {
            debug!(event = "stream.stop_ignored", domain = "stream", reason = "no_active_run");
            return;
        };
        self.finalize(RunStatus::Stopped, &run_id, None, false);
        self.stop_remote(run_id, "caller_stop");
    }

    fn retry(&mut self) {
        if let Some(active) = &self.active {
            debug!(
                event = "stream.retry_ignored",
                domain = "stream",
                run_id = %active.run_id
            );
            return;
        }
        self.detach();
        self.cancel_restart();
        self.restart_attempts = 0;
        self.retry_available = false;
        self.last_error = None;
        info!(event = "stream.manual_retry", domain = "stream");
        if self.fsm.reset() {
            self.emit(SessionEvent::StatusChanged {
                status: RunStatus::Idle,
            });
        }
        self.request_new_run();
    }

    fn shutdown(&mut self) {
        self.detach();
        self.cancel_restart();
        self.active = None;
        self.dispatcher.reset();
        info!(event = "stream.session_shutdown", domain = "stream");
    }

    fn on_line(&mut self, line: String) {
        let Some(run_id) = self.active.as_ref().map(|a| a.run_id.clone()) else {
            return;
        };
        if !frame::carries_payload(&line) {
            return;
        }
        let now = Instant::now();
        self.monitor.touch(now);
        self.last_frame_at = Some(now);

        let Some(frame) = frame::parse_frame(&line) else {
            return;
        };
        match frame {
            Frame::Completion(signal) => {
                info!(
                    event = "stream.completion_signal",
                    domain = "stream",
                    run_id = %run_id,
                    signal = ?signal
                );
                self.finalize(RunStatus::Completed, &run_id, None, false);
            }
            Frame::ServerError(message) => self.fail(&run_id, message),
            Frame::Message(message) => self.on_message(&run_id, message),
        }
    }

    fn on_message(&mut self, run_id: &str, message: StreamMessage) {
        if self.fsm.frame_received() {
            self.cancel_connect_guard();
            if self.restart_attempts > 0 {
                // Only consecutive failures count toward the restart limit.
                debug!(
                    event = "stream.restart_recovered",
                    domain = "stream",
                    run_id = %run_id,
                    attempts = self.restart_attempts
                );
                self.restart_attempts = 0;
            }
            self.emit(SessionEvent::StatusChanged {
                status: RunStatus::Streaming,
            });
        }
        for outcome in self.dispatcher.dispatch(message) {
            match outcome {
                Dispatched::AssistantStart => self.emit(SessionEvent::AssistantStart),
                Dispatched::Chunk(content) => {
                    self.emit(SessionEvent::AssistantChunk { content })
                }
                Dispatched::Message(message) => self.emit(SessionEvent::Message { message }),
                Dispatched::RunEnded => {
                    debug!(event = "stream.thread_run_end", domain = "stream", run_id = %run_id);
                    self.query_status(run_id.to_string(), StatusCheck::RunEnd);
                }
                Dispatched::Failed(message) => {
                    self.fail(run_id, message);
                    return;
                }
            }
        }
    }

    fn fail(&mut self, run_id: &str, message: String) {
        let class = classify_failure(&message, None);
        warn!(
            event = "stream.run_failed",
            domain = "stream",
            run_id = %run_id,
            code = class.code,
            recoverable = class.recoverable,
            error = %message
        );
        self.finalize(RunStatus::Error, run_id, Some(message), class.recoverable);
    }

    /// The transport is gone or silent: detach it and let the control API decide.
    fn interrupt(&mut self, reason: String, restartable: bool) {
        let Some(run_id) = self
            .active
            .as_ref()
            .filter(|a| !a.interrupted)
            .map(|a| a.run_id.clone())
        else {
            return;
        };
        warn!(
            event = "stream.interrupted",
            domain = "stream",
            run_id = %run_id,
            reason = %reason,
            since_last_frame_ms = ?self.last_frame_at.map(|at| at.elapsed().as_millis())
        );
        self.detach();
        if let Some(active) = self.active.as_mut() {
            active.interrupted = true;
        }
        self.query_status(
            run_id,
            StatusCheck::Interruption {
                reason,
                restartable,
            },
        );
    }

    fn check_liveness(&mut self) {
        let status = self.fsm.status();
        if !status.is_active() || self.active.is_none() {
            self.monitor.disarm();
            return;
        }
        if let Some(breach) = self.monitor.check(status, Instant::now()) {
            self.interrupt(breach.message(), true);
        }
    }

    fn on_status_checked(
        &mut self,
        run_id: String,
        check: StatusCheck,
        result: Result<RunStatusReport, ControlApiError>,
    ) {
        if !self.is_active_run(&run_id) {
            return;
        }
        let report = match result {
            Ok(report) => report,
            Err(err) if err.is_not_found() => {
                info!(
                    event = "stream.run_not_found",
                    domain = "stream",
                    run_id = %run_id
                );
                self.finalize(RunStatus::AgentNotRunning, &run_id, None, false);
                return;
            }
            Err(err) => {
                match check {
                    StatusCheck::Start => {
                        let class = err.classify();
                        self.finalize(RunStatus::Error, &run_id, Some(err.to_string()), class.recoverable);
                    }
                    StatusCheck::RunEnd => debug!(
                        event = "stream.run_end_check_failed",
                        domain = "stream",
                        run_id = %run_id,
                        error = %err
                    ),
                    StatusCheck::Interruption {
                        reason,
                        restartable,
                    } => {
                        let message = format!("{reason} (status check failed: {err})");
                        self.finalize(RunStatus::Error, &run_id, Some(message), restartable);
                    }
                }
                return;
            }
        };

        match (report.status.terminal_status(), check) {
            (None, StatusCheck::Start) => self.attach_transport(run_id),
            (None, StatusCheck::RunEnd) => debug!(
                event = "stream.run_end_still_running",
                domain = "stream",
                run_id = %run_id
            ),
            (
                None,
                StatusCheck::Interruption {
                    reason,
                    restartable,
                },
            ) => {
                self.finalize(RunStatus::Error, &run_id, Some(reason), restartable)
            }
            (Some(status), check) => {
                info!(
                    event = "stream.run_not_running",
                    domain = "stream",
                    run_id = %run_id,
                    status = status.as_str(),
                    check = ?check
                );
                self.finalize(status, &run_id, report.error, false);
            }
        }
    }

    fn attach_transport(&mut self, run_id: String) {
        let generation = self.generation;
        let transport = Arc::clone(&self.transport);
        let tx = self.internal_tx.clone();
        let reader = tokio::spawn(async move {
            let mut lines = match transport.open(&run_id).await {
                Ok(lines) => lines,
                Err(error) => {
                    let _ = tx.send(Internal::TransportFailed { generation, error });
                    return;
                }
            };
            while let Some(item) = lines.next().await {
                match item {
                    Ok(line) => {
                        if tx.send(Internal::Line { generation, line }).is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        let _ = tx.send(Internal::TransportFailed { generation, error });
                        return;
                    }
                }
            }
            let _ = tx.send(Internal::TransportClosed { generation });
        });
        if let Some(active) = self.active.as_mut() {
            active.reader = Some(reader);
        }
    }

    /// Terminal transition for `run_id`. Later calls for the same run are no-ops.
    pub(super) fn finalize(
        &mut self,
        status: RunStatus,
        run_id: &str,
        error: Option<String>,
        restart: bool,
    ) {
        if self.last_finalized.as_deref() == Some(run_id) || !self.is_active_run(run_id) {
            debug!(
                event = "stream.finalize_skipped",
                domain = "stream",
                run_id = %run_id,
                status = status.as_str()
            );
            return;
        }
        self.detach();
        self.active = None;
        self.last_finalized = Some(run_id.to_string());
        self.dispatcher.reset();
        if status == RunStatus::Completed {
            self.restart_attempts = 0;
        }
        let failed = matches!(status, RunStatus::Error | RunStatus::Failed);
        // A `failed` report comes from the backend unclassified.
        let restart = failed
            && (restart
                || (status == RunStatus::Failed
                    && error
                        .as_deref()
                        .is_some_and(|message| classify_failure(message, None).recoverable)));
        let will_restart = restart && self.config.restart.can_attempt(self.restart_attempts + 1);

        if self.fsm.finish(status) {
            self.emit(SessionEvent::StatusChanged { status });
        }
        if let Some(message) = &error {
            self.last_error = Some(message.clone());
            if failed {
                self.emit(SessionEvent::Error {
                    message: message.clone(),
                    recoverable: will_restart,
                });
            }
        }
        info!(
            event = "stream.run_finalized",
            domain = "stream",
            run_id = %run_id,
            status = status.as_str(),
            restart = will_restart
        );
        self.emit(SessionEvent::Closed { status });

        self.fetch_history(run_id.to_string());
        if matches!(
            status,
            RunStatus::Completed | RunStatus::Stopped | RunStatus::AgentNotRunning
        ) {
            self.confirm_remote(run_id.to_string());
        }
        if failed {
            let reason = error.unwrap_or_else(|| "agent run failed".to_string());
            if restart {
                self.schedule_restart(reason);
            } else {
                self.surface_fatal(reason);
            }
        }
    }

    fn schedule_restart(&mut self, reason: String) {
        let attempt = self.restart_attempts + 1;
        if !self.config.restart.can_attempt(attempt) {
            let message = if self.restart_attempts == 0 {
                reason
            } else {
                format!(
                    "{reason} (gave up after {} restart attempts)",
                    self.restart_attempts
                )
            };
            self.surface_fatal(message);
            return;
        }
        let delay = self.config.restart.delay_for(attempt);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.restart_attempts = attempt;
        info!(
            event = "stream.restart_scheduled",
            domain = "stream",
            attempt,
            backoff_ms = delay_ms,
            reason = %reason
        );
        self.emit(SessionEvent::Reconnecting { attempt, delay_ms });

        let generation = self.generation;
        let tx = self.internal_tx.clone();
        self.restart_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::RestartDue { generation });
        }));
    }

    fn on_restart_due(&mut self) {
        self.restart_timer = None;
        if self.active.is_some() {
            return;
        }
        if self.fsm.reset() {
            self.emit(SessionEvent::StatusChanged {
                status: RunStatus::Idle,
            });
        }
        self.dispatcher.reset();
        self.request_new_run();
    }

    fn request_new_run(&mut self) {
        self.creating_run = true;
        let generation = self.generation;
        let control = Arc::clone(&self.control);
        let thread_id = self.config.thread_id.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = control.start_run(&thread_id).await;
            let _ = tx.send(Internal::RunCreated { generation, result });
        });
    }

    fn on_run_created(&mut self, result: Result<String, ControlApiError>) {
        self.creating_run = false;
        match result {
            Ok(run_id) => {
                info!(
                    event = "stream.restart_run_created",
                    domain = "stream",
                    run_id = %run_id,
                    attempt = self.restart_attempts
                );
                self.start(run_id, StartOrigin::Restart);
            }
            Err(err) => {
                let class = err.classify();
                let message = format!("failed to create a new run: {err}");
                warn!(
                    event = "stream.restart_run_failed",
                    domain = "stream",
                    code = class.code,
                    error = %err
                );
                self.last_error = Some(message.clone());
                let will_retry =
                    class.recoverable && self.config.restart.can_attempt(self.restart_attempts + 1);
                self.emit(SessionEvent::Error {
                    message: message.clone(),
                    recoverable: will_retry,
                });
                if class.recoverable {
                    self.schedule_restart(message);
                } else {
                    self.surface_fatal(message);
                }
            }
        }
    }

    fn arm_connect_guard(&mut self, run_id: String) {
        let timeout = self.config.restart.connect_timeout();
        let generation = self.generation;
        let tx = self.internal_tx.clone();
        self.connect_guard = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Internal::ConnectGuardExpired { generation, run_id });
        }));
    }

    fn cancel_connect_guard(&mut self) {
        if let Some(guard) = self.connect_guard.take() {
            guard.abort();
        }
    }

    fn on_connect_guard(&mut self, run_id: String) {
        self.connect_guard = None;
        if !self.is_active_run(&run_id) || self.fsm.status() != RunStatus::Connecting {
            return;
        }
        let message = format!(
            "Restarted run did not start streaming within {}s",
            self.config.restart.connect_timeout().as_secs()
        );
        warn!(
            event = "stream.connect_guard_expired",
            domain = "stream",
            run_id = %run_id
        );
        self.stop_remote(run_id.clone(), "connect_guard");
        self.finalize(RunStatus::Error, &run_id, Some(message), true);
    }

    fn surface_fatal(&mut self, message: String) {
        error!(event = "stream.fatal", domain = "stream", error = %message);
        self.retry_available = true;
        self.last_error = Some(message.clone());
        self.emit(SessionEvent::Fatal { message });
    }

    fn query_status(&self, run_id: String, check: StatusCheck) {
        let generation = self.generation;
        let control = Arc::clone(&self.control);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = control.run_status(&run_id).await;
            let _ = tx.send(Internal::StatusChecked {
                generation,
                run_id,
                check,
                result,
            });
        });
    }

    fn fetch_history(&self, run_id: String) {
        let control = Arc::clone(&self.control);
        let thread_id = self.config.thread_id.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = control.thread_messages(&thread_id).await;
            let _ = tx.send(Internal::HistoryFetched { run_id, result });
        });
    }

    /// Best-effort read-back of a run the session considers finished.
    fn confirm_remote(&self, run_id: String) {
        let control = Arc::clone(&self.control);
        tokio::spawn(async move {
            match control.run_status(&run_id).await {
                Ok(report) => debug!(
                    event = "stream.remote_confirmed",
                    domain = "stream",
                    run_id = %run_id,
                    remote_status = ?report.status
                ),
                Err(err) => warn!(
                    event = "stream.remote_confirm_failed",
                    domain = "stream",
                    run_id = %run_id,
                    error = %err
                ),
            }
        });
    }

    fn stop_remote(&self, run_id: String, reason: &'static str) {
        let control = Arc::clone(&self.control);
        tokio::spawn(async move {
            match control.stop_run(&run_id).await {
                Ok(()) => debug!(
                    event = "stream.remote_stopped",
                    domain = "stream",
                    run_id = %run_id,
                    reason
                ),
                Err(err) if err.is_already_stopped() => debug!(
                    event = "stream.remote_already_stopped",
                    domain = "stream",
                    run_id = %run_id,
                    reason
                ),
                Err(err) => warn!(
                    event = "stream.remote_stop_failed",
                    domain = "stream",
                    run_id = %run_id,
                    reason,
                    error = %err
                ),
            }
        });
    }

    /// Invalidates outstanding continuations and drops the reader, the
    /// monitor's timer and the connect guard.
    fn detach(&mut self) {
        self.generation += 1;
        if let Some(reader) = self.active.as_mut().and_then(|a| a.reader.take()) {
            reader.abort();
        }
        self.monitor.disarm();
        self.cancel_connect_guard();
    }

    fn cancel_restart(&mut self) {
        if let Some(timer) = self.restart_timer.take() {
            timer.abort();
        }
        self.creating_run = false;
    }

    fn is_active_run(&self, run_id: &str) -> bool {
        self.active.as_ref().is_some_and(|a| a.run_id == run_id)
    }

    /// Hands `event` to the caller, queueing it while the channel is full.
    fn emit(&mut self, event: SessionEvent) {
        if !self.outbox.is_empty() {
            self.outbox.push_back(event);
            return;
        }
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => self.outbox.push_back(event),
            Err(TrySendError::Closed(_)) => {
                debug!(event = "stream.event_receiver_gone", domain = "stream")
            }
        }
    }

    /// Delivers whatever still fits before the task exits.
    fn flush_outbox(&mut self) {
        while let Some(event) = self.outbox.pop_front() {
            if let Err(err) = self.events.try_send(event) {
                self.outbox.push_front(err.into_inner());
                break;
            }
        }
    }

    fn publish(&self) {
        let next = SessionSnapshot {
            status: self.fsm.status(),
            run_id: self.active.as_ref().map(|a| a.run_id.clone()),
            chunk_text: self.dispatcher.text().to_string(),
            tool_call: self.dispatcher.tool_call().cloned(),
            last_error: self.last_error.clone(),
            restart_attempt: self.restart_attempts,
            restart_pending: self.restart_timer.is_some() || self.creating_run,
            retry_available: self.retry_available,
            transport_attached: self.active.as_ref().is_some_and(|a| a.reader.is_some()),
            monitor_armed: self.monitor.is_armed(),
            connect_guard_armed: self.connect_guard.is_some(),
            generation: self.generation,
            pending_events: self.outbox.len(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
