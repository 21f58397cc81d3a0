//! Debug service
//!
//! Drives one kernel debug session at a time: tracks which threads are
//! stopped, rebuilds frame snapshots on every stop, and publishes them to the
//! [`DebuggerModel`]. Control requests (continue/next/stepIn) report failure
//! through [`ControlOutcome`] and never propagate it; structural operations
//! (launch, breakpoint sync, frame refresh) return [`Result`].

mod frames;
mod threads;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::common::{lock, Error, Result};
use crate::dap::{
    Breakpoint, ContinueArguments, DumpCellArguments, DumpCellResponseBody, Event, EventMessage,
    SetBreakpointsArguments, SetBreakpointsResponseBody, Source, SourceBreakpoint, StackFrame,
    StepArguments,
};
use crate::model::{DebuggerModel, Signal};
use crate::session::{request, Session};

pub use frames::FrameSnapshot;
pub use threads::ThreadTracker;

/// Result of a control request
///
/// Failures are already logged when this is returned; callers may ignore it.
#[derive(Debug)]
pub enum ControlOutcome {
    Sent,
    Failed(Error),
}

impl ControlOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, ControlOutcome::Sent)
    }
}

/// Mutable state behind the service's lock
struct State {
    session: Option<Arc<dyn Session>>,
    threads: ThreadTracker,
    frames: Vec<FrameSnapshot>,
    /// Event pump and frame-selection router for the installed session
    tasks: Vec<JoinHandle<()>>,
}

/// Orchestrates a kernel debug session for the UI models
pub struct DebugService {
    model: Arc<DebuggerModel>,
    sentinel_thread_id: i64,
    state: Mutex<State>,
    refresh_generation: AtomicU64,
    disposed: AtomicBool,
    session_changed: Signal<Arc<dyn Session>>,
    event_message: Signal<EventMessage>,
}

impl DebugService {
    /// Create a service publishing into `model`. `sentinel_thread_id` is
    /// the thread commands target before any thread has been reported.
    pub fn new(model: Arc<DebuggerModel>, sentinel_thread_id: i64) -> Arc<Self> {
        Arc::new(Self {
            model,
            sentinel_thread_id,
            state: Mutex::new(State {
                session: None,
                threads: ThreadTracker::new(sentinel_thread_id),
                frames: Vec::new(),
                tasks: Vec::new(),
            }),
            refresh_generation: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            session_changed: Signal::new(),
            event_message: Signal::new(),
        })
    }

    pub fn model(&self) -> &Arc<DebuggerModel> {
        &self.model
    }

    pub fn session(&self) -> Option<Arc<dyn Session>> {
        lock(&self.state).session.clone()
    }

    /// Install a session, disposing the previous one
    ///
    /// Installing the session that is already installed does nothing. The
    /// session's events are handled on the current Tokio runtime; without
    /// one the session is not installed.
    pub fn set_session(self: &Arc<Self>, session: Arc<dyn Session>) {
        if self.is_disposed() {
            tracing::warn!("Ignoring session assignment on a disposed debug service");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Ignoring session assignment outside a Tokio runtime");
            return;
        };

        let previous = {
            let mut state = lock(&self.state);
            if let Some(current) = &state.session {
                if Arc::ptr_eq(current, &session) {
                    return;
                }
            }

            for task in state.tasks.drain(..) {
                task.abort();
            }
            state.threads = ThreadTracker::new(self.sentinel_thread_id);
            state.frames.clear();
            // Refreshes still running against the old session must not write
            self.refresh_generation.fetch_add(1, Ordering::SeqCst);

            let events = session.subscribe();
            let frame_changes = self.model.callstack.current_frame_changed().subscribe();
            state.tasks.push(runtime.spawn(pump_session_events(
                Arc::downgrade(self),
                events,
            )));
            state.tasks.push(runtime.spawn(route_frame_changes(
                Arc::downgrade(self),
                frame_changes,
            )));

            state.session.replace(session.clone())
        };

        if let Some(previous) = previous {
            previous.dispose();
        }
        tracing::info!("Debug session installed");
        self.session_changed.emit(session);
    }

    /// Notified with every newly installed session
    pub fn session_changed(&self) -> broadcast::Receiver<Arc<dyn Session>> {
        self.session_changed.subscribe()
    }

    /// Every event the installed session emits, forwarded verbatim
    pub fn event_message(&self) -> broadcast::Receiver<EventMessage> {
        self.event_message.subscribe()
    }

    pub fn can_start(&self) -> bool {
        self.session().is_some_and(|s| !s.is_started())
    }

    pub fn is_started(&self) -> bool {
        self.session().is_some_and(|s| s.is_started())
    }

    /// Start the installed session
    pub async fn start(&self) -> Result<()> {
        self.require_session()?.start().await
    }

    pub fn is_thread_stopped(&self) -> bool {
        let state = lock(&self.state);
        state.threads.is_stopped(state.threads.current())
    }

    pub fn current_thread(&self) -> i64 {
        lock(&self.state).threads.current()
    }

    /// Make commands target `thread_id`, or go back to automatic selection
    pub fn select_thread(&self, thread_id: Option<i64>) {
        lock(&self.state).threads.select(thread_id);
    }

    pub fn stopped_threads(&self) -> Vec<i64> {
        lock(&self.state).threads.stopped()
    }

    pub fn frame_snapshots(&self) -> Vec<FrameSnapshot> {
        lock(&self.state).frames.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Tear down the service. Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.session_changed.clear();
        self.event_message.clear();

        let session = {
            let mut state = lock(&self.state);
            for task in state.tasks.drain(..) {
                task.abort();
            }
            state.session.take()
        };
        if let Some(session) = session {
            session.dispose();
        }
        tracing::debug!("Debug service disposed");
    }

    fn require_session(&self) -> Result<Arc<dyn Session>> {
        if self.is_disposed() {
            return Err(Error::SessionDisposed);
        }
        self.session().ok_or(Error::SessionNotActive)
    }

    fn handle_event(self: &Arc<Self>, message: EventMessage) {
        match Event::from_message(&message) {
            Event::Stopped(body) => {
                let thread_id = {
                    let mut state = lock(&self.state);
                    let thread_id = body.thread_id.unwrap_or_else(|| state.threads.current());
                    state.threads.mark_stopped(thread_id);
                    thread_id
                };
                tracing::debug!(thread_id, reason = %body.reason, "Thread stopped");

                let service = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = service.get_all_frames().await {
                        tracing::warn!(error = %e, "Frame refresh after stop failed");
                    }
                });
            }
            Event::Continued(body) => {
                lock(&self.state).threads.mark_continued(body.thread_id);
                tracing::debug!(thread_id = body.thread_id, "Thread continued");
                self.model.lines_cleared().emit(());
            }
            Event::Thread(body) => {
                lock(&self.state).threads.record_reported(body.thread_id);
                tracing::debug!(thread_id = body.thread_id, reason = %body.reason, "Thread event");
            }
            _ => {}
        }

        self.event_message.emit(message);
    }

    // === Execution control ===

    async fn control<A: Serialize>(
        &self,
        command: &str,
        thread_id: i64,
        arguments: A,
    ) -> ControlOutcome {
        let result = match (self.require_session(), serde_json::to_value(arguments)) {
            (Ok(session), Ok(arguments)) => session.send_request(command, arguments).await,
            (Err(e), _) => Err(e),
            (_, Err(e)) => Err(e.into()),
        };
        match result {
            Ok(_) => ControlOutcome::Sent,
            Err(e) if e.is_adapter_gone() => {
                tracing::warn!(command, thread_id, error = %e, "Debug adapter is gone");
                ControlOutcome::Failed(e)
            }
            Err(e) => {
                tracing::warn!(command, thread_id, error = %e, "Control request failed");
                ControlOutcome::Failed(e)
            }
        }
    }

    /// Resume a thread (the current thread if `None`)
    ///
    /// The thread only leaves the stopped set if the adapter accepted the
    /// request.
    pub async fn continue_thread(&self, thread_id: Option<i64>) -> ControlOutcome {
        let thread_id = thread_id.unwrap_or_else(|| self.current_thread());
        let outcome = self
            .control("continue", thread_id, ContinueArguments { thread_id })
            .await;
        if outcome.is_sent() {
            lock(&self.state).threads.mark_continued(thread_id);
        }
        outcome
    }

    /// Step over the current line
    pub async fn next(&self, thread_id: Option<i64>) -> ControlOutcome {
        let thread_id = thread_id.unwrap_or_else(|| self.current_thread());
        self.control("next", thread_id, StepArguments { thread_id }).await
    }

    /// Step into the call on the current line
    pub async fn step_in(&self, thread_id: Option<i64>) -> ControlOutcome {
        let thread_id = thread_id.unwrap_or_else(|| self.current_thread());
        self.control("stepIn", thread_id, StepArguments { thread_id }).await
    }

    // === Launch and breakpoints ===

    /// Debug a cell: send breakpoints, run the code, and show where it stops
    #[tracing::instrument(skip_all)]
    pub async fn launch(&self, code: &str) -> Result<()> {
        let session = self.require_session()?;
        {
            let mut state = lock(&self.state);
            state.frames.clear();
            state.threads.forget_reported();
        }

        let breakpoints = self.get_breakpoints();
        let dumped = self.dump_cell(code).await?;
        self.set_breakpoints(&breakpoints, &dumped.source_path).await?;
        session.send_request("configurationDone", json!({})).await?;

        tracing::info!(
            source = %dumped.source_path,
            breakpoints = breakpoints.len(),
            "Executing cell"
        );
        session.request_execute(code);

        self.get_all_frames().await
    }

    /// Have the kernel write `code` to a file it can map breakpoints onto
    pub async fn dump_cell(&self, code: &str) -> Result<DumpCellResponseBody> {
        let session = self.require_session()?;
        request(
            &*session,
            "dumpCell",
            &DumpCellArguments {
                code: code.to_string(),
            },
        )
        .await
    }

    /// Breakpoints from the model, as line-only descriptors
    pub fn get_breakpoints(&self) -> Vec<SourceBreakpoint> {
        self.model
            .breakpoints
            .breakpoints()
            .into_iter()
            .map(|bp| SourceBreakpoint { line: bp.line })
            .collect()
    }

    /// Replace the breakpoints of a dumped source file
    pub async fn set_breakpoints(
        &self,
        breakpoints: &[SourceBreakpoint],
        path: &str,
    ) -> Result<Vec<Breakpoint>> {
        let session = self.require_session()?;
        let body: SetBreakpointsResponseBody = request(
            &*session,
            "setBreakpoints",
            &SetBreakpointsArguments {
                source: Source::from_path(path),
                breakpoints: breakpoints.to_vec(),
                source_modified: false,
            },
        )
        .await?;
        Ok(body.breakpoints)
    }

    /// Resend every breakpoint for the model's current code
    ///
    /// Does nothing until the session has started.
    pub async fn update_breakpoints(&self) -> Result<()> {
        if !self.is_started() {
            return Ok(());
        }
        let session = self.require_session()?;

        let dumped = self.dump_cell(&self.model.code()).await?;
        let breakpoints = self.get_breakpoints();
        self.set_breakpoints(&breakpoints, &dumped.source_path).await?;
        session.send_request("configurationDone", json!({})).await?;
        Ok(())
    }
}

/// Feed session events to the service until either goes away
async fn pump_session_events(
    service: Weak<DebugService>,
    mut events: broadcast::Receiver<EventMessage>,
) {
    loop {
        let message = match events.recv().await {
            Ok(message) => message,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Debug service fell behind session events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(service) = service.upgrade() else {
            break;
        };
        service.handle_event(message);
    }
}

/// Show the variables of whichever frame the call stack selects
async fn route_frame_changes(
    service: Weak<DebugService>,
    mut changes: broadcast::Receiver<StackFrame>,
) {
    loop {
        let frame = match changes.recv().await {
            Ok(frame) => frame,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        let Some(service) = service.upgrade() else {
            break;
        };
        service.on_change_frame(&frame);
    }
}

#[cfg(test)]
mod tests;
