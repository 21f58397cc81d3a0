//! Frame snapshots and the refresh that rebuilds them after a stop

use std::sync::atomic::Ordering;

use futures_util::future::join_all;
use serde::Serialize;

use crate::common::{lock, Result};
use crate::dap::{
    Scope, ScopesArguments, ScopesResponseBody, StackFrame, StackTraceArguments,
    StackTraceResponseBody, Variable, VariablesArguments, VariablesResponseBody,
};
use crate::model::ScopeSnapshot;
use crate::session::{request, Session};

use super::DebugService;

/// Scopes and variables of one call-stack frame, captured at a stop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSnapshot {
    pub id: i64,
    pub scopes: Vec<ScopeSnapshot>,
}

impl FrameSnapshot {
    /// One entry per scope; only the first scope carries variables
    fn assemble(id: i64, scopes: &[Scope], variables: Vec<Variable>) -> Self {
        let mut variables = Some(variables);
        let scopes = scopes
            .iter()
            .map(|scope| ScopeSnapshot {
                name: scope.name.clone(),
                variables: variables.take().unwrap_or_default(),
            })
            .collect();
        Self { id, scopes }
    }
}

/// Fetch scopes for a frame and the variables of its first scope
async fn fetch_snapshot(session: &dyn Session, frame: &StackFrame) -> Result<FrameSnapshot> {
    let scopes: ScopesResponseBody =
        request(session, "scopes", &ScopesArguments { frame_id: frame.id }).await?;

    let variables = match scopes.scopes.first() {
        Some(first) => {
            let body: VariablesResponseBody = request(
                session,
                "variables",
                &VariablesArguments {
                    variables_reference: first.variables_reference,
                },
            )
            .await?;
            body.variables
        }
        None => Vec::new(),
    };

    Ok(FrameSnapshot::assemble(frame.id, &scopes.scopes, variables))
}

impl DebugService {
    /// Fetch the stack of `thread_id`
    pub async fn frames(&self, thread_id: i64) -> Result<Vec<StackFrame>> {
        let session = self.require_session()?;
        let body: StackTraceResponseBody = request(
            &*session,
            "stackTrace",
            &StackTraceArguments {
                thread_id,
                start_frame: None,
                levels: None,
            },
        )
        .await?;
        Ok(body.stack_frames)
    }

    /// Fetch the scopes of a frame
    pub async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>> {
        let session = self.require_session()?;
        let body: ScopesResponseBody =
            request(&*session, "scopes", &ScopesArguments { frame_id }).await?;
        Ok(body.scopes)
    }

    /// Fetch the variables behind a reference
    pub async fn variables(&self, variables_reference: i64) -> Result<Vec<Variable>> {
        let session = self.require_session()?;
        let body: VariablesResponseBody = request(
            &*session,
            "variables",
            &VariablesArguments { variables_reference },
        )
        .await?;
        Ok(body.variables)
    }

    /// Rebuild the frame snapshots for the current thread and publish them
    ///
    /// The call stack is published as soon as it is known. The top frame is
    /// then fetched on its own and pushed to the variables model along with
    /// its line; the remaining frames are fetched concurrently and stored in
    /// stack order. A refresh overtaken by a newer one stops writing.
    pub async fn get_all_frames(&self) -> Result<()> {
        let session = self.require_session()?;
        let generation = self.refresh_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let thread_id = self.current_thread();

        let stack_frames = self.frames(thread_id).await?;
        if !self.is_latest_refresh(generation) {
            tracing::debug!(generation, "Discarding stale stack trace");
            return Ok(());
        }
        tracing::debug!(thread_id, frames = stack_frames.len(), "Refreshing frames");
        // Frame ids repeat across stops; snapshots from the last stop must
        // not answer for frames of this one
        lock(&self.state).frames.clear();
        self.model.callstack.set_frames(stack_frames.clone());

        let Some((top, rest)) = stack_frames.split_first() else {
            return Ok(());
        };

        let top_snapshot = fetch_snapshot(&*session, top).await?;
        if !self.is_latest_refresh(generation) {
            return Ok(());
        }
        lock(&self.state).frames = vec![top_snapshot.clone()];
        self.model.variables.set_scopes(top_snapshot.scopes);
        self.model.current_line_changed().emit(top.line);

        let results = join_all(rest.iter().map(|frame| fetch_snapshot(&*session, frame))).await;
        if !self.is_latest_refresh(generation) {
            return Ok(());
        }

        let mut first_error = None;
        {
            let mut state = lock(&self.state);
            for result in results {
                match result {
                    Ok(snapshot) => state.frames.push(snapshot),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to fetch frame scopes");
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Show the variables of a frame the user selected in the call stack
    ///
    /// Frames without a snapshot, or whose snapshot has no scopes, leave the
    /// variables model as it is.
    pub fn on_change_frame(&self, frame: &StackFrame) {
        let scopes = lock(&self.state)
            .frames
            .iter()
            .find(|snapshot| snapshot.id == frame.id)
            .filter(|snapshot| !snapshot.scopes.is_empty())
            .map(|snapshot| snapshot.scopes.clone());

        match scopes {
            Some(scopes) => self.model.variables.set_scopes(scopes),
            None => tracing::debug!(frame_id = frame.id, "No scopes for selected frame"),
        }
    }

    fn is_latest_refresh(&self, generation: u64) -> bool {
        self.refresh_generation.load(Ordering::SeqCst) == generation
    }
}
