//! Deterministic executor with a manual clock.
//!
//! Nothing happens on its own: tests inspect the commands that were
//! scheduled, attach replies to them, advance the clock, and then call
//! [`ManualExecutor::run_ready_operations`] to deliver completions on the
//! calling thread.

use super::request::{
    CallbackHandle, CommandCompletion, RemoteCommandRequest, RemoteCommandResponse,
};
use super::{CompletionHandler, TaskExecutor};
use crate::error::{ErrorCode, FetchError};
use anyhow::{anyhow, Result};
use mongodb::bson::Document;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A scheduled command handed out by [`ManualExecutor::next_ready_request`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyRequest {
    pub handle: CallbackHandle,
    pub request: RemoteCommandRequest,
}

#[derive(Default)]
pub struct ManualExecutor {
    state: Mutex<ManualState>,
    delivery: Mutex<()>,
    shutting_down: AtomicBool,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    pending: BTreeMap<CallbackHandle, PendingCommand>,
    history: Vec<RemoteCommandRequest>,
    reject_next: Option<FetchError>,
}

struct PendingCommand {
    request: RemoteCommandRequest,
    scheduled_at: Duration,
    handler: CompletionHandler,
    claimed: bool,
    canceled: bool,
    response: Option<ScheduledResponse>,
}

struct ScheduledResponse {
    ready_at: Duration,
    result: Result<Document, FetchError>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of the manual clock.
    pub fn now(&self) -> Duration {
        self.lock_state().now
    }

    pub fn advance_clock(&self, by: Duration) -> Duration {
        let mut state = self.lock_state();
        state.now = state.now.saturating_add(by);
        state.now
    }

    /// True while some scheduled command has not been claimed or cancelled.
    pub fn has_ready_requests(&self) -> bool {
        self.lock_state()
            .pending
            .values()
            .any(|command| !command.claimed && !command.canceled)
    }

    /// Claims the oldest unclaimed command so a reply can be attached to it.
    pub fn next_ready_request(&self) -> Option<ReadyRequest> {
        let mut state = self.lock_state();
        let (handle, command) = state
            .pending
            .iter_mut()
            .find(|(_, command)| !command.claimed && !command.canceled)?;
        command.claimed = true;
        Some(ReadyRequest {
            handle: *handle,
            request: command.request.clone(),
        })
    }

    /// Attaches a reply that becomes deliverable immediately.
    pub fn schedule_response(
        &self,
        handle: CallbackHandle,
        result: Result<Document, FetchError>,
    ) -> Result<()> {
        self.schedule_response_after(handle, Duration::ZERO, result)
    }

    /// Attaches a reply that becomes deliverable once the clock advanced by `delay`.
    pub fn schedule_response_after(
        &self,
        handle: CallbackHandle,
        delay: Duration,
        result: Result<Document, FetchError>,
    ) -> Result<()> {
        let mut state = self.lock_state();
        let ready_at = state.now.saturating_add(delay);
        let command = state
            .pending
            .get_mut(&handle)
            .ok_or_else(|| anyhow!("no pending command for handle {handle}"))?;
        command.claimed = true;
        command.response = Some(ScheduledResponse { ready_at, result });
        Ok(())
    }

    /// Claims the next ready command and answers it with `reply`.
    pub fn schedule_reply(&self, reply: Document) -> Result<ReadyRequest> {
        let ready = self
            .next_ready_request()
            .ok_or_else(|| anyhow!("no ready request to answer"))?;
        self.schedule_response(ready.handle, Ok(reply))?;
        Ok(ready)
    }

    /// Claims the next ready command and fails it with a transport error.
    pub fn schedule_error(&self, code: ErrorCode, reason: &str) -> Result<ReadyRequest> {
        let ready = self
            .next_ready_request()
            .ok_or_else(|| anyhow!("no ready request to answer"))?;
        self.schedule_response(ready.handle, Err(FetchError::new(code, reason)))?;
        Ok(ready)
    }

    /// Delivers every completion that is due, oldest handle first, including
    /// completions for commands scheduled by the handlers themselves.
    /// Returns the number of handlers invoked.
    pub fn run_ready_operations(&self) -> usize {
        let _delivery = self
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;

        loop {
            let next = {
                let mut state = self.lock_state();
                self.take_deliverable(&mut state)
            };
            let Some((handle, handler, completion)) = next else {
                break;
            };
            tracing::trace!(%handle, completion = ?completion, "delivering command completion");
            handler(completion);
            delivered += 1;
        }

        delivered
    }

    /// Starts shutdown. Outstanding commands complete with
    /// [`CommandCompletion::Shutdown`] on the next run and new commands are refused.
    pub fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("manual executor shutting down");
        }
    }

    /// Every command accepted so far, in scheduling order.
    pub fn requests(&self) -> Vec<RemoteCommandRequest> {
        self.lock_state().history.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Makes the next `schedule_remote_command` call fail with `error`.
    pub fn reject_next_schedule(&self, error: FetchError) {
        self.lock_state().reject_next = Some(error);
    }

    fn take_deliverable(
        &self,
        state: &mut ManualState,
    ) -> Option<(CallbackHandle, CompletionHandler, CommandCompletion)> {
        let now = state.now;
        let shutting_down = self.shutting_down.load(Ordering::SeqCst);

        let handle = state.pending.iter().find_map(|(handle, command)| {
            let due = shutting_down
                || command.canceled
                || deadline_passed(command, now)
                || command
                    .response
                    .as_ref()
                    .is_some_and(|response| response.ready_at <= now);
            due.then_some(*handle)
        })?;

        let command = state.pending.remove(&handle)?;
        let completion = if shutting_down {
            CommandCompletion::Shutdown
        } else if command.canceled {
            CommandCompletion::Canceled
        } else {
            match command.response {
                Some(response) if response.ready_at <= now => CommandCompletion::Response(
                    response.result.map(|data| {
                        RemoteCommandResponse::new(
                            data,
                            response.ready_at.saturating_sub(command.scheduled_at),
                        )
                    }),
                ),
                _ => CommandCompletion::Response(Err(FetchError::new(
                    ErrorCode::NetworkTimeout,
                    format!(
                        "command {:?} on {} timed out",
                        command.request.command_name().unwrap_or_default(),
                        command.request.target
                    ),
                ))),
            }
        };

        Some((handle, command.handler, completion))
    }

    fn lock_state(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn deadline_passed(command: &PendingCommand, now: Duration) -> bool {
    let Some(timeout) = command.request.timeout else {
        return false;
    };
    let deadline = command.scheduled_at.saturating_add(timeout);
    if now < deadline {
        return false;
    }
    // A reply that landed before the deadline still wins.
    !command
        .response
        .as_ref()
        .is_some_and(|response| response.ready_at < deadline)
}

impl TaskExecutor for ManualExecutor {
    fn schedule_remote_command(
        &self,
        request: RemoteCommandRequest,
        on_completion: CompletionHandler,
    ) -> Result<CallbackHandle, FetchError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(FetchError::shutdown_in_progress(
                "manual executor is shutting down",
            ));
        }

        let mut state = self.lock_state();
        if let Some(error) = state.reject_next.take() {
            return Err(error);
        }

        state.next_id += 1;
        let handle = CallbackHandle::new(state.next_id);
        let scheduled_at = state.now;
        state.history.push(request.clone());
        state.pending.insert(
            handle,
            PendingCommand {
                request,
                scheduled_at,
                handler: on_completion,
                claimed: false,
                canceled: false,
                response: None,
            },
        );
        Ok(handle)
    }

    fn cancel(&self, handle: CallbackHandle) {
        if let Some(command) = self.lock_state().pending.get_mut(&handle) {
            command.canceled = true;
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn diagnostic_string(&self) -> String {
        let state = self.lock_state();
        format!(
            "ManualExecutor now: {:?} pending: {} shutting down: {}",
            state.now,
            state.pending.len(),
            self.shutting_down.load(Ordering::SeqCst)
        )
    }
}
