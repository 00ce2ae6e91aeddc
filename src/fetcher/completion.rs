use super::state::{FetchState, Phase};
use super::{FetchResult, FetcherInner};
use crate::cursor::{parse_cursor_response, BatchField, Decision, FetchOutcome, NextAction};
use crate::error::{command_status, FetchError};
use crate::executor::{CommandCompletion, RemoteCommandRequest, RemoteCommandResponse};
use mongodb::bson::Document;
use std::sync::{Arc, PoisonError};

impl FetcherInner {
    pub(super) fn schedule(self: &Arc<Self>) -> Result<(), FetchError> {
        let mut state = self.lock_state();
        match state.phase {
            Phase::Idle => {}
            Phase::Scheduled { .. } | Phase::Finishing => {
                return Err(FetchError::illegal_operation(format!(
                    "fetcher for {} is already scheduled",
                    self.target
                )));
            }
            Phase::Done => {
                return Err(FetchError::illegal_operation(format!(
                    "fetcher for {} has already finished and cannot be scheduled again",
                    self.target
                )));
            }
        }
        if self.executor.is_shutting_down() {
            return Err(self.shutdown_error());
        }

        self.schedule_locked(&mut state, self.command.clone(), BatchField::First)?;
        self.active_tx.send_replace(true);
        Ok(())
    }

    /// Hands `command` to the executor and records the handle. The state lock
    /// must be held so that a concurrent `cancel` sees the new handle.
    fn schedule_locked(
        self: &Arc<Self>,
        state: &mut FetchState,
        command: Document,
        batch_field: BatchField,
    ) -> Result<(), FetchError> {
        let mut request = RemoteCommandRequest::new(self.target.clone(), self.db_name.clone(), command);
        request.timeout = self.timeout;

        let weak = Arc::downgrade(self);
        let handle = self.executor.schedule_remote_command(
            request,
            Box::new(move |completion| match weak.upgrade() {
                Some(inner) => inner.handle_completion(batch_field, completion),
                None => tracing::debug!("fetcher released before its command completed"),
            }),
        )?;

        tracing::debug!(
            %handle,
            host = %self.target,
            database = %self.db_name,
            batch_field = batch_field.name(),
            "fetcher command scheduled"
        );
        state.phase = Phase::Scheduled {
            handle,
            batch_field,
        };
        Ok(())
    }

    fn handle_completion(self: &Arc<Self>, batch_field: BatchField, completion: CommandCompletion) {
        let lifecycle = {
            let mut state = self.lock_state();
            if !matches!(state.phase, Phase::Scheduled { .. }) {
                tracing::warn!(phase = %state.phase, "ignoring completion for a fetcher that is not scheduled");
                return;
            }
            state.phase = Phase::Finishing;

            // Shutdown and cancellation win over any payload that raced in.
            if self.executor.is_shutting_down() || matches!(completion, CommandCompletion::Shutdown) {
                Some(self.shutdown_error())
            } else if state.cancel_requested || matches!(completion, CommandCompletion::Canceled) {
                Some(self.canceled_error())
            } else {
                None
            }
        };

        let result = match (lifecycle, completion) {
            (Some(err), _) => Err(err),
            (None, CommandCompletion::Response(Ok(response))) => {
                self.decode(&response, batch_field)
            }
            (None, CommandCompletion::Response(Err(err))) => Err(err),
            (None, CommandCompletion::Canceled) => Err(self.canceled_error()),
            (None, CommandCompletion::Shutdown) => Err(self.shutdown_error()),
        };

        self.deliver(result);
    }

    fn decode(&self, response: &RemoteCommandResponse, batch_field: BatchField) -> FetchResult {
        command_status(&response.data)?;
        let batch = parse_cursor_response(&response.data, batch_field)?;
        self.lock_state().batches += 1;
        tracing::debug!(
            host = %self.target,
            cursor_id = batch.cursor_id,
            namespace = %batch.namespace,
            documents = batch.documents.len(),
            elapsed_ms = response.elapsed.as_millis() as u64,
            "received cursor batch"
        );
        Ok(batch)
    }

    /// Runs the callback on `result` and acts on its decision.
    fn deliver(self: &Arc<Self>, result: FetchResult) {
        let exhausted = matches!(&result, Ok(batch) if batch.is_exhausted());
        let failure = result.as_ref().err().cloned();

        let decision = self.invoke_callback(result);

        if let Some(err) = failure {
            self.finish(FetchOutcome::Failed(err));
            return;
        }
        if exhausted {
            if decision.action == NextAction::GetMore {
                tracing::debug!(host = %self.target, "cursor exhausted; ignoring getMore request");
            }
            self.finish(FetchOutcome::Exhausted);
            return;
        }

        match decision {
            Decision {
                action: NextAction::NoAction,
                ..
            } => self.finish(FetchOutcome::Stopped),
            Decision {
                action: NextAction::GetMore,
                continuation: Some(command),
            } if !command.is_empty() => self.continue_with(command),
            Decision {
                action: NextAction::GetMore,
                ..
            } => {
                tracing::warn!(host = %self.target, "getMore requested without a continuation command");
                self.finish(FetchOutcome::NoContinuation);
            }
            Decision {
                action: NextAction::ExhaustContinue,
                ..
            } => {
                tracing::warn!(host = %self.target, "exhaust cursors are not supported; stopping");
                self.finish(FetchOutcome::NoContinuation);
            }
            Decision {
                action: NextAction::Invalid,
                ..
            } => self.finish(FetchOutcome::NoContinuation),
        }
    }

    fn continue_with(self: &Arc<Self>, command: Document) {
        let scheduled = {
            let mut state = self.lock_state();
            if state.discarded {
                drop(state);
                self.finish(FetchOutcome::NoContinuation);
                return;
            }
            if state.cancel_requested {
                Err(self.canceled_error())
            } else {
                self.schedule_locked(&mut state, command, BatchField::Next)
            }
        };

        if let Err(err) = scheduled {
            tracing::warn!(host = %self.target, error = %err, "failed to schedule continuation");
            self.invoke_callback(Err(err.clone()));
            self.finish(FetchOutcome::Failed(err));
        }
    }

    fn invoke_callback(&self, result: FetchResult) -> Decision {
        let mut callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if self.lock_state().discarded {
            tracing::debug!(host = %self.target, "fetcher released; skipping callback");
            return Decision::default();
        }
        (*callback)(result)
    }

    fn finish(&self, outcome: FetchOutcome) {
        {
            let mut state = self.lock_state();
            match &outcome {
                FetchOutcome::Failed(err) => tracing::info!(
                    host = %self.target,
                    database = %self.db_name,
                    batches = state.batches,
                    error = %err,
                    "fetcher finished with error"
                ),
                other => tracing::debug!(
                    host = %self.target,
                    database = %self.db_name,
                    batches = state.batches,
                    outcome = ?other,
                    "fetcher finished"
                ),
            }
            state.phase = Phase::Done;
            state.outcome = Some(outcome);
        }
        self.finished.notify_all();
        self.active_tx.send_replace(false);
    }

    fn canceled_error(&self) -> FetchError {
        FetchError::callback_canceled(format!(
            "fetcher for {} was cancelled",
            self.target
        ))
    }

    fn shutdown_error(&self) -> FetchError {
        FetchError::shutdown_in_progress(format!(
            "executor is shutting down; fetcher for {} cannot continue",
            self.target
        ))
    }
}
