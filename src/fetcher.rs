//! Drives one cursor-producing command and its continuations.
//!
//! A [`Fetcher`] sends the initial command through a [`TaskExecutor`], parses
//! every reply into a [`BatchData`], and hands it to the caller's callback.
//! The callback's [`Decision`] selects whether another batch is requested.
//! All phase transitions happen under a single lock so that cancellation,
//! executor shutdown and reply delivery race safely; the callback itself runs
//! without that lock held, on the executor's completion context.

mod builder;
mod collect;
mod completion;
mod state;

pub use builder::FetcherBuilder;
pub use collect::collect_documents;

use crate::cursor::{BatchData, Decision, FetchOutcome};
use crate::error::FetchError;
use crate::executor::{HostAndPort, TaskExecutor};
use mongodb::bson::Document;
use state::{FetchState, Phase};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// What the callback receives: a decoded batch or the terminal status.
pub type FetchResult = Result<BatchData, FetchError>;

pub type FetcherCallback = Box<dyn FnMut(FetchResult) -> Decision + Send + 'static>;

/// Handle to a cursor fetch. Dropping it while active cancels the outstanding
/// command; the callback is not invoked for completions that arrive afterwards.
pub struct Fetcher {
    inner: Arc<FetcherInner>,
}

struct FetcherInner {
    executor: Arc<dyn TaskExecutor>,
    target: HostAndPort,
    db_name: String,
    command: Document,
    timeout: Option<Duration>,
    state: Mutex<FetchState>,
    finished: Condvar,
    active_tx: watch::Sender<bool>,
    callback: Mutex<FetcherCallback>,
}

struct FetcherParts {
    executor: Arc<dyn TaskExecutor>,
    target: HostAndPort,
    db_name: String,
    command: Document,
    timeout: Option<Duration>,
    callback: FetcherCallback,
}

impl Fetcher {
    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::default()
    }

    /// Shorthand for the builder when no timeout override is needed.
    pub fn new<F>(
        executor: Arc<dyn TaskExecutor>,
        target: HostAndPort,
        db_name: impl Into<String>,
        command: Document,
        callback: F,
    ) -> anyhow::Result<Self>
    where
        F: FnMut(FetchResult) -> Decision + Send + 'static,
    {
        Self::builder()
            .executor(executor)
            .target(target)
            .database(db_name)
            .command(command)
            .callback(callback)
            .build()
    }

    fn from_parts(parts: FetcherParts) -> Self {
        let (active_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(FetcherInner {
                executor: parts.executor,
                target: parts.target,
                db_name: parts.db_name,
                command: parts.command,
                timeout: parts.timeout,
                state: Mutex::new(FetchState::new()),
                finished: Condvar::new(),
                active_tx,
                callback: Mutex::new(parts.callback),
            }),
        }
    }

    pub fn target(&self) -> &HostAndPort {
        &self.inner.target
    }

    pub fn db_name(&self) -> &str {
        &self.inner.db_name
    }

    pub fn command(&self) -> &Document {
        &self.inner.command
    }

    /// Sends the initial command. Never blocks and never invokes the callback.
    ///
    /// Fails with `IllegalOperation` when the fetcher is active or already
    /// finished, with `ShutdownInProgress` when the executor is shutting down,
    /// and with the executor's own error when it refuses the command. The
    /// fetcher stays idle on every failure.
    pub fn schedule(&self) -> Result<(), FetchError> {
        self.inner.schedule()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock_state().phase.is_active()
    }

    /// Requests cancellation of the outstanding command. A no-op unless active;
    /// repeated calls have no further effect.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Blocks the calling thread until the fetcher is no longer active.
    ///
    /// Must not be called from the executor's completion context, and should
    /// not be called from an async task; use [`Fetcher::join`] there.
    pub fn wait(&self) {
        let state = self.inner.lock_state();
        let _state = self
            .inner
            .finished
            .wait_while(state, |state| state.phase.is_active())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Async counterpart of [`Fetcher::wait`].
    pub async fn join(&self) {
        let mut active = self.inner.active_tx.subscribe();
        // The sender lives as long as `self`, so this only returns once inactive.
        let _ = active.wait_for(|active| !*active).await;
    }

    /// How the fetch ended, once it has.
    pub fn outcome(&self) -> Option<FetchOutcome> {
        self.inner.lock_state().outcome.clone()
    }

    /// Number of batches successfully decoded so far.
    pub fn batches_received(&self) -> u64 {
        self.inner.lock_state().batches
    }

    pub fn diagnostic_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let executor = self.inner.executor.diagnostic_string();
        let state = self.inner.lock_state();
        write!(
            f,
            "Fetcher executor: {executor} target: {} database: {} query: {} active: {} phase: {} batches: {}",
            self.inner.target,
            self.inner.db_name,
            self.inner.command,
            state.phase.is_active(),
            state.phase,
            state.batches,
        )?;
        if let Some(outcome) = &state.outcome {
            write!(f, " outcome: {outcome:?}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("Fetcher")
            .field("target", &self.inner.target)
            .field("db_name", &self.inner.db_name)
            .field("phase", &state.phase)
            .field("outcome", &state.outcome)
            .finish_non_exhaustive()
    }
}

impl Drop for Fetcher {
    fn drop(&mut self) {
        self.inner.discard();
    }
}

impl FetcherInner {
    fn lock_state(&self) -> MutexGuard<'_, FetchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel(&self) {
        let mut state = self.lock_state();
        if state.cancel_requested {
            return;
        }
        match state.phase {
            Phase::Idle | Phase::Done => {}
            Phase::Scheduled { handle, .. } => {
                state.cancel_requested = true;
                tracing::debug!(%handle, host = %self.target, "cancelling fetcher");
                self.executor.cancel(handle);
            }
            // The completion being processed observes the flag before continuing.
            Phase::Finishing => state.cancel_requested = true,
        }
    }

    fn discard(&self) {
        let mut state = self.lock_state();
        state.discarded = true;
        if state.phase.is_active() {
            tracing::debug!(host = %self.target, phase = %state.phase, "fetcher dropped while active");
        }
        if let Phase::Scheduled { handle, .. } = state.phase {
            if !state.cancel_requested {
                state.cancel_requested = true;
                self.executor.cancel(handle);
            }
        }
    }
}
