//! Executor that runs every command as a tokio task.
//!
//! Each command gets a child of the executor's root cancellation token, so
//! `cancel` and `shutdown` both reach in-flight commands. Completion handlers
//! run on the runtime's worker threads behind a single lock, which keeps them
//! serialized.

use super::metrics::{CommandMetrics, CommandMetricsSnapshot};
use super::request::{
    CallbackHandle, CommandCompletion, RemoteCommandRequest, RemoteCommandResponse,
};
use super::transport::{CommandTransport, MongoTransport};
use super::{CompletionHandler, TaskExecutor};
use crate::error::{ErrorCode, FetchError};
use crate::runtime::config::ExecutorConfig;
use crate::runtime::telemetry::spawn_metrics_reporter;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub struct TokioTaskExecutor {
    inner: Arc<SpawnedInner>,
}

struct SpawnedInner {
    config: ExecutorConfig,
    transport: Arc<dyn CommandTransport>,
    runtime: Handle,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    inflight: Mutex<HashMap<CallbackHandle, CancellationToken>>,
    next_id: AtomicU64,
    callback_lock: Mutex<()>,
    metrics: Arc<CommandMetrics>,
    reporter: Mutex<Option<JoinHandle<()>>>,
}

impl TokioTaskExecutor {
    /// Creates an executor bound to the current tokio runtime.
    pub fn new(config: ExecutorConfig, transport: Arc<dyn CommandTransport>) -> Result<Self> {
        config.validate()?;
        let runtime =
            Handle::try_current().context("TokioTaskExecutor must be created inside a tokio runtime")?;
        let shutdown = CancellationToken::new();
        let metrics = Arc::new(CommandMetrics::default());
        let reporter = spawn_metrics_reporter(
            metrics.clone(),
            shutdown.clone(),
            config.metrics_interval(),
            &runtime,
        );

        Ok(Self {
            inner: Arc::new(SpawnedInner {
                config,
                transport,
                runtime,
                shutdown,
                tracker: TaskTracker::new(),
                inflight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                callback_lock: Mutex::new(()),
                metrics,
                reporter: Mutex::new(Some(reporter)),
            }),
        })
    }

    /// Creates an executor that talks to servers through the `mongodb` driver.
    pub fn with_mongo_transport(config: ExecutorConfig) -> Result<Self> {
        let transport = Arc::new(MongoTransport::new(config.clone()));
        Self::new(config, transport)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> CommandMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Starts shutdown: refuses new commands and completes in-flight ones with
    /// [`CommandCompletion::Shutdown`].
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        tracing::info!(
            in_flight = self.inner.lock_inflight().len(),
            "command executor shutting down"
        );
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
    }

    /// Waits for every command task and the metrics reporter to finish.
    /// Only returns after [`Self::shutdown`] was called.
    pub async fn join(&self) {
        self.inner.shutdown.cancelled().await;
        self.inner.tracker.wait().await;

        let reporter = self
            .inner
            .reporter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = reporter {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }
    }
}

impl SpawnedInner {
    async fn run_command(
        self: Arc<Self>,
        handle: CallbackHandle,
        request: RemoteCommandRequest,
        token: CancellationToken,
        on_completion: CompletionHandler,
    ) {
        let timeout = request
            .timeout
            .unwrap_or_else(|| self.config.command_timeout());
        let started = Instant::now();

        let completion = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => CommandCompletion::Shutdown,
            _ = token.cancelled() => CommandCompletion::Canceled,
            result = time::timeout(timeout, self.transport.run_command(&request)) => {
                match result {
                    Ok(reply) => CommandCompletion::Response(
                        reply.map(|data| RemoteCommandResponse::new(data, started.elapsed())),
                    ),
                    Err(_) => CommandCompletion::Response(Err(timeout_error(&request, timeout))),
                }
            }
        };

        self.lock_inflight().remove(&handle);
        self.record(&completion, started.elapsed());
        tracing::trace!(%handle, host = %request.target, "command completed");

        let _serialized = self
            .callback_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        on_completion(completion);
    }

    fn record(&self, completion: &CommandCompletion, elapsed: Duration) {
        match completion {
            CommandCompletion::Response(Ok(_)) => self.metrics.record_response(elapsed),
            CommandCompletion::Response(Err(err)) if err.code() == ErrorCode::NetworkTimeout => {
                self.metrics.record_timeout(elapsed)
            }
            CommandCompletion::Response(Err(_)) => self.metrics.record_failure(elapsed),
            CommandCompletion::Canceled => self.metrics.record_canceled(),
            CommandCompletion::Shutdown => self.metrics.record_shutdown(),
        }
    }

    fn lock_inflight(&self) -> MutexGuard<'_, HashMap<CallbackHandle, CancellationToken>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn timeout_error(request: &RemoteCommandRequest, timeout: Duration) -> FetchError {
    FetchError::new(
        ErrorCode::NetworkTimeout,
        format!(
            "command {:?} on {} timed out after {:?}",
            request.command_name().unwrap_or_default(),
            request.target,
            timeout
        ),
    )
}

impl TaskExecutor for TokioTaskExecutor {
    fn schedule_remote_command(
        &self,
        request: RemoteCommandRequest,
        on_completion: CompletionHandler,
    ) -> Result<CallbackHandle, FetchError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(FetchError::shutdown_in_progress(
                "command executor is shutting down",
            ));
        }

        let handle = CallbackHandle::new(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let token = self.inner.shutdown.child_token();
        self.inner.lock_inflight().insert(handle, token.clone());
        self.inner.metrics.record_scheduled();

        tracing::debug!(
            %handle,
            host = %request.target,
            database = %request.db_name,
            command = request.command_name().unwrap_or_default(),
            "scheduling remote command"
        );

        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn_on(
            inner.run_command(handle, request, token, on_completion),
            &self.inner.runtime,
        );
        Ok(handle)
    }

    fn cancel(&self, handle: CallbackHandle) {
        if let Some(token) = self.inner.lock_inflight().get(&handle) {
            tracing::debug!(%handle, "cancelling remote command");
            token.cancel();
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn diagnostic_string(&self) -> String {
        format!(
            "TokioTaskExecutor in flight: {} shutting down: {}",
            self.inner.lock_inflight().len(),
            self.inner.shutdown.is_cancelled()
        )
    }
}

impl Drop for TokioTaskExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
