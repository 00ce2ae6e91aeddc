//! Executor capability consumed by the fetcher plus its implementations:
//! a tokio-backed executor driving a real transport and a manually clocked
//! executor for deterministic tests.

pub mod manual;
pub mod metrics;
pub mod request;
pub mod spawned;
pub mod transport;

pub use manual::{ManualExecutor, ReadyRequest};
pub use metrics::CommandMetricsSnapshot;
pub use request::{
    CallbackHandle, CommandCompletion, HostAndPort, RemoteCommandRequest, RemoteCommandResponse,
};
pub use spawned::TokioTaskExecutor;
pub use transport::{CommandTransport, MongoTransport};

use crate::error::FetchError;

/// Invoked exactly once per scheduled command, on the executor's context.
pub type CompletionHandler = Box<dyn FnOnce(CommandCompletion) + Send + 'static>;

/// Schedules remote commands and reports their completion.
///
/// Implementations must deliver exactly one [`CommandCompletion`] for every
/// handle they return, must serialize completion handlers, and must never run
/// a handler synchronously from within `schedule_remote_command` or `cancel`.
pub trait TaskExecutor: Send + Sync {
    fn schedule_remote_command(
        &self,
        request: RemoteCommandRequest,
        on_completion: CompletionHandler,
    ) -> Result<CallbackHandle, FetchError>;

    /// Best-effort, idempotent request to cancel a scheduled command.
    fn cancel(&self, handle: CallbackHandle);

    fn is_shutting_down(&self) -> bool;

    fn diagnostic_string(&self) -> String {
        String::from("task executor")
    }
}
