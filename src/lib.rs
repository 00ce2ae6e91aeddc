pub mod cursor;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod runtime;

pub use cursor::{
    parse_cursor_response, BatchData, BatchField, CursorId, Decision, FetchOutcome, Namespace,
    NextAction, EXHAUSTED_CURSOR_ID,
};
pub use error::{command_status, ErrorCode, FetchError};
pub use executor::{
    CallbackHandle, CommandCompletion, CommandMetricsSnapshot, CommandTransport,
    CompletionHandler, HostAndPort, ManualExecutor, MongoTransport, ReadyRequest,
    RemoteCommandRequest, RemoteCommandResponse, TaskExecutor, TokioTaskExecutor,
};
pub use fetcher::{collect_documents, FetchResult, Fetcher, FetcherBuilder, FetcherCallback};
pub use runtime::config::{ExecutorConfig, ExecutorConfigBuilder, ExecutorConfigParams};
pub use runtime::telemetry::init_tracing;
