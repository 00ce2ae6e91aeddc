use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{
        find_command, first_batch_reply, follow_cursor, init_tracing, next_batch_reply, target,
        CallbackLog,
    },
    scripted::{ScriptedTransport, Step},
};
use anyhow::Result;
use cursorfetch::{
    collect_documents, ErrorCode, ExecutorConfig, FetchOutcome, Fetcher, TaskExecutor,
    TokioTaskExecutor,
};
use mongodb::bson::doc;
use tokio::time::timeout;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

fn executor_with(
    transport: &ScriptedTransport,
    config: ExecutorConfig,
) -> Result<Arc<TokioTaskExecutor>> {
    init_tracing();
    let executor = TokioTaskExecutor::new(config, Arc::new(transport.clone()))?;
    Ok(Arc::new(executor))
}

fn recording_fetcher(executor: &Arc<TokioTaskExecutor>, log: &CallbackLog) -> Result<Fetcher> {
    let recorder = log.clone();
    Fetcher::new(
        executor.clone(),
        target(),
        "db",
        find_command(),
        move |result| {
            recorder.record(&result);
            follow_cursor(&result)
        },
    )
}

#[tokio::test]
async fn collect_documents_follows_cursor_to_exhaustion() -> Result<()> {
    let transport = ScriptedTransport::new([
        Step::Reply(first_batch_reply(7, vec![doc! { "_id": 1 }])),
        Step::ReplyAfter(
            Duration::from_millis(5),
            next_batch_reply(7, vec![doc! { "_id": 2 }, doc! { "_id": 3 }]),
        ),
        Step::Reply(next_batch_reply(0, vec![doc! { "_id": 4 }])),
    ]);
    let executor = executor_with(&transport, ExecutorConfig::default())?;

    let documents = timeout(
        JOIN_TIMEOUT,
        collect_documents(executor.clone(), target(), "db", find_command()),
    )
    .await?
    .expect("collection should succeed");

    let ids: Vec<i32> = documents
        .iter()
        .map(|document| document.get_i32("_id").expect("_id"))
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].command, find_command());
    assert_eq!(
        requests[2].command,
        doc! { "getMore": 7_i64, "collection": "coll" }
    );

    let metrics = executor.metrics();
    assert_eq!(metrics.scheduled, 3);
    assert_eq!(metrics.responses, 3);
    assert_eq!(metrics.in_flight(), 0);

    executor.shutdown();
    timeout(JOIN_TIMEOUT, executor.join()).await?;
    Ok(())
}

#[tokio::test]
async fn collect_documents_returns_remote_failure() -> Result<()> {
    let transport = ScriptedTransport::new([Step::Reply(
        doc! { "ok": 0, "errmsg": "bad hint", "code": 2 },
    )]);
    let executor = executor_with(&transport, ExecutorConfig::default())?;

    let err = collect_documents(executor.clone(), target(), "db", find_command())
        .await
        .expect_err("remote failure should surface");
    assert_eq!(err.code(), ErrorCode::BadValue);
    assert_eq!(err.reason(), "bad hint");
    Ok(())
}

#[tokio::test]
async fn transport_error_reaches_callback() -> Result<()> {
    let transport =
        ScriptedTransport::new([Step::Fail(ErrorCode::HostUnreachable, "connection refused")]);
    let executor = executor_with(&transport, ExecutorConfig::default())?;
    let log = CallbackLog::default();
    let fetcher = recording_fetcher(&executor, &log)?;

    fetcher.schedule()?;
    timeout(JOIN_TIMEOUT, fetcher.join()).await?;

    assert_eq!(log.len(), 1);
    assert_eq!(log.last_error().code(), ErrorCode::HostUnreachable);
    assert_eq!(executor.metrics().failures, 1);
    Ok(())
}

#[tokio::test]
async fn cancel_interrupts_outstanding_command() -> Result<()> {
    let transport = ScriptedTransport::new([Step::Hang]);
    let executor = executor_with(&transport, ExecutorConfig::default())?;
    let log = CallbackLog::default();
    let fetcher = recording_fetcher(&executor, &log)?;

    fetcher.schedule()?;
    timeout(JOIN_TIMEOUT, transport.command_started()).await?;
    assert!(fetcher.is_active());

    fetcher.cancel();
    fetcher.cancel();
    timeout(JOIN_TIMEOUT, fetcher.join()).await?;

    assert!(!fetcher.is_active());
    assert_eq!(log.len(), 1);
    assert_eq!(log.last_error().code(), ErrorCode::CallbackCanceled);
    assert_eq!(executor.metrics().canceled, 1);
    Ok(())
}

#[tokio::test]
async fn executor_shutdown_completes_outstanding_command() -> Result<()> {
    let transport = ScriptedTransport::new([Step::Hang]);
    let executor = executor_with(&transport, ExecutorConfig::default())?;
    let log = CallbackLog::default();
    let fetcher = recording_fetcher(&executor, &log)?;

    fetcher.schedule()?;
    timeout(JOIN_TIMEOUT, transport.command_started()).await?;

    executor.shutdown();
    timeout(JOIN_TIMEOUT, fetcher.join()).await?;
    timeout(JOIN_TIMEOUT, executor.join()).await?;

    assert_eq!(log.last_error().code(), ErrorCode::ShutdownInProgress);
    assert!(executor.is_shutting_down());

    let late = recording_fetcher(&executor, &log)?;
    let err = late.schedule().expect_err("schedule after shutdown must fail");
    assert_eq!(err.code(), ErrorCode::ShutdownInProgress);
    assert!(!late.is_active());
    Ok(())
}

#[tokio::test]
async fn command_timeout_is_reported_as_network_timeout() -> Result<()> {
    let transport = ScriptedTransport::new([Step::Hang]);
    let config = ExecutorConfig::builder()
        .command_timeout(Duration::from_millis(30))
        .build()?;
    let executor = executor_with(&transport, config)?;
    let log = CallbackLog::default();
    let fetcher = recording_fetcher(&executor, &log)?;

    fetcher.schedule()?;
    timeout(JOIN_TIMEOUT, fetcher.join()).await?;

    assert_eq!(log.last_error().code(), ErrorCode::NetworkTimeout);
    assert!(matches!(fetcher.outcome(), Some(FetchOutcome::Failed(_))));
    assert_eq!(executor.metrics().timeouts, 1);
    Ok(())
}

#[test]
fn executor_requires_a_runtime() {
    let transport = ScriptedTransport::new(Vec::new());
    let err = match TokioTaskExecutor::new(ExecutorConfig::default(), Arc::new(transport)) {
        Ok(_) => panic!("executor should not build outside a runtime"),
        Err(err) => err,
    };
    assert!(format!("{err:#}").contains("tokio runtime"));
}
