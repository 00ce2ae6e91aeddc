use super::Fetcher;
use crate::cursor::{Decision, FetchOutcome};
use crate::error::FetchError;
use crate::executor::{HostAndPort, TaskExecutor};
use mongodb::bson::Document;
use std::sync::{Arc, Mutex, PoisonError};

/// Runs `command` and follows its cursor to exhaustion, returning every
/// document in server order.
///
/// Construction problems are reported as `BadValue`; any terminal status
/// delivered to the internal callback is returned as-is.
pub async fn collect_documents(
    executor: Arc<dyn TaskExecutor>,
    target: HostAndPort,
    db_name: impl Into<String>,
    command: Document,
) -> Result<Vec<Document>, FetchError> {
    let documents = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&documents);

    let fetcher = Fetcher::new(executor, target, db_name, command, move |result| match result {
        Ok(batch) => {
            let decision = Decision::get_more_for(&batch);
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(batch.documents);
            decision
        }
        Err(_) => Decision::stop(),
    })
    .map_err(|err| FetchError::bad_value(format!("{err:#}")))?;

    fetcher.schedule()?;
    fetcher.join().await;

    if let Some(FetchOutcome::Failed(err)) = fetcher.outcome() {
        return Err(err);
    }
    let collected = std::mem::take(&mut *documents.lock().unwrap_or_else(PoisonError::into_inner));
    Ok(collected)
}
