use super::{FetchResult, Fetcher, FetcherCallback, FetcherParts};
use crate::cursor::Decision;
use crate::executor::{HostAndPort, TaskExecutor};
use anyhow::{bail, Context, Result};
use mongodb::bson::Document;
use std::sync::Arc;
use std::time::Duration;

/// Collects and validates everything a [`Fetcher`] needs.
///
/// Missing or empty inputs are programming errors and are reported by
/// [`FetcherBuilder::build`]; they never surface through the callback.
#[derive(Default)]
pub struct FetcherBuilder {
    executor: Option<Arc<dyn TaskExecutor>>,
    target: Option<HostAndPort>,
    db_name: Option<String>,
    command: Option<Document>,
    timeout: Option<Duration>,
    callback: Option<FetcherCallback>,
}

impl FetcherBuilder {
    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn target(mut self, target: HostAndPort) -> Self {
        self.target = Some(target);
        self
    }

    pub fn database(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(db_name.into());
        self
    }

    /// Any cursor-producing command: `find`, `listIndexes`, `listCollections`, ...
    pub fn command(mut self, command: Document) -> Self {
        self.command = Some(command);
        self
    }

    /// Per-command timeout; the executor's default applies when unset.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(FetchResult) -> Decision + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> Result<Fetcher> {
        let executor = self.executor.context("executor is required")?;
        let target = self.target.context("target is required")?;
        let db_name = self.db_name.context("database name is required")?;
        if db_name.trim().is_empty() {
            bail!("database name cannot be empty");
        }
        let command = self.command.context("command object is required")?;
        if command.is_empty() {
            bail!("command object cannot be empty");
        }
        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            bail!("timeout must be greater than 0");
        }
        let callback = self.callback.context("callback is required")?;

        Ok(Fetcher::from_parts(FetcherParts {
            executor,
            target,
            db_name,
            command,
            timeout: self.timeout,
            callback,
        }))
    }
}
