use crate::runtime::telemetry;
use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SERVER_SELECTION_TIMEOUT_SECS: u64 = 10;
const DEFAULT_APP_NAME: &str = "cursorfetch";

/// Runtime configuration for [`crate::TokioTaskExecutor`] and [`crate::MongoTransport`].
///
/// All instances must be constructed via [`ExecutorConfig::builder`] or [`ExecutorConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    command_timeout: Duration,
    metrics_interval: Duration,
    app_name: String,
    server_selection_timeout: Duration,
}

pub struct ExecutorConfigParams {
    pub command_timeout: Duration,
    pub metrics_interval: Duration,
    pub app_name: String,
    pub server_selection_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
            app_name: DEFAULT_APP_NAME.to_owned(),
            server_selection_timeout: Duration::from_secs(DEFAULT_SERVER_SELECTION_TIMEOUT_SECS),
        }
    }
}

impl ExecutorConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: ExecutorConfigParams) -> Result<Self> {
        let ExecutorConfigParams {
            command_timeout,
            metrics_interval,
            app_name,
            server_selection_timeout,
        } = params;

        let config = Self {
            command_timeout,
            metrics_interval,
            app_name: app_name.trim().to_owned(),
            server_selection_timeout,
        };

        config.validate()?;
        Ok(config)
    }

    /// Timeout applied to commands that do not carry their own.
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Interval used by the metrics reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Application name reported to servers by the driver transport.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// How long the driver transport waits for a target to become selectable.
    pub fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout.is_zero() {
            bail!("command_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.app_name.trim().is_empty() {
            bail!("app_name cannot be empty");
        }

        if self.server_selection_timeout.is_zero() {
            bail!("server_selection_timeout must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ExecutorConfigBuilder {
    command_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    app_name: Option<String>,
    server_selection_timeout: Option<Duration>,
}

impl ExecutorConfigBuilder {
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<ExecutorConfig> {
        let defaults = ExecutorConfig::default();
        let params = ExecutorConfigParams {
            command_timeout: self.command_timeout.unwrap_or(defaults.command_timeout),
            metrics_interval: self.metrics_interval.unwrap_or(defaults.metrics_interval),
            app_name: self.app_name.unwrap_or(defaults.app_name),
            server_selection_timeout: self
                .server_selection_timeout
                .unwrap_or(defaults.server_selection_timeout),
        };

        ExecutorConfig::new(params)
    }
}
