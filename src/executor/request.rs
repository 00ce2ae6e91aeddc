use crate::error::FetchError;
use anyhow::{bail, Context, Result};
use mongodb::bson::Document;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 27017;

/// Network address of the peer a command is sent to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAndPort {
    host: String,
    port: u16,
}

impl HostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for HostAndPort {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        let (host, port) = match value.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .with_context(|| format!("invalid port in host address {value:?}"))?;
                (host, port)
            }
            None => (value, DEFAULT_PORT),
        };
        if host.is_empty() {
            bail!("host address {value:?} has an empty host name");
        }
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One command addressed to a database on a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCommandRequest {
    pub target: HostAndPort,
    pub db_name: String,
    pub command: Document,
    /// Overrides the executor's default command timeout when set.
    pub timeout: Option<Duration>,
}

impl RemoteCommandRequest {
    pub fn new(target: HostAndPort, db_name: impl Into<String>, command: Document) -> Self {
        Self {
            target,
            db_name: db_name.into(),
            command,
            timeout: None,
        }
    }

    /// Name of the command, i.e. the first key of the command document.
    pub fn command_name(&self) -> Option<&str> {
        self.command.keys().next().map(String::as_str)
    }
}

/// Raw reply to a [`RemoteCommandRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCommandResponse {
    pub data: Document,
    pub elapsed: Duration,
}

impl RemoteCommandResponse {
    pub fn new(data: Document, elapsed: Duration) -> Self {
        Self { data, elapsed }
    }
}

/// The single notification every scheduled command eventually receives.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandCompletion {
    /// The peer answered, or the transport failed.
    Response(Result<RemoteCommandResponse, FetchError>),
    /// The command was cancelled through [`super::TaskExecutor::cancel`].
    Canceled,
    /// The executor shut down before the command completed.
    Shutdown,
}

/// Identifies a scheduled command for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackHandle(u64);

impl CallbackHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
