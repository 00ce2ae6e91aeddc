//! Transport abstraction used by [`super::TokioTaskExecutor`] and the
//! driver-backed implementation that talks to real servers.

use super::request::{HostAndPort, RemoteCommandRequest};
use crate::error::{ErrorCode, FetchError};
use crate::runtime::config::ExecutorConfig;
use futures::future::BoxFuture;
use mongodb::bson::Document;
use mongodb::error::{Error as DriverError, ErrorKind};
use mongodb::options::ClientOptions;
use mongodb::Client;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Sends one command and returns the raw reply document.
///
/// A reply with `ok: 0` may be returned either as a document or as an error
/// carrying the remote code; the fetcher handles both the same way.
pub trait CommandTransport: Send + Sync + 'static {
    fn run_command<'a>(
        &'a self,
        request: &'a RemoteCommandRequest,
    ) -> BoxFuture<'a, Result<Document, FetchError>>;
}

/// Runs commands through the `mongodb` driver using one direct connection
/// per target host.
pub struct MongoTransport {
    config: ExecutorConfig,
    clients: Mutex<HashMap<HostAndPort, Client>>,
}

impl MongoTransport {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client_for(&self, target: &HostAndPort) -> Result<Client, FetchError> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(target) {
            return Ok(client.clone());
        }

        let uri = format!("mongodb://{target}/?directConnection=true");
        let mut options = ClientOptions::parse(uri.as_str())
            .await
            .map_err(|err| FetchError::bad_value(format!("invalid target {target}: {err}")))?;
        options.app_name = Some(self.config.app_name().to_owned());
        options.server_selection_timeout = Some(self.config.server_selection_timeout());

        let client = Client::with_options(options).map_err(|err| map_driver_error(&err))?;
        tracing::debug!(%target, "created driver client");
        clients.insert(target.clone(), client.clone());
        Ok(client)
    }
}

impl CommandTransport for MongoTransport {
    fn run_command<'a>(
        &'a self,
        request: &'a RemoteCommandRequest,
    ) -> BoxFuture<'a, Result<Document, FetchError>> {
        Box::pin(async move {
            let client = self.client_for(&request.target).await?;
            client
                .database(&request.db_name)
                .run_command(request.command.clone(), None)
                .await
                .map_err(|err| map_driver_error(&err))
        })
    }
}

fn map_driver_error(err: &DriverError) -> FetchError {
    match err.kind.as_ref() {
        ErrorKind::Command(command_error) => FetchError::new(
            ErrorCode::from_code(command_error.code),
            command_error.message.clone(),
        ),
        ErrorKind::ServerSelection { message, .. } => {
            FetchError::new(ErrorCode::HostUnreachable, message.clone())
        }
        _ => FetchError::new(ErrorCode::HostUnreachable, err.to_string()),
    }
}
