//! Remote command executor
//!
//! One [`Executor`] is bound to one host and credential set. The connection is
//! opened lazily, re-verified before every command and reused until
//! [`Executor::close`].

use std::time::{Duration, Instant};

use tracing::{info, instrument};

use crate::config::{ExecutorConfig, normalize_command_timeout};
use crate::connection::ConnectionManager;
use crate::error::ExecError;
use crate::keys::CredentialResolver;
use crate::result::CommandResult;
use crate::runner;
use crate::ssh::SshTransport;
use crate::transport::Transport;

/// SSH command executor
///
/// Operations take `&mut self`, so one instance serves one caller at a time.
/// Wrap it in [`SharedExecutor`](crate::traits::SharedExecutor) to share it.
pub struct Executor<T: Transport = SshTransport> {
    config: ExecutorConfig,
    connections: ConnectionManager<T>,
}

impl<T: Transport> std::fmt::Debug for Executor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("connections", &self.connections)
            .finish()
    }
}

impl Executor<SshTransport> {
    /// Create an executor that connects over SSH
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_transport(config, SshTransport::new())
    }
}

impl<T: Transport> Executor<T> {
    /// Create an executor over a custom transport
    pub fn with_transport(config: ExecutorConfig, transport: T) -> Self {
        Self::with_parts(config, transport, CredentialResolver::new())
    }

    /// Create an executor with a custom transport and credential resolver
    pub fn with_parts(config: ExecutorConfig, transport: T, resolver: CredentialResolver) -> Self {
        Self {
            config,
            connections: ConnectionManager::new(transport, resolver),
        }
    }

    /// Get connection config
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// The transport used for dialing
    pub fn transport(&self) -> &T {
        self.connections.transport()
    }

    /// Establish the connection now instead of on first command
    ///
    /// # Errors
    /// Returns `ExecError::Auth` or `ExecError::Connect` if no connection
    /// could be established
    pub async fn connect(&mut self) -> Result<(), ExecError> {
        self.connections.ensure_connected(&self.config).await?;
        Ok(())
    }

    /// Whether the connection answers a liveness probe
    pub async fn is_connected(&mut self) -> bool {
        self.connections.is_connected().await
    }

    /// Execute with the configured command timeout, or the default of 30s
    pub async fn execute(&mut self, command: &str) -> CommandResult {
        let timeout = self.config.effective_command_timeout();
        self.execute_with_timeout(command, timeout).await
    }

    /// Execute with an explicit timeout; zero means the default of 30s
    #[instrument(skip(self, command), fields(host = %self.config.host, port = self.config.port))]
    pub async fn execute_with_timeout(&mut self, command: &str, timeout: Duration) -> CommandResult {
        let start = Instant::now();
        let timeout = normalize_command_timeout(timeout);

        let conn = match self.connections.ensure_connected(&self.config).await {
            Ok(conn) => conn,
            Err(e) => return CommandResult::unavailable(e, start.elapsed()),
        };

        runner::run(conn, &self.config.host, command, timeout).await
    }

    /// Release the connection; safe to call repeatedly or before connecting
    ///
    /// # Errors
    /// Returns `ExecError::Transport` if the disconnect could not be sent. The
    /// connection is released regardless.
    pub async fn close(&mut self) -> Result<(), ExecError> {
        let had_connection = self.connections.has_connection();
        let result = self.connections.close(&self.config.host).await;
        if had_connection {
            info!(host = %self.config.host, "executor closed");
        }
        result
    }
}
