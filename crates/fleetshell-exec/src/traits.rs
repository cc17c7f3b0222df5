//! Remote executor trait

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::ExecError;
use crate::executor::Executor;
use crate::result::CommandResult;
use crate::ssh::SshTransport;
use crate::transport::Transport;

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, cmd: &str) -> CommandResult;
    async fn run_with_timeout(&self, cmd: &str, timeout: Duration) -> CommandResult;
    async fn is_connected(&self) -> bool;
    async fn close(&self) -> Result<(), ExecError>;
    fn executor_type(&self) -> &'static str;
}

/// [`Executor`] behind a mutex, usable from several tasks at once
///
/// Calls are serialized in the order they acquire the lock, so concurrent
/// callers share one connection without racing its reconnects.
pub struct SharedExecutor<T: Transport = SshTransport> {
    host: String,
    inner: Mutex<Executor<T>>,
}

impl<T: Transport> std::fmt::Debug for SharedExecutor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedExecutor")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> SharedExecutor<T> {
    /// Wrap an executor
    pub fn new(executor: Executor<T>) -> Self {
        Self {
            host: executor.config().host.clone(),
            inner: Mutex::new(executor),
        }
    }

    /// Host this executor targets
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Unwrap the executor
    pub fn into_inner(self) -> Executor<T> {
        self.inner.into_inner()
    }
}

#[async_trait]
impl<T: Transport> RemoteExecutor for SharedExecutor<T> {
    async fn run(&self, cmd: &str) -> CommandResult {
        self.inner.lock().await.execute(cmd).await
    }

    async fn run_with_timeout(&self, cmd: &str, timeout: Duration) -> CommandResult {
        self.inner
            .lock()
            .await
            .execute_with_timeout(cmd, timeout)
            .await
    }

    async fn is_connected(&self) -> bool {
        self.inner.lock().await.is_connected().await
    }

    async fn close(&self) -> Result<(), ExecError> {
        self.inner.lock().await.close().await
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}
