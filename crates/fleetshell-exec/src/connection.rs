//! Connection lifecycle: dial with retry, liveness probing, reuse, close

use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ExecutorConfig;
use crate::error::{AuthError, ExecError, TransportError};
use crate::keys::CredentialResolver;
use crate::transport::{Connection, DialParams, Transport};

/// Owns at most one live connection produced by `T`
///
/// Liveness is never cached: every use re-probes the handle, since the
/// transport can die silently (partition, idle timeout).
pub struct ConnectionManager<T: Transport> {
    transport: T,
    resolver: CredentialResolver,
    connection: Option<T::Connection>,
}

impl<T: Transport> std::fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("resolver", &self.resolver)
            .field("has_connection", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager with no connection
    pub fn new(transport: T, resolver: CredentialResolver) -> Self {
        Self {
            transport,
            resolver,
            connection: None,
        }
    }

    /// The transport used for dialing
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether a handle is held, without probing it
    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Reuse the current connection if it answers a probe, otherwise dial anew
    ///
    /// # Errors
    /// Returns `ExecError::Auth` if credentials cannot be resolved or are
    /// refused, or `ExecError::Connect` once the retry budget is spent
    #[instrument(skip_all, fields(host = %config.host))]
    pub async fn ensure_connected(
        &mut self,
        config: &ExecutorConfig,
    ) -> Result<&mut T::Connection, ExecError> {
        let alive = match self.connection.as_mut() {
            Some(conn) => match conn.probe().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "liveness probe failed, reconnecting");
                    false
                }
            },
            None => false,
        };

        if alive {
            debug!("reusing live connection");
        } else {
            self.discard().await;
            let conn = dial(&self.transport, &self.resolver, config).await?;
            self.connection = Some(conn);
        }

        self.connection
            .as_mut()
            .ok_or_else(|| ExecError::NotConnected {
                host: config.host.clone(),
            })
    }

    /// Probe the current connection; `false` when absent or dead
    pub async fn is_connected(&mut self) -> bool {
        match self.connection.as_mut() {
            Some(conn) => conn.probe().await.is_ok(),
            None => false,
        }
    }

    /// Release the connection if one is held
    ///
    /// The handle is dropped even if the disconnect message fails.
    ///
    /// # Errors
    /// Returns `ExecError::Transport` if the disconnect could not be sent
    pub async fn close(&mut self, host: &str) -> Result<(), ExecError> {
        let Some(conn) = self.connection.take() else {
            return Ok(());
        };
        conn.close().await.map_err(|e| ExecError::Transport {
            host: host.to_string(),
            reason: e.to_string(),
        })
    }

    async fn discard(&mut self) {
        if let Some(stale) = self.connection.take() {
            if let Err(e) = stale.close().await {
                debug!(error = %e, "failed to close stale connection");
            }
        }
    }
}

/// Resolve credentials and dial, retrying with exponential backoff
///
/// Borrows only the transport and resolver, never the held connection, so the
/// connection type does not need to be `Sync`.
async fn dial<T: Transport>(
    transport: &T,
    resolver: &CredentialResolver,
    config: &ExecutorConfig,
) -> Result<T::Connection, ExecError> {
    let proofs = resolver.resolve(config).map_err(|source| ExecError::Auth {
        host: config.host.clone(),
        source,
    })?;

    let params = DialParams {
        host: config.host.clone(),
        port: config.port,
        username: config.username.clone(),
        proofs,
        connect_timeout: config.effective_connect_timeout(),
        host_key_policy: config.host_key_policy.clone(),
    };

    let attempts = config.retry.attempts();
    let mut last_cause = String::new();

    for attempt in 1..=attempts {
        info!(
            host = %params.host,
            port = params.port,
            user = %params.username,
            attempt,
            "connecting to SSH"
        );

        match transport.dial(&params).await {
            Ok(conn) => return Ok(conn),
            Err(TransportError::AuthRejected { username }) => {
                error!(host = %params.host, user = %username, "authentication rejected");
                return Err(ExecError::Auth {
                    host: params.host,
                    source: AuthError::Rejected { username },
                });
            }
            Err(e) => {
                warn!(host = %params.host, attempt, error = %e, "dial attempt failed");
                last_cause = e.to_string();
            }
        }

        if attempt < attempts {
            let delay = config.retry.delay_after(attempt);
            debug!(delay = ?delay, "backing off before next dial");
            sleep(delay).await;
        }
    }

    error!(host = %params.host, attempts, cause = %last_cause, "giving up on connection");
    Err(ExecError::Connect {
        host: params.host,
        attempts,
        last_cause,
    })
}
