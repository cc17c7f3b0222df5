//! SSH transport using russh crate

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::{PrivateKeyWithHashAlg, check_known_hosts, ssh_key};
use russh::{ChannelMsg, Disconnect, Sig, client};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::{HostKeyPolicy, HostKeyVerifier};
use crate::error::TransportError;
use crate::keys::AuthProof;
use crate::transport::{Connection, DialParams, Session, SessionEvent, Transport};

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let accepted = self.policy.check(&self.host, self.port, server_public_key);
        if !accepted {
            warn!(host = %self.host, port = self.port, "host key rejected");
        }
        Ok(accepted)
    }
}

/// Checks host keys against the current user's `known_hosts` file
#[derive(Debug, Clone, Copy, Default)]
pub struct KnownHostsVerifier;

impl HostKeyVerifier for KnownHostsVerifier {
    fn verify(&self, host: &str, port: u16, key: &ssh_key::PublicKey) -> bool {
        match check_known_hosts(host, port, key) {
            Ok(known) => known,
            Err(e) => {
                warn!(host = %host, port, error = %e, "known_hosts check failed");
                false
            }
        }
    }
}

/// Production [`Transport`] backed by russh
#[derive(Debug, Clone)]
pub struct SshTransport {
    config: Arc<client::Config>,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SshTransport {
    /// Create a transport with russh's default client configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(client::Config::default())
    }

    /// Create a transport with a custom russh client configuration
    #[must_use]
    pub fn with_config(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    type Connection = SshConnection;

    #[instrument(skip(self, params), fields(host = %params.host, port = params.port))]
    async fn dial(&self, params: &DialParams) -> Result<SshConnection, TransportError> {
        let handler = SshClientHandler {
            host: params.host.clone(),
            port: params.port,
            policy: params.host_key_policy.clone(),
        };

        let establish = async {
            let mut handle = client::connect(
                Arc::clone(&self.config),
                (&params.host[..], params.port),
                handler,
            )
            .await?;
            authenticate(&mut handle, &params.username, &params.proofs).await?;
            Ok::<_, TransportError>(handle)
        };

        let handle = timeout(params.connect_timeout, establish)
            .await
            .map_err(|_| TransportError::TimedOut(params.connect_timeout))??;

        info!(host = %params.host, port = params.port, user = %params.username, "SSH connected and authenticated");

        Ok(SshConnection {
            host: params.host.clone(),
            handle,
            probe_timeout: params.connect_timeout,
        })
    }
}

/// Offer each proof in turn until the server accepts one
async fn authenticate(
    handle: &mut client::Handle<SshClientHandler>,
    username: &str,
    proofs: &[AuthProof],
) -> Result<(), TransportError> {
    for proof in proofs {
        let result = match proof {
            AuthProof::Password(password) => {
                handle
                    .authenticate_password(username, password.as_str())
                    .await?
            }
            AuthProof::PublicKey(key) => {
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                handle
                    .authenticate_publickey(
                        username,
                        PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                    )
                    .await?
            }
        };

        if result.success() {
            debug!(user = %username, method = proof.method(), "authenticated");
            return Ok(());
        }
        debug!(user = %username, method = proof.method(), "authentication method rejected");
    }

    Err(TransportError::AuthRejected {
        username: username.to_string(),
    })
}

/// Authenticated russh connection
pub struct SshConnection {
    host: String,
    handle: client::Handle<SshClientHandler>,
    /// Bound on one keepalive round trip
    probe_timeout: Duration,
}

impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection")
            .field("host", &self.host)
            .field("closed", &self.handle.is_closed())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for SshConnection {
    type Session = SshSession;

    /// One `keepalive@openssh.com` round trip, bounded by the connect timeout
    async fn probe(&mut self) -> Result<(), TransportError> {
        if self.handle.is_closed() {
            return Err(TransportError::Closed);
        }
        timeout(self.probe_timeout, self.handle.send_ping())
            .await
            .map_err(|_| TransportError::TimedOut(self.probe_timeout))??;
        // send_ping also returns Ok when the session task exits before the reply
        if self.handle.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn open_session(&mut self) -> Result<SshSession, TransportError> {
        let channel = self.handle.channel_open_session().await?;
        Ok(SshSession { channel })
    }

    async fn close(self) -> Result<(), TransportError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await?;
        info!(host = %self.host, "SSH disconnected");
        Ok(())
    }
}

/// One russh session channel
pub struct SshSession {
    channel: russh::Channel<client::Msg>,
}

#[async_trait]
impl Session for SshSession {
    async fn exec(&mut self, command: &str) -> Result<(), TransportError> {
        self.channel.exec(true, command).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let event = match self.channel.wait().await? {
                ChannelMsg::Data { data } => SessionEvent::Stdout(data.to_vec()),
                // ext 1 is SSH_EXTENDED_DATA_STDERR
                ChannelMsg::ExtendedData { data, ext: 1 } => SessionEvent::Stderr(data.to_vec()),
                ChannelMsg::ExitStatus { exit_status } => SessionEvent::ExitStatus(exit_status),
                ChannelMsg::ExitSignal {
                    signal_name,
                    error_message,
                    ..
                } => SessionEvent::ExitSignal {
                    signal: signal_label(&signal_name),
                    message: error_message,
                },
                ChannelMsg::Eof => SessionEvent::Eof,
                ChannelMsg::Close => SessionEvent::Closed,
                _ => continue,
            };
            return Some(event);
        }
    }

    async fn terminate(&mut self) -> Result<(), TransportError> {
        self.channel.close().await?;
        Ok(())
    }
}

fn signal_label(sig: &Sig) -> String {
    match sig {
        Sig::Custom(name) => name.clone(),
        other => format!("{other:?}"),
    }
}
