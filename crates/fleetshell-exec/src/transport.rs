//! Transport abstraction between the executor and the SSH library
//!
//! [`Transport`] dials connections, a [`Connection`] is probed and opens
//! sessions, a [`Session`] runs one command and streams its events.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::HostKeyPolicy;
use crate::error::TransportError;
use crate::keys::AuthProof;

/// Everything needed to establish one authenticated connection
#[derive(Debug, Clone)]
pub struct DialParams {
    /// Host address
    pub host: String,
    /// Port
    pub port: u16,
    /// Login name
    pub username: String,
    /// Proofs to offer, in order
    pub proofs: Vec<AuthProof>,
    /// Bound on connect, handshake and authentication
    pub connect_timeout: Duration,
    /// Host identity policy
    pub host_key_policy: HostKeyPolicy,
}

/// Event produced by a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Bytes written to standard output
    Stdout(Vec<u8>),
    /// Bytes written to standard error
    Stderr(Vec<u8>),
    /// Process exit status
    ExitStatus(u32),
    /// Process was killed by a signal
    ExitSignal {
        /// Signal name without the `SIG` prefix
        signal: String,
        /// Optional message from the server
        message: String,
    },
    /// No more output will follow
    Eof,
    /// The channel is closed
    Closed,
}

/// Establishes connections
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connection type produced by [`Transport::dial`]
    type Connection: Connection;

    /// Connect and authenticate once, without retrying
    async fn dial(&self, params: &DialParams) -> Result<Self::Connection, TransportError>;
}

/// One authenticated connection to a host
#[async_trait]
pub trait Connection: Send {
    /// Session type opened on this connection
    type Session: Session + 'static;

    /// Lightweight no-op round trip over the open connection
    async fn probe(&mut self) -> Result<(), TransportError>;

    /// Open a new session channel
    async fn open_session(&mut self) -> Result<Self::Session, TransportError>;

    /// Release the connection
    async fn close(self) -> Result<(), TransportError>;
}

/// One command-execution channel
#[async_trait]
pub trait Session: Send {
    /// Start `command` without waiting for it to finish
    async fn exec(&mut self, command: &str) -> Result<(), TransportError>;

    /// Next event, `None` once the channel is gone
    async fn next_event(&mut self) -> Option<SessionEvent>;

    /// Forcibly tear down the session
    async fn terminate(&mut self) -> Result<(), TransportError>;
}
