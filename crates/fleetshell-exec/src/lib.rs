//! fleetshell-exec: Remote command execution over SSH
//!
//! Provides an [`Executor`] that runs one command per session on a reusable,
//! liveness-checked SSH connection, with dial retry and command timeouts.

pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod keys;
pub mod result;
pub mod runner;
pub mod ssh;
pub mod traits;
pub mod transport;

pub use config::{
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, ExecutorConfig, HostKeyPolicy,
    HostKeyVerifier, RetryPolicy,
};
pub use error::{AuthError, ExecError, TransportError};
pub use executor::Executor;
pub use keys::{AuthProof, CredentialResolver};
pub use result::{CommandResult, STATUS_UNAVAILABLE};
pub use ssh::{KnownHostsVerifier, SshTransport};
pub use traits::{RemoteExecutor, SharedExecutor};
pub use transport::{Connection, DialParams, Session, SessionEvent, Transport};
