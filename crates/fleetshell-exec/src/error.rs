//! Error types for fleetshell-exec

use std::time::Duration;

use thiserror::Error;

/// Errors raised while turning configured secrets into authentication proofs,
/// or when the server refuses every proof offered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Neither a password nor a private key was configured
    #[error("no authentication method provided")]
    NoCredentials,

    /// The private key is protected by a passphrase, which is not supported
    #[error("private key {path} is encrypted, passphrase-protected keys are not supported")]
    EncryptedKey {
        /// Expanded key path
        path: String,
    },

    /// The private key file could not be parsed
    #[error("failed to parse private key {path}: {reason}")]
    KeyUnparseable {
        /// Expanded key path
        path: String,
        /// Parser message
        reason: String,
    },

    /// The private key file could not be read
    #[error("failed to read private key file {path}: {reason}")]
    KeyUnreadable {
        /// Expanded key path
        path: String,
        /// I/O error message
        reason: String,
    },

    /// A `~` key path was configured but no home directory is known
    #[error("failed to determine home directory for key path expansion")]
    HomeDirUnavailable,

    /// The server rejected every offered proof
    #[error("server rejected all authentication methods for user {username}")]
    Rejected {
        /// Login name that was refused
        username: String,
    },
}

/// Errors that can occur during remote execution
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Credentials could not be resolved or were refused
    #[error("authentication for {host} failed: {source}")]
    Auth {
        /// Target host
        host: String,
        /// Underlying credential problem
        #[source]
        source: AuthError,
    },

    /// Dial failed after exhausting the retry budget
    #[error("failed to connect to {host} after {attempts} attempts: {last_cause}")]
    Connect {
        /// Target host
        host: String,
        /// Number of dial attempts made
        attempts: u32,
        /// Error reported by the final attempt
        last_cause: String,
    },

    /// A session could not be opened on a live connection
    #[error("session creation on {host} failed: {reason}")]
    Session {
        /// Target host
        host: String,
        /// Transport message
        reason: String,
    },

    /// The remote command ran to completion with a non-zero status
    #[error("{}", remote_exit_message(*status, signal.as_deref()))]
    RemoteExit {
        /// Exit status reported by the remote process
        status: i32,
        /// Signal name when the process was killed by a signal
        signal: Option<String>,
    },

    /// Command timed out
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// The transport failed while the command was starting or running
    #[error("transport error on {host}: {reason}")]
    Transport {
        /// Target host
        host: String,
        /// Transport message
        reason: String,
    },

    /// Connection not established
    #[error("not connected to {host}")]
    NotConnected {
        /// Target host
        host: String,
    },
}

fn remote_exit_message(status: i32, signal: Option<&str>) -> String {
    match signal {
        Some(signal) => format!("process exited with status {status} from signal {signal}"),
        None => format!("process exited with status {status}"),
    }
}

impl ExecError {
    /// Check if error is retryable by a higher layer
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Connect { .. }
                | ExecError::Session { .. }
                | ExecError::Timeout { .. }
                | ExecError::Transport { .. }
        )
    }

    /// Credential problem behind this error, if any
    #[must_use]
    pub fn auth_error(&self) -> Option<&AuthError> {
        match self {
            ExecError::Auth { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors reported by a [`Transport`](crate::transport::Transport) implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection or channel is already closed
    #[error("connection closed")]
    Closed,

    /// Connecting did not finish within the connect timeout
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The server refused every authentication method
    #[error("authentication rejected for user {username}")]
    AuthRejected {
        /// Login name that was refused
        username: String,
    },

    /// Any other SSH or I/O failure
    #[error("{0}")]
    Protocol(String),
}

impl From<russh::Error> for TransportError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::Disconnect | russh::Error::SendError => TransportError::Closed,
            other => TransportError::Protocol(other.to_string()),
        }
    }
}
