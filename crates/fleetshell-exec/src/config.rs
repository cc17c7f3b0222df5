//! Executor configuration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::ssh_key;

/// Connect timeout used when none is configured
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Command timeout used when none is configured, or when zero is supplied
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Decides whether a server's host key is trusted
pub trait HostKeyVerifier: Send + Sync {
    /// Return `true` to accept `key` as the identity of `host:port`
    fn verify(&self, host: &str, port: u16, key: &ssh_key::PublicKey) -> bool;
}

/// How the server's host identity is checked during the handshake
#[derive(Clone, Default)]
pub enum HostKeyPolicy {
    /// Trust any host key. Intended for a known internal fleet without a
    /// provisioned trust store.
    #[default]
    AcceptAny,
    /// Delegate the decision to a verifier
    Verify(Arc<dyn HostKeyVerifier>),
}

impl HostKeyPolicy {
    /// Whether host identity is actually verified
    #[must_use]
    pub fn verifies(&self) -> bool {
        matches!(self, HostKeyPolicy::Verify(_))
    }

    /// Apply the policy to a presented host key
    #[must_use]
    pub fn check(&self, host: &str, port: u16, key: &ssh_key::PublicKey) -> bool {
        match self {
            HostKeyPolicy::AcceptAny => true,
            HostKeyPolicy::Verify(verifier) => verifier.verify(host, port, key),
        }
    }
}

impl fmt::Debug for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyPolicy::AcceptAny => f.write_str("AcceptAny"),
            HostKeyPolicy::Verify(_) => f.write_str("Verify(..)"),
        }
    }
}

/// Dial retry budget with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total dial attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled before each later attempt
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Attempt budget, never less than one
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given failed attempt (1-based)
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }
}

/// Connection parameters for one remote host
#[derive(Clone)]
pub struct ExecutorConfig {
    /// Host address
    pub host: String,
    /// Port (default 22)
    pub port: u16,
    /// Login name
    pub username: String,
    /// Optional password
    pub password: Option<String>,
    /// Optional private key path, `~` is expanded
    pub private_key_path: Option<String>,
    /// Bound on TCP connect, handshake and authentication
    pub connect_timeout: Option<Duration>,
    /// Bound on a single command
    pub command_timeout: Option<Duration>,
    /// Dial retry budget
    pub retry: RetryPolicy,
    /// Host identity verification
    pub host_key_policy: HostKeyPolicy,
}

impl fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("retry", &self.retry)
            .field("host_key_policy", &self.host_key_policy)
            .finish()
    }
}

impl ExecutorConfig {
    /// Create a config for `user@host:22` with no credentials
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            password: None,
            private_key_path: None,
            connect_timeout: None,
            command_timeout: None,
            retry: RetryPolicy::default(),
            host_key_policy: HostKeyPolicy::default(),
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set private key path
    #[must_use]
    pub fn with_private_key(mut self, path: impl Into<String>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// Set connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set default command timeout
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Set dial retry budget
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Verify host keys against the user's `known_hosts`
    #[must_use]
    pub fn verify_host_identity(self) -> Self {
        self.with_host_key_verifier(Arc::new(crate::ssh::KnownHostsVerifier))
    }

    /// Verify host keys with a custom verifier
    #[must_use]
    pub fn with_host_key_verifier(mut self, verifier: Arc<dyn HostKeyVerifier>) -> Self {
        self.host_key_policy = HostKeyPolicy::Verify(verifier);
        self
    }

    /// `host:port` string used in logs and errors
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect timeout, falling back to the default
    #[must_use]
    pub fn effective_connect_timeout(&self) -> Duration {
        self.connect_timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Command timeout, falling back to the default
    #[must_use]
    pub fn effective_command_timeout(&self) -> Duration {
        normalize_command_timeout(self.command_timeout.unwrap_or_default())
    }
}

/// Map a zero timeout to [`DEFAULT_COMMAND_TIMEOUT`]; execution is never unbounded
#[must_use]
pub fn normalize_command_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        DEFAULT_COMMAND_TIMEOUT
    } else {
        timeout
    }
}
