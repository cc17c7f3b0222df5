//! Configuration loading and types

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::WrapErr;
use fleetshell_api::HostTarget;
use fleetshell_exec::{CredentialResolver, ExecutorConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Top-level configuration for fleetshell
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
    /// Credentials and limits applied to every host
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Backup log check settings
    #[serde(default)]
    pub backup: BackupConfig,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error), overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Credentials and limits applied to every host
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_user")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Path to an unencrypted private key, `~` is expanded
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Check host keys against `known_hosts`
    #[serde(default)]
    pub verify_host_identity: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_user() -> String {
    "root".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            username: default_user(),
            password: None,
            private_key: None,
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            verify_host_identity: false,
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("verify_host_identity", &self.verify_host_identity)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .finish()
    }
}

impl RemoteConfig {
    /// Executor settings for one target
    pub fn executor_config(&self, target: &HostTarget) -> ExecutorConfig {
        let mut config = ExecutorConfig::new(&target.host, &self.username)
            .with_port(target.port)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_command_timeout(Duration::from_secs(self.command_timeout_secs))
            .with_retry(RetryPolicy {
                max_attempts: self.max_attempts,
                initial_delay: Duration::from_secs(self.retry_delay_secs),
            });
        if let Some(password) = &self.password {
            config = config.with_password(password);
        }
        if let Some(key) = &self.private_key {
            config = config.with_private_key(key);
        }
        if self.verify_host_identity {
            config = config.verify_host_identity();
        }
        config
    }
}

/// Backup log check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Command run on every host by `backup-log`
    #[serde(default = "default_check_command")]
    pub check_command: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            check_command: default_check_command(),
        }
    }
}

fn default_check_command() -> String {
    "tail -n 50 /var/log/backup.log".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Load an explicit path, or search the default locations
    ///
    /// Returns the path the configuration came from, `None` when the
    /// built-in defaults are used.
    ///
    /// # Errors
    /// Returns error if a found file cannot be read or parsed
    pub fn resolve(explicit: Option<&Path>) -> eyre::Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::locate(),
        };
        match path {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Config::default(), None)),
        }
    }

    /// Find the config file: `FLEETSHELL_CONFIG`, then the default paths
    pub fn locate() -> Option<PathBuf> {
        // Check environment variable
        if let Ok(path) = std::env::var("FLEETSHELL_CONFIG") {
            return Some(PathBuf::from(path));
        }

        // Try common paths
        let paths = [
            Some(PathBuf::from("fleetshell.toml")),
            Some(PathBuf::from("/etc/fleetshell/fleetshell.toml")),
            dirs::config_dir().map(|p| p.join("fleetshell/fleetshell.toml")),
        ];
        first_existing(paths.into_iter().flatten())
    }

    /// Log problems that would otherwise only surface on first connect
    pub fn warn_on_suspicious(&self) {
        let remote = &self.remote;
        if let Some(key) = &remote.private_key {
            if !CredentialResolver::new().key_exists(key) {
                tracing::warn!(path = %key, "configured private key not found");
            }
        }
        if remote.password.is_none() && remote.private_key.is_none() {
            tracing::warn!("no password or private key configured, connections will fail");
        }
    }
}

fn first_existing(paths: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    paths.into_iter().find(|path| path.is_file())
}
