//! SSH credential resolution
//!
//! Turns the password and private-key path of an [`ExecutorConfig`] into the
//! ordered list of proofs offered to the server. Resolution runs on every dial
//! so key files that change between reconnects are picked up.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use russh::keys::{PrivateKey, decode_secret_key, ssh_key};
use tracing::debug;

use crate::config::ExecutorConfig;
use crate::error::AuthError;

/// One resolved authentication method
#[derive(Clone)]
pub enum AuthProof {
    /// Password authentication
    Password(String),
    /// Public key authentication with a parsed, unencrypted key
    PublicKey(Arc<PrivateKey>),
}

impl AuthProof {
    /// Method name as used in the SSH protocol
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            AuthProof::Password(_) => "password",
            AuthProof::PublicKey(_) => "publickey",
        }
    }
}

impl fmt::Debug for AuthProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthProof::Password(_) => f.write_str("Password(<redacted>)"),
            AuthProof::PublicKey(key) => f
                .debug_tuple("PublicKey")
                .field(&key.algorithm().as_str())
                .finish(),
        }
    }
}

/// Resolves configured secrets into [`AuthProof`]s
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    home_dir: Option<PathBuf>,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialResolver {
    /// Resolver expanding `~` against the current user's home directory
    #[must_use]
    pub fn new() -> Self {
        Self {
            home_dir: dirs::home_dir(),
        }
    }

    /// Resolver expanding `~` against an explicit directory
    pub fn with_home_dir(home: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: Some(home.into()),
        }
    }

    /// Resolver with no home directory; `~` paths fail to resolve
    #[must_use]
    pub fn without_home_dir() -> Self {
        Self { home_dir: None }
    }

    /// Produce proofs ordered password first, then key
    ///
    /// # Errors
    /// Returns `AuthError::NoCredentials` when nothing usable is configured, or
    /// the key error when the private key cannot be loaded
    pub fn resolve(&self, config: &ExecutorConfig) -> Result<Vec<AuthProof>, AuthError> {
        let mut proofs = Vec::with_capacity(2);

        if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
            proofs.push(AuthProof::Password(password.to_string()));
        }

        if let Some(key_path) = config.private_key_path.as_deref().filter(|p| !p.is_empty()) {
            let key = self.load_private_key(key_path)?;
            proofs.push(AuthProof::PublicKey(Arc::new(key)));
        }

        if proofs.is_empty() {
            return Err(AuthError::NoCredentials);
        }

        debug!(
            host = %config.host,
            methods = ?proofs.iter().map(AuthProof::method).collect::<Vec<_>>(),
            "resolved credentials"
        );
        Ok(proofs)
    }

    /// Expand a leading `~` against the home directory
    ///
    /// # Errors
    /// Returns `AuthError::HomeDirUnavailable` if the path needs a home directory
    /// and none is known
    pub fn expand_path(&self, raw: &str) -> Result<PathBuf, AuthError> {
        let rest = match raw.strip_prefix('~') {
            Some("") => "",
            Some(rest) => match rest.strip_prefix('/') {
                Some(rest) => rest,
                // `~user/...` is left alone
                None => return Ok(PathBuf::from(raw)),
            },
            None => return Ok(PathBuf::from(raw)),
        };

        let home = self
            .home_dir
            .as_deref()
            .ok_or(AuthError::HomeDirUnavailable)?;
        Ok(home.join(rest))
    }

    /// Whether `raw` names an existing key file after expansion
    #[must_use]
    pub fn key_exists(&self, raw: &str) -> bool {
        self.expand_path(raw)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    fn load_private_key(&self, raw: &str) -> Result<PrivateKey, AuthError> {
        let path = self.expand_path(raw)?;
        let display = path.display().to_string();

        let contents = std::fs::read_to_string(&path).map_err(|e| AuthError::KeyUnreadable {
            path: display.clone(),
            reason: e.to_string(),
        })?;

        match decode_secret_key(&contents, None) {
            Ok(key) => {
                debug!(path = %path.display(), algorithm = %key.algorithm().as_str(), "loaded private key");
                Ok(key)
            }
            Err(russh::keys::Error::KeyIsEncrypted) => Err(AuthError::EncryptedKey { path: display }),
            Err(_) if is_encrypted(&contents) => Err(AuthError::EncryptedKey { path: display }),
            Err(e) => Err(AuthError::KeyUnparseable {
                path: display,
                reason: e.to_string(),
            }),
        }
    }
}

/// Detect passphrase protection for keys the decoder rejects for other reasons
fn is_encrypted(contents: &str) -> bool {
    if contents.contains("ENCRYPTED") {
        return true;
    }
    ssh_key::PrivateKey::from_openssh(contents)
        .map(|key| key.is_encrypted())
        .unwrap_or(false)
}
