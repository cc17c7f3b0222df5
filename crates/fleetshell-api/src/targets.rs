//! Host list parsing
//!
//! A request names its hosts as one comma-separated string, e.g.
//! `"10.0.0.5, 10.0.0.6:2222"`. Entries without a port get port 22.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Port used when an entry does not name one
pub const DEFAULT_SSH_PORT: u16 = 22;

/// One `host:port` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostTarget {
    pub host: String,
    pub port: u16,
}

impl HostTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a single `host` or `host:port` entry
    ///
    /// # Errors
    /// Returns `ApiError::InvalidHost` for empty hosts or more than one `:`,
    /// and `ApiError::InvalidPort` when the port is not a number in 1..=65535
    pub fn parse(entry: &str) -> Result<Self, ApiError> {
        let entry = entry.trim();
        let mut parts = entry.split(':');
        let host = parts.next().unwrap_or_default().trim();
        let port = parts.next();

        if host.is_empty() || parts.next().is_some() {
            return Err(ApiError::InvalidHost(entry.to_string()));
        }

        let port = match port {
            None => DEFAULT_SSH_PORT,
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => {
                    return Err(ApiError::InvalidPort {
                        entry: entry.to_string(),
                        port: raw.to_string(),
                    });
                }
            },
        };

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parse a comma-separated host list, rejecting it if any entry is invalid
///
/// Blank entries are skipped.
///
/// # Errors
/// Returns the first entry error, or `ApiError::EmptyHostList` when no entry
/// remains
pub fn parse_host_list(list: &str) -> Result<Vec<HostTarget>, ApiError> {
    let targets = entries(list)
        .map(HostTarget::parse)
        .collect::<Result<Vec<_>, _>>()?;

    if targets.is_empty() {
        return Err(ApiError::EmptyHostList);
    }
    Ok(targets)
}

/// Parse a comma-separated host list, setting invalid entries aside
pub fn parse_host_list_lenient(list: &str) -> (Vec<HostTarget>, Vec<ApiError>) {
    let mut targets = Vec::new();
    let mut rejected = Vec::new();
    for entry in entries(list) {
        match HostTarget::parse(entry) {
            Ok(target) => targets.push(target),
            Err(e) => rejected.push(e),
        }
    }
    (targets, rejected)
}

fn entries(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|e| !e.is_empty())
}
