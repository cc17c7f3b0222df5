//! Error types for fleetshell-api

use thiserror::Error;

/// Errors raised while interpreting API input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The host list contained no usable entries
    #[error("no hosts given")]
    EmptyHostList,

    /// An entry is not of the form `host` or `host:port`
    #[error("invalid host entry: {0}")]
    InvalidHost(String),

    /// The port part of an entry is not a valid port number
    #[error("invalid port in {entry}: {port}")]
    InvalidPort {
        /// Full entry as given
        entry: String,
        /// Port text that failed to parse
        port: String,
    },
}
