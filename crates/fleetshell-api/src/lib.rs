//! fleetshell-api: Request/response types and host-list handling
//!
//! The layer in front of the executor: splits a multi-host request into
//! individual targets and shapes per-host results for callers.

pub mod error;
pub mod requests;
pub mod responses;
pub mod targets;

pub use error::ApiError;
pub use requests::{BackupLogRequest, RemoteCommandRequest};
pub use responses::{BackupLogResponse, HostOutput, RemoteCommandResponse};
pub use targets::{DEFAULT_SSH_PORT, HostTarget, parse_host_list, parse_host_list_lenient};
