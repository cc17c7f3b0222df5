//! Response types for the API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetshell_exec::CommandResult;

use crate::targets::HostTarget;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCommandResponse {
    pub host: String,
    pub port: u16,
    pub output: String,
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl RemoteCommandResponse {
    pub fn from_result(target: &HostTarget, result: &CommandResult) -> Self {
        Self {
            host: target.host.clone(),
            port: target.port,
            output: result.output.clone(),
            status: result.status,
            error: result.error.as_ref().map(ToString::to_string),
            duration_ms: u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == 0 && self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostOutput {
    pub host_ip: String,
    pub output: String,
    pub status: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupLogResponse {
    /// True only when every host exited with status 0
    pub successful: bool,
    pub data: Vec<HostOutput>,
    pub checked_at: DateTime<Utc>,
}

impl BackupLogResponse {
    pub fn from_responses(responses: &[RemoteCommandResponse]) -> Self {
        Self {
            successful: !responses.is_empty()
                && responses.iter().all(RemoteCommandResponse::succeeded),
            data: responses
                .iter()
                .map(|r| HostOutput {
                    host_ip: r.host.clone(),
                    output: r.output.clone(),
                    status: r.status,
                })
                .collect(),
            checked_at: Utc::now(),
        }
    }
}
