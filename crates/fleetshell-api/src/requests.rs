//! Request types for the API

use serde::{Deserialize, Serialize};

use crate::targets::DEFAULT_SSH_PORT;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCommandRequest {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub command: String,
    /// Overrides the configured command timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupLogRequest {
    /// Comma-separated `host[:port]` list
    pub host_ips: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_defaults_to_22() {
        let req: RemoteCommandRequest =
            serde_json::from_str(r#"{"host":"10.0.0.5","command":"echo hi"}"#).unwrap();
        assert_eq!(req.port, 22);
        assert!(req.timeout_secs.is_none());
    }
}
