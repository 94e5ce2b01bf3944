//! Serializable response types for the MCP SSH tools.
//!
//! All types implement `Serialize`, `Deserialize`, and `JsonSchema` for
//! MCP protocol compatibility.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ssh::{RegisterOutcome, SessionState, SessionSummary};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SshConnectResponse {
    /// Identifier for subsequent tool calls
    pub connection_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub message: String,
}

/// One pooled connection as seen by `list_connections`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Result of a fresh liveness probe
    pub connected: bool,
    /// Connection time (RFC3339 format), present while connected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_since: Option<String>,
}

impl From<SessionSummary> for ConnectionInfo {
    fn from(summary: SessionSummary) -> Self {
        Self {
            connection_id: summary.id,
            host: summary.host,
            port: summary.port,
            username: summary.username,
            connected: summary.state == SessionState::Connected,
            connected_since: summary.connected_since.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionListResponse {
    pub connections: Vec<ConnectionInfo>,
    /// Total number of pooled connections
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct FileTransferResponse {
    pub connection_id: String,
    pub direction: TransferDirection,
    pub local_path: String,
    pub remote_path: String,
    /// Bytes written to the destination
    pub bytes: u64,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DirectoryListingResponse {
    pub connection_id: String,
    pub path: String,
    /// Entry names, without `.` and `..`
    pub entries: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HostKeyResponse {
    /// Host token as written to the trust store
    pub host: String,
    pub key_type: String,
    pub known_hosts_file: String,
    /// True when an existing entry was replaced
    pub updated: bool,
    pub message: String,
}

impl HostKeyResponse {
    pub fn new(host: &str, key_type: &str, known_hosts_file: &str, outcome: RegisterOutcome) -> Self {
        let (updated, message) = match outcome {
            RegisterOutcome::Updated => (
                true,
                format!("Host key for '{}' updated in {}", host, known_hosts_file),
            ),
            RegisterOutcome::Added => (
                false,
                format!(
                    "Host key for '{}' successfully added to {}",
                    host, known_hosts_file
                ),
            ),
        };

        Self {
            host: host.to_string(),
            key_type: key_type.to_string(),
            known_hosts_file: known_hosts_file.to_string(),
            updated,
            message,
        }
    }
}

#[cfg(test)]
mod response_serialization {
    use super::*;
    use chrono::{TimeZone, Utc};

    mod connection_info {
        use super::*;

        fn summary(state: SessionState) -> SessionSummary {
            SessionSummary {
                id: "web".to_string(),
                host: "example.com".to_string(),
                port: 2222,
                username: "deploy".to_string(),
                state,
                connected_since: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            }
        }

        #[test]
        fn test_from_connected_summary() {
            let info = ConnectionInfo::from(summary(SessionState::Connected));
            assert_eq!(info.connection_id, "web");
            assert!(info.connected);
            assert_eq!(
                info.connected_since.as_deref(),
                Some("2024-05-01T12:00:00+00:00")
            );
        }

        #[test]
        fn test_connected_since_omitted_when_absent() {
            let mut disconnected = summary(SessionState::Disconnected);
            disconnected.connected_since = None;
            let json = serde_json::to_value(ConnectionInfo::from(disconnected)).unwrap();

            assert_eq!(json["connected"], false);
            assert!(json.get("connected_since").is_none());
        }
    }

    mod transfer {
        use super::*;

        #[test]
        fn test_direction_is_snake_case() {
            let response = FileTransferResponse {
                connection_id: "web".to_string(),
                direction: TransferDirection::Download,
                local_path: "/tmp/a".to_string(),
                remote_path: "/srv/a".to_string(),
                bytes: 42,
            };

            let json = serde_json::to_value(&response).unwrap();
            assert_eq!(json["direction"], "download");
            assert_eq!(json["bytes"], 42);
        }
    }

    mod host_key {
        use super::*;

        #[test]
        fn test_added_message() {
            let response = HostKeyResponse::new(
                "example.com",
                "ssh-ed25519",
                "/tmp/kh",
                RegisterOutcome::Added,
            );
            assert!(!response.updated);
            assert_eq!(
                response.message,
                "Host key for 'example.com' successfully added to /tmp/kh"
            );
        }

        #[test]
        fn test_updated_round_trip() {
            let response = HostKeyResponse::new(
                "[example.com]:2222",
                "ssh-rsa",
                "/tmp/kh",
                RegisterOutcome::Updated,
            );
            let json = serde_json::to_string(&response).unwrap();
            let deserialized: HostKeyResponse = serde_json::from_str(&json).unwrap();

            assert!(deserialized.updated);
            assert_eq!(deserialized.host, "[example.com]:2222");
            assert!(deserialized.message.contains("updated in /tmp/kh"));
        }
    }
}
