//! MCP SSH tools over a shared [`SessionPool`].
//!
//! This module provides the MCP tool implementations:
//!
//! - `ssh_connect`: Create (or replace) a pooled connection and connect it
//! - `remote_shell`: Run a command on a live connection
//! - `ssh_disconnect`: Close a connection, keeping its parameters
//! - `ssh_status`: Status block for a connection, rebuilt from parameters if needed
//! - `list_connections`: Probe and list every pooled connection
//! - `ssh_upload` / `ssh_download`: SFTP file transfer
//! - `ssh_list_directory`: SFTP directory listing
//! - `ssh_add_host_key`: Trust a host key out-of-band
//!
//! All tools of one server share a single pool behind a `tokio::sync::Mutex`,
//! so pool operations are serialized.

use std::path::Path;
use std::sync::Arc;

use poem_mcpserver::{Tools, content::Text, tool::StructuredContent};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::types::{
    ConnectionInfo, ConnectionListResponse, DirectoryListingResponse, FileTransferResponse,
    HostKeyResponse, SshConnectResponse, TransferDirection,
};
use crate::ssh::config::{
    expand_home, resolve_command_timeout, resolve_known_hosts_path, resolve_private_key_path,
};
use crate::ssh::params::{ConnectionParameters, DEFAULT_SSH_PORT};
use crate::ssh::{Session, SessionPool, SshError, register_host_key};

/// Key type assumed by `ssh_add_host_key` when none is given
const DEFAULT_HOST_KEY_TYPE: &str = "ssh-rsa";

/// MCP SSH tool implementation.
///
/// Cheap to clone; every clone shares the same pool.
#[derive(Clone)]
pub struct SshTools {
    pool: Arc<Mutex<SessionPool>>,
}

impl SshTools {
    pub fn new(pool: Arc<Mutex<SessionPool>>) -> Self {
        Self { pool }
    }
}

#[Tools]
impl SshTools {
    /// Connect to an SSH server and register the connection in the pool.
    ///
    /// Exactly one of `password`, `private_key` or `private_key_path` may be
    /// given. With none, the key at SSH_PRIVATE_KEY_PATH (default ~/.ssh/id_rsa)
    /// is used. Unknown hosts are rejected; trust them with `ssh_add_host_key`.
    #[allow(clippy::too_many_arguments)]
    async fn ssh_connect(
        &self,
        /// Connection ID to (re)use; a new UUID is generated when omitted
        connection_id: Option<String>,
        /// Remote server hostname or IP address
        host: String,
        /// SSH username
        username: String,
        /// Password for password-based authentication
        password: Option<String>,
        /// Private key content (OpenSSH or PEM text)
        private_key: Option<String>,
        /// Path to a private key file (~ is expanded)
        private_key_path: Option<String>,
        /// Passphrase for an encrypted private key
        key_passphrase: Option<String>,
        /// SSH port (default: 22)
        port: Option<u16>,
        /// Additional known_hosts file to trust (checked together with SSH_KNOWN_HOSTS)
        known_hosts_file: Option<String>,
    ) -> Result<StructuredContent<SshConnectResponse>, String> {
        let connection_id = connection_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let params = connection_params(
            connection_id,
            host,
            username,
            ConnectionAuth {
                password,
                private_key,
                private_key_path,
                key_passphrase,
            },
            port,
            known_hosts_file,
        )
        .map_err(tool_error)?;

        let id = params.id().to_string();
        let host = params.host().to_string();
        let port = params.port();
        let username = params.username().to_string();

        let mut pool = self.pool.lock().await;
        pool.close(&id).await;
        let session = pool.create(params).await.map_err(tool_error)?;
        session.connect().await.map_err(tool_error)?;

        Ok(StructuredContent(SshConnectResponse {
            message: format!(
                "Connection ID: {}\nSuccessfully connected to {} as {}",
                id, host, username
            ),
            connection_id: id,
            host,
            port,
            username,
        }))
    }

    /// Execute a shell command on a connected server.
    ///
    /// Non-zero exit codes are reported as errors unless `ignore_stderr` is set
    /// and the command wrote to stderr.
    async fn remote_shell(
        &self,
        /// Connection ID returned from ssh_connect
        connection_id: String,
        /// Shell command to execute on the remote server
        command: String,
        /// Return stderr as part of the output instead of failing (default: false)
        ignore_stderr: Option<bool>,
        /// Command execution timeout in seconds (default: 30, env: SSH_COMMAND_TIMEOUT)
        timeout_secs: Option<u64>,
    ) -> Result<Text<String>, String> {
        let timeout = resolve_command_timeout(timeout_secs);
        let mut pool = self.pool.lock().await;
        let session = live_session(&mut pool, &connection_id).await?;

        info!("Executing command on '{}'", connection_id);
        let output = session
            .execute(&command, timeout, ignore_stderr.unwrap_or(false))
            .await
            .map_err(|e| format!("Connection: {}. Please reconnect using ssh_connect.", e))?;

        Ok(Text(format!(
            "Output from connection '{}':\n\n{}",
            connection_id, output
        )))
    }

    /// Disconnect a connection. Its parameters are kept so `ssh_status` can
    /// rebuild it later.
    async fn ssh_disconnect(
        &self,
        /// Connection ID returned from ssh_connect
        connection_id: String,
    ) -> Result<Text<String>, String> {
        let mut pool = self.pool.lock().await;
        let message = match pool.close(&connection_id).await {
            Some(session) => format!(
                "Connection ID: {}\nDisconnected from {}",
                connection_id,
                session.params().host()
            ),
            None => format!(
                "Connection ID: {}\nNo active connection to disconnect",
                connection_id
            ),
        };
        Ok(Text(message))
    }

    /// Show the status of a connection, probing it first.
    async fn ssh_status(
        &self,
        /// Connection ID returned from ssh_connect
        connection_id: String,
    ) -> Result<Text<String>, String> {
        let mut pool = self.pool.lock().await;
        connection_status(&mut pool, &connection_id).await.map(Text)
    }

    /// List all pooled connections. Each one is probed, and dead connections
    /// are reported as not connected.
    async fn list_connections(&self) -> StructuredContent<ConnectionListResponse> {
        let mut pool = self.pool.lock().await;
        for session in pool.sessions_mut() {
            if !session.is_connected().await {
                warn!("Connection '{}' is not connected", session.id());
            }
        }

        let connections: Vec<ConnectionInfo> = pool
            .list_live()
            .into_iter()
            .map(ConnectionInfo::from)
            .collect();
        let count = connections.len();

        StructuredContent(ConnectionListResponse { connections, count })
    }

    /// Upload a local file to the remote server over SFTP.
    async fn ssh_upload(
        &self,
        /// Connection ID returned from ssh_connect
        connection_id: String,
        /// Local file to upload (~ is expanded)
        local_path: String,
        /// Destination path on the remote server
        remote_path: String,
    ) -> Result<StructuredContent<FileTransferResponse>, String> {
        let local = expand_home(&local_path);
        let mut pool = self.pool.lock().await;
        let session = live_session(&mut pool, &connection_id).await?;

        let bytes = session
            .upload_file(&local, &remote_path)
            .await
            .map_err(tool_error)?;

        Ok(StructuredContent(FileTransferResponse {
            connection_id,
            direction: TransferDirection::Upload,
            local_path: local.display().to_string(),
            remote_path,
            bytes,
        }))
    }

    /// Download a remote file over SFTP. Missing local directories are created.
    async fn ssh_download(
        &self,
        /// Connection ID returned from ssh_connect
        connection_id: String,
        /// File to download from the remote server
        remote_path: String,
        /// Local destination (~ is expanded)
        local_path: String,
    ) -> Result<StructuredContent<FileTransferResponse>, String> {
        let local = expand_home(&local_path);
        let mut pool = self.pool.lock().await;
        let session = live_session(&mut pool, &connection_id).await?;

        create_parent_dir(&local).await?;
        let bytes = session
            .download_file(&remote_path, &local)
            .await
            .map_err(tool_error)?;

        Ok(StructuredContent(FileTransferResponse {
            connection_id,
            direction: TransferDirection::Download,
            local_path: local.display().to_string(),
            remote_path,
            bytes,
        }))
    }

    /// List the entries of a remote directory over SFTP.
    async fn ssh_list_directory(
        &self,
        /// Connection ID returned from ssh_connect
        connection_id: String,
        /// Remote directory to list
        remote_path: String,
    ) -> Result<StructuredContent<DirectoryListingResponse>, String> {
        let mut pool = self.pool.lock().await;
        let session = live_session(&mut pool, &connection_id).await?;

        let entries = session
            .list_directory(&remote_path)
            .await
            .map_err(tool_error)?;
        let count = entries.len();

        Ok(StructuredContent(DirectoryListingResponse {
            connection_id,
            path: remote_path,
            entries,
            count,
        }))
    }

    /// Trust a host key by writing it to a known_hosts file.
    ///
    /// Use the host, key and key type reported by a failed `ssh_connect`. An
    /// existing entry for the same host is replaced.
    async fn ssh_add_host_key(
        &self,
        /// Host entry, e.g. "example.com" or "[example.com]:2222" for non-default ports
        host: String,
        /// Base64 public key material
        key: String,
        /// Key type (default: ssh-rsa)
        key_type: Option<String>,
        /// known_hosts file to update (default: SSH_KNOWN_HOSTS or ~/.ssh/known_hosts)
        known_hosts_file: Option<String>,
    ) -> Result<StructuredContent<HostKeyResponse>, String> {
        let key_type = key_type.unwrap_or_else(|| DEFAULT_HOST_KEY_TYPE.to_string());
        let path = resolve_known_hosts_path(known_hosts_file.as_deref());

        let outcome = register_host_key(&host, &key_type, &key, &path).map_err(tool_error)?;

        Ok(StructuredContent(HostKeyResponse::new(
            &host,
            &key_type,
            &path.display().to_string(),
            outcome,
        )))
    }
}

/// Credential arguments of `ssh_connect`.
struct ConnectionAuth {
    password: Option<String>,
    private_key: Option<String>,
    private_key_path: Option<String>,
    key_passphrase: Option<String>,
}

/// Build parameters from tool arguments, falling back to the configured key
/// file when no credential is given.
fn connection_params(
    connection_id: String,
    host: String,
    username: String,
    auth: ConnectionAuth,
    port: Option<u16>,
    known_hosts_file: Option<String>,
) -> Result<ConnectionParameters, SshError> {
    let mut builder = ConnectionParameters::builder(connection_id, host, username)
        .port(port.unwrap_or(DEFAULT_SSH_PORT));

    let has_credential =
        auth.password.is_some() || auth.private_key.is_some() || auth.private_key_path.is_some();
    if !has_credential {
        builder = builder.private_key_path(resolve_private_key_path(None));
    }

    if let Some(password) = auth.password {
        builder = builder.password(password);
    }
    if let Some(key) = auth.private_key {
        builder = builder.private_key(key);
    }
    if let Some(path) = auth.private_key_path {
        builder = builder.private_key_path(path);
    }
    if let Some(passphrase) = auth.key_passphrase {
        builder = builder.key_passphrase(passphrase);
    }
    if let Some(path) = known_hosts_file {
        builder = builder.known_hosts_path(path);
    }

    builder.build()
}

/// Fetch a pooled session and make sure it is live.
async fn live_session<'a>(
    pool: &'a mut SessionPool,
    connection_id: &str,
) -> Result<&'a mut Session, String> {
    if !pool.has_session(connection_id) {
        return Err(format!(
            "Connection ID '{}' not found. Use ssh_connect first.",
            connection_id
        ));
    }

    let session = pool.get_or_create(connection_id).await.map_err(tool_error)?;
    if !session.is_connected().await {
        return Err(format!(
            "Connection '{}' is not currently active. Use ssh_connect to establish the connection.",
            connection_id
        ));
    }

    Ok(session)
}

/// Status block for `connection_id`, rebuilding the session from retained
/// parameters when it is not live.
async fn connection_status(pool: &mut SessionPool, connection_id: &str) -> Result<String, String> {
    let session = pool.get_or_create(connection_id).await.map_err(tool_error)?;
    Ok(session.connection_info().await)
}

async fn create_parent_dir(path: &Path) -> Result<(), String> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| format!("I/O operation: {}: {}", dir.display(), e)),
        _ => Ok(()),
    }
}

/// Tool-facing message for an error, prefixed with its kind.
fn tool_error(err: SshError) -> String {
    let kind = match &err {
        SshError::UnknownHostKey(_) => "Host verification",
        SshError::Key(_) => "SSH key issue",
        SshError::InvalidParameters(_) => "Invalid input parameters",
        SshError::LocalFile { .. } | SshError::TrustStore { .. } => "I/O operation",
        SshError::Capacity { .. } | SshError::NotFound(_) | SshError::Connection(_) => {
            "Connection"
        }
    };
    format!("{}: {}", kind, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::AuthMethod;
    use crate::ssh::error::{KeyError, UnknownHostKey};
    use crate::ssh::testing::{FakeConnector, FakeRemote, test_settings};

    fn no_auth() -> ConnectionAuth {
        ConnectionAuth {
            password: None,
            private_key: None,
            private_key_path: None,
            key_passphrase: None,
        }
    }

    mod params {
        use super::*;

        #[test]
        fn test_defaults_to_configured_key_path() {
            let params = connection_params(
                "web".into(),
                "example.com".into(),
                "deploy".into(),
                no_auth(),
                None,
                None,
            )
            .unwrap();
            assert!(matches!(params.auth(), AuthMethod::KeyPath(_)));
            assert_eq!(params.port(), DEFAULT_SSH_PORT);
        }

        #[test]
        fn test_password_is_used_when_given() {
            let auth = ConnectionAuth {
                password: Some("secret".into()),
                ..no_auth()
            };
            let params = connection_params(
                "web".into(),
                "example.com".into(),
                "deploy".into(),
                auth,
                Some(2222),
                Some("~/.ssh/extra_hosts".into()),
            )
            .unwrap();
            assert_eq!(params.auth(), &AuthMethod::Password("secret".into()));
            assert_eq!(params.port(), 2222);
            assert!(params.known_hosts_path().is_some());
        }

        #[test]
        fn test_two_credentials_are_rejected() {
            let auth = ConnectionAuth {
                password: Some("secret".into()),
                private_key_path: Some("/keys/id_rsa".into()),
                ..no_auth()
            };
            let err = connection_params(
                "web".into(),
                "example.com".into(),
                "deploy".into(),
                auth,
                None,
                None,
            )
            .unwrap_err();
            assert!(tool_error(err).starts_with("Invalid input parameters:"));
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn test_kind_prefixes() {
            let unknown = UnknownHostKey {
                host: "example.com".into(),
                key_type: "ssh-ed25519".into(),
                fingerprint: "SHA256:abc".into(),
                key: "AAAA".into(),
                changed: false,
            };
            assert!(tool_error(unknown.into()).starts_with("Host verification:"));
            assert!(tool_error(KeyError::PassphraseRequired.into()).starts_with("SSH key issue:"));
            assert_eq!(
                tool_error(SshError::Connection("Connection refused".into())),
                "Connection: Connection refused"
            );
        }
    }

    mod sessions {
        use super::*;

        fn pool(remote: &Arc<FakeRemote>) -> SessionPool {
            SessionPool::new(
                4,
                Arc::new(FakeConnector::new(Arc::clone(remote))),
                test_settings(),
            )
        }

        fn params(id: &str) -> ConnectionParameters {
            ConnectionParameters::builder(id, "example.com", "deploy")
                .password("secret")
                .build()
                .unwrap()
        }

        #[tokio::test]
        async fn test_unknown_connection_is_not_found() {
            let remote = FakeRemote::new();
            let mut pool = pool(&remote);
            let err = live_session(&mut pool, "web").await.unwrap_err();
            assert_eq!(
                err,
                "Connection ID 'web' not found. Use ssh_connect first."
            );
        }

        #[tokio::test]
        async fn test_disconnected_connection_is_inactive() {
            let remote = FakeRemote::new();
            let mut pool = pool(&remote);
            pool.create(params("web")).await.unwrap();

            let err = live_session(&mut pool, "web").await.unwrap_err();
            assert!(err.contains("is not currently active"));
        }

        #[tokio::test]
        async fn test_live_connection_is_returned() {
            let remote = FakeRemote::new();
            let mut pool = pool(&remote);
            pool.create(params("web")).await.unwrap().connect().await.unwrap();

            let session = live_session(&mut pool, "web").await.unwrap();
            assert_eq!(session.id(), "web");
        }

        #[tokio::test]
        async fn test_status_of_unknown_connection() {
            let remote = FakeRemote::new();
            let mut pool = pool(&remote);
            let err = connection_status(&mut pool, "web").await.unwrap_err();
            assert_eq!(err, "Connection: Connection ID 'web' not found");
        }

        #[tokio::test]
        async fn test_status_reports_capacity_as_such() {
            let remote = FakeRemote::new();
            let mut pool = SessionPool::new(
                1,
                Arc::new(FakeConnector::new(Arc::clone(&remote))),
                test_settings(),
            );
            pool.create(params("old")).await.unwrap();
            pool.close("old").await;
            pool.create(params("web")).await.unwrap().connect().await.unwrap();

            let err = connection_status(&mut pool, "old").await.unwrap_err();
            assert_eq!(err, "Connection: Connection limit reached (1)");
            assert!(!err.contains("not found"));
        }

        #[tokio::test]
        async fn test_status_rebuilds_closed_connection() {
            let remote = FakeRemote::new();
            let mut pool = pool(&remote);
            pool.create(params("web")).await.unwrap();
            pool.close("web").await;

            let status = connection_status(&mut pool, "web").await.unwrap();
            assert!(pool.has_session("web"));
            assert!(status.starts_with("Connection ID: web\nStatus: Not connected"));
        }

        #[tokio::test]
        async fn test_create_parent_dir_builds_missing_directories() {
            let dir = tempfile::tempdir().unwrap();
            let target = dir.path().join("a/b/file.txt");
            create_parent_dir(&target).await.unwrap();
            assert!(dir.path().join("a/b").is_dir());
        }
    }
}
