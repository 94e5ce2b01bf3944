//! One logical connection to a remote host.
//!
//! A [`Session`] owns its [`ConnectionParameters`] and at most one open
//! [`Transport`]. It is either `Disconnected` (no transport) or `Connected`
//! (transport open and verified by a probe round-trip); there is no
//! half-open state. Any transport fault drops the transport and returns the
//! session to `Disconnected`, so the next `connect()` starts clean.
//!
//! # Output Policy
//!
//! [`Session::execute`] maps `(exit code, stdout, stderr)` to a result:
//!
//! | exit | stderr | ignore_stderr | result |
//! |------|--------|---------------|--------|
//! | 0 | empty | - | stdout |
//! | any | non-empty | true, or exit 0 | `"{stdout}\n[stderr]: {stderr}"` |
//! | != 0 | non-empty | false | error with exit code and stderr |
//! | != 0 | empty | - | error with exit code |

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::auth::Credential;
use super::client::{CommandOutput, ConnectTarget, Connector, Transport};
use super::config::{SessionSettings, expand_home};
use super::error::SshError;
use super::keys::{KeyMaterial, load_private_key};
use super::params::{AuthMethod, ConnectionParameters};
use super::trust::KnownHostsVerifier;

/// Probe run right after the handshake
pub(crate) const CONNECT_PROBE_COMMAND: &str = "echo \"Connection successful\"";
pub(crate) const CONNECT_PROBE_SENTINEL: &str = "Connection successful";

/// Probe run by [`Session::is_connected`]
pub(crate) const LIVENESS_PROBE_COMMAND: &str = "echo 1";
pub(crate) const LIVENESS_PROBE_SENTINEL: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => f.write_str("Not connected"),
            SessionState::Connected => f.write_str("Connected"),
        }
    }
}

pub struct Session {
    params: ConnectionParameters,
    connector: Arc<dyn Connector>,
    settings: Arc<SessionSettings>,
    state: SessionState,
    transport: Option<Box<dyn Transport>>,
    connected_since: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a `Disconnected` session. Nothing touches the network until
    /// [`connect`](Self::connect).
    pub fn new(
        params: ConnectionParameters,
        connector: Arc<dyn Connector>,
        settings: Arc<SessionSettings>,
    ) -> Self {
        Self {
            params,
            connector,
            settings,
            state: SessionState::Disconnected,
            transport: None,
            connected_since: None,
        }
    }

    pub fn id(&self) -> &str {
        self.params.id()
    }

    pub fn params(&self) -> &ConnectionParameters {
        &self.params
    }

    /// Last known state. Use [`is_connected`](Self::is_connected) to re-verify.
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn connected_since(&self) -> Option<DateTime<Utc>> {
        self.connected_since
    }

    /// Open, authenticate and verify a connection.
    ///
    /// Any existing transport is closed first. The session only becomes
    /// `Connected` after the post-handshake probe echoes its sentinel.
    ///
    /// # Errors
    ///
    /// - [`SshError::Key`] when key material cannot be decoded
    /// - [`SshError::UnknownHostKey`] when the server key is not trusted
    /// - [`SshError::Connection`] for network, authentication and probe failures
    pub async fn connect(&mut self) -> Result<(), SshError> {
        self.disconnect().await;

        let address = format!("{}:{}", self.params.host(), self.params.port());
        info!(
            "Connecting '{}' to {}@{}",
            self.params.id(),
            self.params.username(),
            address
        );

        let credential = self.resolve_credential()?;
        let custom_store = self
            .params
            .known_hosts_path()
            .map(|path| expand_home(&path.to_string_lossy()));
        let verifier = Arc::new(KnownHostsVerifier::from_paths(
            self.settings.system_known_hosts.as_deref(),
            custom_store.as_deref(),
        ));

        let target = ConnectTarget {
            host: self.params.host(),
            port: self.params.port(),
            username: self.params.username(),
            timeout: self.settings.connect_timeout,
            compress: self.settings.compress,
        };

        let transport = match self.connector.connect(&target, credential, verifier).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Connection '{}' to {} failed: {}", self.params.id(), address, e);
                return Err(e);
            }
        };

        let probe = exec_within(
            transport.as_ref(),
            CONNECT_PROBE_COMMAND,
            self.settings.probe_timeout,
        )
        .await;
        let failure = match probe {
            Ok(output) if output.stdout.trim() == CONNECT_PROBE_SENTINEL => None,
            Ok(output) => Some(output.stderr.trim().to_string()),
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = failure {
            transport.close().await;
            warn!(
                "Connection test failed for '{}': {}",
                self.params.id(),
                reason
            );
            return Err(SshError::Connection(format!(
                "Connection test failed: {}",
                reason
            )));
        }

        self.transport = Some(transport);
        self.state = SessionState::Connected;
        self.connected_since = Some(Utc::now());
        info!("Connection '{}' established to {}", self.params.id(), address);
        Ok(())
    }

    fn resolve_credential(&self) -> Result<Credential, SshError> {
        let passphrase = self.params.key_passphrase();
        let credential = match self.params.auth() {
            AuthMethod::Password(password) => Credential::Password(password.clone()),
            AuthMethod::KeyMaterial(bytes) => {
                Credential::Key(load_private_key(KeyMaterial::Inline(bytes), passphrase)?)
            }
            AuthMethod::KeyPath(path) => {
                let path = expand_home(&path.to_string_lossy());
                Credential::Key(load_private_key(KeyMaterial::File(&path), passphrase)?)
            }
        };
        Ok(credential)
    }

    /// Re-verify liveness with a short probe.
    ///
    /// A failed probe closes the transport and leaves the session
    /// `Disconnected`. A `Disconnected` session returns false without any
    /// side effects.
    pub async fn is_connected(&mut self) -> bool {
        if self.state != SessionState::Connected {
            return false;
        }

        let probe = match self.transport.as_deref() {
            Some(transport) => {
                exec_within(transport, LIVENESS_PROBE_COMMAND, self.settings.probe_timeout).await
            }
            None => {
                self.reset().await;
                return false;
            }
        };

        match probe {
            Ok(output) if output.stdout.trim() == LIVENESS_PROBE_SENTINEL => true,
            Ok(output) => {
                debug!(
                    "Liveness probe for '{}' returned unexpected output: {:?}",
                    self.params.id(),
                    output.stdout
                );
                self.reset().await;
                false
            }
            Err(e) => {
                debug!("Liveness probe for '{}' failed: {}", self.params.id(), e);
                self.reset().await;
                false
            }
        }
    }

    /// Run `command` and apply the output policy.
    ///
    /// Requires a `Connected` session; the state is not re-probed. A
    /// transport fault or timeout resets the session. A non-zero exit status
    /// does not.
    pub async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
        ignore_stderr: bool,
    ) -> Result<String, SshError> {
        let result = exec_within(self.live_transport()?, command, timeout).await;

        match result {
            Ok(output) => format_output(self.params.id(), output, ignore_stderr),
            Err(e) => {
                self.reset().await;
                Err(SshError::Connection(format!(
                    "Command execution failed on {}: {}",
                    self.params.id(),
                    e
                )))
            }
        }
    }

    /// Upload a local regular file to `remote`, returning the bytes written.
    pub async fn upload_file(&mut self, local: &Path, remote: &str) -> Result<u64, SshError> {
        let metadata = tokio::fs::metadata(local)
            .await
            .map_err(|_| SshError::LocalFile {
                path: local.to_path_buf(),
                reason: "file does not exist".into(),
            })?;
        if !metadata.is_file() {
            return Err(SshError::LocalFile {
                path: local.to_path_buf(),
                reason: "not a regular file".into(),
            });
        }

        let result = {
            let transport = self.live_transport()?;
            tokio::time::timeout(self.settings.transfer_timeout, transport.upload(local, remote))
                .await
        };
        let written = self.finish_transfer("File upload", result).await?;
        info!(
            "Uploaded {} to {}:{} ({} bytes)",
            local.display(),
            self.params.id(),
            remote,
            written
        );
        Ok(written)
    }

    /// Download `remote` into a local file, returning the bytes written.
    pub async fn download_file(&mut self, remote: &str, local: &Path) -> Result<u64, SshError> {
        let result = {
            let transport = self.live_transport()?;
            tokio::time::timeout(
                self.settings.transfer_timeout,
                transport.download(remote, local),
            )
            .await
        };
        let written = self.finish_transfer("File download", result).await?;
        info!(
            "Downloaded {}:{} to {} ({} bytes)",
            self.params.id(),
            remote,
            local.display(),
            written
        );
        Ok(written)
    }

    /// Entry names in a remote directory, without `.` and `..`.
    pub async fn list_directory(&mut self, remote: &str) -> Result<Vec<String>, SshError> {
        let result = {
            let transport = self.live_transport()?;
            tokio::time::timeout(self.settings.transfer_timeout, transport.list_dir(remote)).await
        };
        self.finish_transfer("Directory listing", result).await
    }

    /// Close the transport if any. Safe to call in any state.
    pub async fn disconnect(&mut self) {
        if self.transport.is_some() {
            info!("Disconnecting '{}'", self.params.id());
        }
        self.reset().await;
    }

    /// Human-readable status block. Probes liveness first.
    pub async fn connection_info(&mut self) -> String {
        let mut lines = vec![format!("Connection ID: {}", self.params.id())];

        if self.is_connected().await {
            let since = self
                .connected_since
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "Unknown".to_string());
            lines.push(format!("Status: {}", SessionState::Connected));
            lines.push(format!(
                "Host: {}:{}",
                self.params.host(),
                self.params.port()
            ));
            lines.push(format!("Username: {}", self.params.username()));
            lines.push(format!("Connected since: {}", since));
        } else {
            lines.push(format!("Status: {}", SessionState::Disconnected));
        }

        lines.join("\n")
    }

    fn live_transport(&self) -> Result<&dyn Transport, SshError> {
        match (self.state, self.transport.as_deref()) {
            (SessionState::Connected, Some(transport)) => Ok(transport),
            _ => Err(SshError::Connection(format!(
                "No active SSH connection for {}. Please connect first.",
                self.params.id()
            ))),
        }
    }

    async fn finish_transfer<T>(
        &mut self,
        operation: &str,
        result: Result<Result<T, SshError>, tokio::time::error::Elapsed>,
    ) -> Result<T, SshError> {
        let error = match result {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.settings.transfer_timeout),
        };

        warn!("{} failed on '{}': {}", operation, self.params.id(), error);
        self.reset().await;
        Err(SshError::Connection(format!(
            "{} failed on {}: {}",
            operation,
            self.params.id(),
            error
        )))
    }

    async fn reset(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.state = SessionState::Disconnected;
        self.connected_since = None;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("params", &self.params)
            .field("state", &self.state)
            .field("has_transport", &self.transport.is_some())
            .field("connected_since", &self.connected_since)
            .finish_non_exhaustive()
    }
}

/// Run `command` with `timeout` bounding the whole call, however the
/// transport spends it.
async fn exec_within(
    transport: &dyn Transport,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput, SshError> {
    tokio::time::timeout(timeout, transport.exec(command, timeout))
        .await
        .map_err(|_| SshError::Connection(format!("Command timed out after {:?}", timeout)))?
}

fn format_output(id: &str, output: CommandOutput, ignore_stderr: bool) -> Result<String, SshError> {
    let CommandOutput {
        stdout,
        stderr,
        exit_code,
    } = output;

    if !stderr.is_empty() && (ignore_stderr || exit_code == 0) {
        if stdout.is_empty() {
            return Ok(stderr);
        }
        return Ok(format!("{}\n[stderr]: {}", stdout, stderr));
    }

    if exit_code != 0 && !stderr.is_empty() {
        return Err(SshError::Connection(format!(
            "Command execution failed on {} (exit code {}): {}",
            id, exit_code, stderr
        )));
    }

    if exit_code != 0 {
        return Err(SshError::Connection(format!(
            "Command execution failed on {} with exit code {}",
            id, exit_code
        )));
    }

    Ok(stdout)
}
