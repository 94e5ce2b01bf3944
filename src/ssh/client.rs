//! Transport layer: opening authenticated connections and running work on them.
//!
//! [`Session`](crate::ssh::session::Session) talks to the network only through
//! the [`Connector`] and [`Transport`] traits. The russh-backed
//! implementations live here; tests substitute scripted ones.
//!
//! ## Connection Lifecycle
//!
//! 1. **Client Configuration**: timeout, keepalive and compression settings.
//! 2. **Connection Establishment**: TCP connect + key exchange within the
//!    connect timeout. The host key is checked by the attached verifier.
//! 3. **Authentication**: exactly one [`Credential`] via its strategy.
//! 4. **Work**: commands on session channels, transfers on short-lived SFTP
//!    subsystem channels.
//!
//! Nothing here retries. A failed attempt is reported once and the caller
//! decides what to do next.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::{Channel, ChannelMsg, Disconnect, client};
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::auth::Credential;
use super::error::SshError;
use super::handler::SshClientHandler;
use super::trust::HostKeyVerifier;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status, -1 when the server sent none
    pub exit_code: i32,
}

/// Endpoint and options for a connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectTarget<'a> {
    pub host: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub timeout: Duration,
    pub compress: bool,
}

/// Opens authenticated transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect, verify the host key with `verifier`, and authenticate.
    ///
    /// Must return [`SshError::UnknownHostKey`] untouched when the verifier
    /// rejects the server, and [`SshError::Connection`] for every other
    /// failure. No partially opened transport may outlive an error.
    async fn connect(
        &self,
        target: &ConnectTarget<'_>,
        credential: Credential,
        verifier: Arc<dyn HostKeyVerifier>,
    ) -> Result<Box<dyn Transport>, SshError>;
}

/// An authenticated connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput, SshError>;

    /// Copy a local file to `remote`, returning the bytes written.
    async fn upload(&self, local: &Path, remote: &str) -> Result<u64, SshError>;

    /// Copy `remote` to a local file, returning the bytes written.
    async fn download(&self, remote: &str, local: &Path) -> Result<u64, SshError>;

    async fn list_dir(&self, remote: &str) -> Result<Vec<String>, SshError>;

    /// Best-effort teardown; never fails.
    async fn close(&self);
}

/// Build russh client configuration.
///
/// - Inactivity timeout disabled: liveness is checked explicitly by probes
/// - Keepalive every 30 seconds, max 3 unanswered
/// - ZLIB preferred when `compress` is set
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// [`Connector`] backed by russh.
#[derive(Debug, Clone, Copy, Default)]
pub struct RusshConnector;

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(
        &self,
        target: &ConnectTarget<'_>,
        credential: Credential,
        verifier: Arc<dyn HostKeyVerifier>,
    ) -> Result<Box<dyn Transport>, SshError> {
        let address = format!("{}:{}", target.host, target.port);
        let config = build_client_config(target.compress);
        let handler = SshClientHandler::new(target.host, target.port, verifier);

        let connect_future = client::connect(config, (target.host, target.port), handler);

        let mut handle = tokio::time::timeout(target.timeout, connect_future)
            .await
            .map_err(|_| {
                SshError::Connection(format!(
                    "Failed to connect to {}: timed out after {:?}",
                    address, target.timeout
                ))
            })?
            .map_err(|e| match e {
                SshError::UnknownHostKey(_) => e,
                other => {
                    SshError::Connection(format!("Failed to connect to {}: {}", address, other))
                }
            })?;

        let kind = credential.kind();
        let strategy = credential.into_strategy();
        let authenticated = match strategy.authenticate(&mut handle, target.username).await {
            Ok(authenticated) => authenticated,
            Err(e) => {
                disconnect_quietly(&handle).await;
                return Err(SshError::Connection(format!(
                    "Failed to connect with {}: {}",
                    kind, e
                )));
            }
        };

        if !authenticated {
            disconnect_quietly(&handle).await;
            return Err(SshError::Connection(format!(
                "Failed to connect with {}: Authentication failed for {}@{}",
                kind, target.username, address
            )));
        }

        info!(
            "Authenticated to {}@{} with {}",
            target.username,
            address,
            strategy.name()
        );
        Ok(Box::new(RusshTransport { handle }))
    }
}

async fn disconnect_quietly(handle: &client::Handle<SshClientHandler>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "Session closed", "en")
        .await
    {
        debug!("Error during disconnect: {}", e);
    }
}

/// [`Transport`] over an authenticated russh handle.
pub struct RusshTransport {
    handle: client::Handle<SshClientHandler>,
}

impl RusshTransport {
    /// Open a fresh SFTP subsystem channel. Callers close it after one operation.
    async fn open_sftp(&self) -> Result<SftpSession, SshError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Connection(format!("Failed to open channel: {}", e)))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| {
                SshError::Connection(format!("Failed to request SFTP subsystem: {}", e))
            })?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::Connection(format!("Failed to initialize SFTP client: {}", e)))
    }
}

/// Open a session channel into `opened`, exec `command` on it and read until
/// the channel closes.
async fn run_command(
    handle: &client::Handle<SshClientHandler>,
    command: &str,
    opened: &mut Option<Channel<client::Msg>>,
) -> Result<CommandOutput, SshError> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| SshError::Connection(format!("Failed to open channel: {}", e)))?;
    let channel = opened.insert(channel);

    channel
        .exec(true, command)
        .await
        .map_err(|e| SshError::Connection(format!("Failed to execute command: {}", e)))?;

    let mut stdout = Vec::with_capacity(4096);
    let mut stderr = Vec::with_capacity(1024);
    let mut exit_code: Option<u32> = None;

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                stdout.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                // ext == 1 is stderr in SSH protocol
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                exit_code = Some(exit_status);
            }
            Some(ChannelMsg::Eof) => {
                if exit_code.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: exit_code.map(|c| c as i32).unwrap_or(-1),
    })
}

async fn close_sftp(sftp: SftpSession) {
    if let Err(e) = sftp.close().await {
        debug!("Error closing SFTP session: {}", e);
    }
}

#[async_trait]
impl Transport for RusshTransport {
    /// Run a command on a new session channel and collect its output.
    ///
    /// `timeout` covers opening the channel, the exec request and reading the
    /// output. A timeout is an error: the channel is closed and no partial
    /// output is returned.
    async fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput, SshError> {
        let mut opened = None;
        let result =
            tokio::time::timeout(timeout, run_command(&self.handle, command, &mut opened)).await;

        if let Some(channel) = opened {
            let _ = channel.close().await;
        }

        match result {
            Ok(output) => output,
            Err(_) => {
                warn!("Command timed out after {:?}", timeout);
                Err(SshError::Connection(format!(
                    "Command timed out after {:?}",
                    timeout
                )))
            }
        }
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64, SshError> {
        let mut local_file = tokio::fs::File::open(local).await.map_err(|e| {
            SshError::Connection(format!("Failed to open {}: {}", local.display(), e))
        })?;

        let sftp = self.open_sftp().await?;
        let result = sftp_upload(&sftp, &mut local_file, remote).await;
        close_sftp(sftp).await;
        result
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, SshError> {
        let sftp = self.open_sftp().await?;
        let result = sftp_download(&sftp, remote, local).await;
        close_sftp(sftp).await;
        result
    }

    async fn list_dir(&self, remote: &str) -> Result<Vec<String>, SshError> {
        let sftp = self.open_sftp().await?;
        let result = sftp
            .read_dir(remote)
            .await
            .map(|entries| {
                entries
                    .map(|entry| entry.file_name())
                    .filter(|name| name != "." && name != "..")
                    .collect()
            })
            .map_err(|e| SshError::Connection(format!("Failed to list {}: {}", remote, e)));
        close_sftp(sftp).await;
        result
    }

    async fn close(&self) {
        disconnect_quietly(&self.handle).await;
    }
}

async fn sftp_upload(
    sftp: &SftpSession,
    local_file: &mut tokio::fs::File,
    remote: &str,
) -> Result<u64, SshError> {
    let mut remote_file = sftp
        .create(remote)
        .await
        .map_err(|e| SshError::Connection(format!("Failed to create {}: {}", remote, e)))?;

    let copied = tokio::io::copy(local_file, &mut remote_file)
        .await
        .map_err(|e| SshError::Connection(format!("Upload failed: {}", e)))?;
    remote_file
        .shutdown()
        .await
        .map_err(|e| SshError::Connection(format!("Upload failed: {}", e)))?;

    Ok(copied)
}

async fn sftp_download(sftp: &SftpSession, remote: &str, local: &Path) -> Result<u64, SshError> {
    let mut remote_file = sftp
        .open(remote)
        .await
        .map_err(|e| SshError::Connection(format!("Failed to open {}: {}", remote, e)))?;
    let mut local_file = tokio::fs::File::create(local).await.map_err(|e| {
        SshError::Connection(format!("Failed to create {}: {}", local.display(), e))
    })?;

    let copied = tokio::io::copy(&mut remote_file, &mut local_file)
        .await
        .map_err(|e| SshError::Connection(format!("Download failed: {}", e)))?;
    local_file
        .flush()
        .await
        .map_err(|e| SshError::Connection(format!("Download failed: {}", e)))?;

    Ok(copied)
}
