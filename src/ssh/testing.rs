//! Scripted in-process [`Connector`] and [`Transport`] for tests.
//!
//! Every transport opened by a [`FakeConnector`] shares one [`FakeRemote`],
//! which holds command responses, a remote file table, fault and stall
//! switches, an optional host key and counters the tests assert on.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::PublicKey;

use super::auth::Credential;
use super::client::{CommandOutput, ConnectTarget, Connector, Transport};
use super::config::SessionSettings;
use super::error::SshError;
use super::session::{
    CONNECT_PROBE_COMMAND, CONNECT_PROBE_SENTINEL, LIVENESS_PROBE_COMMAND, LIVENESS_PROBE_SENTINEL,
};
use super::trust::{HostKeyVerifier, PresentedHostKey, TrustDecision};

/// Settings that never read the user's known_hosts.
pub(crate) fn test_settings() -> SessionSettings {
    SessionSettings {
        connect_timeout: Duration::from_secs(1),
        probe_timeout: Duration::from_secs(1),
        transfer_timeout: Duration::from_secs(5),
        compress: false,
        system_known_hosts: None,
    }
}

#[derive(Default)]
pub(crate) struct FakeRemote {
    responses: Mutex<HashMap<String, CommandOutput>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    commands: Mutex<Vec<String>>,
    connect_error: Mutex<Option<String>>,
    last_credential: Mutex<Option<&'static str>>,
    host_key: Mutex<Option<PresentedHostKey>>,
    faulted: AtomicBool,
    stalled: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeRemote {
    pub(crate) fn new() -> Arc<Self> {
        let remote = Self::default();
        remote.script(
            CONNECT_PROBE_COMMAND,
            &format!("{}\n", CONNECT_PROBE_SENTINEL),
            "",
            0,
        );
        remote.script(
            LIVENESS_PROBE_COMMAND,
            &format!("{}\n", LIVENESS_PROBE_SENTINEL),
            "",
            0,
        );
        Arc::new(remote)
    }

    pub(crate) fn script(&self, command: &str, stdout: &str, stderr: &str, exit_code: i32) {
        self.responses.lock().unwrap().insert(
            command.to_string(),
            CommandOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
            },
        );
    }

    /// Make every subsequent transport call fail like a dropped connection.
    pub(crate) fn set_faulted(&self, faulted: bool) {
        self.faulted.store(faulted, Ordering::SeqCst);
    }

    /// Make every subsequent command hang without ever answering.
    pub(crate) fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Present `openssh` (a `.pub` line) during the handshake, so connects go
    /// through the session's verifier.
    pub(crate) fn present_host_key(&self, openssh: &str) {
        let key = PublicKey::from_openssh(openssh.trim()).unwrap();
        *self.host_key.lock().unwrap() = Some(PresentedHostKey::from_public_key(&key));
    }

    pub(crate) fn fail_connect(&self, message: &str) {
        *self.connect_error.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn exec_count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn last_credential(&self) -> Option<&'static str> {
        *self.last_credential.lock().unwrap()
    }

    fn check_fault(&self) -> Result<(), SshError> {
        if self.faulted.load(Ordering::SeqCst) {
            return Err(SshError::Connection("Connection reset by peer".into()));
        }
        Ok(())
    }
}

pub(crate) struct FakeConnector {
    remote: Arc<FakeRemote>,
}

impl FakeConnector {
    pub(crate) fn new(remote: Arc<FakeRemote>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        target: &ConnectTarget<'_>,
        credential: Credential,
        verifier: Arc<dyn HostKeyVerifier>,
    ) -> Result<Box<dyn Transport>, SshError> {
        self.remote.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.remote.connect_error.lock().unwrap().clone() {
            return Err(SshError::Connection(message));
        }

        let host_key = self.remote.host_key.lock().unwrap().clone();
        if let Some(presented) = host_key {
            if let TrustDecision::Reject(details) =
                verifier.verify(target.host, target.port, &presented)
            {
                return Err(SshError::UnknownHostKey(details));
            }
        }
        *self.remote.last_credential.lock().unwrap() = Some(credential.kind());

        Ok(Box::new(FakeTransport {
            remote: Arc::clone(&self.remote),
        }))
    }
}

struct FakeTransport {
    remote: Arc<FakeRemote>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn exec(&self, command: &str, _timeout: Duration) -> Result<CommandOutput, SshError> {
        self.remote.commands.lock().unwrap().push(command.to_string());
        self.remote.check_fault()?;
        if self.remote.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let scripted = self.remote.responses.lock().unwrap().get(command).cloned();
        Ok(scripted.unwrap_or_else(|| CommandOutput {
            stdout: String::new(),
            stderr: format!("{}: command not found", command),
            exit_code: 127,
        }))
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64, SshError> {
        self.remote.check_fault()?;
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| SshError::Connection(format!("Upload failed: {}", e)))?;
        let size = data.len() as u64;
        self.remote
            .files
            .lock()
            .unwrap()
            .insert(remote.to_string(), data);
        Ok(size)
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, SshError> {
        self.remote.check_fault()?;
        let data = self
            .remote
            .files
            .lock()
            .unwrap()
            .get(remote)
            .cloned()
            .ok_or_else(|| SshError::Connection(format!("Failed to open {}: No such file", remote)))?;
        tokio::fs::write(local, &data)
            .await
            .map_err(|e| SshError::Connection(format!("Download failed: {}", e)))?;
        Ok(data.len() as u64)
    }

    async fn list_dir(&self, remote: &str) -> Result<Vec<String>, SshError> {
        self.remote.check_fault()?;
        let prefix = format!("{}/", remote.trim_end_matches('/'));
        let mut names: Vec<String> = self
            .remote
            .files
            .lock()
            .unwrap()
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn close(&self) {
        self.remote.closes.fetch_add(1, Ordering::SeqCst);
    }
}
