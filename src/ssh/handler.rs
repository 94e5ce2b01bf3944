//! russh client handler with fail-closed host key checking.
//!
//! Unlike `StrictHostKeyChecking=no`, every server key is passed to a
//! [`HostKeyVerifier`]. A rejection aborts the handshake with
//! [`SshError::UnknownHostKey`], which russh hands back from
//! `client::connect` unchanged.

use std::sync::Arc;

use russh::{client, keys};
use tracing::debug;

use super::error::SshError;
use super::trust::{HostKeyVerifier, PresentedHostKey, TrustDecision};

/// Client handler for one connection attempt.
pub struct SshClientHandler {
    host: String,
    port: u16,
    verifier: Arc<dyn HostKeyVerifier>,
}

impl SshClientHandler {
    pub fn new(host: impl Into<String>, port: u16, verifier: Arc<dyn HostKeyVerifier>) -> Self {
        Self {
            host: host.into(),
            port,
            verifier,
        }
    }

    fn check(&self, server_public_key: &keys::PublicKey) -> Result<bool, SshError> {
        let presented = PresentedHostKey::from_public_key(server_public_key);
        debug!(
            "Server {}:{} presented {} {}",
            self.host, self.port, presented.key_type, presented.fingerprint
        );

        match self.verifier.verify(&self.host, self.port, &presented) {
            TrustDecision::Accept => Ok(true),
            TrustDecision::Reject(details) => Err(SshError::UnknownHostKey(details)),
        }
    }
}

impl client::Handler for SshClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        self.check(server_public_key)
    }
}
