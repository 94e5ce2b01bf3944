//! Public key SSH authentication.

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;

use crate::ssh::error::SshError;
use crate::ssh::handler::SshClientHandler;
use crate::ssh::keys::LoadedKey;

use super::traits::AuthStrategy;

/// Public key authentication with an already decoded private key.
///
/// Decoding (and passphrase handling) happens in
/// [`load_private_key`](crate::ssh::keys::load_private_key) before the
/// handshake, so key errors surface before any network traffic.
pub struct KeyAuth {
    key: LoadedKey,
}

impl KeyAuth {
    pub fn new(key: LoadedKey) -> Self {
        Self { key }
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, SshError> {
        // For RSA keys, use the best supported hash algorithm
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!(
            "Authenticating with {} key, RSA hash {:?}",
            self.key.algorithm(),
            hash_alg
        );

        let key_with_hash = keys::PrivateKeyWithHashAlg::new(self.key.private_key(), hash_alg);

        let result = handle
            .authenticate_publickey(username, key_with_hash)
            .await
            .map_err(|e| SshError::Connection(format!("Key authentication failed: {}", e)))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "key"
    }
}
