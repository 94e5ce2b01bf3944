//! Private key loading.
//!
//! Key material is probed against a fixed algorithm order: RSA, DSA, ECDSA,
//! then Ed25519. Each probe decodes the material on its own and only accepts
//! a key of its own algorithm, so the first algorithm in the order always
//! wins. The order is part of the contract; do not replace it with format
//! sniffing.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::{self, Algorithm, PrivateKey};
use tracing::debug;

use super::error::KeyError;

/// Where key material comes from.
#[derive(Clone, Copy)]
pub enum KeyMaterial<'a> {
    Inline(&'a [u8]),
    File(&'a Path),
}

/// Algorithm family of a loaded private key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Dsa,
    Ecdsa,
    Ed25519,
}

impl KeyAlgorithm {
    /// Probe order used by [`load_private_key`]
    pub const PROBE_ORDER: [KeyAlgorithm; 4] = [
        KeyAlgorithm::Rsa,
        KeyAlgorithm::Dsa,
        KeyAlgorithm::Ecdsa,
        KeyAlgorithm::Ed25519,
    ];

    fn matches(self, algorithm: &Algorithm) -> bool {
        matches!(
            (self, algorithm),
            (KeyAlgorithm::Rsa, Algorithm::Rsa { .. })
                | (KeyAlgorithm::Dsa, Algorithm::Dsa)
                | (KeyAlgorithm::Ecdsa, Algorithm::Ecdsa { .. })
                | (KeyAlgorithm::Ed25519, Algorithm::Ed25519)
        )
    }

    fn probe(self, text: &str, passphrase: Option<&str>) -> Probe {
        match keys::decode_secret_key(text, passphrase) {
            Ok(key) if self.matches(&key.algorithm()) => Probe::Loaded(key),
            Ok(key) => Probe::Mismatch(format!(
                "not a {} key (found {})",
                self,
                key.algorithm().as_str()
            )),
            Err(keys::Error::KeyIsEncrypted) => Probe::NeedsPassphrase,
            Err(e) => Probe::Mismatch(e.to_string()),
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::Dsa => "DSA",
            KeyAlgorithm::Ecdsa => "ECDSA",
            KeyAlgorithm::Ed25519 => "Ed25519",
        };
        f.write_str(name)
    }
}

enum Probe {
    Loaded(PrivateKey),
    NeedsPassphrase,
    Mismatch(String),
}

/// A decoded private key ready for public key authentication.
#[derive(Clone)]
pub struct LoadedKey {
    algorithm: KeyAlgorithm,
    key: Arc<PrivateKey>,
}

impl LoadedKey {
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn private_key(&self) -> Arc<PrivateKey> {
        Arc::clone(&self.key)
    }
}

impl fmt::Debug for LoadedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Decode private key material, probing algorithms in [`KeyAlgorithm::PROBE_ORDER`].
///
/// Returns [`KeyError::PassphraseRequired`] when no probe succeeded but at
/// least one reported the key as encrypted, and [`KeyError::Format`] when the
/// material is not a key at all.
pub fn load_private_key(
    material: KeyMaterial<'_>,
    passphrase: Option<&str>,
) -> Result<LoadedKey, KeyError> {
    let text = read_material(material)?;

    let mut passphrase_required = false;
    let mut last_error = None;

    for algorithm in KeyAlgorithm::PROBE_ORDER {
        match algorithm.probe(&text, passphrase) {
            Probe::Loaded(key) => {
                debug!("Loaded {} private key", algorithm);
                return Ok(LoadedKey {
                    algorithm,
                    key: Arc::new(key),
                });
            }
            Probe::NeedsPassphrase => passphrase_required = true,
            Probe::Mismatch(reason) => {
                debug!("{} probe failed: {}", algorithm, reason);
                last_error = Some(reason);
            }
        }
    }

    if passphrase_required {
        return Err(KeyError::PassphraseRequired);
    }

    Err(KeyError::Format(last_error.unwrap_or_else(|| {
        "no supported key algorithm matched".to_string()
    })))
}

fn read_material(material: KeyMaterial<'_>) -> Result<String, KeyError> {
    match material {
        KeyMaterial::Inline(bytes) => String::from_utf8(bytes.to_vec())
            .map_err(|_| KeyError::Format("key data is not valid UTF-8 text".into())),
        KeyMaterial::File(path) => {
            if !path.exists() {
                return Err(KeyError::NotFound(PathBuf::from(path)));
            }
            std::fs::read_to_string(path).map_err(|source| KeyError::Read {
                path: PathBuf::from(path),
                source,
            })
        }
    }
}
