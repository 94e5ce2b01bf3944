//! Fail-closed host key trust.
//!
//! A [`HostKeyVerifier`] makes the single accept/reject decision for the key a
//! server presents during the handshake. The default [`KnownHostsVerifier`]
//! only accepts keys already present in a [`TrustStore`]; anything else is
//! rejected with an [`UnknownHostKey`] carrying the data needed to register
//! the key out-of-band via [`register_host_key`]. There is no
//! trust-on-first-use and verification never writes to a store.
//!
//! # Store Format
//!
//! One entry per line, OpenSSH `known_hosts` style:
//!
//! ```text
//! example.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAA...
//! [example.com]:2222 ssh-rsa AAAAB3NzaC1yc2EAAAA...
//! ```
//!
//! Hashed host names (`|1|salt|hash`, as written by `HashKnownHosts yes`)
//! match a token when HMAC-SHA1 of the token under the salt equals the hash.
//! Comments and blank lines are skipped.

use std::fs;
use std::io;
use std::path::Path;

use aws_lc_rs::hmac;
use base64::prelude::*;
use russh::keys::{Algorithm, HashAlg, PublicKey, PublicKeyBase64};
use tracing::{debug, info, warn};

use super::error::{SshError, UnknownHostKey};
use super::params::DEFAULT_SSH_PORT;

/// Trust store token for a host: `host`, or `[host]:port` off the default port.
pub fn host_token(host: &str, port: u16) -> String {
    if port == DEFAULT_SSH_PORT {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// Key presented by a server during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedHostKey {
    pub key_type: String,
    /// Base64 public key material, as stored in known_hosts
    pub key: String,
    /// `SHA256:...` fingerprint
    pub fingerprint: String,
}

impl PresentedHostKey {
    pub fn from_public_key(key: &PublicKey) -> Self {
        let key_type = match key.algorithm() {
            Algorithm::Rsa { .. } => "ssh-rsa".to_string(),
            other => other.as_str().to_string(),
        };

        Self {
            key_type,
            key: key.public_key_base64(),
            fingerprint: key.fingerprint(HashAlg::Sha256).to_string(),
        }
    }
}

/// Outcome of a trust check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    Accept,
    Reject(UnknownHostKey),
}

/// Single decision point for host key trust.
pub trait HostKeyVerifier: Send + Sync {
    fn verify(&self, host: &str, port: u16, presented: &PresentedHostKey) -> TrustDecision;
}

/// One `{host_token, key_type, key_material}` line of a trust store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustEntry {
    pub host_token: String,
    pub key_type: String,
    pub key: String,
}

impl TrustEntry {
    fn to_line(&self) -> String {
        format!("{} {} {}", self.host_token, self.key_type, self.key)
    }

    /// Whether this entry names `token`, directly or through a hashed host.
    pub fn matches(&self, token: &str) -> bool {
        match self.host_token.strip_prefix("|1|") {
            Some(hashed) => hashed_host_matches(hashed, token),
            None => self.host_token == token,
        }
    }
}

/// Check a `salt|hash` pair (both base64) against `token`.
fn hashed_host_matches(hashed: &str, token: &str) -> bool {
    let Some((salt, hash)) = hashed.split_once('|') else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (BASE64_STANDARD.decode(salt), BASE64_STANDARD.decode(hash)) else {
        return false;
    };

    // SHA-1 is what OpenSSH uses for hashed known_hosts names.
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, &salt);
    hmac::verify(&key, token.as_bytes(), &hash).is_ok()
}

/// Read-only set of trusted host keys.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    entries: Vec<TrustEntry>,
}

impl TrustStore {
    pub fn in_memory(entries: Vec<TrustEntry>) -> Self {
        Self { entries }
    }

    /// Load a store from disk. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self, SshError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(SshError::TrustStore {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let store = Self::parse(&content);
        debug!(
            "Loaded {} trusted host key(s) from {}",
            store.entries.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (Some(hosts), Some(key_type), Some(key)) = (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };

            for host in hosts.split(',') {
                if host.is_empty() {
                    continue;
                }
                entries.push(TrustEntry {
                    host_token: host.to_string(),
                    key_type: key_type.to_string(),
                    key: key.to_string(),
                });
            }
        }

        Self { entries }
    }

    pub fn entries(&self) -> &[TrustEntry] {
        &self.entries
    }

    fn entries_for<'a>(&'a self, token: &'a str) -> impl Iterator<Item = &'a TrustEntry> + 'a {
        self.entries.iter().filter(move |e| e.matches(token))
    }
}

/// Verifier backed by one or more trust stores.
#[derive(Debug, Clone, Default)]
pub struct KnownHostsVerifier {
    stores: Vec<TrustStore>,
}

impl KnownHostsVerifier {
    pub fn new(stores: Vec<TrustStore>) -> Self {
        Self { stores }
    }

    /// Build a verifier from the system store and an optional custom store.
    ///
    /// Unreadable stores are skipped with a warning; they cannot cause a key
    /// to be accepted.
    pub fn from_paths(system: Option<&Path>, custom: Option<&Path>) -> Self {
        let stores = system
            .into_iter()
            .chain(custom)
            .filter_map(|path| match TrustStore::load(path) {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!("Failed to load trust store: {}", e);
                    None
                }
            })
            .collect();

        Self { stores }
    }
}

impl HostKeyVerifier for KnownHostsVerifier {
    fn verify(&self, host: &str, port: u16, presented: &PresentedHostKey) -> TrustDecision {
        let token = host_token(host, port);
        let mut known = false;

        for entry in self.stores.iter().flat_map(|s| s.entries_for(&token)) {
            known = true;
            if entry.key_type == presented.key_type && entry.key == presented.key {
                debug!("Host key verified for {} ({})", token, presented.key_type);
                return TrustDecision::Accept;
            }
        }

        if known {
            warn!(
                "HOST KEY MISMATCH for {} ({}): presented {}",
                token, presented.key_type, presented.fingerprint
            );
        } else {
            info!(
                "Rejecting unknown host {} ({} {})",
                token, presented.key_type, presented.fingerprint
            );
        }

        TrustDecision::Reject(UnknownHostKey {
            host: token,
            key_type: presented.key_type.clone(),
            fingerprint: presented.fingerprint.clone(),
            key: presented.key.clone(),
            changed: known,
        })
    }
}

/// Result of [`register_host_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    Updated,
}

/// Trust `key` for `host_token` by writing it to the store at `path`.
///
/// Creates the file (and its parent directory) when absent. An existing line
/// whose first field is exactly `host_token` is rewritten in place; otherwise
/// a line is appended. Other lines are preserved verbatim.
///
/// Each field must be a single non-empty word and `key` must be base64, so one
/// call can never write more than one entry.
pub fn register_host_key(
    host_token: &str,
    key_type: &str,
    key: &str,
    path: &Path,
) -> Result<RegisterOutcome, SshError> {
    validate_entry_fields(host_token, key_type, key)?;

    let store_err = |source: io::Error| SshError::TrustStore {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            create_private_dir(parent).map_err(store_err)?;
        }
    }

    let existing = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(store_err(e)),
    };

    let entry = TrustEntry {
        host_token: host_token.to_string(),
        key_type: key_type.to_string(),
        key: key.to_string(),
    }
    .to_line();

    let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();
    let position = lines
        .iter()
        .position(|line| line.split_whitespace().next() == Some(host_token));

    let outcome = match position {
        Some(index) => {
            lines[index] = entry;
            RegisterOutcome::Updated
        }
        None => {
            lines.push(entry);
            RegisterOutcome::Added
        }
    };

    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(path, content).map_err(store_err)?;

    info!(
        "Host key for '{}' {} in {}",
        host_token,
        match outcome {
            RegisterOutcome::Added => "added",
            RegisterOutcome::Updated => "updated",
        },
        path.display()
    );

    Ok(outcome)
}

fn validate_entry_fields(host_token: &str, key_type: &str, key: &str) -> Result<(), SshError> {
    for (name, value) in [("host", host_token), ("key_type", key_type), ("key", key)] {
        if value.is_empty() {
            return Err(SshError::InvalidParameters(format!("{} must not be empty", name)));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(SshError::InvalidParameters(format!(
                "{} must be a single word without whitespace or line breaks",
                name
            )));
        }
    }

    if BASE64_STANDARD.decode(key).is_err() {
        return Err(SshError::InvalidParameters(
            "key must be base64 public key material".to_string(),
        ));
    }
    Ok(())
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}
