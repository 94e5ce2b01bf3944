//! Error types for the SSH session core.
//!
//! Every failure is returned to the immediate caller as an [`SshError`]. The
//! core never retries; [`SshError::is_transient`] is a hint for callers that
//! want to apply their own retry policy.
//!
//! # Classification Strategy
//!
//! 1. **Key, trust and parameter errors** are permanent. Retrying with the same
//!    input cannot succeed.
//! 2. **Connection errors** are classified by message. Authentication failures
//!    win over network keywords so bad credentials are never hammered.
//! 3. **Capacity** is transient (a slot frees up once a session closes).

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Authentication failure patterns inside connection errors.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "authentication rejected",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
];

/// Network patterns that usually resolve on their own.
const TRANSIENT_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "timed out",
    "timeout",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "broken pipe",
    "failed to connect",
];

/// Top-level error for sessions, the pool and the trust store.
#[derive(Debug, Error)]
pub enum SshError {
    #[error("Invalid connection parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    UnknownHostKey(#[from] UnknownHostKey),

    #[error("{0}")]
    Connection(String),

    #[error("Connection limit reached ({max})")]
    Capacity { max: usize },

    #[error("Connection ID '{0}' not found")]
    NotFound(String),

    #[error("Local file {}: {reason}", .path.display())]
    LocalFile { path: PathBuf, reason: String },

    #[error("Trust store {}: {source}", .path.display())]
    TrustStore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::Connection(format!("SSH transport error: {}", err))
    }
}

impl SshError {
    /// Whether retrying the same operation later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SshError::Connection(message) => is_transient_message(message),
            SshError::Capacity { .. } => true,
            _ => false,
        }
    }
}

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();

    if AUTH_ERRORS.iter().any(|pattern| lower.contains(pattern)) {
        return false;
    }

    TRANSIENT_ERRORS.iter().any(|pattern| lower.contains(pattern))
}

/// Private key could not be turned into a credential.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Password-protected key provided but no valid passphrase was given")]
    PassphraseRequired,

    #[error("Key format not supported or invalid key data: {0}")]
    Format(String),

    #[error("Key file not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read key file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Host key rejected by the trust policy.
///
/// Carries everything needed to register the key out-of-band with
/// [`register_host_key`](crate::ssh::trust::register_host_key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownHostKey {
    /// Host token as written to the trust store (`host` or `[host]:port`)
    pub host: String,
    pub key_type: String,
    /// SHA256 fingerprint (`SHA256:...`)
    pub fingerprint: String,
    /// Base64 public key material
    pub key: String,
    /// True when the host is trusted with a different key
    pub changed: bool,
}

impl fmt::Display for UnknownHostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Host key verification failed for {}", self.host)?;
        if self.changed {
            write!(f, " (key differs from the trusted one)")?;
        }
        write!(
            f,
            ". Server sent:\n  {} {}\n  fingerprint: {}\n\n\
             To trust this key, register it with:\n  host: {}\n  key: {}\n  key_type: {}",
            self.key_type, self.key, self.fingerprint, self.host, self.key, self.key_type
        )
    }
}

impl std::error::Error for UnknownHostKey {}
