//! Configuration resolution for SSH sessions.
//!
//! Values follow a three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided value (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_CONNECT_TIMEOUT` | 10s | Handshake timeout in seconds |
//! | `SSH_COMMAND_TIMEOUT` | 30s | Command execution timeout in seconds |
//! | `SSH_TRANSFER_TIMEOUT` | 300s | SFTP transfer timeout in seconds |
//! | `SSH_COMPRESSION` | true | Enable zlib compression |
//! | `SSH_MAX_CONNECTIONS` | 10 | Live sessions allowed in the pool |
//! | `SSH_PRIVATE_KEY_PATH` | `~/.ssh/id_rsa` | Key file used when no credential is given |
//! | `SSH_KNOWN_HOSTS` | `~/.ssh/known_hosts` | System trust store |

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default handshake timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default command execution timeout in seconds
pub(crate) const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Default SFTP transfer timeout in seconds
pub(crate) const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 300;

/// Default number of live sessions in a pool
pub(crate) const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Liveness probes must stay cheap
pub(crate) const LIVENESS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) const DEFAULT_PRIVATE_KEY_PATH: &str = "~/.ssh/id_rsa";

pub(crate) const DEFAULT_KNOWN_HOSTS_PATH: &str = "~/.ssh/known_hosts";

pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT";
pub(crate) const TRANSFER_TIMEOUT_ENV_VAR: &str = "SSH_TRANSFER_TIMEOUT";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";
pub(crate) const MAX_CONNECTIONS_ENV_VAR: &str = "SSH_MAX_CONNECTIONS";
pub(crate) const PRIVATE_KEY_PATH_ENV_VAR: &str = "SSH_PRIVATE_KEY_PATH";
pub(crate) const KNOWN_HOSTS_ENV_VAR: &str = "SSH_KNOWN_HOSTS";

/// Settings shared by every session a pool creates.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    pub transfer_timeout: Duration,
    pub compress: bool,
    /// Trust store consulted for every host, in addition to a per-connection store
    pub system_known_hosts: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            probe_timeout: LIVENESS_PROBE_TIMEOUT,
            transfer_timeout: Duration::from_secs(DEFAULT_TRANSFER_TIMEOUT_SECS),
            compress: true,
            system_known_hosts: Some(expand_home(DEFAULT_KNOWN_HOSTS_PATH)),
        }
    }
}

impl SessionSettings {
    /// Resolve every setting from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            connect_timeout: resolve_connect_timeout(None),
            probe_timeout: LIVENESS_PROBE_TIMEOUT,
            transfer_timeout: resolve_transfer_timeout(None),
            compress: resolve_compression(None),
            system_known_hosts: Some(resolve_known_hosts_path(None)),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.parse::<T>().ok())
}

/// Resolve the handshake timeout with priority: parameter -> env var -> default
pub fn resolve_connect_timeout(timeout_param: Option<u64>) -> Duration {
    let secs = timeout_param
        .or_else(|| env_parsed(CONNECT_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Resolve the command timeout with priority: parameter -> env var -> default
pub fn resolve_command_timeout(timeout_param: Option<u64>) -> Duration {
    let secs = timeout_param
        .or_else(|| env_parsed(COMMAND_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Resolve the SFTP transfer timeout with priority: parameter -> env var -> default
pub fn resolve_transfer_timeout(timeout_param: Option<u64>) -> Duration {
    let secs = timeout_param
        .or_else(|| env_parsed(TRANSFER_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_TRANSFER_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Resolve the pool capacity with priority: parameter -> env var -> default
pub fn resolve_max_connections(max_param: Option<usize>) -> usize {
    max_param
        .or_else(|| env_parsed(MAX_CONNECTIONS_ENV_VAR))
        .unwrap_or(DEFAULT_MAX_CONNECTIONS)
}

/// Resolve the compression setting with priority: parameter -> env var -> default (true)
pub fn resolve_compression(compress_param: Option<bool>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    true
}

/// Resolve the fallback private key path, expanding `~`.
pub fn resolve_private_key_path(path_param: Option<&str>) -> PathBuf {
    resolve_path(path_param, PRIVATE_KEY_PATH_ENV_VAR, DEFAULT_PRIVATE_KEY_PATH)
}

/// Resolve the system known_hosts path, expanding `~`.
pub fn resolve_known_hosts_path(path_param: Option<&str>) -> PathBuf {
    resolve_path(path_param, KNOWN_HOSTS_ENV_VAR, DEFAULT_KNOWN_HOSTS_PATH)
}

fn resolve_path(path_param: Option<&str>, env_var: &str, default: &str) -> PathBuf {
    if let Some(path) = path_param {
        return expand_home(path);
    }

    match env::var(env_var) {
        Ok(path) if !path.is_empty() => expand_home(&path),
        _ => expand_home(default),
    }
}

/// Expand a leading `~` to the current user's home directory.
///
/// Paths without `~`, or with no resolvable home directory, are returned as-is.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = if path == "~" {
        Some("")
    } else {
        path.strip_prefix("~/")
    };

    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => Path::new(path).to_path_buf(),
    }
}
