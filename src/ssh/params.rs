//! Validated connection parameters.

use std::fmt;
use std::path::{Path, PathBuf};

use super::error::SshError;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// The single credential source a connection authenticates with.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Password(String),
    /// Private key content (OpenSSH or PEM text)
    KeyMaterial(Vec<u8>),
    /// Path to a private key file; `~` is expanded at connect time
    KeyPath(PathBuf),
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::KeyMaterial(_) => "private_key",
            AuthMethod::KeyPath(_) => "private_key_path",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("Password(<redacted>)"),
            AuthMethod::KeyMaterial(_) => f.write_str("KeyMaterial(<redacted>)"),
            AuthMethod::KeyPath(path) => f.debug_tuple("KeyPath").field(path).finish(),
        }
    }
}

/// Everything needed to (re)open a session to one endpoint.
///
/// Immutable once built; construct through [`ConnectionParameters::builder`].
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    id: String,
    host: String,
    username: String,
    port: u16,
    auth: AuthMethod,
    key_passphrase: Option<String>,
    known_hosts_path: Option<PathBuf>,
}

impl ConnectionParameters {
    pub fn builder(
        id: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
    ) -> ConnectionParametersBuilder {
        ConnectionParametersBuilder {
            id: id.into(),
            host: host.into(),
            username: username.into(),
            port: DEFAULT_SSH_PORT,
            password: None,
            private_key: None,
            private_key_path: None,
            key_passphrase: None,
            known_hosts_path: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auth(&self) -> &AuthMethod {
        &self.auth
    }

    pub fn key_passphrase(&self) -> Option<&str> {
        self.key_passphrase.as_deref()
    }

    /// Custom trust store consulted in addition to the system one
    pub fn known_hosts_path(&self) -> Option<&Path> {
        self.known_hosts_path.as_deref()
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("port", &self.port)
            .field("auth", &self.auth)
            .field(
                "key_passphrase",
                &self.key_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .field("known_hosts_path", &self.known_hosts_path)
            .finish()
    }
}

/// Builder enforcing the "exactly one auth method" rule.
pub struct ConnectionParametersBuilder {
    id: String,
    host: String,
    username: String,
    port: u16,
    password: Option<String>,
    private_key: Option<Vec<u8>>,
    private_key_path: Option<PathBuf>,
    key_passphrase: Option<String>,
    known_hosts_path: Option<PathBuf>,
}

impl ConnectionParametersBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn private_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    pub fn private_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    pub fn key_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.key_passphrase = Some(passphrase.into());
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ConnectionParameters, SshError> {
        if self.id.trim().is_empty() {
            return Err(SshError::InvalidParameters(
                "Connection ID must be provided".into(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(SshError::InvalidParameters("Host must be provided".into()));
        }
        if self.username.trim().is_empty() {
            return Err(SshError::InvalidParameters(
                "Username must be provided".into(),
            ));
        }

        let mut methods = Vec::with_capacity(1);
        if let Some(password) = self.password {
            methods.push(AuthMethod::Password(password));
        }
        if let Some(key) = self.private_key {
            methods.push(AuthMethod::KeyMaterial(key));
        }
        if let Some(path) = self.private_key_path {
            methods.push(AuthMethod::KeyPath(path));
        }

        let auth = match methods.len() {
            0 => {
                return Err(SshError::InvalidParameters(
                    "One authentication method must be provided (password, private_key, or private_key_path)".into(),
                ));
            }
            1 => methods.remove(0),
            _ => {
                let names: Vec<_> = methods.iter().map(AuthMethod::name).collect();
                return Err(SshError::InvalidParameters(format!(
                    "Only one authentication method may be provided, got: {}",
                    names.join(", ")
                )));
            }
        };

        Ok(ConnectionParameters {
            id: self.id,
            host: self.host,
            username: self.username,
            port: self.port,
            auth,
            key_passphrase: self.key_passphrase,
            known_hosts_path: self.known_hosts_path,
        })
    }
}
