//! Authentication strategies for SSH connections.
//!
//! A session authenticates with exactly one credential, picked from its
//! [`AuthMethod`](crate::ssh::params::AuthMethod). Each credential kind maps
//! to an [`AuthStrategy`] so the transport never inspects the credential
//! itself.
//!
//! # Available Strategies
//!
//! - [`PasswordAuth`]: Password-based authentication
//! - [`KeyAuth`]: Public key authentication with a decoded private key

mod key;
mod password;
mod traits;

pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use traits::AuthStrategy;

use std::fmt;

use crate::ssh::keys::LoadedKey;

/// Credential resolved from connection parameters, ready for the handshake.
#[derive(Clone)]
pub enum Credential {
    Password(String),
    Key(LoadedKey),
}

impl Credential {
    pub fn into_strategy(self) -> Box<dyn AuthStrategy> {
        match self {
            Credential::Password(password) => Box::new(PasswordAuth::new(password)),
            Credential::Key(key) => Box::new(KeyAuth::new(key)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::Key(_) => "key",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Credential::Password(<redacted>)"),
            Credential::Key(key) => write!(f, "Credential::Key({})", key.algorithm()),
        }
    }
}
