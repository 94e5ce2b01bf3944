//! SSH session core.
//!
//! # Module Structure
//!
//! - `params`: Validated connection parameters (exactly one auth method)
//! - `keys`: Private key loading with a fixed algorithm probe order
//! - `trust`: known_hosts trust stores, fail-closed verification and key registration
//! - `handler`: russh client handler wired to the verifier
//! - `auth`: Authentication strategies (password, public key)
//! - `client`: `Connector`/`Transport` seam and the russh implementation
//! - `session`: Single connection state machine
//! - `pool`: Bounded session registry with retained parameters
//! - `config`: Environment-driven configuration
//! - `error`: Error types

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod keys;
pub mod params;
pub mod pool;
pub mod session;
pub mod trust;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{CommandOutput, Connector, RusshConnector, Transport};
pub use config::SessionSettings;
pub use error::{KeyError, SshError, UnknownHostKey};
pub use keys::{KeyAlgorithm, KeyMaterial, LoadedKey, load_private_key};
pub use params::{AuthMethod, ConnectionParameters};
pub use pool::{SessionPool, SessionSummary};
pub use session::{Session, SessionState};
pub use trust::{
    HostKeyVerifier, KnownHostsVerifier, RegisterOutcome, TrustDecision, TrustStore,
    register_host_key,
};
