//! Bounded registry of sessions keyed by caller-chosen ids.
//!
//! The pool keeps two tables:
//!
//! - **live**: open [`Session`]s, at most `max_connections` of them
//! - **retained**: the [`ConnectionParameters`] of every id ever created,
//!   kept across `close()` so a session can be rebuilt later
//!
//! Every live id has retained parameters. Sessions never reference the pool.
//!
//! # Eviction
//!
//! Eviction only runs right before a session is built. It probes each live
//! session and drops those whose probe fails (including sessions that were
//! never connected). There is no background timer.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::client::{Connector, RusshConnector};
use super::config::{SessionSettings, resolve_max_connections};
use super::error::SshError;
use super::params::ConnectionParameters;
use super::session::{Session, SessionState};

/// Point-in-time view of one live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub state: SessionState,
    pub connected_since: Option<DateTime<Utc>>,
}

impl SessionSummary {
    fn from_session(session: &Session) -> Self {
        let params = session.params();
        Self {
            id: params.id().to_string(),
            host: params.host().to_string(),
            port: params.port(),
            username: params.username().to_string(),
            state: session.state(),
            connected_since: session.connected_since(),
        }
    }
}

pub struct SessionPool {
    live: BTreeMap<String, Session>,
    retained: HashMap<String, ConnectionParameters>,
    max_connections: usize,
    connector: Arc<dyn Connector>,
    settings: Arc<SessionSettings>,
}

impl SessionPool {
    pub fn new(
        max_connections: usize,
        connector: Arc<dyn Connector>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            live: BTreeMap::new(),
            retained: HashMap::new(),
            max_connections,
            connector,
            settings: Arc::new(settings),
        }
    }

    /// Pool over real SSH connections, configured from the environment.
    pub fn from_env() -> Self {
        Self::new(
            resolve_max_connections(None),
            Arc::new(RusshConnector),
            SessionSettings::from_env(),
        )
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Whether `id` has a live session.
    pub fn has_session(&self, id: &str) -> bool {
        self.live.contains_key(id)
    }

    /// Whether parameters are retained for `id`.
    pub fn has_params(&self, id: &str) -> bool {
        self.retained.contains_key(id)
    }

    /// Return the live session for `id`, or rebuild a `Disconnected` one
    /// from retained parameters.
    ///
    /// A returned live session may itself be disconnected; callers check
    /// [`Session::is_connected`] before executing.
    ///
    /// # Errors
    ///
    /// - [`SshError::NotFound`] when `id` has neither a session nor parameters
    /// - [`SshError::Capacity`] when no slot is free after eviction
    pub async fn get_or_create(&mut self, id: &str) -> Result<&mut Session, SshError> {
        if !self.live.contains_key(id) {
            let params = self
                .retained
                .get(id)
                .cloned()
                .ok_or_else(|| SshError::NotFound(id.to_string()))?;

            self.close_idle().await;
            self.ensure_capacity()?;

            info!("Rebuilding session '{}' from retained parameters", id);
            let session = self.build_session(params);
            self.live.insert(id.to_string(), session);
        }

        self.live
            .get_mut(id)
            .ok_or_else(|| SshError::NotFound(id.to_string()))
    }

    /// Register a new `Disconnected` session for `params`.
    ///
    /// A live session with the same id is disconnected and replaced. The
    /// caller connects the returned session.
    pub async fn create(&mut self, params: ConnectionParameters) -> Result<&mut Session, SshError> {
        let id = params.id().to_string();

        if let Some(mut previous) = self.live.remove(&id) {
            info!("Replacing existing session '{}'", id);
            previous.disconnect().await;
        }

        self.close_idle().await;
        self.ensure_capacity()?;

        self.retained.insert(id.clone(), params.clone());
        let session = self.build_session(params);
        Ok(self.live.entry(id).or_insert(session))
    }

    /// Disconnect and drop the live session, keeping its parameters.
    pub async fn close(&mut self, id: &str) -> Option<Session> {
        let mut session = self.live.remove(id)?;
        session.disconnect().await;
        info!("Closed session '{}'", id);
        Some(session)
    }

    /// Close the session and forget its parameters.
    pub async fn remove(&mut self, id: &str) -> Option<Session> {
        let session = self.close(id).await;
        if self.retained.remove(id).is_some() {
            info!("Forgot connection parameters for '{}'", id);
        }
        session
    }

    /// Snapshot of the live registry without probing.
    pub fn list_live(&self) -> Vec<SessionSummary> {
        self.live.values().map(SessionSummary::from_session).collect()
    }

    /// Live sessions in id order, for status probing.
    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.live.values_mut()
    }

    /// Drop every live session whose liveness probe fails. Returns how many
    /// were evicted.
    pub async fn close_idle(&mut self) -> usize {
        let mut idle = Vec::new();
        for (id, session) in self.live.iter_mut() {
            if !session.is_connected().await {
                idle.push(id.clone());
            }
        }

        for id in &idle {
            if let Some(mut session) = self.live.remove(id) {
                session.disconnect().await;
            }
            info!("Evicted idle session '{}'", id);
        }

        idle.len()
    }

    /// Disconnect every live session. Retained parameters survive.
    pub async fn close_all(&mut self) {
        let sessions = std::mem::take(&mut self.live);
        for (id, mut session) in sessions {
            session.disconnect().await;
            info!("Closed session '{}'", id);
        }
    }

    /// Close everything and forget all parameters.
    pub async fn shutdown(&mut self) {
        self.close_all().await;
        self.retained.clear();
        info!("Session pool shut down");
    }

    fn ensure_capacity(&self) -> Result<(), SshError> {
        if self.live.len() >= self.max_connections {
            return Err(SshError::Capacity {
                max: self.max_connections,
            });
        }
        Ok(())
    }

    fn build_session(&self, params: ConnectionParameters) -> Session {
        Session::new(
            params,
            Arc::clone(&self.connector),
            Arc::clone(&self.settings),
        )
    }
}
