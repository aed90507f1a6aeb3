//! Server-side session store.
//!
//! Maps opaque session tokens to a small JSON payload naming the logged-in
//! user. The browser only ever holds the token (in the session cookie); the
//! payload and its expiry stay on the server.
//!
//! # Backends
//!
//! - **Database**: rows in the `sessions` table (`sid`, `sess`, `expire`),
//!   shared by every server process pointed at the same database.
//! - **Memory**: a `RwLock<HashMap>` inside this process, bounded by
//!   [`SessionStoreConfig::max_capacity`]. Sessions are lost on restart.
//!
//! Expired sessions are rejected and deleted when looked up, and swept in
//! bulk by [`SessionStore::spawn_cleanup_task`].
//!
//! # Token Format
//!
//! Session tokens are 32 bytes of cryptographically secure random data,
//! base64-url encoded without padding, resulting in 43 character tokens.
//!
//! # Example
//!
//! ```rust
//! use cashdelhi_server::session::{SessionData, SessionStore, SessionStoreConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = SessionStore::in_memory(SessionStoreConfig::default());
//!
//! let token = store
//!     .create_session(SessionData::new("user-123"))
//!     .await
//!     .expect("store has capacity");
//!
//! let session = store.load_session(&token).await.unwrap();
//! assert_eq!(session.map(|s| s.data.user_id), Some("user-123".to_string()));
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::db::StoreError;

/// Default session TTL (24 hours, same as the cookie lifetime).
pub const DEFAULT_TTL_SECS: u64 = 86_400;

/// Maximum number of sessions held by the memory backend.
const DEFAULT_MAX_CAPACITY: usize = 10_000;

/// Size of the random token in bytes.
const TOKEN_BYTES: usize = 32;

/// Expected length of base64-url encoded token (43 characters).
const TOKEN_LENGTH: usize = 43;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The memory backend has reached maximum capacity.
    #[error("session store at maximum capacity ({max_capacity} sessions)")]
    AtCapacity {
        /// The maximum number of sessions allowed.
        max_capacity: usize,
    },

    /// The database backend failed.
    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    /// A stored payload could not be encoded or decoded.
    #[error("corrupt session payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<sqlx::Error> for SessionError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

/// Where session records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionBackend {
    /// `sessions` table in the relational store.
    #[default]
    Database,
    /// Process-local map.
    Memory,
}

/// Configuration for the session store.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Maximum number of concurrent sessions (memory backend only).
    pub max_capacity: usize,

    /// Lifetime of a new session, measured from login.
    pub ttl: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            max_capacity: DEFAULT_MAX_CAPACITY,
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
        }
    }
}

impl SessionStoreConfig {
    /// Creates a new configuration with custom values.
    pub fn new(max_capacity: usize, ttl: Duration) -> Self {
        Self { max_capacity, ttl }
    }
}

/// Serialized payload of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    /// Identifier of the authenticated user.
    pub user_id: String,
}

impl SessionData {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// A live session as returned by [`SessionStore::load_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub data: SessionData,

    /// When the session stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn new(data: SessionData, ttl: Duration) -> Self {
        let now = Utc::now();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { data, expires_at }
    }

    /// Returns true if the session has expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Returns the remaining time until expiration, or zero if expired.
    pub fn remaining_ttl(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or_default()
    }
}

#[derive(Clone)]
enum Backend {
    Memory(Arc<RwLock<HashMap<String, Session>>>),
    Database(SqlitePool),
}

/// Handle to the session store. Cheap to clone; clones share storage.
#[derive(Clone)]
pub struct SessionStore {
    backend: Backend,
    config: Arc<SessionStoreConfig>,
}

impl SessionStore {
    /// Creates a store that keeps sessions in this process.
    pub fn in_memory(config: SessionStoreConfig) -> Self {
        debug!(
            max_capacity = config.max_capacity,
            ttl_secs = config.ttl.as_secs(),
            "Creating in-memory session store"
        );
        Self {
            backend: Backend::Memory(Arc::new(RwLock::new(HashMap::new()))),
            config: Arc::new(config),
        }
    }

    /// Creates a store backed by the `sessions` table.
    pub fn database(pool: SqlitePool, config: SessionStoreConfig) -> Self {
        debug!(ttl_secs = config.ttl.as_secs(), "Creating database session store");
        Self {
            backend: Backend::Database(pool),
            config: Arc::new(config),
        }
    }

    /// Creates a store with the given backend kind.
    ///
    /// `pool` is ignored for [`SessionBackend::Memory`].
    pub fn with_backend(
        kind: SessionBackend,
        pool: SqlitePool,
        config: SessionStoreConfig,
    ) -> Self {
        match kind {
            SessionBackend::Database => Self::database(pool, config),
            SessionBackend::Memory => Self::in_memory(config),
        }
    }

    /// Lifetime given to new sessions.
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Creates a new session and returns its token.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AtCapacity`] if the memory backend is full
    /// - [`SessionError::Store`] if the database insert fails
    pub async fn create_session(&self, data: SessionData) -> Result<String, SessionError> {
        // Generate token first (outside of lock)
        let token = generate_session_token();
        let session = Session::new(data, self.config.ttl);

        trace!(
            user_id = %session.data.user_id,
            ttl_secs = self.config.ttl.as_secs(),
            "Creating new session"
        );

        match &self.backend {
            Backend::Memory(sessions) => {
                let mut sessions = sessions.write().unwrap_or_else(PoisonError::into_inner);

                if sessions.len() >= self.config.max_capacity {
                    warn!(
                        capacity = sessions.len(),
                        max_capacity = self.config.max_capacity,
                        "Session store at capacity, rejecting new session"
                    );
                    return Err(SessionError::AtCapacity {
                        max_capacity: self.config.max_capacity,
                    });
                }

                sessions.insert(token.clone(), session);
            }
            Backend::Database(pool) => {
                let payload = serde_json::to_string(&session.data)?;
                sqlx::query("INSERT INTO sessions (sid, sess, expire) VALUES (?, ?, ?)")
                    .bind(&token)
                    .bind(payload)
                    .bind(session.expires_at)
                    .execute(pool)
                    .await?;
            }
        }

        Ok(token)
    }

    /// Looks up a session by token.
    ///
    /// Returns `None` for unknown, malformed, or expired tokens. An expired
    /// session found here is deleted.
    pub async fn load_session(&self, token: &str) -> Result<Option<Session>, SessionError> {
        // Quick format check
        if token.len() != TOKEN_LENGTH {
            trace!(token_len = token.len(), "Invalid token length");
            return Ok(None);
        }

        let found = match &self.backend {
            Backend::Memory(sessions) => {
                let sessions = sessions.read().unwrap_or_else(PoisonError::into_inner);
                sessions.get(token).cloned()
            }
            Backend::Database(pool) => {
                let row: Option<(String, DateTime<Utc>)> =
                    sqlx::query_as("SELECT sess, expire FROM sessions WHERE sid = ?")
                        .bind(token)
                        .fetch_optional(pool)
                        .await?;
                match row {
                    Some((payload, expires_at)) => Some(Session {
                        data: serde_json::from_str(&payload)?,
                        expires_at,
                    }),
                    None => None,
                }
            }
        };

        let Some(session) = found else {
            trace!("Session token not found");
            return Ok(None);
        };

        if session.is_expired() {
            self.destroy_session(token).await?;
            trace!("Removed expired session during lookup");
            return Ok(None);
        }

        trace!(
            user_id = %session.data.user_id,
            remaining_secs = session.remaining_ttl().as_secs(),
            "Session validated"
        );
        Ok(Some(session))
    }

    /// Removes a session. Returns whether one existed.
    pub async fn destroy_session(&self, token: &str) -> Result<bool, SessionError> {
        let removed = match &self.backend {
            Backend::Memory(sessions) => {
                let mut sessions = sessions.write().unwrap_or_else(PoisonError::into_inner);
                sessions.remove(token).is_some()
            }
            Backend::Database(pool) => {
                sqlx::query("DELETE FROM sessions WHERE sid = ?")
                    .bind(token)
                    .execute(pool)
                    .await?
                    .rows_affected()
                    > 0
            }
        };

        if removed {
            trace!("Session removed");
        }

        Ok(removed)
    }

    /// Number of stored sessions, including expired ones not yet swept.
    pub async fn len(&self) -> Result<usize, SessionError> {
        match &self.backend {
            Backend::Memory(sessions) => {
                let sessions = sessions.read().unwrap_or_else(PoisonError::into_inner);
                Ok(sessions.len())
            }
            Backend::Database(pool) => {
                let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
                    .fetch_one(pool)
                    .await?;
                Ok(usize::try_from(count).unwrap_or_default())
            }
        }
    }

    /// Returns true if the store holds no sessions.
    pub async fn is_empty(&self) -> Result<bool, SessionError> {
        Ok(self.len().await? == 0)
    }

    /// Removes all expired sessions from the store.
    ///
    /// Returns the number of sessions that were removed.
    pub async fn cleanup_expired(&self) -> Result<u64, SessionError> {
        let removed = match &self.backend {
            Backend::Memory(sessions) => {
                let mut sessions = sessions.write().unwrap_or_else(PoisonError::into_inner);
                let initial_len = sessions.len();
                sessions.retain(|_, session| !session.is_expired());
                (initial_len - sessions.len()) as u64
            }
            Backend::Database(pool) => {
                sqlx::query("DELETE FROM sessions WHERE expire <= ?")
                    .bind(Utc::now())
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };

        if removed > 0 {
            debug!(removed_count = removed, "Cleaned up expired sessions");
        }

        Ok(removed)
    }

    /// Spawns a background task that sweeps expired sessions periodically.
    ///
    /// The returned handle should be aborted on shutdown.
    pub fn spawn_cleanup_task(&self, cleanup_interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);

            loop {
                interval.tick().await;
                if let Err(err) = store.cleanup_expired().await {
                    warn!(error = %err, "Expired session sweep failed");
                }
            }
        })
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            Backend::Memory(_) => "memory",
            Backend::Database(_) => "database",
        };
        f.debug_struct("SessionStore")
            .field("backend", &backend)
            .field("config", &self.config)
            .finish()
    }
}

/// Generates a cryptographically secure session token.
///
/// The token is 32 bytes of random data, base64-url encoded without
/// padding, resulting in a 43-character string.
fn generate_session_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
