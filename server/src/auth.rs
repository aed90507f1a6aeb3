//! Username/password authentication backed by server-side sessions.
//!
//! # Overview
//!
//! The authentication flow works as follows:
//! 1. The admin account is created by the seed binary with an Argon2id hash
//! 2. `POST /api/login` looks the username up and verifies the password
//!    against the stored hash on the blocking thread pool
//! 3. On success a session is created whose payload names the user; its
//!    token is handed to the browser in the session cookie
//! 4. Mutating routes resolve the cookie back to a user through
//!    [`Authenticator::require_authenticated`], or fail with
//!    [`AuthError::Unauthorized`]
//!
//! Plaintext passwords are only ever held in [`Zeroizing`] buffers and are
//! wiped as soon as the comparison finishes.
//!
//! # Example
//!
//! ```rust,no_run
//! use cashdelhi_server::auth::{hash_password, Authenticator};
//! use cashdelhi_server::db;
//! use cashdelhi_server::session::{SessionStore, SessionStoreConfig};
//! use cashdelhi_server::users::UserRepository;
//! use zeroize::Zeroizing;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = db::connect_in_memory().await?;
//! let users = UserRepository::new(pool.clone());
//! users.create("admin", &hash_password("s3cret")?).await?;
//!
//! let auth = Authenticator::new(users, SessionStore::database(pool, SessionStoreConfig::default()));
//! let (token, user) = auth.login("admin", Zeroizing::new("s3cret".to_string())).await?;
//! assert_eq!(auth.current_user(&token).await?.map(|u| u.id), Some(user.id));
//! # Ok(())
//! # }
//! ```

use std::sync::OnceLock;

use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::db::StoreError;
use crate::session::{SessionData, SessionError, SessionStore};
use crate::types::User;
use crate::users::UserRepository;

/// Size of the random salt fed to Argon2.
const SALT_BYTES: usize = 16;

/// Hash verified against when the username is unknown, so both rejection
/// paths cost one Argon2 verification.
static DUMMY_HASH: OnceLock<String> = OnceLock::new();

/// Errors that can occur during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown username or wrong password. Deliberately does not say which.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// No valid session accompanies the request.
    #[error("unauthorized")]
    Unauthorized,

    /// Hashing or hash parsing failed (corrupt stored hash, bad salt).
    #[error("password hashing failed: {0}")]
    Hashing(String),

    /// The user table could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The session store failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Hashes a plaintext password into an Argon2id PHC string.
///
/// A fresh random salt is generated for every call, so hashing the same
/// password twice yields different strings.
///
/// # Example
///
/// ```rust
/// use cashdelhi_server::auth::{hash_password, verify_password};
///
/// let hash = hash_password("correct horse").unwrap();
/// assert!(hash.starts_with("$argon2id$"));
/// assert!(verify_password("correct horse", &hash).unwrap());
/// ```
pub fn hash_password(plaintext: &str) -> Result<String, AuthError> {
    let mut salt_bytes = [0u8; SALT_BYTES];
    rand::rng().fill(&mut salt_bytes);

    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|err| AuthError::Hashing(err.to_string()))?;

    let hash = Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(|err| AuthError::Hashing(err.to_string()))?;

    Ok(hash.to_string())
}

/// Checks a plaintext password against a stored PHC string.
///
/// Returns `Ok(false)` on mismatch and `Err` only if the stored hash cannot
/// be parsed or verified at all.
pub fn verify_password(plaintext: &str, stored_hash: &str) -> Result<bool, AuthError> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|err| AuthError::Hashing(err.to_string()))?;

    match Argon2::default().verify_password(plaintext.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(err) => Err(AuthError::Hashing(err.to_string())),
    }
}

/// Returns the process-wide dummy hash, computing it on first use.
fn dummy_hash() -> Result<&'static str, AuthError> {
    if let Some(hash) = DUMMY_HASH.get() {
        return Ok(hash);
    }
    let hash = hash_password("cashdelhi-unknown-user")?;
    Ok(DUMMY_HASH.get_or_init(|| hash))
}

/// Login, logout, and session resolution for the admin account.
#[derive(Debug, Clone)]
pub struct Authenticator {
    users: UserRepository,
    sessions: SessionStore,
}

impl Authenticator {
    pub fn new(users: UserRepository, sessions: SessionStore) -> Self {
        Self { users, sessions }
    }

    /// The session store this authenticator writes to.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Verifies credentials and opens a session.
    ///
    /// Returns the new session token and the authenticated user.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredentials`] if the username is unknown or the
    ///   password does not match
    /// - [`AuthError::Store`] / [`AuthError::Session`] on storage failures
    pub async fn login(
        &self,
        username: &str,
        password: Zeroizing<String>,
    ) -> Result<(String, User), AuthError> {
        let user = self.users.find_by_username(username).await?;

        let stored_hash = user.as_ref().map(|user| user.password_hash.clone());
        let matches = tokio::task::spawn_blocking(move || {
            // `password` is dropped (and wiped) when this closure returns.
            match stored_hash {
                Some(hash) => verify_password(&password, &hash),
                None => verify_password(&password, dummy_hash()?).map(|_| false),
            }
        })
        .await
        .map_err(|err| AuthError::Hashing(format!("verification task failed: {err}")))??;

        let Some(user) = user else {
            warn!(username = %username, "Login rejected: unknown username");
            return Err(AuthError::InvalidCredentials);
        };

        if !matches {
            warn!(username = %username, "Login rejected: password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        let token = self
            .sessions
            .create_session(SessionData::new(user.id.clone()))
            .await?;

        info!(user_id = %user.id, username = %user.username, "Login succeeded");
        Ok((token, user))
    }

    /// Resolves a session token to its user.
    ///
    /// Returns `None` for unknown or expired sessions, and for sessions whose
    /// user has since been removed.
    pub async fn current_user(&self, token: &str) -> Result<Option<User>, AuthError> {
        let Some(session) = self.sessions.load_session(token).await? else {
            return Ok(None);
        };

        let user = self.users.find_by_id(&session.data.user_id).await?;
        if user.is_none() {
            debug!(user_id = %session.data.user_id, "Session refers to a missing user");
        }

        Ok(user)
    }

    /// Destroys a session. Calling it for an absent session is not an error.
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        if self.sessions.destroy_session(token).await? {
            info!("Session closed by logout");
        } else {
            debug!("Logout for a session that no longer exists");
        }
        Ok(())
    }

    /// The gate in front of every mutating operation.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthorized`] if `token` is missing or does not
    /// resolve to a user.
    pub async fn require_authenticated(&self, token: Option<&str>) -> Result<User, AuthError> {
        let Some(token) = token else {
            debug!("Gated request without session cookie");
            return Err(AuthError::Unauthorized);
        };

        self.current_user(token)
            .await?
            .ok_or(AuthError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db;
    use crate::session::SessionStoreConfig;

    async fn authenticator() -> Authenticator {
        authenticator_with(SessionStoreConfig::default()).await
    }

    async fn authenticator_with(config: SessionStoreConfig) -> Authenticator {
        let pool = db::connect_in_memory().await.unwrap();
        let users = UserRepository::new(pool.clone());
        users
            .create("admin", &hash_password("password").unwrap())
            .await
            .unwrap();
        Authenticator::new(users, SessionStore::database(pool, config))
    }

    fn secret(value: &str) -> Zeroizing<String> {
        Zeroizing::new(value.to_string())
    }

    #[test]
    fn hash_password_produces_argon2id_phc_string() {
        let hash = hash_password("password").unwrap();
        assert!(hash.starts_with("$argon2id$v=19$"));
        assert!(!hash.contains("password"));
    }

    #[test]
    fn hash_password_salts_every_call() {
        let a = hash_password("password").unwrap();
        let b = hash_password("password").unwrap();
        assert_ne!(a, b);
        assert!(verify_password("password", &a).unwrap());
        assert!(verify_password("password", &b).unwrap());
    }

    #[test]
    fn verify_password_rejects_wrong_password() {
        let hash = hash_password("password").unwrap();
        assert!(!verify_password("Password", &hash).unwrap());
        assert!(!verify_password("", &hash).unwrap());
    }

    #[test]
    fn verify_password_errors_on_corrupt_hash() {
        let err = verify_password("password", "not-a-phc-string").unwrap_err();
        assert!(matches!(err, AuthError::Hashing(_)));
    }

    #[test]
    fn dummy_hash_is_stable_argon2id() {
        let first = dummy_hash().unwrap();
        let second = dummy_hash().unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("$argon2id$"));
        assert!(!verify_password("password", first).unwrap());
    }

    #[tokio::test]
    async fn login_with_correct_credentials_opens_session() {
        let auth = authenticator().await;

        let (token, user) = auth.login("admin", secret("password")).await.unwrap();

        assert_eq!(user.username, "admin");
        let current = auth.current_user(&token).await.unwrap().unwrap();
        assert_eq!(current.id, user.id);
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_invalid_credentials() {
        let auth = authenticator().await;

        let err = auth.login("admin", secret("wrong")).await.unwrap_err();

        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(auth.sessions().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn login_with_unknown_username_is_invalid_credentials() {
        let auth = authenticator().await;

        let err = auth.login("root", secret("password")).await.unwrap_err();

        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn current_user_for_unknown_token_is_none() {
        let auth = authenticator().await;
        assert!(auth.current_user("bogus").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let auth = authenticator().await;
        let (token, _) = auth.login("admin", secret("password")).await.unwrap();

        auth.logout(&token).await.unwrap();
        auth.logout(&token).await.unwrap();

        assert!(auth.current_user(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn require_authenticated_gates_missing_and_invalid_tokens() {
        let auth = authenticator().await;

        assert!(matches!(
            auth.require_authenticated(None).await,
            Err(AuthError::Unauthorized)
        ));
        assert!(matches!(
            auth.require_authenticated(Some("bogus")).await,
            Err(AuthError::Unauthorized)
        ));

        let (token, user) = auth.login("admin", secret("password")).await.unwrap();
        let gated = auth.require_authenticated(Some(&token)).await.unwrap();
        assert_eq!(gated.id, user.id);
    }

    #[tokio::test]
    async fn expired_session_no_longer_authenticates() {
        let auth = authenticator_with(SessionStoreConfig::new(10, Duration::from_millis(20))).await;
        let (token, _) = auth.login("admin", secret("password")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(matches!(
            auth.require_authenticated(Some(&token)).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn session_for_deleted_user_resolves_to_none() {
        let pool = db::connect_in_memory().await.unwrap();
        let users = UserRepository::new(pool.clone());
        let user = users.create("ghost", "unused").await.unwrap();
        let sessions = SessionStore::database(pool.clone(), SessionStoreConfig::default());
        let token = sessions
            .create_session(SessionData::new(user.id.clone()))
            .await
            .unwrap();

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(&user.id)
            .execute(&pool)
            .await
            .unwrap();

        let auth = Authenticator::new(users, sessions);
        assert!(auth.current_user(&token).await.unwrap().is_none());
    }
}
