//! User repository.
//!
//! The `users` table holds the single admin account. Accounts are created by
//! the `cashdelhi-seed` binary only; no HTTP route inserts users.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db::StoreError;
use crate::types::User;

const SELECT_BY_USERNAME: &str =
    "SELECT id, username, password, created_at, updated_at FROM users WHERE username = ?";

const SELECT_BY_ID: &str =
    "SELECT id, username, password, created_at, updated_at FROM users WHERE id = ?";

const INSERT_USER: &str = "INSERT INTO users (id, username, password, created_at, updated_at) \
     VALUES (?, ?, ?, ?, ?) \
     RETURNING id, username, password, created_at, updated_at";

/// Handle to the `users` table. Cheap to clone.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(SELECT_BY_USERNAME)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(SELECT_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Inserts a user with an already-hashed password.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the username is taken.
    pub async fn create(&self, username: &str, password_hash: &str) -> Result<User, StoreError> {
        let now = Utc::now();
        let user = sqlx::query_as::<_, User>(INSERT_USER)
            .bind(Uuid::new_v4().to_string())
            .bind(username)
            .bind(password_hash)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| StoreError::from_insert(err, "username"))?;

        info!(user_id = %user.id, username = %user.username, "User created");
        Ok(user)
    }
}
