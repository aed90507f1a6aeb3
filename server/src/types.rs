//! Shared data contracts for the Cash Delhi server.
//!
//! Stored records ([`Event`], [`User`]) and the request/response bodies of
//! each endpoint. JSON field names are camelCase to match the admin panel.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

/// A publicly listed event as stored in the `events` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    pub venue: String,
    /// Free-form display string, e.g. "Saturday, 12 April".
    pub date: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an event.
///
/// Missing keys deserialize to empty values so that validation, not JSON
/// decoding, reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    pub venue: String,
    pub date: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// Partial update for an event.
///
/// `None` leaves a field untouched and `Some(None)` records an explicit JSON
/// `null`. For the optional columns that clears the value; for the required
/// ones validation rejects it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventPatch {
    #[serde(deserialize_with = "deserialize_some")]
    pub title: Option<Option<String>>,
    #[serde(deserialize_with = "deserialize_some")]
    pub venue: Option<Option<String>>,
    #[serde(deserialize_with = "deserialize_some")]
    pub date: Option<Option<String>>,
    #[serde(deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    #[serde(deserialize_with = "deserialize_some")]
    pub image_url: Option<Option<String>>,
}

impl EventPatch {
    /// Returns `true` if the patch changes no column.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.venue.is_none()
            && self.date.is_none()
            && self.description.is_none()
            && self.image_url.is_none()
    }
}

/// Distinguishes an explicit `null` from an absent key.
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// An administrative account as stored in the `users` table.
///
/// Never serialized; responses use [`PublicUser`].
#[derive(Clone, PartialEq, Eq, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    #[sqlx(rename = "password")]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// The user fields that are safe to send to a browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self::from(&user)
    }
}

/// Body of `POST /api/login`.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body of `GET /api/user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUserResponse {
    pub user: Option<PublicUser>,
}

/// Body of a successful `POST /api/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: PublicUser,
}

/// Body of `GET /api/logout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub success: bool,
}
