//! Event repository.
//!
//! Data access for the `events` table. Every operation is a single SQL
//! statement, so each call is atomic on its own and no explicit
//! transactions are needed.
//!
//! # Example
//!
//! ```rust,no_run
//! use cashdelhi_server::db;
//! use cashdelhi_server::events::EventRepository;
//! use cashdelhi_server::types::NewEvent;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = db::connect_in_memory().await?;
//! let events = EventRepository::new(pool);
//!
//! let created = events
//!     .create(NewEvent {
//!         title: "Launch".into(),
//!         venue: "Hall A".into(),
//!         date: "2025-01-01".into(),
//!         ..NewEvent::default()
//!     })
//!     .await?;
//!
//! assert_eq!(events.get(&created.id).await?, Some(created));
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::StoreError;
use crate::error::FieldError;
use crate::types::{Event, EventPatch, NewEvent};
use crate::validation::{validate_event_patch, validate_new_event};

const LIST_SQL: &str = "SELECT id, title, venue, date, description, image_url, created_at, updated_at \
     FROM events ORDER BY created_at DESC, rowid DESC";

const GET_SQL: &str = "SELECT id, title, venue, date, description, image_url, created_at, updated_at \
     FROM events WHERE id = ?";

const INSERT_SQL: &str = "INSERT INTO events (id, title, venue, date, description, image_url, created_at, updated_at) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
     RETURNING id, title, venue, date, description, image_url, created_at, updated_at";

// Optional columns take a (flag, value) pair so that "leave alone" and
// "set to NULL" stay distinguishable.
const UPDATE_SQL: &str = "UPDATE events SET \
     title = COALESCE(?, title), \
     venue = COALESCE(?, venue), \
     date = COALESCE(?, date), \
     description = CASE WHEN ? THEN ? ELSE description END, \
     image_url = CASE WHEN ? THEN ? ELSE image_url END, \
     updated_at = ? \
     WHERE id = ? \
     RETURNING id, title, venue, date, description, image_url, created_at, updated_at";

const DELETE_SQL: &str = "DELETE FROM events WHERE id = ?";

/// Errors from mutating event operations.
#[derive(Debug, Error)]
pub enum EventError {
    /// The input failed validation; nothing was written.
    #[error("invalid event data")]
    Validation(Vec<FieldError>),

    /// No event has the given identifier.
    #[error("event not found")]
    NotFound,

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for EventError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

/// Handle to the `events` table. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All events, newest first.
    pub async fn list_all(&self) -> Result<Vec<Event>, StoreError> {
        let events = sqlx::query_as::<_, Event>(LIST_SQL)
            .fetch_all(&self.pool)
            .await?;
        debug!(count = events.len(), "Listed events");
        Ok(events)
    }

    /// A single event, or `None` if the id is unknown.
    pub async fn get(&self, id: &str) -> Result<Option<Event>, StoreError> {
        let event = sqlx::query_as::<_, Event>(GET_SQL)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(event)
    }

    /// Validates and inserts a new event.
    ///
    /// # Errors
    ///
    /// - [`EventError::Validation`] if a required field is blank or the
    ///   image URL is malformed
    /// - [`EventError::Store`] if the insert fails
    pub async fn create(&self, input: NewEvent) -> Result<Event, EventError> {
        let input = validate_new_event(input).map_err(EventError::Validation)?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let event = sqlx::query_as::<_, Event>(INSERT_SQL)
            .bind(&id)
            .bind(&input.title)
            .bind(&input.venue)
            .bind(&input.date)
            .bind(&input.description)
            .bind(&input.image_url)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        info!(event_id = %event.id, "Event created");
        Ok(event)
    }

    /// Applies a partial update and refreshes `updated_at`.
    ///
    /// `id` and `created_at` are never touched.
    ///
    /// # Errors
    ///
    /// - [`EventError::Validation`] if a supplied field is invalid
    /// - [`EventError::NotFound`] if no event has this id
    /// - [`EventError::Store`] if the update fails
    pub async fn update(&self, id: &str, patch: EventPatch) -> Result<Event, EventError> {
        let patch = validate_event_patch(patch).map_err(EventError::Validation)?;
        if patch.is_empty() {
            debug!(event_id = %id, "Empty patch, refreshing updated_at only");
        }
        let (set_description, description) = split_optional(patch.description);
        let (set_image_url, image_url) = split_optional(patch.image_url);

        let event = sqlx::query_as::<_, Event>(UPDATE_SQL)
            .bind(patch.title.flatten())
            .bind(patch.venue.flatten())
            .bind(patch.date.flatten())
            .bind(set_description)
            .bind(description)
            .bind(set_image_url)
            .bind(image_url)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EventError::NotFound)?;

        info!(event_id = %event.id, "Event updated");
        Ok(event)
    }

    /// Deletes an event. Returns `false` if there was nothing to delete.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(DELETE_SQL).bind(id).execute(&self.pool).await?;
        let removed = result.rows_affected() > 0;

        if removed {
            info!(event_id = %id, "Event deleted");
        } else {
            debug!(event_id = %id, "Delete matched no event");
        }

        Ok(removed)
    }
}

fn split_optional(value: Option<Option<String>>) -> (bool, Option<String>) {
    match value {
        Some(inner) => (true, inner),
        None => (false, None),
    }
}
