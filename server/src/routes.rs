//! HTTP route handlers for the Cash Delhi server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `GET /api/user` - Current admin user, or `null`
//! - `POST /api/login` - Credential check, sets the session cookie
//! - `GET /api/logout` - Destroys the session, clears the cookie
//! - `GET /api/events` - List all events, newest first
//! - `GET /api/events/{id}` - Fetch one event
//! - `POST /api/events` - Create an event (admin only)
//! - `PATCH /api/events/{id}` - Partially update an event (admin only)
//! - `DELETE /api/events/{id}` - Delete an event (admin only)
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration (cookie attributes, session lifetime)
//! - The event repository
//! - The authenticator, which owns the user repository and session store
//!
//! Mutating event routes take a [`RequireAuth`] extractor, so an anonymous
//! request is rejected before its body is read.
//!
//! # Example
//!
//! ```rust,no_run
//! use cashdelhi_server::config::Config;
//! use cashdelhi_server::db;
//! use cashdelhi_server::routes::{create_router, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let pool = db::connect_and_migrate(&config.database_url, config.db_max_connections)
//!         .await
//!         .expect("failed to open database");
//!     let app = create_router(AppState::new(config, pool));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::auth::Authenticator;
use crate::config::Config;
use crate::error::{ApiError, Result, EVENT_NOT_FOUND};
use crate::events::EventRepository;
use crate::session::SessionStore;
use crate::types::{
    CurrentUserResponse, Event, EventPatch, LoginRequest, LoginResponse, LogoutResponse,
    NewEvent, PublicUser, User,
};
use crate::users::UserRepository;

// ============================================================================
// Constants
// ============================================================================

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "cashdelhi.sid";

/// Maximum request body size (1 MB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
///
/// Every field is a cheap handle, so the state is cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Event persistence.
    pub events: EventRepository,

    /// Login, logout and session resolution.
    pub auth: Authenticator,
}

impl AppState {
    /// Creates application state over an already-migrated pool.
    ///
    /// The session backend is chosen by `config.session_backend`.
    #[must_use]
    pub fn new(config: Config, pool: SqlitePool) -> Self {
        let sessions = SessionStore::with_backend(
            config.session_backend,
            pool.clone(),
            config.session_store_config(),
        );
        Self::with_components(config, pool, sessions)
    }

    /// Creates application state with a caller-supplied session store.
    ///
    /// Useful for testing with short session lifetimes.
    #[must_use]
    pub fn with_components(config: Config, pool: SqlitePool, sessions: SessionStore) -> Self {
        Self {
            config: Arc::new(config),
            events: EventRepository::new(pool.clone()),
            auth: Authenticator::new(UserRepository::new(pool), sessions),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("events", &self.events)
            .field("auth", &self.auth)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// Requests are traced with `TraceLayer`, and a panicking handler produces a
/// generic 500 instead of dropping the connection.
///
/// # Example
///
/// ```rust,no_run
/// use cashdelhi_server::config::Config;
/// use cashdelhi_server::db;
/// use cashdelhi_server::routes::{create_router, AppState};
///
/// # async fn run() {
/// let pool = db::connect_in_memory().await.unwrap();
/// let router = create_router(AppState::new(Config::default(), pool));
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/user", get(get_user))
        .route("/api/login", post(post_login))
        .route("/api/logout", get(get_logout))
        .route("/api/events", get(list_events).post(create_event))
        .route(
            "/api/events/{id}",
            get(get_event).patch(update_event).delete(delete_event),
        )
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

// ============================================================================
// Session Cookie Handling
// ============================================================================

/// Extracts the session token from the request cookies, if any.
fn session_token(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

/// Builds the session cookie for a freshly issued token.
fn session_cookie(
    token: String,
    config: &Config,
    max_age: std::time::Duration,
) -> Cookie<'static> {
    let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}

/// A cookie that, when removed from the jar, makes the browser drop the session.
fn removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

/// Extractor that admits only requests carrying a live admin session.
///
/// Rejects with [`ApiError::Unauthorized`] otherwise.
#[derive(Debug)]
pub struct RequireAuth(pub User);

impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = session_token(&jar);
        let user = state.auth.require_authenticated(token.as_deref()).await?;
        Ok(Self(user))
    }
}

/// Unwraps a JSON body, turning axum's rejection into an `invalid_body` error.
fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            debug!("Rejected oversized request body");
            Err(ApiError::PayloadTooLarge)
        }
        Err(rejection) => {
            debug!(status = rejection.status().as_u16(), "Rejected request body");
            Err(ApiError::bad_request(rejection.body_text()))
        }
    }
}

// ============================================================================
// Auth Handlers
// ============================================================================

/// GET /api/user
async fn get_user(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<CurrentUserResponse>> {
    let user = match session_token(&jar) {
        Some(token) => state.auth.current_user(&token).await?,
        None => None,
    };

    Ok(Json(CurrentUserResponse {
        user: user.map(PublicUser::from),
    }))
}

/// POST /api/login
///
/// On success, any session the client already holds is destroyed before the
/// new one is issued. A failed attempt leaves the existing session alone.
async fn post_login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<LoginResponse>)> {
    let LoginRequest { username, password } = json_body(payload)?;
    let password = Zeroizing::new(password);

    if username.trim().is_empty() || password.is_empty() {
        return Err(ApiError::bad_request("Username and password are required"));
    }

    let (token, user) = state.auth.login(&username, password).await?;

    if let Some(previous) = session_token(&jar) {
        state.auth.logout(&previous).await?;
    }

    let cookie = session_cookie(token, &state.config, state.auth.sessions().ttl());
    let jar = jar.add(cookie);

    Ok((
        jar,
        Json(LoginResponse {
            success: true,
            user: PublicUser::from(user),
        }),
    ))
}

/// GET /api/logout
async fn get_logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<LogoutResponse>)> {
    if let Some(token) = session_token(&jar) {
        state.auth.logout(&token).await?;
    }

    Ok((jar.remove(removal_cookie()), Json(LogoutResponse { success: true })))
}

// ============================================================================
// Event Handlers
// ============================================================================

/// GET /api/events
async fn list_events(State(state): State<AppState>) -> Result<Json<Vec<Event>>> {
    Ok(Json(state.events.list_all().await?))
}

/// GET /api/events/{id}
async fn get_event(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Event>> {
    state
        .events
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(EVENT_NOT_FOUND))
}

/// POST /api/events
async fn create_event(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    payload: std::result::Result<Json<NewEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<Event>)> {
    let input = json_body(payload)?;
    let event = state.events.create(input).await?;

    debug!(event_id = %event.id, user_id = %user.id, "Event created by admin");
    Ok((StatusCode::CREATED, Json(event)))
}

/// PATCH /api/events/{id}
async fn update_event(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(id): Path<String>,
    payload: std::result::Result<Json<EventPatch>, JsonRejection>,
) -> Result<Json<Event>> {
    let patch = json_body(payload)?;
    let event = state.events.update(&id, patch).await?;

    debug!(event_id = %event.id, user_id = %user.id, "Event updated by admin");
    Ok(Json(event))
}

/// DELETE /api/events/{id}
async fn delete_event(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if !state.events.delete(&id).await? {
        return Err(ApiError::not_found(EVENT_NOT_FOUND));
    }

    debug!(event_id = %id, user_id = %user.id, "Event deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Serving
// ============================================================================

/// How [`serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Every in-flight request finished after the signal.
    Graceful,
    /// Requests were still running when the drain timeout elapsed.
    TimedOut,
}

/// Serves `app` until `signal` resolves, then drains in-flight requests.
///
/// Draining is bounded by `drain_timeout`; after it elapses the server task
/// is aborted and [`ShutdownKind::TimedOut`] is returned.
///
/// # Errors
///
/// Returns the accept-loop error if the server fails before shutdown.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    signal: F,
    drain_timeout: Duration,
) -> std::io::Result<ShutdownKind>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (signalled_tx, signalled_rx) = oneshot::channel();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        signal.await;
        let _ = signalled_tx.send(());
    });
    let mut server_task = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut server_task => match joined {
            Ok(result) => result.map(|()| ShutdownKind::Graceful),
            Err(err) => Err(std::io::Error::other(err)),
        },
        () = drain_deadline(signalled_rx, drain_timeout) => {
            warn!(
                timeout_secs = drain_timeout.as_secs(),
                "In-flight requests did not finish in time, forcing shutdown"
            );
            server_task.abort();
            Ok(ShutdownKind::TimedOut)
        }
    }
}

/// Resolves `drain_timeout` after the shutdown signal fires.
async fn drain_deadline(signalled: oneshot::Receiver<()>, drain_timeout: Duration) {
    if signalled.await.is_err() {
        // The server ended without a signal; the other branch wins.
        std::future::pending::<()>().await;
    }
    info!(
        timeout_secs = drain_timeout.as_secs(),
        "Waiting for in-flight requests to complete"
    );
    tokio::time::sleep(drain_timeout).await;
}

// ============================================================================
// Fallbacks
// ============================================================================

async fn fallback() -> ApiError {
    ApiError::not_found("Not found")
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };

    error!(panic = %detail, "Handler panicked");
    ApiError::internal("handler panicked").into_response()
}
