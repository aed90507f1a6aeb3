//! Cash Delhi Server - Main entry point.
//!
//! This binary starts the Cash Delhi events API with:
//! - Structured JSON logging for production
//! - Embedded SQLite migrations applied at startup
//! - Background cleanup of expired sessions
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`cashdelhi_server::config`] for environment variable configuration.
//! A `.env` file in the working directory is loaded first if present.
//!
//! # Example
//!
//! ```bash
//! # Create the admin account once
//! CASHDELHI_ADMIN_PASSWORD="change-me" cargo run --bin cashdelhi-seed
//!
//! # Run the server
//! PORT=8080 DATABASE_URL="sqlite://cashdelhi.db?mode=rwc" \
//! cargo run --release --bin cashdelhi-server
//! ```

use std::process::ExitCode;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use cashdelhi_server::config::Config;
use cashdelhi_server::db;
use cashdelhi_server::routes::{create_router, serve, AppState, ShutdownKind};

/// Graceful shutdown timeout for in-flight requests (30 seconds).
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine; real deployments set variables directly.
    let dotenv_loaded = dotenv::dotenv().is_ok();

    init_logging();

    if dotenv_loaded {
        info!("Loaded environment from .env");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                            - HTTP server port (default: 8080)");
            eprintln!("  DATABASE_URL                    - SQLite URL (default: sqlite://cashdelhi.db?mode=rwc)");
            eprintln!("  CASHDELHI_DB_MAX_CONNECTIONS    - Pool size (default: 5)");
            eprintln!("  CASHDELHI_SESSION_STORE         - 'database' or 'memory' (default: database)");
            eprintln!("  CASHDELHI_SESSION_TTL_SECS      - Session lifetime (default: 86400)");
            eprintln!("  CASHDELHI_SESSION_CLEANUP_SECS  - Expired session sweep interval (default: 3600)");
            eprintln!("  CASHDELHI_COOKIE_SECURE         - Mark session cookie Secure (default: false)");
            eprintln!("  RUST_LOG                        - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    info!(
        port = config.port,
        session_store = ?config.session_backend,
        session_ttl_secs = config.session_ttl.as_secs(),
        cookie_secure = config.cookie_secure,
        "Cash Delhi server starting"
    );

    let pool = match db::connect_and_migrate(&config.database_url, config.db_max_connections).await
    {
        Ok(pool) => pool,
        Err(err) => {
            error!(error = %err, "Failed to open database");
            return ExitCode::from(1);
        }
    };

    let state = AppState::new(config.clone(), pool.clone());

    // Spawn expired session cleanup task
    let cleanup_handle = state
        .auth
        .sessions()
        .spawn_cleanup_task(config.session_cleanup_interval);
    info!(
        interval_secs = config.session_cleanup_interval.as_secs(),
        "Session cleanup task started"
    );

    let app = create_router(state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            info!(
                port = config.port,
                address = %bind_addr,
                "Server listening"
            );
            listener
        }
        Err(err) => {
            error!(
                error = %err,
                address = %bind_addr,
                "Failed to bind to address"
            );
            return ExitCode::from(1);
        }
    };

    info!("Server ready to accept connections");

    match serve(listener, app, shutdown_signal(), GRACEFUL_SHUTDOWN_TIMEOUT).await {
        Ok(ShutdownKind::Graceful) => {}
        Ok(ShutdownKind::TimedOut) => {
            warn!("Shutdown timeout elapsed, abandoning remaining requests");
        }
        Err(err) => {
            error!(error = %err, "Server error");
            return ExitCode::from(1);
        }
    }

    info!("Server shutting down gracefully");

    cleanup_handle.abort();
    info!("Session cleanup task stopped");

    pool.close().await;
    info!("Database pool closed");

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Initialize structured logging with tracing.
///
/// Configures JSON-formatted output for production use with:
/// - Environment-based log level filtering via RUST_LOG
/// - Default log level of `info`
/// - Target and level information
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,tower_http=debug,sqlx=warn,axum::rejection=trace")
    });

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Creates a future that resolves when a shutdown signal is received.
///
/// Listens for:
/// - SIGTERM (container orchestrator shutdown)
/// - SIGINT (Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
