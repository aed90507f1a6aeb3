//! Creates the Cash Delhi admin account.
//!
//! Runs pending migrations, hashes `CASHDELHI_ADMIN_PASSWORD` and inserts the
//! user named by `CASHDELHI_ADMIN_USERNAME` (default `admin`). Exits non-zero
//! if the account already exists.
//!
//! ```bash
//! CASHDELHI_ADMIN_PASSWORD="change-me" cargo run --bin cashdelhi-seed
//! ```

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cashdelhi_server::auth::hash_password;
use cashdelhi_server::config::SeedConfig;
use cashdelhi_server::db;
use cashdelhi_server::users::UserRepository;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let config = SeedConfig::from_env().context("Failed to load seed configuration")?;

    let pool = db::connect_and_migrate(&config.database_url, 1)
        .await
        .context("Failed to open database")?;
    let users = UserRepository::new(pool.clone());

    let password = config.admin_password;
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("Password hashing task failed")??;

    match users.create(&config.admin_username, &hash).await {
        Ok(user) => {
            info!(user_id = %user.id, username = %user.username, "Admin user created");
        }
        Err(err) if err.is_conflict() => {
            warn!(username = %config.admin_username, "Admin user already exists");
            pool.close().await;
            bail!("user '{}' already exists", config.admin_username);
        }
        Err(err) => return Err(err).context("Failed to create admin user"),
    }

    pool.close().await;
    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}
