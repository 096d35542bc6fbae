//! Serves a coding store over HTTP.
//!
//! Usage: `coding [settings-file]`. Settings not in the file come from
//! `CODING_*` environment variables or their defaults; with `clean = true` the
//! store's tables are dropped and the process exits.

use std::error::Error;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use coding::config::Settings;
use coding::interface::Controllers;
use coding::persist::Database;
use coding::server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).compact().init();

    let file = std::env::args().nth(1);
    let settings = Settings::load(file.as_deref())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        database = %settings.database,
        prefix = %settings.prefix,
        "coding starting"
    );
    let database = Arc::new(Database::new(settings.clone())?);
    if settings.clean {
        database.clean()?;
        return Ok(());
    }

    let controllers = Arc::new(Controllers::new(database));
    let listener = tokio::net::TcpListener::bind(&settings.listen).await?;
    info!(listen = %settings.listen, "serving");
    axum::serve(listener, server::router(controllers)).await?;
    Ok(())
}
