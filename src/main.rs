use clap::Parser;
use std::sync::Arc;
use geotrail::config::ServerConfig;
use geotrail::server::TrailServer;
use geotrail::TrailDb;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,geotrail=info")))
    .with_target(false)
    .with_level(true)
    .init();

    let config = ServerConfig::parse();
    info!("🪵 Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Port: {}", config.port);
    info!("Data file: {}", config.db_file().display());
    info!("Front-end: {}", config.public_dir.display());

    if config.uses_default_token() {
        warn!("⚠️ TOKEN is the default placeholder");
    }
    warn!("⚠️ Auth token is loaded but not enforced on any route");

    let db = Arc::new(TrailDb::open(&config.db_file())?);
    info!("✅ Store ready");

    TrailServer::new(db, config).run().await?;
    Ok(())
}
