//! Estimo - planning poker server
//!
//! Loads configuration, opens the database and serves rooms over TCP until
//! interrupted.

use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use estimo_core::Database;
use estimo_net::{Coordinator, Server};

mod config;

use config::{AppConfig, ConfigError, DatabaseLocation};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] estimo_core::Error),

    #[error("Network error: {0}")]
    Network(#[from] estimo_net::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// `RUST_LOG` wins over the configured filter
fn init_logging(configured: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

fn open_database(location: &DatabaseLocation) -> Result<Database, StartupError> {
    match location {
        DatabaseLocation::InMemory => {
            info!("Using in-memory database");
            Ok(Database::open_in_memory()?)
        }
        DatabaseLocation::File(path) => {
            // Ensure parent directory exists
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            info!(path = %path.display(), "Opening database");
            Ok(Database::open(path)?)
        }
    }
}

async fn run(config: AppConfig, source: Option<PathBuf>) -> Result<(), StartupError> {
    match &source {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => info!("Using default configuration"),
    }

    let db = open_database(&config.database_location()?)?;
    info!(schema_version = db.schema_version(), "Database ready");

    let coordinator = Coordinator::new(db, config.session_settings());
    let server = Server::start(config.server_config(), coordinator).await?;
    info!(addr = %server.addr(), "Listening");

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received");
    server.shutdown();

    Ok(())
}

#[tokio::main]
async fn main() {
    let loaded = AppConfig::load();

    let filter = loaded
        .as_ref()
        .map(|(config, _)| config.log.filter.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(&filter);

    info!("Starting Estimo");

    let (config, source) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config, source).await {
        error!("Failed to run server: {}", e);
        std::process::exit(1);
    }
}
