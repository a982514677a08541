//! # Haven Sync Agent
//!
//! Long-running process that keeps a terminal's config cache in step with the
//! cloud and publishes the connectivity tier.
//!
//! ## Usage
//! ```bash
//! # Defaults from ~/.config/haven-pos/sync.toml
//! cargo run -p haven-sync --bin haven-agent
//!
//! # Explicit config file, verbose logging
//! RUST_LOG=debug cargo run -p haven-sync --bin haven-agent -- --config ./sync.toml
//! ```
//!
//! ## Startup Order
//! ```text
//! tracing ─► SyncConfig ─► SQLite cache ─► HttpCloudConnection
//!         ─► BreakerRegistry + RetryPolicy ─► ConfigSyncEngine
//!         ─► HttpProber ─► SyncAgent::start ─► wait for Ctrl-C
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use haven_db::{Database, DbConfig};
use haven_sync::{
    BreakerRegistry, ConfigSyncEngine, GuardedCloud, HttpCloudConnection, HttpProber,
    RetryPolicy, SyncAgent, SyncConfig, SyncPaths,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut config_path: Option<PathBuf> = None;
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let config = SyncConfig::load(config_path)?;

    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::new(DbConfig::new(&db_path)).await?;

    let http = Arc::new(HttpCloudConnection::new(&config.cloud)?);
    let breakers = Arc::new(BreakerRegistry::new((&config.breaker).into()));
    let cloud = GuardedCloud::new(http.clone(), breakers, RetryPolicy::for_cloud(&config.retry));

    let engine = ConfigSyncEngine::open(cloud, Arc::new(db.clone()), config.schema.clone())
        .await?
        .with_paths(SyncPaths::from(&config.cloud));

    let prober = Arc::new(HttpProber::from_config(&config)?);

    let mut agent = SyncAgent::new(config, Arc::new(engine), prober);
    agent.start().await?;

    info!("Haven agent running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    agent.shutdown().await?;
    http.shutdown().await;
    db.close().await;

    info!("Haven agent stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,haven=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_usage() {
    println!("Haven Sync Agent");
    println!();
    println!("USAGE:");
    println!("    haven-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>  Path to sync.toml (default: platform config dir)");
    println!("    -h, --help           Show this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("    HAVEN_CLOUD_URL, HAVEN_PUSH_URL, HAVEN_API_KEY, HAVEN_DEVICE_ID,");
    println!("    HAVEN_DATABASE_PATH, RUST_LOG");
}
