//! # Config Cache Seeder
//!
//! Provisions a local config cache from an exported full-sync snapshot, so a
//! terminal can be installed and opened for business before it ever reaches
//! the cloud.
//!
//! ## Usage
//! ```bash
//! # Import a snapshot into the default cache file
//! cargo run -p haven-db --bin seed -- --snapshot ./store-42.json
//!
//! # Specify database path
//! cargo run -p haven-db --bin seed -- --snapshot ./store-42.json --db ./data/config-cache.db
//! ```
//!
//! ## Snapshot Format
//! The same JSON object the cloud returns from `config/full`:
//! `{"version": 12, "menuItems": [...], "storeSettings": {...}, ...}`.
//! Keys outside the default sync schema are ignored.

use std::env;
use std::fs;

use haven_core::{ConfigSnapshot, SyncSchema};
use haven_db::{Database, DbConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut snapshot_path: Option<String> = None;
    let mut db_path = String::from("./haven_config_cache.db");
    let mut force = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--snapshot" | "-s" => {
                if i + 1 < args.len() {
                    snapshot_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--force" | "-f" => force = true,
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let Some(snapshot_path) = snapshot_path else {
        print_usage();
        return Err("missing --snapshot".into());
    };

    println!("Haven POS Config Cache Seeder");
    println!("=============================");
    println!("Database: {}", db_path);
    println!("Snapshot: {}", snapshot_path);
    println!();

    let raw = fs::read_to_string(&snapshot_path)?;
    let response: serde_json::Value = serde_json::from_str(&raw)?;
    let snapshot = ConfigSnapshot::from_response(&response, &SyncSchema::default())?;

    println!(
        "✓ Parsed snapshot v{} ({} entities, {} scalars)",
        snapshot.version,
        snapshot.entity_count(),
        snapshot.scalar_config.len()
    );

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.config().get_version().await?;
    if existing.value() > 0 && !force {
        println!("⚠ Cache already holds config v{}", existing);
        println!("  Skipping import. Pass --force to overwrite.");
        return Ok(());
    }

    let start = std::time::Instant::now();
    let written = db.config().import_snapshot(&snapshot).await?;

    println!();
    println!("✓ Imported {} entities in {:?}", written, start.elapsed());
    println!("✓ Cache is now at config v{}", snapshot.version);

    db.close().await;
    Ok(())
}

fn print_usage() {
    println!("Haven POS Config Cache Seeder");
    println!();
    println!("Usage: seed --snapshot <FILE> [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -s, --snapshot <FILE>  Full-sync snapshot JSON to import");
    println!("  -d, --db <PATH>        Database file path (default: ./haven_config_cache.db)");
    println!("  -f, --force            Import even if the cache already has a version");
    println!("  -h, --help             Show this help message");
}
