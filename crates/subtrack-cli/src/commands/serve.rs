//! Server command implementation

use std::path::Path;

use anyhow::{Context, Result};
use subtrack_server::{ScanScheduleConfig, ServerConfig};

use super::{load_detection_config, open_db};

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_encrypt: bool,
    static_dir: Option<&Path>,
    allowed_origins: Vec<String>,
    config_path: Option<&Path>,
) -> Result<()> {
    println!("🚀 Starting SubTrack web server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);
    if let Some(dir) = static_dir {
        println!("   Static files: {}", dir.display());
    }
    if !allowed_origins.is_empty() {
        println!("   CORS origins: {}", allowed_origins.join(", "));
    }
    match ScanScheduleConfig::from_env() {
        Some(schedule) => println!(
            "   ⏰ Bank sync: every {} hours (SUBTRACK_SCAN_INTERVAL_HOURS)",
            schedule.interval_hours
        ),
        None => println!("   ⏰ Bank sync: manual (set SUBTRACK_SCAN_INTERVAL_HOURS to schedule)"),
    }
    println!();
    println!("   ⚠️  No authentication - keep the server on a trusted network");
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;
    let detection = load_detection_config(config_path)?;

    let config = ServerConfig {
        allowed_origins,
        detection,
        ..Default::default()
    };

    let static_dir_str = static_dir
        .map(|p| p.to_str().context("static_dir path must be valid UTF-8"))
        .transpose()?;
    subtrack_server::serve_with_config(db, host, port, static_dir_str, config).await?;

    Ok(())
}
