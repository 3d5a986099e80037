//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `require_user` / `require_bank` - Lookups shared by the other commands
//! - `cmd_init` - Initialize the database
//! - `cmd_scan` - Run recurrence detection

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use subtrack_core::bank::{BankClient, BankProvider};
use subtrack_core::config::DetectionConfig;
use subtrack_core::models::{BankConnection, ConnectionStatus, User};
use subtrack_core::{db::Database, detect::RecurrenceDetector};

use super::CLI_ACTOR;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Look up a user or fail with a readable message
pub fn require_user(db: &Database, user_id: i64) -> Result<User> {
    db.get_user(user_id)?
        .ok_or_else(|| anyhow::anyhow!("User not found: {}", user_id))
}

/// The bank provider configured in the environment
pub fn require_bank() -> Result<BankClient> {
    BankClient::from_env().context(
        "No bank provider configured (set GOCARDLESS_SECRET_ID/GOCARDLESS_SECRET_KEY or BANK_PROVIDER=mock)",
    )
}

/// Load detection config from an explicit path or the default locations
pub fn load_detection_config(path: Option<&Path>) -> Result<DetectionConfig> {
    DetectionConfig::load(path).context("Failed to load detection config")
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;
    let version = db.schema_version().context("Failed to read schema version")?;
    println!("   Schema version: {}", version);

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Create a user: subtrack users add --email you@example.com");
    println!("  2. Import transactions: subtrack import --user 1 --file statement.csv");
    println!("  3. Find subscriptions: subtrack scan --user 1");

    Ok(())
}

/// Label for a scan: the configured bank when the user has a linked
/// connection with it, otherwise "csv"
pub fn scan_provider(connections: &[BankConnection], bank: Option<&str>) -> String {
    let Some(bank) = bank else {
        return "csv".to_string();
    };
    connections
        .iter()
        .filter(|c| c.status == ConnectionStatus::Linked && c.provider == bank)
        .max_by_key(|c| c.last_synced_at)
        .map_or_else(|| "csv".to_string(), |c| c.provider.clone())
}

pub fn cmd_scan(db: &Database, user_id: i64, config_path: Option<&Path>) -> Result<()> {
    let user = require_user(db, user_id)?;
    let config = load_detection_config(config_path)?;

    let bank = BankClient::from_env();
    let connections = db.list_connections(Some(user.id))?;
    let provider = scan_provider(&connections, bank.as_ref().map(|b| b.name()));
    tracing::debug!("Scan provider for user {}: {}", user.id, provider);

    println!("🔍 Scanning transactions for {}...", user.email);

    let detector = RecurrenceDetector::with_config(db, config);
    let outcome = detector.run_scan(user.id, &provider, Utc::now())?;

    db.log_audit(
        CLI_ACTOR,
        "scan",
        Some("user"),
        Some(user.id),
        Some(&format!(
            "scan_id={}, found={}",
            outcome.scan_id, outcome.subscriptions_found
        )),
    )?;

    println!();
    println!("📊 Scan Results (scan #{})", outcome.scan_id);
    println!("   ─────────────────────────────");
    println!("   Transactions scanned: {}", outcome.transactions_scanned);
    println!("   Recurring charges:    {}", outcome.detected);
    println!("   New subscriptions:    {}", outcome.inserted);
    println!("   Updated:              {}", outcome.updated);
    if outcome.skipped > 0 {
        println!("   Skipped (excluded/manual): {}", outcome.skipped);
    }
    if outcome.lapsed > 0 {
        println!("   ⏹️  Lapsed (charges stopped): {}", outcome.lapsed);
    }
    println!();
    println!(
        "✅ {} active subscription(s). Run 'subtrack subscriptions --user {}' to see them.",
        outcome.subscriptions_found, user.id
    );

    Ok(())
}
