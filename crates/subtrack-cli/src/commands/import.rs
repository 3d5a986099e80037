//! CSV import command

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use subtrack_core::db::Database;
use subtrack_core::import::{ingest_transactions, parse_csv};

use super::{require_user, CLI_ACTOR};

pub fn cmd_import(db: &Database, user_id: i64, file: &Path, currency: &str) -> Result<()> {
    let user = require_user(db, user_id)?;

    println!("📥 Importing {} for {}...", file.display(), user.email);

    let reader = BufReader::new(
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?,
    );
    let transactions = parse_csv(reader, currency).context("Failed to parse CSV")?;
    let stats = ingest_transactions(db, user.id, None, &transactions)?;

    db.log_audit(
        CLI_ACTOR,
        "import",
        Some("user"),
        Some(user.id),
        Some(&format!(
            "file={}, inserted={}, duplicates={}",
            file.display(),
            stats.inserted,
            stats.duplicates
        )),
    )?;

    println!("   Rows read:  {}", stats.received);
    println!("   Imported:   {}", stats.inserted);
    if stats.duplicates > 0 {
        println!("   Duplicates: {} (already imported)", stats.duplicates);
    }
    println!();
    println!("✅ Import complete. Run 'subtrack scan --user {}' next.", user.id);

    Ok(())
}
