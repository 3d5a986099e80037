//! Status-related command implementations (status, dashboard)

use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use subtrack_core::db::{Database, DB_KEY_ENV};

use super::{open_db, require_user, truncate};

pub fn cmd_status(db_path: &Path, no_encrypt: bool) -> Result<()> {
    use std::fs;

    println!();
    println!("📊 SubTrack Status");
    println!("   ─────────────────────────────────────────────────────────────");

    // Database path
    println!("   Database: {}", db_path.display());

    // Check if database file exists and get size
    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (database not initialized)");
    }

    // Check encryption status
    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: REQUIRED but {} not set", DB_KEY_ENV);
    }

    // Try to open the database and show stats
    if db_path.exists() {
        match open_db(db_path, no_encrypt) {
            Ok(db) => {
                if let Ok(report) = db.integrity_report() {
                    let active = report
                        .subscriptions_by_status
                        .get("active")
                        .copied()
                        .unwrap_or(0);
                    println!();
                    println!("   Schema version: {}", report.schema_version);
                    println!("   Users: {} ({} pro)", report.users, report.pro_users);
                    println!("   Transactions: {}", report.transactions);
                    println!("   Active subscriptions: {}", active);
                }
            }
            Err(e) => {
                println!();
                println!("   ❌ Error opening database: {}", e);
                if !no_encrypt && !has_key {
                    println!("      Set {} or use --no-encrypt", DB_KEY_ENV);
                } else if has_key {
                    println!("      (Check if {} is correct)", DB_KEY_ENV);
                }
            }
        }
    }

    println!();
    Ok(())
}

pub fn cmd_dashboard(db: &Database, user_id: i64) -> Result<()> {
    let user = require_user(db, user_id)?;
    let dashboard = db.get_dashboard(user.id, Utc::now())?;

    println!();
    println!("╭─────────────────────────────────────────╮");
    println!("│        💰 SubTrack Dashboard            │");
    println!("╰─────────────────────────────────────────╯");
    println!();
    println!("  User:            {}", user.email);
    println!(
        "  Plan:            {}{}",
        dashboard.plan,
        if dashboard.is_pro { " (pro)" } else { "" }
    );
    println!("  Active:          {}", dashboard.active_subscriptions);
    println!("  Cancelled:       {}", dashboard.cancelled_subscriptions);
    println!("  Linked banks:    {}", dashboard.linked_connections);

    if !dashboard.totals.is_empty() {
        println!();
        println!("  💸 Spending");
        for total in &dashboard.totals {
            println!(
                "     {:>10.2} {}/month   {:>10.2} {}/year",
                total.monthly, total.currency, total.yearly, total.currency
            );
        }
    }

    if !dashboard.upcoming.is_empty() {
        println!();
        println!("  📅 Upcoming");
        for charge in &dashboard.upcoming {
            println!(
                "     {} │ {:20} │ {:>8.2} {}",
                charge.date,
                truncate(&charge.merchant, 20),
                charge.cost,
                charge.currency
            );
        }
    }

    match &dashboard.last_scan {
        Some(scan) => {
            println!();
            println!(
                "  Last scan:       {} ({}, {} found)",
                scan.started_at.format("%Y-%m-%d %H:%M"),
                scan.status.as_str(),
                scan.subscriptions_found
            );
        }
        None => {
            println!();
            println!("  💡 No scans yet. Run: subtrack scan --user {}", user.id);
        }
    }

    println!();
    Ok(())
}
