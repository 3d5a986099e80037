//! Maintenance command implementations (doctor, prune, audit)

use std::path::Path;

use anyhow::Result;
use subtrack_core::db::Database;
use subtrack_core::maintenance::prune_subscriptions;

use super::{load_detection_config, require_user, truncate, CLI_ACTOR};

pub fn cmd_doctor(db: &Database, fix: bool) -> Result<()> {
    let mut report = db.integrity_report()?;

    println!();
    println!("🩺 Database Check");
    println!("   ─────────────────────────────");
    println!("   Schema version: {}", report.schema_version);
    println!(
        "   Encryption:     {}",
        if report.encrypted { "enabled" } else { "disabled" }
    );
    println!("   Users:          {} ({} pro)", report.users, report.pro_users);
    println!("   Transactions:   {}", report.transactions);
    for (label, counts) in [
        ("Subscriptions", &report.subscriptions_by_status),
        ("Connections", &report.connections_by_status),
        ("Scans", &report.scans_by_status),
    ] {
        let summary = counts
            .iter()
            .map(|(status, n)| format!("{} {}", n, status))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "   {:15} {}",
            format!("{}:", label),
            if summary.is_empty() { "none".to_string() } else { summary }
        );
    }

    if report.stuck_scans > 0 && fix {
        let recovered = db.recover_stuck_scans()?;
        db.log_audit(
            CLI_ACTOR,
            "recover_scans",
            Some("scan"),
            None,
            Some(&format!("count={}", recovered)),
        )?;
        println!();
        println!("   🔧 Marked {} stuck scan(s) as failed", recovered);
        report = db.integrity_report()?;
    }

    println!();
    if report.is_healthy() {
        println!("✅ No problems found");
    } else {
        if report.stuck_scans > 0 {
            println!(
                "⚠️  {} scan(s) still marked running (run with --fix to reset)",
                report.stuck_scans
            );
        }
        if report.orphaned_scan_links > 0 {
            println!(
                "⚠️  {} subscription(s) point at a missing scan",
                report.orphaned_scan_links
            );
        }
        if report.foreign_key_violations > 0 {
            println!(
                "❌ {} foreign key violation(s)",
                report.foreign_key_violations
            );
        }
    }

    Ok(())
}

pub fn cmd_prune(
    db: &Database,
    user_id: i64,
    dry_run: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    require_user(db, user_id)?;
    let config = load_detection_config(config_path)?;

    let result = prune_subscriptions(db, user_id, &config, dry_run)?;

    if result.pruned.is_empty() {
        println!("✅ All detected subscriptions pass the current rules");
        return Ok(());
    }

    if dry_run {
        println!("🔎 Would remove {} subscription(s):", result.pruned.len());
    } else {
        db.log_audit(
            CLI_ACTOR,
            "prune",
            Some("user"),
            Some(user_id),
            Some(&format!("removed={}", result.pruned.len())),
        )?;
        println!("🧹 Removed {} subscription(s):", result.pruned.len());
    }
    for p in &result.pruned {
        println!("   {:>4} {:24} ({})", p.id, truncate(&p.merchant, 24), p.reason);
    }

    Ok(())
}

pub fn cmd_audit(db: &Database, limit: i64) -> Result<()> {
    let entries = db.list_audit_log(limit.clamp(1, 1000))?;

    if entries.is_empty() {
        println!("Audit log is empty.");
        return Ok(());
    }

    println!();
    println!("📜 Audit Log");
    println!("   ─────────────────────────────────────────────────────────────");
    for entry in entries {
        let entity = match (&entry.entity_type, entry.entity_id) {
            (Some(t), Some(id)) => format!("{} #{}", t, id),
            (Some(t), None) => t.clone(),
            _ => String::new(),
        };
        println!(
            "   {} │ {:12} │ {:12} │ {:18} │ {}",
            entry.timestamp,
            truncate(&entry.actor, 12),
            entry.action,
            entity,
            entry.details.as_deref().unwrap_or("")
        );
    }

    Ok(())
}
