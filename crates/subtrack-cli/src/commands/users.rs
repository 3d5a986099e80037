//! User command implementations

use anyhow::Result;
use chrono::{NaiveTime, Utc};
use subtrack_core::db::Database;
use subtrack_core::models::{BillingStatus, Plan};

use super::{parse_date_flag, require_user, truncate, CLI_ACTOR};

pub fn cmd_users_list(db: &Database) -> Result<()> {
    let users = db.list_users()?;

    if users.is_empty() {
        println!("No users yet. Run:");
        println!("  subtrack users add --email you@example.com");
        return Ok(());
    }

    let now = Utc::now();
    println!();
    println!("👤 Users");
    println!("   ─────────────────────────────────────────────────────────────");
    for user in users {
        println!(
            "   {:>4} │ {:30} │ {:10} │ {}",
            user.id,
            truncate(&user.email, 30),
            user.plan.as_str(),
            if user.is_pro(now) { "pro" } else { "" }
        );
    }

    Ok(())
}

pub fn cmd_users_add(db: &Database, email: &str, name: Option<&str>) -> Result<()> {
    let user = db.create_user(email, name)?;
    db.log_audit(CLI_ACTOR, "create", Some("user"), Some(user.id), None)?;

    println!("✅ Created user {} (ID: {})", user.email, user.id);
    Ok(())
}

pub fn cmd_users_show(db: &Database, id: i64) -> Result<()> {
    let user = require_user(db, id)?;
    let now = Utc::now();

    println!();
    println!("👤 {}", user.email);
    println!("   ─────────────────────────────");
    println!("   ID:       {}", user.id);
    if let Some(name) = &user.name {
        println!("   Name:     {}", name);
    }
    println!("   Plan:     {}", user.plan);
    println!("   Billing:  {}", user.billing_status);
    if let Some(expires) = user.plan_expires_at {
        println!("   Expires:  {}", expires.format("%Y-%m-%d"));
    }
    println!("   Pro:      {}", if user.is_pro(now) { "yes" } else { "no" });
    println!("   Scans:    {}", db.count_completed_scans(user.id)?);
    println!("   Created:  {}", user.created_at.format("%Y-%m-%d"));

    Ok(())
}

pub fn cmd_users_delete(db: &Database, id: i64) -> Result<()> {
    let result = db.delete_user(id)?;
    db.log_audit(
        CLI_ACTOR,
        "delete",
        Some("user"),
        Some(id),
        Some(&serde_json::to_string(&result)?),
    )?;

    println!("🗑️  Deleted user {}", id);
    println!(
        "   Removed {} subscriptions, {} transactions, {} connections, {} scans, {} payments",
        result.subscriptions, result.transactions, result.connections, result.scans, result.payments
    );
    Ok(())
}

pub fn cmd_users_plan(
    db: &Database,
    id: i64,
    plan: &str,
    status: Option<&str>,
    expires: Option<&str>,
) -> Result<()> {
    let plan: Plan = plan.parse().map_err(anyhow::Error::msg)?;
    let billing_status = match status {
        Some(s) => s.parse().map_err(anyhow::Error::msg)?,
        None if plan == Plan::Free => BillingStatus::None,
        None => BillingStatus::Active,
    };
    let expires_at = match expires {
        Some(_) if plan == Plan::Free => None,
        Some(s) => Some(
            parse_date_flag(s, "--expires")?
                .and_time(NaiveTime::default())
                .and_utc(),
        ),
        None => None,
    };

    let user = db.set_user_plan(id, plan, billing_status, expires_at)?;
    db.log_audit(
        CLI_ACTOR,
        "set_plan",
        Some("user"),
        Some(id),
        Some(&format!("plan={}, billing_status={}", plan, billing_status)),
    )?;

    println!(
        "✅ {} is now on the {} plan ({})",
        user.email, user.plan, user.billing_status
    );
    Ok(())
}
