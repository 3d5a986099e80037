//! Subscription command implementations

use anyhow::{Context, Result};
use chrono::Utc;
use subtrack_core::db::Database;
use subtrack_core::models::{
    BillingCycle, NewManualSubscription, Subscription, SubscriptionSource, SubscriptionStatus,
};

use super::{parse_date_flag, require_user, truncate, CLI_ACTOR};

/// Look up a subscription that belongs to the given user
fn require_subscription(db: &Database, user_id: i64, id: i64) -> Result<Subscription> {
    db.get_subscription(id)?
        .filter(|s| s.user_id == user_id)
        .ok_or_else(|| anyhow::anyhow!("Subscription not found for user {}: {}", user_id, id))
}

pub fn cmd_subscriptions_list(db: &Database, user_id: i64, status: Option<&str>) -> Result<()> {
    require_user(db, user_id)?;
    let status: Option<SubscriptionStatus> = status
        .map(str::parse)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let subscriptions = db.list_subscriptions(user_id, status)?;

    if subscriptions.is_empty() {
        println!("No subscriptions yet. Run:");
        println!("  subtrack scan --user {}", user_id);
        return Ok(());
    }

    println!();
    println!("📋 Subscriptions");
    println!("   ─────────────────────────────────────────────────────────────");

    for sub in subscriptions {
        let status_icon = match sub.status {
            SubscriptionStatus::Active => "✅",
            SubscriptionStatus::Cancelled => "❌",
            SubscriptionStatus::Excluded => "🚫",
        };
        let source = match sub.source {
            SubscriptionSource::Manual => " (manual)",
            SubscriptionSource::Detected => "",
        };

        println!(
            "   {} {:>4} {:20} │ {:>8.2} {}/{:<7} │ next {}{}",
            status_icon,
            sub.id,
            truncate(&sub.merchant, 20),
            sub.cost(),
            sub.currency,
            sub.billing_cycle.as_str(),
            sub.next_billing_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "?".to_string()),
            source
        );
    }

    Ok(())
}

pub fn cmd_subscriptions_add(
    db: &Database,
    user_id: i64,
    merchant: &str,
    cost: f64,
    currency: &str,
    cycle: &str,
    next: Option<&str>,
) -> Result<()> {
    require_user(db, user_id)?;
    let billing_cycle: BillingCycle = cycle.parse().map_err(anyhow::Error::msg)?;
    let next_billing_date = next.map(|s| parse_date_flag(s, "--next")).transpose()?;

    let subscription = db.create_manual_subscription(
        user_id,
        &NewManualSubscription {
            merchant: merchant.to_string(),
            cost,
            currency: currency.to_string(),
            billing_cycle,
            next_billing_date,
        },
    )?;
    db.log_audit(
        CLI_ACTOR,
        "create",
        Some("subscription"),
        Some(subscription.id),
        Some(&format!("merchant={}", subscription.merchant)),
    )?;

    println!(
        "✅ Added {} ({:.2} {}/{}) as ID {}",
        subscription.merchant,
        subscription.cost(),
        subscription.currency,
        subscription.billing_cycle,
        subscription.id
    );
    Ok(())
}

pub fn cmd_subscriptions_cancel(
    db: &Database,
    user_id: i64,
    id: i64,
    date: Option<&str>,
) -> Result<()> {
    let sub = require_subscription(db, user_id, id)?;

    let cancel_date = date
        .map(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .context("Invalid --date format (use YYYY-MM-DD)")?
        .unwrap_or_else(|| Utc::now().date_naive());

    db.cancel_subscription(sub.id, cancel_date)?;
    db.log_audit(
        CLI_ACTOR,
        "cancel",
        Some("subscription"),
        Some(sub.id),
        Some(&format!("date={}", cancel_date)),
    )?;

    println!(
        "✅ {} cancelled (ID: {}) as of {}",
        sub.merchant, sub.id, cancel_date
    );
    Ok(())
}

pub fn cmd_subscriptions_exclude(db: &Database, user_id: i64, id: i64) -> Result<()> {
    let sub = require_subscription(db, user_id, id)?;

    db.exclude_subscription(sub.id)?;
    db.log_audit(
        CLI_ACTOR,
        "exclude",
        Some("subscription"),
        Some(sub.id),
        Some("marked as not a subscription"),
    )?;

    println!(
        "🚫 {} excluded. Future scans will skip this merchant.",
        sub.merchant
    );
    Ok(())
}

pub fn cmd_subscriptions_reactivate(db: &Database, user_id: i64, id: i64) -> Result<()> {
    let sub = require_subscription(db, user_id, id)?;

    db.reactivate_subscription(sub.id)?;
    db.log_audit(CLI_ACTOR, "reactivate", Some("subscription"), Some(sub.id), None)?;

    println!("✅ {} is active again", sub.merchant);
    Ok(())
}

pub fn cmd_subscriptions_delete(db: &Database, user_id: i64, id: i64) -> Result<()> {
    let sub = require_subscription(db, user_id, id)?;

    db.delete_subscription(sub.id)?;
    db.log_audit(CLI_ACTOR, "delete", Some("subscription"), Some(sub.id), None)?;

    println!("🗑️  Deleted {} (ID: {})", sub.merchant, sub.id);
    if sub.source == SubscriptionSource::Detected {
        println!("   It will come back on the next scan unless excluded.");
    }
    Ok(())
}
