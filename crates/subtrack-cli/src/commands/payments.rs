//! Plan purchase command implementations

use anyhow::Result;
use chrono::Utc;
use subtrack_core::db::Database;
use subtrack_core::models::Plan;

use super::{require_user, CLI_ACTOR};

pub fn cmd_payments_list(db: &Database, user_id: i64) -> Result<()> {
    require_user(db, user_id)?;
    let payments = db.list_payments(user_id)?;

    if payments.is_empty() {
        println!("No payments recorded.");
        return Ok(());
    }

    println!();
    println!("💳 Payments");
    println!("   ─────────────────────────────────────────────────────────────");
    for p in payments {
        println!(
            "   {:>4} │ {:24} │ {:10} │ {:>8.2} {} │ {:9} │ {}",
            p.id,
            p.provider_reference,
            p.plan.as_str(),
            p.amount,
            p.currency,
            p.status.as_str(),
            p.created_at.format("%Y-%m-%d")
        );
    }

    Ok(())
}

pub fn cmd_payments_record(
    db: &Database,
    user_id: i64,
    reference: &str,
    plan: &str,
    amount: f64,
    currency: &str,
) -> Result<()> {
    let plan: Plan = plan.parse().map_err(anyhow::Error::msg)?;
    let payment = db.record_payment(user_id, reference.trim(), plan, amount, currency)?;
    db.log_audit(
        CLI_ACTOR,
        "record",
        Some("payment"),
        Some(payment.id),
        Some(&format!("reference={}, plan={}", payment.provider_reference, plan)),
    )?;

    println!(
        "✅ Recorded pending {} payment {} ({:.2} {})",
        payment.plan, payment.provider_reference, payment.amount, payment.currency
    );
    println!(
        "   Confirm with: subtrack payments --user {} complete {}",
        user_id, payment.provider_reference
    );
    Ok(())
}

pub fn cmd_payments_complete(db: &Database, user_id: i64, reference: &str) -> Result<()> {
    let payment = db
        .get_payment(reference)?
        .filter(|p| p.user_id == user_id)
        .ok_or_else(|| anyhow::anyhow!("Payment not found for user {}: {}", user_id, reference))?;

    let payment = db.complete_payment(&payment.provider_reference, Utc::now())?;
    db.log_audit(
        CLI_ACTOR,
        "complete",
        Some("payment"),
        Some(payment.id),
        Some(&format!("plan={}", payment.plan)),
    )?;

    let user = require_user(db, user_id)?;
    println!("✅ Payment {} completed", payment.provider_reference);
    println!("   Plan:    {}", user.plan);
    if let Some(expires) = user.plan_expires_at {
        println!("   Expires: {}", expires.format("%Y-%m-%d"));
    }
    Ok(())
}
