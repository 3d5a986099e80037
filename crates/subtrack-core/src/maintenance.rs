//! Cleanup and diagnostics
//!
//! Detection rules change over time (a merchant gets blacklisted, the
//! amount range is tightened). Pruning applies the current rules to what a
//! user already has stored.

use serde::Serialize;
use tracing::info;

use crate::config::DetectionConfig;
use crate::db::Database;
use crate::detect::{amount_in_range, is_blacklisted, is_income};
use crate::error::{Error, Result};
use crate::models::{Subscription, SubscriptionSource};

pub use crate::db::IntegrityReport;

/// A stored subscription the current rules reject
#[derive(Debug, Clone, Serialize)]
pub struct PrunedSubscription {
    pub id: i64,
    pub merchant: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneResult {
    pub dry_run: bool,
    pub pruned: Vec<PrunedSubscription>,
}

fn rejection_reason(sub: &Subscription, config: &DetectionConfig) -> Option<&'static str> {
    if is_income(sub.amount) {
        Some("income")
    } else if !amount_in_range(sub.amount, config) {
        Some("amount out of range")
    } else if is_blacklisted(&sub.merchant, &config.blacklist)
        || is_blacklisted(&sub.merchant_key, &config.blacklist)
    {
        Some("blacklisted")
    } else {
        None
    }
}

/// Delete a user's detected subscriptions that fail the detection filters
///
/// Manual subscriptions are never touched. With `dry_run` nothing is
/// deleted and the result lists what would go.
pub fn prune_subscriptions(
    db: &Database,
    user_id: i64,
    config: &DetectionConfig,
    dry_run: bool,
) -> Result<PruneResult> {
    if db.get_user(user_id)?.is_none() {
        return Err(Error::NotFound(format!("User {}", user_id)));
    }

    let mut pruned = Vec::new();
    for sub in db
        .list_subscriptions(user_id, None)?
        .into_iter()
        .filter(|s| s.source == SubscriptionSource::Detected)
    {
        let Some(reason) = rejection_reason(&sub, config) else {
            continue;
        };
        if !dry_run {
            db.delete_subscription(sub.id)?;
        }
        pruned.push(PrunedSubscription {
            id: sub.id,
            merchant: sub.merchant,
            reason,
        });
    }

    info!(
        "{} {} subscriptions for user {}",
        if dry_run { "Would prune" } else { "Pruned" },
        pruned.len(),
        user_id
    );
    Ok(PruneResult { dry_run, pruned })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BillingCycle, DetectedSubscription, NewManualSubscription};
    use chrono::NaiveDate;

    fn detected(merchant: &str, amount: f64) -> DetectedSubscription {
        let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        DetectedSubscription {
            merchant: merchant.to_string(),
            merchant_key: crate::detect::normalize_merchant(merchant),
            amount,
            currency: "EUR".to_string(),
            billing_cycle: BillingCycle::Monthly,
            next_billing_date: Some(d),
            confidence: 0.9,
            occurrences: 3,
            first_seen: d,
            last_seen: d,
        }
    }

    #[test]
    fn test_prune_detected_only() {
        let db = Database::in_memory().unwrap();
        let user = db.create_user("prune@example.com", None).unwrap();
        db.upsert_detected_subscription(user.id, None, "csv", &detected("Netflix", -15.99))
            .unwrap();
        db.upsert_detected_subscription(user.id, None, "csv", &detected("REWE Markt", -40.0))
            .unwrap();
        db.upsert_detected_subscription(user.id, None, "csv", &detected("Leasing", -899.0))
            .unwrap();
        db.create_manual_subscription(
            user.id,
            &NewManualSubscription {
                merchant: "Lidl Plus".to_string(),
                cost: 4.99,
                currency: "EUR".to_string(),
                billing_cycle: BillingCycle::Monthly,
                next_billing_date: None,
            },
        )
        .unwrap();

        let config = DetectionConfig::default();
        let preview = prune_subscriptions(&db, user.id, &config, true).unwrap();
        assert_eq!(preview.pruned.len(), 2);
        assert_eq!(db.list_subscriptions(user.id, None).unwrap().len(), 4);

        let result = prune_subscriptions(&db, user.id, &config, false).unwrap();
        let mut merchants: Vec<_> = result.pruned.iter().map(|p| p.merchant.as_str()).collect();
        merchants.sort();
        assert_eq!(merchants, vec!["Leasing", "REWE Markt"]);

        let remaining: Vec<_> = db
            .list_subscriptions(user.id, None)
            .unwrap()
            .into_iter()
            .map(|s| s.merchant)
            .collect();
        assert!(remaining.contains(&"Netflix".to_string()));
        assert!(remaining.contains(&"Lidl Plus".to_string()));
    }
}
