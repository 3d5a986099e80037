//! Subscription operations

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{parse_date, parse_datetime, Database};
use crate::detect::normalize_merchant;
use crate::error::{Error, Result};
use crate::models::{
    BillingCycle, DetectedSubscription, NewManualSubscription, Subscription, SubscriptionSource,
    SubscriptionStatus,
};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, merchant, merchant_key, amount, currency, \
     billing_cycle, status, next_billing_date, confidence, provider, source, scan_id, \
     first_seen, last_seen, cancelled_at, created_at, updated_at";

fn row_to_subscription(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let cycle: String = row.get(6)?;
    let status: String = row.get(7)?;
    let next_billing: Option<String> = row.get(8)?;
    let source: String = row.get(11)?;
    let first_seen: Option<String> = row.get(13)?;
    let last_seen: Option<String> = row.get(14)?;
    let cancelled_at: Option<String> = row.get(15)?;
    let created_at: String = row.get(16)?;
    let updated_at: String = row.get(17)?;

    Ok(Subscription {
        id: row.get(0)?,
        user_id: row.get(1)?,
        merchant: row.get(2)?,
        merchant_key: row.get(3)?,
        amount: row.get(4)?,
        currency: row.get(5)?,
        billing_cycle: cycle.parse().unwrap_or(BillingCycle::Unknown),
        status: status.parse().unwrap_or(SubscriptionStatus::Active),
        next_billing_date: next_billing.and_then(|s| parse_date(&s)),
        confidence: row.get(9)?,
        provider: row.get(10)?,
        source: source.parse().unwrap_or(SubscriptionSource::Detected),
        scan_id: row.get(12)?,
        first_seen: first_seen.and_then(|s| parse_date(&s)),
        last_seen: last_seen.and_then(|s| parse_date(&s)),
        cancelled_at: cancelled_at.and_then(|s| parse_date(&s)),
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

/// What happened to a detected subscription on upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "id", rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
    /// Excluded by the user, or shadowed by a manual entry
    Skipped,
}

impl Database {
    /// Insert or refresh a detected subscription, linking it to the scan
    pub fn upsert_detected_subscription(
        &self,
        user_id: i64,
        scan_id: Option<i64>,
        provider: &str,
        detected: &DetectedSubscription,
    ) -> Result<UpsertOutcome> {
        if detected.amount >= 0.0 || detected.amount.is_nan() {
            return Err(Error::InvalidData(format!(
                "Subscription amount must be negative: {} {}",
                detected.merchant, detected.amount
            )));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let overridden: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM merchant_overrides WHERE user_id = ? AND merchant_key = ?)",
            params![user_id, detected.merchant_key],
            |row| row.get(0),
        )?;
        if overridden {
            return Ok(UpsertOutcome::Skipped);
        }

        let existing: Option<(i64, String, String, Option<String>)> = tx
            .query_row(
                "SELECT id, status, source, cancelled_at FROM subscriptions WHERE user_id = ? AND merchant_key = ?",
                params![user_id, detected.merchant_key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let outcome = match existing {
            Some((_, ref status, _, _)) if status == SubscriptionStatus::Excluded.as_str() => {
                UpsertOutcome::Skipped
            }
            Some((_, _, ref source, _)) if source == SubscriptionSource::Manual.as_str() => {
                UpsertOutcome::Skipped
            }
            Some((id, status, _, cancelled_at)) => {
                // A cancelled subscription comes back only when charged after cancellation
                let reactivate = status == SubscriptionStatus::Cancelled.as_str()
                    && cancelled_at
                        .and_then(|s| parse_date(&s))
                        .map_or(true, |c| detected.last_seen > c);
                let new_status = if status == SubscriptionStatus::Active.as_str() || reactivate {
                    SubscriptionStatus::Active
                } else {
                    SubscriptionStatus::Cancelled
                };

                tx.execute(
                    r#"
                    UPDATE subscriptions
                    SET merchant = ?, amount = ?, currency = ?, billing_cycle = ?,
                        next_billing_date = ?, confidence = ?, provider = ?, scan_id = ?,
                        first_seen = MIN(COALESCE(first_seen, ?), ?), last_seen = ?,
                        status = ?,
                        cancelled_at = CASE WHEN ? = 'active' THEN NULL ELSE cancelled_at END,
                        updated_at = CURRENT_TIMESTAMP
                    WHERE id = ?
                    "#,
                    params![
                        detected.merchant,
                        detected.amount,
                        detected.currency,
                        detected.billing_cycle.as_str(),
                        detected.next_billing_date.map(|d| d.to_string()),
                        detected.confidence,
                        provider,
                        scan_id,
                        detected.first_seen.to_string(),
                        detected.first_seen.to_string(),
                        detected.last_seen.to_string(),
                        new_status.as_str(),
                        new_status.as_str(),
                        id,
                    ],
                )?;
                UpsertOutcome::Updated(id)
            }
            None => {
                tx.execute(
                    r#"
                    INSERT INTO subscriptions
                        (user_id, merchant, merchant_key, amount, currency, billing_cycle, status,
                         next_billing_date, confidence, provider, source, scan_id, first_seen, last_seen)
                    VALUES (?, ?, ?, ?, ?, ?, 'active', ?, ?, ?, 'detected', ?, ?, ?)
                    "#,
                    params![
                        user_id,
                        detected.merchant,
                        detected.merchant_key,
                        detected.amount,
                        detected.currency,
                        detected.billing_cycle.as_str(),
                        detected.next_billing_date.map(|d| d.to_string()),
                        detected.confidence,
                        provider,
                        scan_id,
                        detected.first_seen.to_string(),
                        detected.last_seen.to_string(),
                    ],
                )?;
                UpsertOutcome::Inserted(tx.last_insert_rowid())
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Add a subscription the user entered by hand
    pub fn create_manual_subscription(
        &self,
        user_id: i64,
        new: &NewManualSubscription,
    ) -> Result<Subscription> {
        let merchant = new.merchant.trim();
        if merchant.is_empty() {
            return Err(Error::InvalidData("Merchant name is required".to_string()));
        }
        if !new.cost.is_finite() || new.cost <= 0.0 {
            return Err(Error::InvalidData(format!(
                "Cost must be a positive number, got {}",
                new.cost
            )));
        }
        let currency = new.currency.trim().to_uppercase();
        if currency.len() != 3 {
            return Err(Error::InvalidData(format!("Invalid currency: {}", new.currency)));
        }

        let merchant_key = normalize_merchant(merchant);
        let conn = self.conn()?;

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE user_id = ? AND merchant_key = ?)",
            params![user_id, merchant_key],
            |row| row.get(0),
        )?;
        if exists {
            return Err(Error::Conflict(format!(
                "A subscription for {} already exists",
                merchant
            )));
        }

        conn.execute(
            r#"
            INSERT INTO subscriptions
                (user_id, merchant, merchant_key, amount, currency, billing_cycle, status,
                 next_billing_date, confidence, provider, source)
            VALUES (?, ?, ?, ?, ?, ?, 'active', ?, 1.0, 'manual', 'manual')
            "#,
            params![
                user_id,
                merchant,
                merchant_key,
                -new.cost,
                currency,
                new.billing_cycle.as_str(),
                new.next_billing_date.map(|d| d.to_string()),
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        self.get_subscription(id)?
            .ok_or_else(|| Error::NotFound(format!("Subscription {}", id)))
    }

    pub fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!(
                "SELECT {} FROM subscriptions WHERE id = ?",
                SUBSCRIPTION_COLUMNS
            ),
            params![id],
            row_to_subscription,
        );

        match result {
            Ok(sub) => Ok(Some(sub)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List a user's subscriptions, optionally filtered by status
    pub fn list_subscriptions(
        &self,
        user_id: i64,
        status: Option<SubscriptionStatus>,
    ) -> Result<Vec<Subscription>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
            ORDER BY status, amount ASC, merchant
            "#,
            SUBSCRIPTION_COLUMNS
        ))?;

        let subscriptions = stmt
            .query_map(
                params![user_id, status.map(|s| s.as_str())],
                row_to_subscription,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(subscriptions)
    }

    /// Subscriptions last produced or confirmed by a scan
    pub fn list_scan_subscriptions(&self, scan_id: i64) -> Result<Vec<Subscription>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM subscriptions WHERE scan_id = ? ORDER BY merchant",
            SUBSCRIPTION_COLUMNS
        ))?;

        let subscriptions = stmt
            .query_map(params![scan_id], row_to_subscription)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(subscriptions)
    }

    pub fn cancel_subscription(&self, id: i64, on: NaiveDate) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', cancelled_at = ?, next_billing_date = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND status = 'active'
            "#,
            params![on.to_string(), id],
        )?;
        drop(conn);

        if updated == 0 {
            return self.status_change_error(id, "cancel");
        }
        Ok(())
    }

    /// Mark as "not a subscription" and stop detecting the merchant for this user
    pub fn exclude_subscription(&self, id: i64) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let found: Option<(i64, String)> = tx
            .query_row(
                "SELECT user_id, merchant_key FROM subscriptions WHERE id = ?",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (user_id, merchant_key) =
            found.ok_or_else(|| Error::NotFound(format!("Subscription {}", id)))?;

        tx.execute(
            "UPDATE subscriptions SET status = 'excluded', updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![id],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO merchant_overrides (user_id, merchant_key) VALUES (?, ?)",
            params![user_id, merchant_key],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Return a cancelled or excluded subscription to active
    pub fn reactivate_subscription(&self, id: i64) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let found: Option<(i64, String, String)> = tx
            .query_row(
                "SELECT user_id, merchant_key, status FROM subscriptions WHERE id = ?",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let (user_id, merchant_key, status) =
            found.ok_or_else(|| Error::NotFound(format!("Subscription {}", id)))?;
        if status == SubscriptionStatus::Active.as_str() {
            return Err(Error::Conflict(format!("Subscription {} is already active", id)));
        }

        tx.execute(
            r#"
            UPDATE subscriptions
            SET status = 'active', cancelled_at = NULL, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![id],
        )?;
        tx.execute(
            "DELETE FROM merchant_overrides WHERE user_id = ? AND merchant_key = ?",
            params![user_id, merchant_key],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_subscription(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM subscriptions WHERE id = ?", params![id])?;

        if deleted == 0 {
            return Err(Error::NotFound(format!("Subscription {}", id)));
        }
        Ok(())
    }

    pub fn set_next_billing_date(&self, id: i64, date: Option<NaiveDate>) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE subscriptions SET next_billing_date = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![date.map(|d| d.to_string()), id],
        )?;

        if updated == 0 {
            return Err(Error::NotFound(format!("Subscription {}", id)));
        }
        Ok(())
    }

    pub fn is_merchant_excluded(&self, user_id: i64, merchant_key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let excluded: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM merchant_overrides WHERE user_id = ? AND merchant_key = ?)",
            params![user_id, merchant_key],
            |row| row.get(0),
        )?;
        Ok(excluded)
    }

    pub fn list_excluded_merchants(&self, user_id: i64) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT merchant_key FROM merchant_overrides WHERE user_id = ? ORDER BY merchant_key",
        )?;

        let keys = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(keys)
    }

    fn status_change_error(&self, id: i64, action: &str) -> Result<()> {
        match self.get_subscription(id)? {
            None => Err(Error::NotFound(format!("Subscription {}", id))),
            Some(sub) => Err(Error::Conflict(format!(
                "Cannot {} subscription {} with status {}",
                action, id, sub.status
            ))),
        }
    }
}
