//! Dashboard and audit log operations

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use super::scans::row_to_scan;
use super::{parse_date, AuditEntry, Database};
use crate::error::{Error, Result};
use crate::models::{CurrencyTotal, Dashboard, UpcomingBilling};

/// How far ahead the dashboard looks for upcoming charges
pub const UPCOMING_WINDOW_DAYS: i64 = 30;

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Database {
    /// Summarize a user's active subscriptions
    pub fn get_dashboard(&self, user_id: i64, now: DateTime<Utc>) -> Result<Dashboard> {
        let user = self
            .get_user(user_id)?
            .ok_or_else(|| Error::NotFound(format!("User {}", user_id)))?;
        let today = now.date_naive();
        let conn = self.conn()?;

        let (active, cancelled): (i64, i64) = conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END), 0)
            FROM subscriptions WHERE user_id = ?
            "#,
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        // Normalize each charge to a monthly amount
        let mut stmt = conn.prepare(
            r#"
            SELECT currency, SUM(
                CASE billing_cycle
                    WHEN 'daily' THEN -amount * 30.44
                    WHEN 'weekly' THEN -amount * 4.33
                    WHEN 'yearly' THEN -amount / 12.0
                    ELSE -amount
                END
            )
            FROM subscriptions
            WHERE user_id = ? AND status = 'active'
            GROUP BY currency
            ORDER BY currency
            "#,
        )?;
        let totals = stmt
            .query_map(params![user_id], |row| {
                let monthly: f64 = row.get(1)?;
                Ok(CurrencyTotal {
                    currency: row.get(0)?,
                    monthly: round_cents(monthly),
                    yearly: round_cents(monthly * 12.0),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let horizon = today + Duration::days(UPCOMING_WINDOW_DAYS);
        let mut stmt = conn.prepare(
            r#"
            SELECT id, merchant, -amount, currency, next_billing_date
            FROM subscriptions
            WHERE user_id = ? AND status = 'active'
              AND next_billing_date >= ? AND next_billing_date <= ?
            ORDER BY next_billing_date, merchant
            "#,
        )?;
        let upcoming = stmt
            .query_map(
                params![user_id, today.to_string(), horizon.to_string()],
                |row| {
                    let date: String = row.get(4)?;
                    Ok(UpcomingBilling {
                        subscription_id: row.get(0)?,
                        merchant: row.get(1)?,
                        cost: row.get(2)?,
                        currency: row.get(3)?,
                        date: parse_date(&date).unwrap_or(today),
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let linked_connections: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bank_connections WHERE user_id = ? AND status = 'linked'",
            params![user_id],
            |row| row.get(0),
        )?;

        let last_scan = conn
            .query_row(
                r#"
                SELECT id, user_id, provider, status, started_at, completed_at,
                       subscriptions_found, transactions_scanned, error_message
                FROM bank_scans WHERE user_id = ? ORDER BY id DESC LIMIT 1
                "#,
                params![user_id],
                row_to_scan,
            )
            .optional()?;

        Ok(Dashboard {
            user_id,
            plan: user.plan,
            is_pro: user.is_pro(now),
            active_subscriptions: active,
            cancelled_subscriptions: cancelled,
            totals,
            upcoming,
            linked_connections,
            last_scan,
        })
    }

    /// Log an audit event
    pub fn log_audit(
        &self,
        actor: &str,
        action: &str,
        entity_type: Option<&str>,
        entity_id: Option<i64>,
        details: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO audit_log (actor, action, entity_type, entity_id, details)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![actor, action, entity_type, entity_id, details],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// List audit log entries, newest first
    pub fn list_audit_log(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, timestamp, actor, action, entity_type, entity_id, details
            FROM audit_log
            ORDER BY id DESC
            LIMIT ?
            "#,
        )?;

        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    actor: row.get(2)?,
                    action: row.get(3)?,
                    entity_type: row.get(4)?,
                    entity_id: row.get(5)?,
                    details: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}
