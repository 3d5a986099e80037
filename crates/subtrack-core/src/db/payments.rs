//! Plan purchase audit trail

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tracing::info;

use super::users::{row_to_user, USER_COLUMNS};
use super::{format_datetime, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Payment, PaymentStatus, Plan};
use crate::plans::PlanManager;

const PAYMENT_COLUMNS: &str =
    "id, user_id, provider_reference, plan, amount, currency, status, created_at, completed_at";

fn row_to_payment(row: &Row<'_>) -> rusqlite::Result<Payment> {
    let plan: String = row.get(3)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let completed_at: Option<String> = row.get(8)?;

    Ok(Payment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider_reference: row.get(2)?,
        plan: plan.parse().unwrap_or(Plan::OneTime),
        amount: row.get(4)?,
        currency: row.get(5)?,
        status: status.parse().unwrap_or(PaymentStatus::Pending),
        created_at: parse_datetime(&created_at),
        completed_at: completed_at.map(|s| parse_datetime(&s)),
    })
}

impl Database {
    /// Record a pending plan purchase
    pub fn record_payment(
        &self,
        user_id: i64,
        provider_reference: &str,
        plan: Plan,
        amount: f64,
        currency: &str,
    ) -> Result<Payment> {
        if plan == Plan::Free {
            return Err(Error::InvalidData("The free plan cannot be purchased".to_string()));
        }
        if !amount.is_finite() || amount < 0.0 {
            return Err(Error::InvalidData(format!("Invalid payment amount: {}", amount)));
        }
        if provider_reference.trim().is_empty() {
            return Err(Error::InvalidData("Payment reference is required".to_string()));
        }

        let user = self
            .get_user(user_id)?
            .ok_or_else(|| Error::NotFound(format!("User {}", user_id)))?;
        if plan == Plan::OneTime
            && PlanManager::effective_plan(&user, Utc::now()) == Plan::Recurring
        {
            return Err(Error::Conflict(
                "A one-time scan cannot be bought while a recurring plan is active".to_string(),
            ));
        }

        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM payments WHERE provider_reference = ?)",
            params![provider_reference],
            |row| row.get(0),
        )?;
        if exists {
            return Err(Error::Conflict(format!(
                "Payment {} already recorded",
                provider_reference
            )));
        }

        conn.execute(
            r#"
            INSERT INTO payments (user_id, provider_reference, plan, amount, currency, status)
            VALUES (?, ?, ?, ?, ?, 'pending')
            "#,
            params![
                user_id,
                provider_reference,
                plan.as_str(),
                amount,
                currency.trim().to_uppercase()
            ],
        )?;
        drop(conn);

        self.get_payment(provider_reference)?
            .ok_or_else(|| Error::NotFound(format!("Payment {}", provider_reference)))
    }

    pub fn get_payment(&self, provider_reference: &str) -> Result<Option<Payment>> {
        let conn = self.conn()?;
        let payment = conn
            .query_row(
                &format!(
                    "SELECT {} FROM payments WHERE provider_reference = ?",
                    PAYMENT_COLUMNS
                ),
                params![provider_reference],
                row_to_payment,
            )
            .optional()?;
        Ok(payment)
    }

    /// Mark a payment completed and grant the purchased plan
    ///
    /// Idempotent: completing an already completed payment changes nothing.
    /// The status check and both writes share one IMMEDIATE transaction so a
    /// concurrent completion or failure cannot grant the plan twice.
    pub fn complete_payment(&self, provider_reference: &str, now: DateTime<Utc>) -> Result<Payment> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let payment = tx
            .query_row(
                &format!(
                    "SELECT {} FROM payments WHERE provider_reference = ?",
                    PAYMENT_COLUMNS
                ),
                params![provider_reference],
                row_to_payment,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("Payment {}", provider_reference)))?;

        match payment.status {
            PaymentStatus::Completed => return Ok(payment),
            PaymentStatus::Pending => {}
            other => {
                return Err(Error::Conflict(format!(
                    "Payment {} is {}",
                    provider_reference,
                    other.as_str()
                )))
            }
        }

        let user = tx
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
                params![payment.user_id],
                row_to_user,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("User {}", payment.user_id)))?;
        let change = PlanManager::apply_purchase(&user, payment.plan, now);

        let updated = tx.execute(
            r#"
            UPDATE payments SET status = 'completed', completed_at = ?
            WHERE provider_reference = ? AND status = 'pending'
            "#,
            params![format_datetime(&now), provider_reference],
        )?;
        if updated == 1 {
            tx.execute(
                "UPDATE users SET plan = ?, billing_status = ?, plan_expires_at = ? WHERE id = ?",
                params![
                    change.plan.as_str(),
                    change.billing_status.as_str(),
                    change.expires_at.as_ref().map(format_datetime),
                    user.id
                ],
            )?;
            tx.commit()?;
            info!(
                "Payment {} completed, user {} now on {} plan",
                payment.id, user.id, change.plan
            );
        } else {
            tx.rollback()?;
        }
        drop(conn);

        self.get_payment(provider_reference)?
            .ok_or_else(|| Error::NotFound(format!("Payment {}", provider_reference)))
    }

    pub fn fail_payment(&self, provider_reference: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE payments SET status = 'failed' WHERE provider_reference = ? AND status = 'pending'",
            params![provider_reference],
        )?;

        if updated == 0 {
            return Err(Error::NotFound(format!(
                "Pending payment {}",
                provider_reference
            )));
        }
        Ok(())
    }

    pub fn list_payments(&self, user_id: i64) -> Result<Vec<Payment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM payments WHERE user_id = ? ORDER BY id DESC",
            PAYMENT_COLUMNS
        ))?;

        let payments = stmt
            .query_map(params![user_id], row_to_payment)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(payments)
    }
}
