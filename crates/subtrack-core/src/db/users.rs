//! User operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;
use tracing::info;

use super::{format_datetime, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{BillingStatus, Plan, User};

pub(super) const USER_COLUMNS: &str =
    "id, email, name, plan, billing_status, plan_expires_at, created_at";

pub(super) fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let plan: String = row.get(3)?;
    let billing_status: String = row.get(4)?;
    let expires_at: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        plan: plan.parse().unwrap_or(Plan::Free),
        billing_status: billing_status.parse().unwrap_or(BillingStatus::None),
        plan_expires_at: expires_at.map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&created_at),
    })
}

/// Rows removed by [`Database::delete_user`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteUserResult {
    pub user_id: i64,
    pub subscriptions: i64,
    pub transactions: i64,
    pub connections: i64,
    pub scans: i64,
    pub payments: i64,
}

/// Normalize and validate an email address
fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(Error::InvalidData(format!("Invalid email address: {}", email))),
    }
}

impl Database {
    /// Create a user on the free plan
    pub fn create_user(&self, email: &str, name: Option<&str>) -> Result<User> {
        let email = normalize_email(email)?;
        let conn = self.conn()?;

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)",
            params![email],
            |row| row.get(0),
        )?;
        if exists {
            return Err(Error::Conflict(format!("User {} already exists", email)));
        }

        conn.execute(
            "INSERT INTO users (email, name) VALUES (?, ?)",
            params![email, name],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        info!("Created user {}", id);
        self.get_user(id)?
            .ok_or_else(|| Error::NotFound(format!("User {}", id)))
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
            params![id],
            row_to_user,
        );

        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS),
            params![email.trim().to_lowercase()],
            row_to_user,
        );

        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Look a user up by numeric id or email
    pub fn resolve_user(&self, id_or_email: &str) -> Result<User> {
        let user = match id_or_email.parse::<i64>() {
            Ok(id) => self.get_user(id)?,
            Err(_) => self.get_user_by_email(id_or_email)?,
        };
        user.ok_or_else(|| Error::NotFound(format!("User {}", id_or_email)))
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users ORDER BY id",
            USER_COLUMNS
        ))?;

        let users = stmt
            .query_map([], row_to_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(users)
    }

    /// Set a user's plan, billing status and expiry in one statement
    pub fn set_user_plan(
        &self,
        id: i64,
        plan: Plan,
        billing_status: BillingStatus,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<User> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE users SET plan = ?, billing_status = ?, plan_expires_at = ? WHERE id = ?",
            params![
                plan.as_str(),
                billing_status.as_str(),
                expires_at.as_ref().map(format_datetime),
                id
            ],
        )?;
        drop(conn);

        if updated == 0 {
            return Err(Error::NotFound(format!("User {}", id)));
        }
        self.get_user(id)?
            .ok_or_else(|| Error::NotFound(format!("User {}", id)))
    }

    /// Delete a user and everything the user owns
    ///
    /// This is the only user deletion path. Counts are taken and the delete
    /// is issued inside one transaction; foreign keys cascade the rest.
    pub fn delete_user(&self, id: i64) -> Result<DeleteUserResult> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let count = |table: &str| -> rusqlite::Result<i64> {
            tx.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE user_id = ?", table),
                params![id],
                |row| row.get(0),
            )
        };

        let result = DeleteUserResult {
            user_id: id,
            subscriptions: count("subscriptions")?,
            transactions: count("bank_transactions")?,
            connections: count("bank_connections")?,
            scans: count("bank_scans")?,
            payments: count("payments")?,
        };

        let deleted = tx.execute("DELETE FROM users WHERE id = ?", params![id])?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("User {}", id)));
        }
        tx.commit()?;

        info!(
            "Deleted user {} ({} subscriptions, {} transactions, {} connections)",
            id, result.subscriptions, result.transactions, result.connections
        );
        Ok(result)
    }
}
