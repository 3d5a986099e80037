//! Bank connection operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{format_datetime, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{BankConnection, ConnectionStatus};

const CONNECTION_COLUMNS: &str = "id, user_id, provider, institution_id, requisition_id, account_id, \
     status, created_at, last_synced_at";

fn row_to_connection(row: &Row<'_>) -> rusqlite::Result<BankConnection> {
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let last_synced_at: Option<String> = row.get(8)?;

    Ok(BankConnection {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider: row.get(2)?,
        institution_id: row.get(3)?,
        requisition_id: row.get(4)?,
        account_id: row.get(5)?,
        status: status.parse().unwrap_or(ConnectionStatus::Error),
        created_at: parse_datetime(&created_at),
        last_synced_at: last_synced_at.map(|s| parse_datetime(&s)),
    })
}

impl Database {
    /// Record a new connection awaiting authorization
    pub fn create_connection(
        &self,
        user_id: i64,
        provider: &str,
        institution_id: &str,
        requisition_id: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO bank_connections (user_id, provider, institution_id, requisition_id, status)
            VALUES (?, ?, ?, ?, 'pending')
            "#,
            params![user_id, provider, institution_id, requisition_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_connection(&self, id: i64) -> Result<Option<BankConnection>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!(
                "SELECT {} FROM bank_connections WHERE id = ?",
                CONNECTION_COLUMNS
            ),
            params![id],
            row_to_connection,
        );

        match result {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List connections for one user, or all connections when `user_id` is None
    pub fn list_connections(&self, user_id: Option<i64>) -> Result<Vec<BankConnection>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bank_connections WHERE (?1 IS NULL OR user_id = ?1) ORDER BY id",
            CONNECTION_COLUMNS
        ))?;

        let connections = stmt
            .query_map(params![user_id], row_to_connection)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(connections)
    }

    /// Attach the provider account id and mark the connection linked
    pub fn mark_connection_linked(&self, id: i64, account_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE bank_connections SET account_id = ?, status = 'linked' WHERE id = ?",
                params![account_id, id],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Error::Conflict(format!("Account {} is already linked", account_id))
                }
                other => Error::Database(other),
            })?;

        if updated == 0 {
            return Err(Error::NotFound(format!("Connection {}", id)));
        }
        Ok(())
    }

    pub fn set_connection_status(&self, id: i64, status: ConnectionStatus) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE bank_connections SET status = ? WHERE id = ?",
            params![status.as_str(), id],
        )?;

        if updated == 0 {
            return Err(Error::NotFound(format!("Connection {}", id)));
        }
        Ok(())
    }

    pub fn mark_connection_synced(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE bank_connections SET last_synced_at = ? WHERE id = ?",
            params![format_datetime(&at), id],
        )?;
        Ok(())
    }

    /// Delete a connection; its transactions are kept and detached
    pub fn delete_connection(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM bank_connections WHERE id = ?", params![id])?;

        if deleted == 0 {
            return Err(Error::NotFound(format!("Connection {}", id)));
        }
        Ok(())
    }

    /// Remove pending connections whose authorization was never completed
    pub fn purge_stale_connections(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM bank_connections WHERE status = 'pending' AND created_at < ?",
            params![format_datetime(&older_than)],
        )?;
        Ok(deleted)
    }
}
