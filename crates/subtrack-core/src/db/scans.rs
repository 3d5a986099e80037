//! Scan run bookkeeping

use rusqlite::{params, Row};
use tracing::warn;

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{BankScan, ScanStatus};

const SCAN_COLUMNS: &str = "id, user_id, provider, status, started_at, completed_at, \
     subscriptions_found, transactions_scanned, error_message";

pub(crate) fn row_to_scan(row: &Row<'_>) -> rusqlite::Result<BankScan> {
    let status: String = row.get(3)?;
    let started_at: String = row.get(4)?;
    let completed_at: Option<String> = row.get(5)?;

    Ok(BankScan {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider: row.get(2)?,
        status: status.parse().unwrap_or(ScanStatus::Failed),
        started_at: parse_datetime(&started_at),
        completed_at: completed_at.map(|s| parse_datetime(&s)),
        subscriptions_found: row.get(6)?,
        transactions_scanned: row.get(7)?,
        error_message: row.get(8)?,
    })
}

impl Database {
    /// Open a scan row in `running` state
    pub fn start_scan(&self, user_id: i64, provider: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO bank_scans (user_id, provider, status) VALUES (?, ?, 'running')",
            params![user_id, provider],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn complete_scan(&self, id: i64, found: i64, scanned: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE bank_scans
            SET status = 'completed', completed_at = CURRENT_TIMESTAMP,
                subscriptions_found = ?, transactions_scanned = ?
            WHERE id = ? AND status = 'running'
            "#,
            params![found, scanned, id],
        )?;

        if updated == 0 {
            return Err(Error::InvalidData(format!("Scan {} is not running", id)));
        }
        Ok(())
    }

    pub fn fail_scan(&self, id: i64, message: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE bank_scans
            SET status = 'failed', completed_at = CURRENT_TIMESTAMP, error_message = ?
            WHERE id = ? AND status = 'running'
            "#,
            params![message, id],
        )?;
        Ok(())
    }

    pub fn get_scan(&self, id: i64) -> Result<Option<BankScan>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!("SELECT {} FROM bank_scans WHERE id = ?", SCAN_COLUMNS),
            params![id],
            row_to_scan,
        );

        match result {
            Ok(scan) => Ok(Some(scan)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List a user's scans, newest first
    pub fn list_scans(&self, user_id: i64, limit: i64) -> Result<Vec<BankScan>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bank_scans WHERE user_id = ? ORDER BY id DESC LIMIT ?",
            SCAN_COLUMNS
        ))?;

        let scans = stmt
            .query_map(params![user_id, limit], row_to_scan)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(scans)
    }

    pub fn count_completed_scans(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bank_scans WHERE user_id = ? AND status = 'completed'",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Fail scans left `running` by a previous process
    ///
    /// Call once at startup, before any new scan can begin.
    pub fn recover_stuck_scans(&self) -> Result<usize> {
        let conn = self.conn()?;
        let recovered = conn.execute(
            r#"
            UPDATE bank_scans
            SET status = 'failed', completed_at = CURRENT_TIMESTAMP,
                error_message = 'Interrupted by shutdown'
            WHERE status = 'running'
            "#,
            [],
        )?;

        if recovered > 0 {
            warn!("Recovered {} interrupted scan(s)", recovered);
        }
        Ok(recovered)
    }
}
