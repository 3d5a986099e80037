//! Integrity reporting
//!
//! Counts only. Nothing here reads or returns credentials, keys or paths
//! beyond what the caller already holds.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;

use super::Database;
use crate::error::Result;

/// Row counts and consistency checks across the schema
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub schema_version: i64,
    pub encrypted: bool,
    pub users: i64,
    pub pro_users: i64,
    pub transactions: i64,
    pub subscriptions_by_status: BTreeMap<String, i64>,
    pub connections_by_status: BTreeMap<String, i64>,
    pub scans_by_status: BTreeMap<String, i64>,
    /// Scans still marked running
    pub stuck_scans: i64,
    /// Subscriptions whose scan link points at a missing scan
    pub orphaned_scan_links: i64,
    /// Result of `PRAGMA foreign_key_check`
    pub foreign_key_violations: i64,
}

impl IntegrityReport {
    /// True when no check found a problem
    pub fn is_healthy(&self) -> bool {
        self.stuck_scans == 0 && self.orphaned_scan_links == 0 && self.foreign_key_violations == 0
    }
}

impl Database {
    pub fn integrity_report(&self) -> Result<IntegrityReport> {
        let conn = self.conn()?;

        let count =
            |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [], |row| row.get(0)) };
        let by_status = |table: &str| -> rusqlite::Result<BTreeMap<String, i64>> {
            let mut stmt = conn.prepare(&format!(
                "SELECT status, COUNT(*) FROM {} GROUP BY status",
                table
            ))?;
            let counts = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<BTreeMap<String, i64>>>()?;
            Ok(counts)
        };

        let now = super::format_datetime(&Utc::now());
        let pro_users: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM users
            WHERE plan != 'free' AND billing_status = 'active'
              AND (plan_expires_at IS NULL OR plan_expires_at > ?)
            "#,
            [&now],
            |row| row.get(0),
        )?;

        let fk_violations = {
            let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
            let rows = stmt.query_map([], |_| Ok(()))?;
            rows.count() as i64
        };

        let report = IntegrityReport {
            schema_version: count("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")?,
            encrypted: false,
            users: count("SELECT COUNT(*) FROM users")?,
            pro_users,
            transactions: count("SELECT COUNT(*) FROM bank_transactions")?,
            subscriptions_by_status: by_status("subscriptions")?,
            connections_by_status: by_status("bank_connections")?,
            scans_by_status: by_status("bank_scans")?,
            stuck_scans: count("SELECT COUNT(*) FROM bank_scans WHERE status = 'running'")?,
            orphaned_scan_links: count(
                r#"
                SELECT COUNT(*) FROM subscriptions s
                WHERE s.scan_id IS NOT NULL
                  AND NOT EXISTS (SELECT 1 FROM bank_scans b WHERE b.id = s.scan_id)
                "#,
            )?,
            foreign_key_violations: fk_violations,
        };
        drop(conn);

        Ok(IntegrityReport {
            encrypted: self.is_encrypted()?,
            ..report
        })
    }
}
