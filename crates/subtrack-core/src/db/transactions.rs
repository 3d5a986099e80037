//! Raw bank transaction operations
//!
//! Transactions are append-only: there is no update path, and a trigger
//! rejects updates to the identifying columns.

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};

use super::{parse_date, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{BankTransaction, NewBankTransaction};

const TRANSACTION_COLUMNS: &str = "id, user_id, connection_id, merchant_name, description, amount, \
     booking_date, currency, external_id, import_hash, created_at";

fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<BankTransaction> {
    let booking_date: String = row.get(6)?;
    let created_at: String = row.get(10)?;

    Ok(BankTransaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        connection_id: row.get(2)?,
        merchant_name: row.get(3)?,
        description: row.get(4)?,
        amount: row.get(5)?,
        booking_date: parse_date(&booking_date).unwrap_or_default(),
        currency: row.get(7)?,
        external_id: row.get(8)?,
        import_hash: row.get(9)?,
        created_at: parse_datetime(&created_at),
    })
}

/// Validate an ISO 4217 style code, returning it uppercased
pub fn normalize_currency(currency: &str) -> Result<String> {
    let code = currency.trim().to_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(Error::InvalidData(format!("Invalid currency: {}", currency)))
    }
}

fn insert_row(
    conn: &Connection,
    user_id: i64,
    connection_id: Option<i64>,
    tx: &NewBankTransaction,
) -> Result<Option<i64>> {
    if !tx.amount.is_finite() {
        return Err(Error::InvalidData(format!(
            "Non-finite amount for {}",
            tx.merchant_name
        )));
    }
    let currency = normalize_currency(&tx.currency)?;

    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO bank_transactions
            (user_id, connection_id, merchant_name, description, amount, booking_date,
             currency, external_id, import_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            user_id,
            connection_id,
            tx.merchant_name.trim(),
            tx.description,
            tx.amount,
            tx.booking_date.to_string(),
            currency,
            tx.external_id,
            tx.import_hash(),
        ],
    )?;

    if inserted == 0 {
        Ok(None)
    } else {
        Ok(Some(conn.last_insert_rowid()))
    }
}

impl Database {
    /// Insert a transaction, returning None when an identical one already exists
    pub fn insert_bank_transaction(
        &self,
        user_id: i64,
        connection_id: Option<i64>,
        tx: &NewBankTransaction,
    ) -> Result<Option<i64>> {
        let conn = self.conn()?;
        insert_row(&conn, user_id, connection_id, tx)
    }

    /// Insert a batch atomically, returning how many rows were new
    ///
    /// Any invalid row rolls the whole batch back.
    pub fn insert_bank_transactions(
        &self,
        user_id: i64,
        connection_id: Option<i64>,
        transactions: &[NewBankTransaction],
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let db_tx = conn.transaction()?;
        let mut inserted = 0;
        for tx in transactions {
            if insert_row(&db_tx, user_id, connection_id, tx)?.is_some() {
                inserted += 1;
            }
        }
        db_tx.commit()?;
        Ok(inserted)
    }

    /// List a user's transactions, newest first
    pub fn list_bank_transactions(
        &self,
        user_id: i64,
        since: Option<NaiveDate>,
        limit: Option<i64>,
    ) -> Result<Vec<BankTransaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}
            FROM bank_transactions
            WHERE user_id = ?1 AND (?2 IS NULL OR booking_date >= ?2)
            ORDER BY booking_date DESC, id DESC
            LIMIT ?3
            "#,
            TRANSACTION_COLUMNS
        ))?;

        let transactions = stmt
            .query_map(
                params![user_id, since.map(|d| d.to_string()), limit.unwrap_or(-1)],
                row_to_transaction,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    pub fn count_bank_transactions(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bank_transactions WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
