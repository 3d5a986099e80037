//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `users` - Users, plans and the single user deletion path
//! - `transactions` - Raw bank transaction ingestion (append-only)
//! - `connections` - Bank connection lifecycle
//! - `scans` - Recurrence detection runs
//! - `subscriptions` - Detected and manual subscriptions, merchant overrides
//! - `payments` - Plan purchase audit trail
//! - `dashboard` - Dashboard aggregation and the audit log
//! - `maintenance` - Integrity reporting and cleanup

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::{Error, Result};

mod connections;
mod dashboard;
mod maintenance;
mod payments;
mod scans;
mod subscriptions;
mod transactions;
mod users;

pub use maintenance::IntegrityReport;
pub use subscriptions::UpsertOutcome;
pub use transactions::normalize_currency;
pub use users::DeleteUserResult;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "SUBTRACK_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path. This allows moving/renaming/restoring the database freely.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this would invalidate all existing encrypted databases
    const APP_SALT: &[u8; 16] = b"subtrack-salt-v1";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Format a timestamp the way SQLite's CURRENT_TIMESTAMP does
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Ordered schema migrations. Each entry runs once, inside a transaction,
/// and is recorded in `schema_migrations`. Append new versions; never edit
/// an applied one.
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        r#"
        CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            email TEXT NOT NULL UNIQUE CHECK (email = lower(email) AND instr(email, '@') > 1),
            name TEXT,
            plan TEXT NOT NULL DEFAULT 'free'
                CHECK (plan IN ('free', 'one_time', 'recurring')),
            billing_status TEXT NOT NULL DEFAULT 'none'
                CHECK (billing_status IN ('none', 'active', 'past_due', 'cancelled')),
            plan_expires_at DATETIME,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE bank_connections (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            provider TEXT NOT NULL,
            institution_id TEXT NOT NULL,
            requisition_id TEXT,
            account_id TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'linked', 'expired', 'revoked', 'error')),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            last_synced_at DATETIME,
            UNIQUE (user_id, provider, account_id)
        );

        -- Raw transactions: source data for detection, append-only
        CREATE TABLE bank_transactions (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            connection_id INTEGER REFERENCES bank_connections(id) ON DELETE SET NULL,
            merchant_name TEXT NOT NULL,
            description TEXT,
            amount REAL NOT NULL,
            booking_date DATE NOT NULL,
            currency TEXT NOT NULL CHECK (length(currency) = 3),
            external_id TEXT,
            import_hash TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (user_id, import_hash)
        );

        CREATE TRIGGER bank_transactions_immutable
        BEFORE UPDATE OF merchant_name, description, amount, booking_date, currency,
            external_id, import_hash, user_id
        ON bank_transactions
        BEGIN
            SELECT RAISE(ABORT, 'bank transactions are immutable');
        END;

        CREATE TABLE bank_scans (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            provider TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'running'
                CHECK (status IN ('running', 'completed', 'failed')),
            started_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            completed_at DATETIME,
            subscriptions_found INTEGER NOT NULL DEFAULT 0,
            transactions_scanned INTEGER NOT NULL DEFAULT 0,
            error_message TEXT
        );

        -- Amount is the signed charge: expenses only
        CREATE TABLE subscriptions (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            merchant TEXT NOT NULL,
            merchant_key TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount < 0),
            currency TEXT NOT NULL DEFAULT 'EUR' CHECK (length(currency) = 3),
            billing_cycle TEXT NOT NULL DEFAULT 'unknown'
                CHECK (billing_cycle IN ('daily', 'weekly', 'monthly', 'yearly', 'unknown')),
            status TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'cancelled', 'excluded')),
            next_billing_date DATE,
            confidence REAL NOT NULL DEFAULT 1.0 CHECK (confidence >= 0 AND confidence <= 1),
            provider TEXT,
            source TEXT NOT NULL DEFAULT 'detected' CHECK (source IN ('detected', 'manual')),
            scan_id INTEGER REFERENCES bank_scans(id) ON DELETE SET NULL,
            first_seen DATE,
            last_seen DATE,
            cancelled_at DATE,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (user_id, merchant_key)
        );

        -- Merchants a user has marked "not a subscription"
        CREATE TABLE merchant_overrides (
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            merchant_key TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (user_id, merchant_key)
        );

        CREATE TABLE payments (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            provider_reference TEXT NOT NULL UNIQUE,
            plan TEXT NOT NULL CHECK (plan IN ('one_time', 'recurring')),
            amount REAL NOT NULL CHECK (amount >= 0),
            currency TEXT NOT NULL CHECK (length(currency) = 3),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'completed', 'failed', 'refunded')),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            completed_at DATETIME
        );

        -- Audit entries outlive the rows they describe
        CREATE TABLE audit_log (
            id INTEGER PRIMARY KEY,
            timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            entity_type TEXT,
            entity_id INTEGER,
            details TEXT
        );
        "#,
    ),
    (
        2,
        r#"
        CREATE INDEX idx_transactions_user_date ON bank_transactions(user_id, booking_date);
        CREATE INDEX idx_transactions_connection ON bank_transactions(connection_id);
        CREATE INDEX idx_subscriptions_user_status ON subscriptions(user_id, status);
        CREATE INDEX idx_subscriptions_scan ON subscriptions(scan_id);
        CREATE INDEX idx_scans_user ON bank_scans(user_id, started_at);
        CREATE INDEX idx_scans_status ON bank_scans(status);
        CREATE INDEX idx_connections_user ON bank_connections(user_id);
        CREATE INDEX idx_payments_user ON payments(user_id);
        CREATE INDEX idx_audit_timestamp ON audit_log(timestamp);
        "#,
    ),
];

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
    /// Backing directory of an `in_memory` database, removed with the last clone
    temp_dir: Option<Arc<TempDir>>,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `SUBTRACK_DB_KEY` environment variable to be set.
    /// The database will be encrypted using SQLCipher with a key derived
    /// from the passphrase via Argon2.
    ///
    /// Returns an error if `SUBTRACK_DB_KEY` is not set. Use `new_unencrypted()`
    /// for development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        let encryption_key = std::env::var(DB_KEY_ENV).ok();
        match encryption_key {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// WARNING: This creates an unencrypted database. Only use for development
    /// or testing. For production, use `new()` with `SUBTRACK_DB_KEY` set.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let key_pragma = match passphrase {
            Some(pass) => format!("PRAGMA key = 'x\"{}\"';", derive_key(pass)?),
            None => String::new(),
        };

        // Foreign keys are per-connection, so every pooled connection needs them
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            if !key_pragma.is_empty() {
                conn.execute_batch(&key_pragma)?;
            }
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
            temp_dir: None,
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a file in a temporary directory rather than `:memory:` because
    /// SQLCipher has issues with in-memory databases in the connection pool.
    /// The directory is deleted when the last clone is dropped.
    pub fn in_memory() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("subtrack_test").tempdir()?;
        let path = dir.path().join("subtrack.db");
        let path = path
            .to_str()
            .ok_or_else(|| Error::InvalidData("Temporary path is not valid UTF-8".to_string()))?
            .to_string();

        let mut db = Self::new_unencrypted(&path)?;
        db.temp_dir = Some(Arc::new(dir));
        Ok(db)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Latest applied schema version (0 for an empty database)
    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.conn()?;
        let version: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    /// Apply pending migrations
    ///
    /// Safe to run on every startup: applied versions are skipped.
    pub fn run_migrations(&self) -> Result<()> {
        let mut conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers don't block writers
            PRAGMA journal_mode = WAL;

            -- Cache size: ~8MB (2000 pages * 4KB default page size)
            PRAGMA cache_size = 2000;

            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        let current: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;

        let mut applied = 0;
        for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params![version],
            )?;
            tx.commit()?;
            debug!("Applied schema migration {}", version);
            applied += 1;
        }

        if applied > 0 {
            info!(
                "Database schema migrated to version {} ({} applied)",
                MIGRATIONS.last().map(|(v, _)| *v).unwrap_or(0),
                applied
            );
        }
        Ok(())
    }
}

/// Audit log entry
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub actor: String,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub details: Option<String>,
}
