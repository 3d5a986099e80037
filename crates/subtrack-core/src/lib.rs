//! SubTrack Core Library
//!
//! Shared functionality for the SubTrack subscription tracker:
//! - Database access and migrations (SQLCipher-encrypted SQLite)
//! - Recurrence detection over raw bank transactions
//! - Plan rules and payment application
//! - Bank-data aggregation providers (GoCardless, mock)
//! - CSV statement import and provider sync
//! - Maintenance: integrity report and subscription pruning

pub mod bank;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod import;
pub mod maintenance;
pub mod models;
pub mod plans;
pub mod sync;

/// Test utilities including mock bank provider server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use bank::{
    Authorization, BankClient, BankProvider, GoCardlessProvider, MockProvider, RequisitionState,
    RequisitionStatus,
};
pub use config::DetectionConfig;
pub use db::{AuditEntry, Database, DeleteUserResult, IntegrityReport, UpsertOutcome};
pub use detect::{detect_recurring, normalize_merchant, RecurrenceDetector, ScanOutcome};
pub use error::{Error, Result};
pub use import::{ingest_transactions, parse_csv, IngestStats};
pub use maintenance::{prune_subscriptions, PruneResult, PrunedSubscription};
pub use plans::{PlanChange, PlanManager};
pub use sync::{complete_connection, link_connection, sync_connection, LinkCompleted, LinkStarted, SyncResult};
