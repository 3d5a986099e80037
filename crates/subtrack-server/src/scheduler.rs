//! Background bank sync and rescan scheduler
//!
//! Enabled via environment variables:
//!
//! - `SUBTRACK_SCAN_INTERVAL_HOURS`: Interval in hours (e.g., "24" for daily)
//! - `SUBTRACK_PENDING_LINK_DAYS`: Days before an unfinished link is purged (default: 7)
//!
//! Each run syncs every linked connection and rescans each paying user who
//! has one, so charges that stopped are caught even when nothing new
//! arrived. Free users are left alone: their single scan is theirs to spend.
//! Authorizations that were never completed are purged afterwards.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use subtrack_core::bank::{BankClient, BankProvider};
use subtrack_core::config::DetectionConfig;
use subtrack_core::db::Database;
use subtrack_core::detect::RecurrenceDetector;
use subtrack_core::models::{ConnectionStatus, Plan};
use subtrack_core::plans::PlanManager;
use subtrack_core::sync::sync_connection;
use subtrack_core::Error;

pub const SCAN_INTERVAL_ENV: &str = "SUBTRACK_SCAN_INTERVAL_HOURS";
pub const PENDING_LINK_DAYS_ENV: &str = "SUBTRACK_PENDING_LINK_DAYS";

const SCHEDULER_ACTOR: &str = "scheduler";

/// Configuration for scheduled syncs
#[derive(Debug, Clone)]
pub struct ScanScheduleConfig {
    /// Interval between runs in hours
    pub interval_hours: u64,
    /// Pending connections older than this are deleted
    pub pending_link_days: i64,
}

impl ScanScheduleConfig {
    /// Parse configuration from environment variables
    ///
    /// Returns None if scheduling is not configured (SUBTRACK_SCAN_INTERVAL_HOURS not set)
    pub fn from_env() -> Option<Self> {
        let interval_hours: u64 = std::env::var(SCAN_INTERVAL_ENV)
            .ok()
            .and_then(|s| s.parse().ok())?;

        if interval_hours == 0 {
            warn!("{} is 0, scheduled syncs disabled", SCAN_INTERVAL_ENV);
            return None;
        }

        let pending_link_days = std::env::var(PENDING_LINK_DAYS_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|d: &i64| *d > 0)
            .unwrap_or(7);

        Some(Self {
            interval_hours,
            pending_link_days,
        })
    }
}

/// Summary of one scheduled run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScheduledRun {
    pub connections_synced: usize,
    pub sync_failures: usize,
    pub transactions_inserted: usize,
    pub users_rescanned: usize,
    /// Linked users on the free plan
    pub users_skipped: usize,
    pub subscriptions_lapsed: usize,
    pub pending_purged: usize,
}

/// Start the sync scheduler as a background task
pub fn start_scan_scheduler(
    db: Database,
    bank: BankClient,
    detection: DetectionConfig,
    config: ScanScheduleConfig,
) {
    info!(
        "Starting sync scheduler: every {} hours via {}",
        config.interval_hours,
        bank.name()
    );

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config.interval_hours * 3600));

        // Skip the first immediate tick - startup already did recovery work
        ticker.tick().await;

        loop {
            ticker.tick().await;

            info!("Running scheduled sync...");
            let run =
                run_scheduled_sync(&db, &bank, &detection, config.pending_link_days, Utc::now())
                    .await;
            info!(
                "Scheduled sync finished: {} connections ({} failed), {} new transactions, {} users rescanned, {} lapsed",
                run.connections_synced,
                run.sync_failures,
                run.transactions_inserted,
                run.users_rescanned,
                run.subscriptions_lapsed
            );
        }
    });
}

/// Run a single scheduled sync
///
/// Failures for one connection or user are logged and do not stop the run.
pub async fn run_scheduled_sync<P: BankProvider + ?Sized>(
    db: &Database,
    bank: &P,
    detection: &DetectionConfig,
    pending_link_days: i64,
    now: DateTime<Utc>,
) -> ScheduledRun {
    let mut run = ScheduledRun::default();

    let connections = match db.list_connections(None) {
        Ok(connections) => connections,
        Err(e) => {
            error!("Failed to list connections: {}", e);
            return run;
        }
    };

    let mut linked_users = BTreeSet::new();
    for connection in connections
        .iter()
        .filter(|c| c.status == ConnectionStatus::Linked && c.provider == bank.name())
    {
        linked_users.insert(connection.user_id);
        match sync_connection(db, bank, connection.id, None, now).await {
            Ok(result) => {
                run.connections_synced += 1;
                run.transactions_inserted += result.inserted;
            }
            Err(e) => {
                run.sync_failures += 1;
                warn!("Scheduled sync of connection {} failed: {}", connection.id, e);
            }
        }
    }

    let detector = RecurrenceDetector::with_config(db, detection.clone());
    for user_id in linked_users {
        match db.get_user(user_id) {
            Ok(Some(user)) if PlanManager::effective_plan(&user, now) == Plan::Free => {
                debug!("User {} is on the free plan, skipping rescan", user_id);
                run.users_skipped += 1;
                continue;
            }
            Ok(Some(_)) => {}
            Ok(None) => continue,
            Err(e) => {
                warn!("Failed to load user {}: {}", user_id, e);
                continue;
            }
        }

        match detector.run_scan(user_id, bank.name(), now) {
            Ok(outcome) => {
                run.users_rescanned += 1;
                run.subscriptions_lapsed += outcome.lapsed;
                if let Err(e) = db.log_audit(
                    SCHEDULER_ACTOR,
                    "scan",
                    Some("user"),
                    Some(user_id),
                    Some(&format!(
                        "scan_id={}, found={}",
                        outcome.scan_id, outcome.subscriptions_found
                    )),
                ) {
                    warn!("Failed to log scheduled scan to audit: {}", e);
                }
            }
            Err(Error::PlanLimit(_)) => {
                debug!("User {} has no scans left, skipping rescan", user_id);
            }
            Err(e) => {
                warn!("Scheduled scan for user {} failed: {}", user_id, e);
            }
        }
    }

    match db.purge_stale_connections(now - chrono::Duration::days(pending_link_days)) {
        Ok(count) => {
            run.pending_purged = count;
            if count > 0 {
                info!("Purged {} unfinished bank link(s)", count);
            }
        }
        Err(e) => warn!("Failed to purge unfinished links: {}", e),
    }

    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use subtrack_core::bank::MockProvider;
    use subtrack_core::models::{BillingStatus, NewBankTransaction, SubscriptionStatus};
    use subtrack_core::sync::{complete_connection, link_connection};

    #[test]
    fn test_config_from_env() {
        // Both cases share one test so parallel tests never race on the variable
        std::env::remove_var(SCAN_INTERVAL_ENV);
        assert!(ScanScheduleConfig::from_env().is_none());

        std::env::set_var(SCAN_INTERVAL_ENV, "0");
        assert!(ScanScheduleConfig::from_env().is_none());

        std::env::set_var(SCAN_INTERVAL_ENV, "12");
        let config = ScanScheduleConfig::from_env().unwrap();
        assert_eq!(config.interval_hours, 12);
        assert_eq!(config.pending_link_days, 7);

        std::env::remove_var(SCAN_INTERVAL_ENV);
    }

    fn gym_history(months: std::ops::RangeInclusive<u32>) -> Vec<NewBankTransaction> {
        months
            .map(|month| NewBankTransaction {
                merchant_name: "FITX GYM".to_string(),
                description: None,
                amount: -29.90,
                booking_date: NaiveDate::from_ymd_opt(2024, month, 10).unwrap(),
                currency: "EUR".to_string(),
                external_id: Some(format!("gym-{}", month)),
            })
            .collect()
    }

    async fn linked_user(db: &Database, provider: &MockProvider, email: &str) -> i64 {
        let user = db.create_user(email, None).unwrap();
        let started = link_connection(db, provider, user.id, "BANK_X", "http://cb", Utc::now())
            .await
            .unwrap();
        complete_connection(db, provider, started.connection_id)
            .await
            .unwrap();
        user.id
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
    }

    #[tokio::test]
    async fn test_scheduled_sync_rescans_linked_users() {
        let db = Database::in_memory().unwrap();
        let provider = MockProvider::new().with_account("acc-1", gym_history(1..=3));
        let user_id = linked_user(&db, &provider, "sched@example.com").await;
        db.set_user_plan(user_id, Plan::Recurring, BillingStatus::Active, None)
            .unwrap();

        let config = DetectionConfig::default();
        let run = run_scheduled_sync(&db, &provider, &config, 7, at(2024, 3, 20)).await;
        assert_eq!(run.connections_synced, 1);
        assert_eq!(run.sync_failures, 0);
        assert_eq!(run.transactions_inserted, 3);
        assert_eq!(run.users_rescanned, 1);
        assert_eq!(run.subscriptions_lapsed, 0);

        // No new charges arrive, but the user is still rescanned and the gym lapses
        let run = run_scheduled_sync(&db, &provider, &config, 7, at(2024, 6, 1)).await;
        assert_eq!(run.transactions_inserted, 0);
        assert_eq!(run.users_rescanned, 1);
        assert_eq!(run.subscriptions_lapsed, 1);

        let subs = db.list_subscriptions(user_id, None).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].status, SubscriptionStatus::Cancelled);

        let audit = db.list_audit_log(10).unwrap();
        assert!(audit
            .iter()
            .any(|e| e.actor == SCHEDULER_ACTOR && e.action == "scan"));
    }

    #[tokio::test]
    async fn test_scheduled_sync_leaves_free_users_alone() {
        let db = Database::in_memory().unwrap();
        let provider = MockProvider::new().with_account("acc-1", gym_history(1..=3));
        let user_id = linked_user(&db, &provider, "free@example.com").await;

        let config = DetectionConfig::default();
        let run = run_scheduled_sync(&db, &provider, &config, 7, at(2024, 3, 20)).await;
        assert_eq!(run.transactions_inserted, 3);
        assert_eq!(run.users_rescanned, 0);
        assert_eq!(run.users_skipped, 1);

        // The free scan is still available, and no refused scan was recorded
        assert_eq!(db.count_completed_scans(user_id).unwrap(), 0);
        assert!(db.list_scans(user_id, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_sync_skips_other_providers() {
        let db = Database::in_memory().unwrap();
        let user = db.create_user("other@example.com", None).unwrap();
        db.create_connection(user.id, "gocardless", "BANK_Y", Some("req-1"))
            .unwrap();

        let provider = MockProvider::new();
        let run =
            run_scheduled_sync(&db, &provider, &DetectionConfig::default(), 7, Utc::now()).await;
        assert_eq!(run, ScheduledRun::default());
    }
}
