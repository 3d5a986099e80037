//! CLI command tests
//!
//! This module contains all tests for the CLI commands.

use std::io::Write;

use chrono::{Duration, NaiveDate, Utc};
use subtrack_core::bank::MockProvider;
use subtrack_core::db::Database;
use subtrack_core::models::{
    BillingCycle, ConnectionStatus, NewBankTransaction, Plan, SubscriptionStatus,
};

use crate::commands::{self, truncate};

fn setup_test_db() -> Database {
    Database::in_memory().unwrap()
}

fn create_test_user(db: &Database) -> i64 {
    db.create_user("cli@example.com", None).unwrap().id
}

/// Monthly streaming charges ending today, written to a temp CSV
fn statement_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "Booking Date,Payee,Amount,Currency,Memo").unwrap();
    let today = Utc::now().date_naive();
    for k in 0..3 {
        let date = today - Duration::days(30 * k);
        writeln!(file, "{},NETFLIX.COM,-15.99,EUR,", date).unwrap();
        writeln!(file, "{},ACME GmbH,3200.00,EUR,salary", date).unwrap();
    }
    file.flush().unwrap();
    file
}

// ========== Helpers ==========

#[test]
fn test_truncate() {
    assert_eq!(truncate("short", 10), "short");
    assert_eq!(truncate("a long merchant name", 10), "a long ...");
    // Multi-byte characters are never split
    assert_eq!(truncate("Müller Bäckerei GmbH", 8), "Mülle...");
}

#[test]
fn test_parse_date_flag() {
    assert_eq!(
        commands::parse_date_flag("2024-05-01", "--date").unwrap(),
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    );
    let err = commands::parse_date_flag("05/01/2024", "--date").unwrap_err();
    assert!(err.to_string().contains("--date"));
}

// ========== Init / Status ==========

#[test]
fn test_cmd_init_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");

    commands::cmd_init(&path, true).unwrap();
    assert!(path.exists());

    commands::cmd_status(&path, true).unwrap();
}

#[test]
fn test_cmd_status_missing_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.db");

    assert!(commands::cmd_status(&path, true).is_ok());
    assert!(!path.exists());
}

// ========== Users ==========

#[test]
fn test_cmd_users_add_and_list() {
    let db = setup_test_db();

    commands::cmd_users_add(&db, "New@Example.com", Some("New")).unwrap();
    let users = db.list_users().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].email, "new@example.com");

    assert!(commands::cmd_users_list(&db).is_ok());
    assert!(commands::cmd_users_show(&db, users[0].id).is_ok());

    let audit = db.list_audit_log(10).unwrap();
    assert_eq!(audit[0].actor, "cli");
    assert_eq!(audit[0].action, "create");
}

#[test]
fn test_cmd_users_add_duplicate_fails() {
    let db = setup_test_db();
    create_test_user(&db);

    assert!(commands::cmd_users_add(&db, "CLI@example.com", None).is_err());
}

#[test]
fn test_cmd_users_plan() {
    let db = setup_test_db();
    let user_id = create_test_user(&db);

    commands::cmd_users_plan(&db, user_id, "recurring", None, Some("2099-01-01")).unwrap();
    let user = db.get_user(user_id).unwrap().unwrap();
    assert_eq!(user.plan, Plan::Recurring);
    assert!(user.is_pro(Utc::now()));

    commands::cmd_users_plan(&db, user_id, "free", None, Some("2099-01-01")).unwrap();
    let user = db.get_user(user_id).unwrap().unwrap();
    assert_eq!(user.plan, Plan::Free);
    assert!(user.plan_expires_at.is_none());

    let result = commands::cmd_users_plan(&db, user_id, "gold", None, None);
    assert!(result.unwrap_err().to_string().contains("Unknown plan"));
}

#[test]
fn test_cmd_users_delete() {
    let db = setup_test_db();
    let user_id = create_test_user(&db);

    commands::cmd_users_delete(&db, user_id).unwrap();
    assert!(db.get_user(user_id).unwrap().is_none());
    assert!(commands::cmd_users_show(&db, user_id).is_err());
}

// ========== Import / Scan / Dashboard ==========

#[test]
fn test_cmd_import_scan_dashboard() {
    let db = setup_test_db();
    let user_id = create_test_user(&db);
    let file = statement_file();

    commands::cmd_import(&db, user_id, file.path(), "EUR").unwrap();
    assert_eq!(
        db.list_bank_transactions(user_id, None, None).unwrap().len(),
        6
    );

    // Re-importing the same file adds nothing
    commands::cmd_import(&db, user_id, file.path(), "EUR").unwrap();
    assert_eq!(
        db.list_bank_transactions(user_id, None, None).unwrap().len(),
        6
    );

    commands::cmd_scan(&db, user_id, None).unwrap();
    let subs = db
        .list_subscriptions(user_id, Some(SubscriptionStatus::Active))
        .unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].merchant_key, "NETFLIX.COM");

    assert!(commands::cmd_dashboard(&db, user_id).is_ok());

    // Free plan allows a single scan
    let err = commands::cmd_scan(&db, user_id, None).unwrap_err();
    assert!(err.to_string().contains("plan"));
}

#[test]
fn test_cmd_import_missing_file() {
    let db = setup_test_db();
    let user_id = create_test_user(&db);

    let result = commands::cmd_import(
        &db,
        user_id,
        std::path::Path::new("/nonexistent/statement.csv"),
        "EUR",
    );
    assert!(result.unwrap_err().to_string().contains("Failed to open"));
}

#[test]
fn test_cmd_scan_unknown_user() {
    let db = setup_test_db();

    let err = commands::cmd_scan(&db, 42, None).unwrap_err();
    assert!(err.to_string().contains("User not found"));
}

#[test]
fn test_scan_provider_uses_configured_bank() {
    let db = setup_test_db();
    let user_id = create_test_user(&db);
    let pending = db.create_connection(user_id, "gocardless", "BANK_P", Some("req-p")).unwrap();
    let other = db.create_connection(user_id, "mock", "BANK_M", Some("req-m")).unwrap();
    let linked = db.create_connection(user_id, "gocardless", "BANK_G", Some("req-g")).unwrap();
    db.set_connection_status(other, ConnectionStatus::Linked).unwrap();
    db.set_connection_status(linked, ConnectionStatus::Linked).unwrap();
    db.mark_connection_synced(linked, Utc::now()).unwrap();
    let connections = db.list_connections(Some(user_id)).unwrap();
    assert!(connections.iter().any(|c| c.id == pending));

    assert_eq!(commands::scan_provider(&connections, Some("gocardless")), "gocardless");
    assert_eq!(commands::scan_provider(&connections, Some("mock")), "mock");
    assert_eq!(commands::scan_provider(&connections, Some("plaid")), "csv");
    assert_eq!(commands::scan_provider(&connections, None), "csv");

    // A pending connection never labels the scan
    db.set_connection_status(linked, ConnectionStatus::Pending).unwrap();
    let connections = db.list_connections(Some(user_id)).unwrap();
    assert_eq!(commands::scan_provider(&connections, Some("gocardless")), "csv");
}

// ========== Subscriptions ==========

#[test]
fn test_cmd_subscriptions_manual_lifecycle() {
    let db = setup_test_db();
    let user_id = create_test_user(&db);

    commands::cmd_subscriptions_add(&db, user_id, "Gym", 29.9, "EUR", "monthly", Some("2024-07-01"))
        .unwrap();
    let sub = db.list_subscriptions(user_id, None).unwrap().remove(0);
    assert_eq!(sub.amount, -29.9);
    assert_eq!(sub.billing_cycle, BillingCycle::Monthly);
    assert_eq!(sub.next_billing_date, NaiveDate::from_ymd_opt(2024, 7, 1));

    commands::cmd_subscriptions_cancel(&db, user_id, sub.id, Some("2024-06-15")).unwrap();
    let cancelled = db.get_subscription(sub.id).unwrap().unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert_eq!(cancelled.cancelled_at, NaiveDate::from_ymd_opt(2024, 6, 15));

    commands::cmd_subscriptions_reactivate(&db, user_id, sub.id).unwrap();
    assert_eq!(
        db.get_subscription(sub.id).unwrap().unwrap().status,
        SubscriptionStatus::Active
    );

    commands::cmd_subscriptions_exclude(&db, user_id, sub.id).unwrap();
    assert_eq!(
        db.get_subscription(sub.id).unwrap().unwrap().status,
        SubscriptionStatus::Excluded
    );

    assert!(commands::cmd_subscriptions_list(&db, user_id, Some("excluded")).is_ok());
    assert!(commands::cmd_subscriptions_list(&db, user_id, Some("paused")).is_err());

    commands::cmd_subscriptions_delete(&db, user_id, sub.id).unwrap();
    assert!(db.get_subscription(sub.id).unwrap().is_none());
}

#[test]
fn test_cmd_subscriptions_other_user_rejected() {
    let db = setup_test_db();
    let owner = create_test_user(&db);
    let other = db.create_user("other@example.com", None).unwrap().id;
    commands::cmd_subscriptions_add(&db, owner, "Gym", 29.9, "EUR", "monthly", None).unwrap();
    let sub = db.list_subscriptions(owner, None).unwrap().remove(0);

    let err = commands::cmd_subscriptions_delete(&db, other, sub.id).unwrap_err();
    assert!(err.to_string().contains("not found"));
    assert!(db.get_subscription(sub.id).unwrap().is_some());
}

#[test]
fn test_cmd_subscriptions_add_invalid_cycle() {
    let db = setup_test_db();
    let user_id = create_test_user(&db);

    let result = commands::cmd_subscriptions_add(&db, user_id, "Gym", 29.9, "EUR", "fortnightly", None);
    assert!(result.unwrap_err().to_string().contains("billing cycle"));
}

// ========== Connections ==========

#[tokio::test]
async fn test_cmd_connections_flow() {
    let db = setup_test_db();
    let user_id = create_test_user(&db);
    let history: Vec<NewBankTransaction> = (0..3)
        .map(|k| NewBankTransaction {
            merchant_name: "FITX GYM".to_string(),
            description: None,
            amount: -29.90,
            booking_date: Utc::now().date_naive() - Duration::days(30 * k),
            currency: "EUR".to_string(),
            external_id: Some(format!("gym-{}", k)),
        })
        .collect();
    let bank = MockProvider::new().with_account("acc-1", history);

    commands::cmd_connections_link(&db, &bank, user_id, "BANK_X", Some("http://cb"))
        .await
        .unwrap();
    let connection = db.list_connections(Some(user_id)).unwrap().remove(0);
    assert_eq!(connection.status, ConnectionStatus::Pending);

    commands::cmd_connections_complete(&db, &bank, user_id, connection.id)
        .await
        .unwrap();
    commands::cmd_connections_sync(&db, &bank, user_id, connection.id, None)
        .await
        .unwrap();
    assert_eq!(
        db.list_bank_transactions(user_id, None, None).unwrap().len(),
        3
    );
    assert!(commands::cmd_connections_list(&db, user_id).is_ok());

    commands::cmd_connections_delete(&db, user_id, connection.id).unwrap();
    assert!(db.list_connections(Some(user_id)).unwrap().is_empty());
    // Transactions survive their connection
    assert_eq!(
        db.list_bank_transactions(user_id, None, None).unwrap().len(),
        3
    );
}

#[tokio::test]
async fn test_cmd_connections_sync_bad_since() {
    let db = setup_test_db();
    let user_id = create_test_user(&db);
    let connection_id = db
        .create_connection(user_id, "mock", "BANK_X", Some("mock-req-1"))
        .unwrap();
    let bank = MockProvider::new();

    let err = commands::cmd_connections_sync(&db, &bank, user_id, connection_id, Some("yesterday"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("--since"));
}

// ========== Payments ==========

#[test]
fn test_cmd_payments_record_and_complete() {
    let db = setup_test_db();
    let user_id = create_test_user(&db);

    commands::cmd_payments_record(&db, user_id, "cs_1", "one_time", 4.99, "EUR").unwrap();
    assert!(commands::cmd_payments_list(&db, user_id).is_ok());

    commands::cmd_payments_complete(&db, user_id, "cs_1").unwrap();
    let user = db.get_user(user_id).unwrap().unwrap();
    assert_eq!(user.plan, Plan::OneTime);
    assert!(user.is_pro(Utc::now()));

    // Completing twice is harmless
    assert!(commands::cmd_payments_complete(&db, user_id, "cs_1").is_ok());
}

#[test]
fn test_cmd_payments_complete_wrong_user() {
    let db = setup_test_db();
    let owner = create_test_user(&db);
    let other = db.create_user("other@example.com", None).unwrap().id;
    commands::cmd_payments_record(&db, owner, "cs_2", "recurring", 2.99, "EUR").unwrap();

    assert!(commands::cmd_payments_complete(&db, other, "cs_2").is_err());
    assert_eq!(db.get_user(owner).unwrap().unwrap().plan, Plan::Free);
}

// ========== Maintenance ==========

#[test]
fn test_cmd_doctor_fixes_stuck_scans() {
    let db = setup_test_db();
    let user_id = create_test_user(&db);
    db.start_scan(user_id, "csv").unwrap();
    assert_eq!(db.integrity_report().unwrap().stuck_scans, 1);

    commands::cmd_doctor(&db, false).unwrap();
    assert_eq!(db.integrity_report().unwrap().stuck_scans, 1);

    commands::cmd_doctor(&db, true).unwrap();
    assert_eq!(db.integrity_report().unwrap().stuck_scans, 0);
}

#[test]
fn test_cmd_prune_with_config() {
    let db = setup_test_db();
    let user_id = create_test_user(&db);
    let file = statement_file();
    commands::cmd_import(&db, user_id, file.path(), "EUR").unwrap();
    commands::cmd_scan(&db, user_id, None).unwrap();

    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "[blacklist]\nmerchants = [\"NETFLIX\"]").unwrap();
    config.flush().unwrap();

    commands::cmd_prune(&db, user_id, true, Some(config.path())).unwrap();
    assert_eq!(db.list_subscriptions(user_id, None).unwrap().len(), 1);

    commands::cmd_prune(&db, user_id, false, Some(config.path())).unwrap();
    assert!(db.list_subscriptions(user_id, None).unwrap().is_empty());
}

#[test]
fn test_cmd_audit() {
    let db = setup_test_db();
    assert!(commands::cmd_audit(&db, 10).is_ok());

    create_test_user(&db);
    db.log_audit("cli", "create", Some("user"), Some(1), None)
        .unwrap();
    assert!(commands::cmd_audit(&db, 10).is_ok());
}
