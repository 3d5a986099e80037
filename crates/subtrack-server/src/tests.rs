//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, NaiveDate, Utc};
use http_body_util::BodyExt;
use subtrack_core::bank::MockProvider;
use subtrack_core::db::Database;
use subtrack_core::models::NewBankTransaction;
use tower::ServiceExt;

fn test_config() -> ServerConfig {
    ServerConfig {
        allowed_origins: vec![],
        redirect_url: "http://localhost/callback".to_string(),
        ..Default::default()
    }
}

fn setup_test_app() -> Router {
    let db = Database::in_memory().unwrap();
    create_router_with_bank(db, None, test_config(), None)
}

fn setup_test_app_with_db(db: Database, bank: Option<BankClient>) -> Router {
    create_router_with_bank(db, None, test_config(), bank)
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn days_ago(days: i64) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(days)
}

/// Monthly Netflix and Spotify charges ending today, plus groceries
fn recent_statement() -> String {
    let mut csv = String::from("Booking Date,Payee,Amount,Currency,Memo\n");
    for k in 0..4 {
        let date = days_ago(30 * k);
        csv.push_str(&format!("{},NETFLIX.COM,-15.99,EUR,\n", date));
        csv.push_str(&format!("{},Spotify AB,-9.99,EUR,\n", date));
        csv.push_str(&format!("{},REWE Markt,-42.17,EUR,\n", days_ago(30 * k + 3)));
    }
    csv
}

fn create_test_user(db: &Database) -> i64 {
    db.create_user("test@example.com", Some("Test")).unwrap().id
}

// ========== Health ==========

#[tokio::test]
async fn test_health() {
    let app = setup_test_app();

    let response = app.oneshot(get("/api/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["bank_provider"].is_null());
}

// ========== Users ==========

#[tokio::test]
async fn test_create_and_get_user() {
    let app = setup_test_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/users",
            serde_json::json!({ "email": " Alice@Example.com ", "name": "Alice" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = get_body_json(response).await;
    assert_eq!(json["email"], "alice@example.com");
    assert_eq!(json["plan"], "free");
    assert_eq!(json["is_pro"], false);
    let id = json["id"].as_i64().unwrap();

    let response = app
        .oneshot(get(&format!("/api/users/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["name"], "Alice");
}

#[tokio::test]
async fn test_duplicate_user_conflict() {
    let db = Database::in_memory().unwrap();
    create_test_user(&db);
    let app = setup_test_app_with_db(db, None);

    let response = app
        .oneshot(post_json(
            "/api/users",
            serde_json::json!({ "email": "TEST@example.com" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = get_body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn test_get_unknown_user_not_found() {
    let app = setup_test_app();

    let response = app.oneshot(get("/api/users/999")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_set_plan() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let app = setup_test_app_with_db(db, None);

    let expires = Utc::now() + Duration::days(30);
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/users/{}/plan", user_id))
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({ "plan": "recurring", "expires_at": expires }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["plan"], "recurring");
    assert_eq!(json["billing_status"], "active");
    assert_eq!(json["is_pro"], true);

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/users/{}/plan", user_id))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({ "plan": "platinum" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_user() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let app = setup_test_app_with_db(db.clone(), None);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/users/{}", user_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["user_id"], user_id);
    assert!(db.get_user(user_id).unwrap().is_none());
}

// ========== Import, scan, dashboard ==========

#[tokio::test]
async fn test_import_scan_dashboard_flow() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let app = setup_test_app_with_db(db, None);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/users/{}/transactions/import", user_id))
                .header("content-type", "text/csv")
                .body(Body::from(recent_statement()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["received"], 12);
    assert_eq!(json["inserted"], 12);

    let response = app
        .clone()
        .oneshot(post_empty(&format!("/api/users/{}/scans", user_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["subscriptions_found"], 2);
    let scan_id = json["scan_id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!("/api/scans/{}", scan_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "completed");
    assert_eq!(json["provider"], "csv");
    assert_eq!(json["subscriptions"].as_array().unwrap().len(), 2);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/users/{}/dashboard", user_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["active_subscriptions"], 2);
    assert_eq!(json["totals"][0]["currency"], "EUR");
    assert_eq!(json["totals"][0]["monthly"].as_f64(), Some(25.98));

    // The free plan includes a single scan
    let response = app
        .oneshot(post_empty(&format!("/api/users/{}/scans", user_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn test_import_empty_body_rejected() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let app = setup_test_app_with_db(db, None);

    let response = app
        .oneshot(post_empty(&format!(
            "/api/users/{}/transactions/import",
            user_id
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_transactions_with_limit() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let transactions =
        subtrack_core::parse_csv(recent_statement().as_bytes(), "EUR").unwrap();
    subtrack_core::ingest_transactions(&db, user_id, None, &transactions).unwrap();
    let app = setup_test_app_with_db(db, None);

    let response = app
        .oneshot(get(&format!("/api/users/{}/transactions?limit=5", user_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 5);
}

// ========== Subscriptions ==========

#[tokio::test]
async fn test_manual_subscription_lifecycle() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let app = setup_test_app_with_db(db, None);

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/users/{}/subscriptions", user_id),
            serde_json::json!({ "merchant": "Gym", "cost": 29.9 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = get_body_json(response).await;
    assert_eq!(json["amount"].as_f64(), Some(-29.9));
    assert_eq!(json["source"], "manual");
    assert_eq!(json["billing_cycle"], "monthly");
    let id = json["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/subscriptions/{}/cancel", id),
            serde_json::json!({ "date": "2024-06-01" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "cancelled");
    assert_eq!(json["cancelled_at"], "2024-06-01");

    let response = app
        .clone()
        .oneshot(get(&format!(
            "/api/users/{}/subscriptions?status=active",
            user_id
        )))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert!(json.as_array().unwrap().is_empty());

    let response = app
        .clone()
        .oneshot(post_empty(&format!("/api/subscriptions/{}/reactivate", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "active");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/subscriptions/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get(&format!("/api/subscriptions/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_status_filter() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let app = setup_test_app_with_db(db, None);

    let response = app
        .oneshot(get(&format!(
            "/api/users/{}/subscriptions?status=paused",
            user_id
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_exclude_subscription() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let transactions =
        subtrack_core::parse_csv(recent_statement().as_bytes(), "EUR").unwrap();
    subtrack_core::ingest_transactions(&db, user_id, None, &transactions).unwrap();
    subtrack_core::RecurrenceDetector::new(&db)
        .run_scan(user_id, "csv", Utc::now())
        .unwrap();
    let spotify = db
        .list_subscriptions(user_id, None)
        .unwrap()
        .into_iter()
        .find(|s| s.merchant_key == "SPOTIFY AB")
        .unwrap();
    let app = setup_test_app_with_db(db.clone(), None);

    let response = app
        .oneshot(post_empty(&format!(
            "/api/subscriptions/{}/exclude",
            spotify.id
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "excluded");
    assert!(db.is_merchant_excluded(user_id, "SPOTIFY AB").unwrap());
}

// ========== Bank connections ==========

fn gym_provider() -> BankClient {
    let history: Vec<NewBankTransaction> = (0..4)
        .map(|k| NewBankTransaction {
            merchant_name: "FITX GYM".to_string(),
            description: None,
            amount: -29.90,
            booking_date: days_ago(30 * k),
            currency: "EUR".to_string(),
            external_id: Some(format!("gym-{}", k)),
        })
        .collect();
    BankClient::mock(MockProvider::new().with_account("acc-1", history))
}

#[tokio::test]
async fn test_connection_link_complete_sync() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let app = setup_test_app_with_db(db, Some(gym_provider()));

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/users/{}/connections", user_id),
            serde_json::json!({ "institution_id": "BANK_X" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = get_body_json(response).await;
    assert!(json["link"]
        .as_str()
        .unwrap()
        .starts_with("http://localhost/callback"));
    let connection_id = json["connection_id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(post_empty(&format!(
            "/api/connections/{}/complete",
            connection_id
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["connection"]["status"], "linked");
    assert_eq!(json["connection"]["account_id"], "acc-1");

    let response = app
        .clone()
        .oneshot(post_empty(&format!("/api/connections/{}/sync", connection_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["fetched"], 4);
    assert_eq!(json["inserted"], 4);

    // Scans run against the linked provider
    let response = app
        .clone()
        .oneshot(post_empty(&format!("/api/users/{}/scans", user_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["subscriptions_found"], 1);

    let response = app
        .oneshot(get(&format!("/api/users/{}/subscriptions", user_id)))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json[0]["provider"], "mock");
}

#[tokio::test]
async fn test_connection_without_provider_unavailable() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let app = setup_test_app_with_db(db, None);

    let response = app
        .oneshot(post_json(
            &format!("/api/users/{}/connections", user_id),
            serde_json::json!({ "institution_id": "BANK_X" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_sync_pending_connection_conflict() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let connection_id = db
        .create_connection(user_id, "mock", "BANK_X", Some("mock-req-x"))
        .unwrap();
    let app = setup_test_app_with_db(db, Some(gym_provider()));

    let response = app
        .oneshot(post_empty(&format!("/api/connections/{}/sync", connection_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_gocardless_connection_against_mock_server() {
    use subtrack_core::bank::GoCardlessProvider;
    use subtrack_core::test_utils::{MockBankServer, MOCK_ACCOUNT_ID, MOCK_SECRET_ID, MOCK_SECRET_KEY};

    let server = MockBankServer::start().await;
    let provider = GoCardlessProvider::new(&server.url(), MOCK_SECRET_ID, MOCK_SECRET_KEY);
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let app = setup_test_app_with_db(db, Some(BankClient::GoCardless(provider)));

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/users/{}/connections", user_id),
            serde_json::json!({ "institution_id": "SANDBOXFINANCE_SFIN0000" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = get_body_json(response).await;
    let connection_id = json["connection_id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(post_empty(&format!(
            "/api/connections/{}/complete",
            connection_id
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["connection"]["provider"], "gocardless");
    assert_eq!(json["connection"]["account_id"], MOCK_ACCOUNT_ID);

    let response = app
        .oneshot(post_empty(&format!("/api/connections/{}/sync", connection_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["fetched"], 12);
    assert_eq!(json["inserted"], 12);
}

// ========== Payments ==========

#[tokio::test]
async fn test_payment_completion_grants_plan() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let app = setup_test_app_with_db(db, None);

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/users/{}/payments", user_id),
            serde_json::json!({ "reference": "cs_test_1", "plan": "recurring", "amount": 2.99 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "pending");
    assert_eq!(json["currency"], "EUR");

    let response = app
        .clone()
        .oneshot(post_empty("/api/payments/cs_test_1/complete"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "completed");

    let response = app
        .oneshot(get(&format!("/api/users/{}", user_id)))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["plan"], "recurring");
    assert_eq!(json["is_pro"], true);
}

#[tokio::test]
async fn test_free_plan_payment_rejected() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let app = setup_test_app_with_db(db, None);

    let response = app
        .oneshot(post_json(
            &format!("/api/users/{}/payments", user_id),
            serde_json::json!({ "reference": "cs_free", "plan": "free", "amount": 0.0 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_complete_unknown_payment_not_found() {
    let app = setup_test_app();

    let response = app
        .oneshot(post_empty("/api/payments/missing/complete"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_payment_cannot_complete() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let app = setup_test_app_with_db(db.clone(), None);

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/users/{}/payments", user_id),
            serde_json::json!({ "reference": "cs_declined", "plan": "recurring", "amount": 2.99 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(post_empty("/api/payments/cs_declined/fail"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["success"], true);

    let response = app
        .clone()
        .oneshot(post_empty("/api/payments/cs_declined/complete"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(post_empty("/api/payments/cs_declined/fail"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(get(&format!("/api/users/{}", user_id)))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["plan"], "free");
    assert_eq!(json["is_pro"], false);

    let payment = db.get_payment("cs_declined").unwrap().unwrap();
    let audit = db.list_audit_log(10).unwrap();
    assert!(audit
        .iter()
        .any(|e| e.action == "fail" && e.entity_id == Some(payment.id)));
}

#[tokio::test]
async fn test_one_time_payment_conflicts_with_recurring_plan() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    db.set_user_plan(
        user_id,
        subtrack_core::models::Plan::Recurring,
        subtrack_core::models::BillingStatus::Active,
        Some(chrono::Utc::now() + chrono::Duration::days(10)),
    )
    .unwrap();
    let app = setup_test_app_with_db(db, None);

    let response = app
        .oneshot(post_json(
            &format!("/api/users/{}/payments", user_id),
            serde_json::json!({ "reference": "cs_once", "plan": "one_time", "amount": 4.99 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// ========== Maintenance and audit ==========

#[tokio::test]
async fn test_prune_dry_run_keeps_rows() {
    let db = Database::in_memory().unwrap();
    let user_id = create_test_user(&db);
    let transactions =
        subtrack_core::parse_csv(recent_statement().as_bytes(), "EUR").unwrap();
    subtrack_core::ingest_transactions(&db, user_id, None, &transactions).unwrap();
    subtrack_core::RecurrenceDetector::new(&db)
        .run_scan(user_id, "csv", Utc::now())
        .unwrap();

    let mut config = test_config();
    config.detection.blacklist.push("NETFLIX".to_string());
    let app = create_router_with_bank(db.clone(), None, config, None);

    let response = app
        .oneshot(post_empty(&format!(
            "/api/users/{}/prune?dry_run=true",
            user_id
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["dry_run"], true);
    assert_eq!(json["pruned"][0]["reason"], "blacklisted");
    assert_eq!(db.list_subscriptions(user_id, None).unwrap().len(), 2);
}

#[tokio::test]
async fn test_integrity_report() {
    let db = Database::in_memory().unwrap();
    create_test_user(&db);
    let app = setup_test_app_with_db(db, None);

    let response = app.oneshot(get("/api/maintenance/report")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["users"], 1);
    assert_eq!(json["stuck_scans"], 0);
}

#[tokio::test]
async fn test_audit_records_actor() {
    let app = setup_test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/users")
                .header("content-type", "application/json")
                .header("x-subtrack-actor", "support@example.com")
                .body(Body::from(
                    serde_json::json!({ "email": "audited@example.com" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.oneshot(get("/api/audit?limit=5")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json[0]["actor"], "support@example.com");
    assert_eq!(json[0]["action"], "create");
    assert_eq!(json[0]["entity_type"], "user");
}

#[test]
fn test_get_actor_defaults() {
    let mut headers = HeaderMap::new();
    assert_eq!(get_actor(&headers), "api");

    headers.insert(ACTOR_HEADER, HeaderValue::from_static("   "));
    assert_eq!(get_actor(&headers), "api");

    headers.insert(ACTOR_HEADER, HeaderValue::from_static(" cli "));
    assert_eq!(get_actor(&headers), "cli");
}

#[test]
fn test_constraint_violation_maps_to_conflict() {
    let unique = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(2067), None);
    let err = AppError::from(subtrack_core::Error::Database(unique));
    assert_eq!(err.status, StatusCode::CONFLICT);
    assert_eq!(err.message, "Resource already exists");

    let other = rusqlite::Error::QueryReturnedNoRows;
    let err = AppError::from(subtrack_core::Error::Database(other));
    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
}
