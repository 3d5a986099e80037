//! Test utilities for subtrack-core
//!
//! Provides a mock GoCardless Bank Account Data server for integration
//! tests and local development.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;

/// Secret pair the mock server accepts
pub const MOCK_SECRET_ID: &str = "mock-secret-id";
pub const MOCK_SECRET_KEY: &str = "mock-secret-key";
/// Account every mock requisition links to
pub const MOCK_ACCOUNT_ID: &str = "acc-main";

#[derive(Default)]
struct MockState {
    token_requests: AtomicUsize,
    /// Tokens issued before this generation are rejected with 401
    generation: AtomicUsize,
    requisitions: AtomicUsize,
}

/// Mock GoCardless server for testing and development
pub struct MockBankServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockBankServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/api/v2/token/new/", post(handle_token))
            .route("/api/v2/agreements/enduser/", post(handle_agreement))
            .route("/api/v2/requisitions/", post(handle_create_requisition))
            .route("/api/v2/requisitions/:id/", get(handle_get_requisition))
            .route(
                "/api/v2/accounts/:id/transactions/",
                get(handle_transactions),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of token exchanges the server has handled
    pub fn token_requests(&self) -> usize {
        self.state.token_requests.load(Ordering::SeqCst)
    }

    /// Invalidate every token issued so far
    pub fn revoke_tokens(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockBankServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn provider_error(status: StatusCode, summary: &str, detail: &str) -> Response {
    (
        status,
        Json(json!({
            "summary": summary,
            "detail": detail,
            "status_code": status.as_u16(),
        })),
    )
        .into_response()
}

fn authorized(state: &MockState, headers: &HeaderMap) -> bool {
    let expected = format!(
        "Bearer mock-access-{}",
        state.generation.load(Ordering::SeqCst)
    );
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == expected)
}

fn unauthorized() -> Response {
    provider_error(
        StatusCode::UNAUTHORIZED,
        "Invalid token",
        "Token is invalid or expired",
    )
}

#[derive(Deserialize)]
struct TokenRequest {
    secret_id: String,
    secret_key: String,
}

async fn handle_token(
    State(state): State<Arc<MockState>>,
    Json(request): Json<TokenRequest>,
) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    if request.secret_id != MOCK_SECRET_ID || request.secret_key != MOCK_SECRET_KEY {
        return provider_error(
            StatusCode::UNAUTHORIZED,
            "Authentication failed",
            "No active account found with the given credentials",
        );
    }
    Json(json!({
        "access": format!("mock-access-{}", state.generation.load(Ordering::SeqCst)),
        "access_expires": 86400,
        "refresh": "mock-refresh",
        "refresh_expires": 2592000,
    }))
    .into_response()
}

async fn handle_agreement(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    Json(json!({
        "id": "agreement-1",
        "institution_id": body["institution_id"],
        "max_historical_days": body["max_historical_days"],
    }))
    .into_response()
}

async fn handle_create_requisition(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let n = state.requisitions.fetch_add(1, Ordering::SeqCst) + 1;
    let id = format!("req-{}", n);
    Json(json!({
        "id": id,
        "status": "CR",
        "link": format!("https://ob.example.com/psd2/start/{}/{}", id, body["institution_id"].as_str().unwrap_or("")),
        "accounts": [],
    }))
    .into_response()
}

async fn handle_get_requisition(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    match id.as_str() {
        "req-expired" => Json(json!({ "id": id, "status": "EX", "accounts": [] })).into_response(),
        id if id.starts_with("req-") => {
            Json(json!({ "id": id, "status": "LN", "accounts": [MOCK_ACCOUNT_ID] })).into_response()
        }
        _ => provider_error(StatusCode::NOT_FOUND, "Not found.", "Requisition not found"),
    }
}

async fn handle_transactions(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    if account_id != MOCK_ACCOUNT_ID {
        return provider_error(StatusCode::NOT_FOUND, "Not found.", "Account not found");
    }

    let booked: Vec<Value> = mock_transactions()
        .into_iter()
        .filter(|t| match query.get("date_from") {
            // ISO dates compare correctly as strings
            Some(from) => t["bookingDate"].as_str().map_or(false, |d| d >= from.as_str()),
            None => true,
        })
        .collect();

    Json(json!({ "transactions": { "booked": booked, "pending": [] } })).into_response()
}

fn mock_transactions() -> Vec<Value> {
    let mut txs = Vec::new();
    for (i, month) in ["01", "02", "03", "04"].iter().enumerate() {
        txs.push(json!({
            "transactionId": format!("nflx-{}", i),
            "bookingDate": format!("2024-{}-05", month),
            "transactionAmount": { "amount": "-15.99", "currency": "EUR" },
            "creditorName": "NETFLIX.COM",
            "remittanceInformationUnstructured": format!("NETFLIX.COM 8812{}", i),
        }));
        txs.push(json!({
            "transactionId": format!("salary-{}", i),
            "bookingDate": format!("2024-{}-01", month),
            "transactionAmount": { "amount": "3200.00", "currency": "EUR" },
            "debtorName": "ACME GmbH",
        }));
        txs.push(json!({
            "internalTransactionId": format!("gym-{}", i),
            "bookingDate": format!("2024-{}-10", month),
            "transactionAmount": { "amount": "-29.90", "currency": "EUR" },
            "remittanceInformationUnstructuredArray": ["FITX GYM MEMBERSHIP", "Mandate 42"],
        }));
    }
    txs
}
