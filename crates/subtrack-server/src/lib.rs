//! SubTrack Web Server
//!
//! Axum-based REST API for the SubTrack subscription tracker.
//!
//! Security features:
//! - Restrictive CORS policy
//! - Input validation (pagination limits, upload size limits)
//! - Audit logging for every mutation
//! - Sanitized error responses

use std::sync::Arc;

use axum::{
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::{
    cors::CorsLayer, services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, warn};

use subtrack_core::bank::{BankClient, BankProvider};
use subtrack_core::config::DetectionConfig;
use subtrack_core::db::Database;

mod handlers;
mod scheduler;

pub use scheduler::{start_scan_scheduler, ScanScheduleConfig};

/// Maximum CSV upload size (10 MB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Header naming who performed a request, recorded in the audit log
const ACTOR_HEADER: &str = "x-subtrack-actor";

/// Actor recorded when the header is missing
const DEFAULT_ACTOR: &str = "api";

/// Environment variable for the bank authorization redirect target
pub const REDIRECT_URL_ENV: &str = "SUBTRACK_REDIRECT_URL";

/// Redirect target used when SUBTRACK_REDIRECT_URL is unset
pub const DEFAULT_REDIRECT_URL: &str = "http://localhost:3000/connections/callback";

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// Where the bank sends the user after authorization
    pub redirect_url: String,
    /// Detection thresholds and blacklist for scans and pruning
    pub detection: DetectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            redirect_url: std::env::var(REDIRECT_URL_ENV)
                .unwrap_or_else(|_| DEFAULT_REDIRECT_URL.to_string()),
            detection: DetectionConfig::default(),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub config: ServerConfig,
    /// Bank provider, when one is configured
    pub bank: Option<BankClient>,
}

/// Extract the acting party for audit logging
pub fn get_actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.chars().take(128).collect())
        .unwrap_or_else(|| DEFAULT_ACTOR.to_string())
}

/// Generic success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create the application router
pub fn create_router(db: Database, static_dir: Option<&str>, config: ServerConfig) -> Router {
    let bank = BankClient::from_env();
    match bank {
        Some(ref client) => info!("Bank provider configured: {}", client.name()),
        None => info!("Bank provider not configured (set GOCARDLESS_SECRET_ID/GOCARDLESS_SECRET_KEY or BANK_PROVIDER=mock)"),
    }
    create_router_with_bank(db, static_dir, config, bank)
}

/// Create the application router with an explicit bank client (for testing)
pub fn create_router_with_bank(
    db: Database,
    static_dir: Option<&str>,
    config: ServerConfig,
    bank: Option<BankClient>,
) -> Router {
    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        bank,
    });

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        // Users
        .route("/users", get(handlers::list_users).post(handlers::create_user))
        .route(
            "/users/:id",
            get(handlers::get_user).delete(handlers::delete_user),
        )
        .route("/users/:id/plan", put(handlers::set_user_plan))
        .route("/users/:id/dashboard", get(handlers::get_dashboard))
        // Transactions
        .route("/users/:id/transactions", get(handlers::list_transactions))
        .route(
            "/users/:id/transactions/import",
            post(handlers::import_transactions),
        )
        // Subscriptions
        .route(
            "/users/:id/subscriptions",
            get(handlers::list_subscriptions).post(handlers::create_subscription),
        )
        .route(
            "/subscriptions/:id",
            get(handlers::get_subscription).delete(handlers::delete_subscription),
        )
        .route(
            "/subscriptions/:id/cancel",
            post(handlers::cancel_subscription),
        )
        .route(
            "/subscriptions/:id/exclude",
            post(handlers::exclude_subscription),
        )
        .route(
            "/subscriptions/:id/reactivate",
            post(handlers::reactivate_subscription),
        )
        // Scans
        .route(
            "/users/:id/scans",
            get(handlers::list_scans).post(handlers::run_scan),
        )
        .route("/scans/:id", get(handlers::get_scan))
        // Bank connections
        .route(
            "/users/:id/connections",
            get(handlers::list_connections).post(handlers::link_connection),
        )
        .route(
            "/connections/:id",
            axum::routing::delete(handlers::delete_connection),
        )
        .route(
            "/connections/:id/complete",
            post(handlers::complete_connection),
        )
        .route("/connections/:id/sync", post(handlers::sync_connection))
        // Payments
        .route(
            "/users/:id/payments",
            get(handlers::list_payments).post(handlers::record_payment),
        )
        .route(
            "/payments/:reference/complete",
            post(handlers::complete_payment),
        )
        .route("/payments/:reference/fail", post(handlers::fail_payment))
        // Maintenance
        .route("/maintenance/report", get(handlers::integrity_report))
        .route("/users/:id/prune", post(handlers::prune_subscriptions))
        // Audit log
        .route("/audit", get(handlers::list_audit_log));

    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let cors = if config.allowed_origins.is_empty() {
        // Restrictive default: only allow same-origin
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE])
    };

    let csp_value = HeaderValue::from_static(
        "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data:; connect-src 'self'; frame-ancestors 'none'"
    );

    let mut app = Router::new()
        .nest("/api", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            csp_value,
        ));

    // Serve the static frontend export if a directory is provided
    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app
}

/// Start the server
pub async fn serve(
    db: Database,
    host: &str,
    port: u16,
    static_dir: Option<&str>,
) -> anyhow::Result<()> {
    serve_with_config(db, host, port, static_dir, ServerConfig::default()).await
}

/// Start the server with custom configuration
pub async fn serve_with_config(
    db: Database,
    host: &str,
    port: u16,
    static_dir: Option<&str>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    // Scans interrupted by a restart would otherwise stay `running` forever
    match db.recover_stuck_scans() {
        Ok(count) if count > 0 => {
            warn!(
                "Recovered {} stuck scan(s) from previous server session",
                count
            );
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Failed to recover stuck scans: {}", e);
        }
    }

    check_bank_connection().await;

    if let Some(schedule) = ScanScheduleConfig::from_env() {
        match BankClient::from_env() {
            Some(bank) => start_scan_scheduler(db.clone(), bank, config.detection.clone(), schedule),
            None => warn!("SUBTRACK_SCAN_INTERVAL_HOURS set but no bank provider configured, scheduler disabled"),
        }
    }

    let app = create_router(db, static_dir, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Check and log bank provider status
async fn check_bank_connection() {
    if let Some(client) = BankClient::from_env() {
        if client.health_check().await {
            info!("Bank provider reachable: {}", client.name());
        } else {
            warn!(
                "Bank provider configured but not responding: {}",
                client.name()
            );
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn internal(msg: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn conflict(msg: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn service_unavailable(msg: &str) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.to_string(),
            internal: None,
        }
    }

    /// Map a core error to a client-facing status
    fn from_core(err: &subtrack_core::Error) -> Option<Self> {
        use subtrack_core::Error as E;

        let status = match err {
            E::NotFound(_) => StatusCode::NOT_FOUND,
            E::Conflict(_) => StatusCode::CONFLICT,
            E::InvalidData(_) | E::Import(_) | E::Csv(_) | E::Config(_) => StatusCode::BAD_REQUEST,
            E::PlanLimit(_) => StatusCode::PAYMENT_REQUIRED,
            E::Provider(_) => StatusCode::BAD_GATEWAY,
            E::Database(_) if err.is_constraint_violation() => {
                warn!(error = %err, "Write rejected by a constraint");
                return Some(Self {
                    status: StatusCode::CONFLICT,
                    message: "Resource already exists".to_string(),
                    internal: None,
                });
            }
            E::Http(e) => {
                warn!(error = %e, "Bank provider request failed");
                return Some(Self {
                    status: StatusCode::BAD_GATEWAY,
                    message: "Bank provider unavailable".to_string(),
                    internal: None,
                })
            }
            _ => return None,
        };
        Some(Self {
            status,
            message: err.to_string(),
            internal: None,
        })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        if let Some(mapped) = err
            .downcast_ref::<subtrack_core::Error>()
            .and_then(AppError::from_core)
        {
            return mapped;
        }
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            // Keep full error for logging
            internal: Some(err),
        }
    }
}

#[cfg(test)]
mod tests;
