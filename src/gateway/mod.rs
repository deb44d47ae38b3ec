//! Axum-based HTTP gateway.
//!
//! Exposes the dispatcher over HTTP with body limits, request timeouts and
//! CORS:
//! - `POST /api/chat` submits a prompt (API key in `X-API-Key` or bearer)
//! - `GET /api/usage` reports the caller's quota and usage
//! - `GET /health`, `GET /ping`, `GET /metrics`
//! - `GET /api/admin/providers`, `PUT /api/admin/providers/{id}/health`
//!   (admin token required; disabled when no token is configured)

pub mod dispatcher;
pub mod estimate;
pub mod rate_limit;

pub use dispatcher::{DispatchResponse, Dispatcher, RequestState, SubmitRequest};
pub use estimate::UsageEstimator;
pub use rate_limit::TierRateLimiter;

use crate::accounts::AccountStore;
use crate::billing::{
    spawn_forwarder, BillingSink, ChannelSink, QuotaLedger, UsageLog, UsageRecord,
};
use crate::config::Config;
use crate::error::GatewayError;
use crate::observability::GatewayMetrics;
use crate::providers::{self, health, AdapterSet, HealthStatus, ProviderRegistry};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Longest usage report window.
const MAX_USAGE_DAYS: u32 = 365;
/// Latest usage records included in a usage report.
const RECENT_RECORDS: usize = 10;

fn hash_token(value: &str) -> String {
    use sha2::{Digest, Sha256};

    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Compare two strings without early exit on the first differing byte.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ── Service assembly ────────────────────────────────────────────

/// Everything the gateway needs, opened from configuration.
pub struct GatewayServices {
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<ProviderRegistry>,
    pub adapters: Arc<AdapterSet>,
    /// Committed usage records, for the billing forwarder.
    pub billing: UnboundedReceiver<UsageRecord>,
}

impl GatewayServices {
    pub fn open(config: &Config) -> Result<Self> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        let accounts = Arc::new(AccountStore::open(&data_dir.join("accounts.db"))?);
        let usage = Arc::new(UsageLog::open(&data_dir.join("usage.db"))?);
        let (sink, billing) = ChannelSink::new();

        let ledger = Arc::new(QuotaLedger::new(
            accounts.clone(),
            usage,
            Arc::new(sink) as Arc<dyn BillingSink>,
            config.quota.tiers.clone(),
            config.quota.period_days,
        ));
        let registry = Arc::new(ProviderRegistry::from_config(&config.providers));
        let adapters = Arc::new(providers::create_adapters(&config.providers));
        let metrics = Arc::new(GatewayMetrics::new()?);

        let dispatcher = Arc::new(Dispatcher::new(
            config,
            accounts,
            ledger,
            registry.clone(),
            adapters.clone(),
            metrics,
        ));

        Ok(Self {
            dispatcher,
            registry,
            adapters,
            billing,
        })
    }
}

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// SHA-256 hash of the admin token (hex-encoded), never plaintext.
    pub admin_token_hash: Option<Arc<str>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, admin_token: Option<&str>) -> Self {
        let admin_token_hash = admin_token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| Arc::<str>::from(hash_token(token)));
        Self {
            dispatcher,
            admin_token_hash,
            started_at: Instant::now(),
        }
    }
}

/// Build the router with all routes and middleware.
pub fn build_router(state: AppState, config: &Config) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(API_KEY_HEADER),
        ])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(handle_health))
        .route("/ping", get(handle_ping))
        .route("/metrics", get(handle_metrics))
        .route("/api/chat", post(handle_chat))
        .route("/api/usage", get(handle_usage))
        .route("/api/admin/providers", get(handle_admin_providers))
        .route(
            "/api/admin/providers/{id}/health",
            put(handle_admin_set_health),
        )
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(config.gateway.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.gateway.request_timeout_secs),
        ))
}

/// Run the HTTP gateway until `shutdown` resolves.
pub async fn run_gateway(
    config: Config,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let services = GatewayServices::open(&config)?;

    let forwarder = spawn_forwarder(
        services.billing,
        config.billing.webhook_url.clone(),
        Duration::from_secs(config.billing.webhook_timeout_secs),
    );
    let probe = (config.health.probe_interval_secs > 0).then(|| {
        health::spawn_probe(
            services.registry.clone(),
            services.adapters.clone(),
            Duration::from_secs(config.health.probe_interval_secs),
        )
    });

    let host = config.gateway.host.as_str();
    let addr: SocketAddr = format!("{host}:{}", config.gateway.port)
        .parse()
        .with_context(|| format!("Invalid bind address {host}:{}", config.gateway.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    if config.gateway.admin_token.is_none() {
        tracing::info!("No admin token configured, admin API disabled");
    }
    let state = AppState::new(
        services.dispatcher.clone(),
        config.gateway.admin_token.as_deref(),
    );
    let app = build_router(state, &config);

    tracing::info!(
        addr = %local_addr,
        providers = services.registry.len(),
        "Gateway listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    if let Some(probe) = probe {
        probe.abort();
    }
    // The dispatcher holds the billing sender; dropping it ends the forwarder.
    drop(services.dispatcher);
    if tokio::time::timeout(Duration::from_secs(5), forwarder).await.is_err() {
        tracing::warn!("Billing forwarder did not drain before shutdown");
    }
    tracing::info!("Gateway stopped");
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

type JsonResponse = (StatusCode, Json<serde_json::Value>);

fn error_response(err: &GatewayError) -> Response {
    let status = err.status_code();
    let message = match err {
        // Internal details stay in the logs.
        GatewayError::Storage(e) => {
            tracing::error!("Storage failure: {e:#}");
            "Internal error".to_string()
        }
        GatewayError::UnknownReservation(_) => "Internal error".to_string(),
        other => other.to_string(),
    };
    let mut body = serde_json::json!({
        "error": message,
        "kind": err.kind(),
    });

    match err {
        GatewayError::RateLimited { retry_after_secs } => {
            body["retry_after"] = serde_json::json!(retry_after_secs);
            let mut response = (status, Json(body)).into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            return response;
        }
        GatewayError::QuotaExceeded { remaining, .. } => {
            body["quota_exceeded"] = serde_json::json!(true);
            body["remaining_quota"] = serde_json::json!(remaining);
        }
        _ => {}
    }
    (status, Json(body)).into_response()
}

/// API key from `X-API-Key`, falling back to `Authorization: Bearer`.
fn api_key_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

fn missing_api_key() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "API key required",
            "kind": "authentication_failure",
        })),
    )
        .into_response()
}

/// GET /health
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.dispatcher.registry();
    let snapshot = registry.snapshot();
    let available = snapshot
        .iter()
        .filter(|p| p.health != HealthStatus::Unavailable)
        .count();
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "providers": { "total": snapshot.len(), "available": available },
    }))
}

/// GET /ping
async fn handle_ping() -> &'static str {
    "pong"
}

/// GET /metrics, Prometheus text format.
async fn handle_metrics(State(state): State<AppState>) -> Response {
    let dispatcher = &state.dispatcher;
    let metrics = dispatcher.metrics();
    metrics.refresh(&dispatcher.registry().snapshot(), dispatcher.ledger().stats());
    match metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /api/chat
async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SubmitRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Some(api_key) = api_key_from_headers(&headers) else {
        return missing_api_key();
    };
    let Json(request) = match body {
        Ok(body) => body,
        Err(e) => {
            let err = GatewayError::InvalidRequest(e.body_text());
            return error_response(&err);
        }
    };

    let started = Instant::now();
    let result = state.dispatcher.submit(api_key, request).await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match result {
        Ok(resp) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "response": resp.response,
                "provider": resp.provider_id,
                "cost_units": resp.cost_units,
                "cost": resp.cost,
                "overage": resp.overage,
                "response_time_ms": elapsed_ms,
                "remaining_quota": resp.remaining_units,
                "quota_percentage": resp.quota_percentage.min(100.0),
                "record_id": resp.record_id,
            })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct UsageQuery {
    days: Option<u32>,
}

/// GET /api/usage?days=N
async fn handle_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UsageQuery>,
) -> Response {
    let Some(api_key) = api_key_from_headers(&headers) else {
        return missing_api_key();
    };
    let dispatcher = &state.dispatcher;
    let account = match dispatcher.accounts().authenticate(api_key) {
        Ok(Some(account)) => account,
        Ok(None) => return error_response(&GatewayError::AuthenticationFailure),
        Err(e) => return error_response(&GatewayError::Storage(e)),
    };

    let days = query.days.unwrap_or(30).clamp(1, MAX_USAGE_DAYS);
    let now = Utc::now();
    let log = dispatcher.ledger().usage_log();
    let report = log
        .summary(&account.id, now - chrono::Duration::days(i64::from(days)), now)
        .and_then(|summary| Ok((summary, log.daily(&account.id, days)?)))
        .and_then(|(summary, daily)| {
            Ok((summary, daily, log.recent(&account.id, RECENT_RECORDS)?))
        });

    match report {
        Ok((summary, daily, recent)) => {
            let quota = dispatcher.ledger().snapshot_for(&account);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "account_id": account.id,
                    "tier": account.tier,
                    "days": days,
                    "quota": quota,
                    "quota_percentage": quota.percent_used().min(100.0),
                    "summary": summary,
                    "daily": daily,
                    "recent": recent,
                })),
            )
                .into_response()
        }
        Err(e) => error_response(&GatewayError::Storage(e)),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// ADMIN HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// Check `Authorization: Bearer <token>` against the hashed admin token.
fn authenticate_admin(state: &AppState, headers: &HeaderMap) -> Result<(), JsonResponse> {
    let Some(ref expected_hash) = state.admin_token_hash else {
        return Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "Admin API disabled"})),
        ));
    };
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token.is_empty() || !constant_time_eq(&hash_token(token), expected_hash) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Invalid admin token"})),
        ));
    }
    Ok(())
}

/// GET /api/admin/providers
async fn handle_admin_providers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> JsonResponse {
    if let Err(rejection) = authenticate_admin(&state, &headers) {
        return rejection;
    }
    let dispatcher = &state.dispatcher;
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "providers": *dispatcher.registry().snapshot(),
            "ledger": dispatcher.ledger().stats(),
        })),
    )
}

#[derive(Debug, Deserialize)]
struct HealthUpdate {
    status: HealthStatus,
}

/// PUT /api/admin/providers/{id}/health
async fn handle_admin_set_health(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(provider_id): Path<String>,
    body: Result<Json<HealthUpdate>, axum::extract::rejection::JsonRejection>,
) -> JsonResponse {
    if let Err(rejection) = authenticate_admin(&state, &headers) {
        return rejection;
    }
    let Ok(Json(update)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "Expected {\"status\": \"healthy\" | \"degraded\" | \"unavailable\"}"
            })),
        );
    };

    if state
        .dispatcher
        .registry()
        .set_health(&provider_id, update.status)
    {
        (
            StatusCode::OK,
            Json(serde_json::json!({"provider": provider_id, "status": update.status})),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("Unknown provider '{provider_id}'")})),
        )
    }
}
