//! HTTP gateway
//!
//! Translates client calls into order store operations and exposes relayer
//! status, health checks and the `/ws` session endpoint.

use crate::config::ApiConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::order::{EscrowAddressUpdate, NewOrder, OrderFilter, OrderStatus, TxHashUpdate};
use crate::relay::{session, SecretRelay};
use crate::store::OrderStore;

use axum::{
    extract::{rejection::JsonRejection, ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<OrderStore>,
    pub relay: Arc<SecretRelay>,
    pub started: Instant,
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        let body = json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Build the gateway router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/orders", post(create_order).get(list_orders))
        .route("/api/orders/:id", get(get_order))
        .route("/api/orders/:id/accept", post(accept_order))
        .route("/api/orders/:id/tx-hash", patch(record_tx_hashes))
        .route("/api/orders/:id/escrow-addresses", patch(record_escrow_addresses))
        .route("/api/orders/:id/status", patch(update_status))
        .route("/api/relayer/status", get(get_status))
        .route("/api/relayer/stats", get(get_stats))
        .route("/api/relayer/monitor/:id", post(monitor_order))
        .route("/ws", get(ws_upgrade))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(
    config: ApiConfig,
    store: Arc<OrderStore>,
    relay: Arc<SecretRelay>,
) -> CoordinatorResult<()> {
    let state = AppState {
        store,
        relay,
        started: Instant::now(),
    };
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CoordinatorError::Internal(format!("bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| CoordinatorError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

fn parse_id(raw: &str) -> CoordinatorResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| CoordinatorError::not_found(raw))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> CoordinatorResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| CoordinatorError::Validation(rejection.body_text()))
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - order store reachable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.store.health_check().await.is_ok();
    let status = if store {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadinessResponse { ready: store, store }))
}

async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<NewOrder>, JsonRejection>,
) -> CoordinatorResult<impl IntoResponse> {
    let order = state.store.create_order(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": order }))))
}

/// Page and limit are parsed leniently; anything non-numeric takes the default
async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> CoordinatorResult<impl IntoResponse> {
    let status = params
        .get("status")
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<OrderStatus>())
        .transpose()?;
    let text = |key: &str| params.get(key).filter(|v| !v.is_empty()).cloned();
    let number = |key: &str| params.get(key).and_then(|v| v.trim().parse::<i64>().ok());

    let filter = OrderFilter {
        status,
        resolver_address: text("resolverAddress"),
        maker_address: text("makerAddress"),
    };
    let page = state
        .store
        .list_orders(filter, number("page"), number("limit"))
        .await?;
    Ok(Json(page))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> CoordinatorResult<impl IntoResponse> {
    let order = state.store.get_order(parse_id(&id)?).await?;
    Ok(Json(order))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcceptRequest {
    resolver_address: Option<String>,
}

async fn accept_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<AcceptRequest>, JsonRejection>,
) -> CoordinatorResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let resolver = body(payload)?
        .resolver_address
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| CoordinatorError::Validation("resolverAddress is required".to_string()))?;

    let order = state.store.accept_order(id, resolver.trim()).await?;
    Ok(Json(order))
}

async fn record_tx_hashes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<TxHashUpdate>, JsonRejection>,
) -> CoordinatorResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let order = state.store.record_tx_hashes(id, body(payload)?).await?;
    Ok(Json(order))
}

async fn record_escrow_addresses(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<EscrowAddressUpdate>, JsonRejection>,
) -> CoordinatorResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let order = state.store.record_escrow_addresses(id, body(payload)?).await?;
    Ok(Json(order))
}

#[derive(Deserialize)]
struct StatusRequest {
    status: Option<String>,
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> CoordinatorResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let status = body(payload)?
        .status
        .ok_or_else(|| CoordinatorError::Validation("status is required".to_string()))?
        .parse::<OrderStatus>()?;

    let order = state.store.update_status(id, status).await?;
    Ok(Json(order))
}

/// Get relayer status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        sessions: state.relay.session_count(),
        store_healthy: state.store.health_check().await.is_ok(),
    })
}

/// Get order counts per status
async fn get_stats(State(state): State<AppState>) -> CoordinatorResult<impl IntoResponse> {
    let counts = state.store.stats().await?;
    let total: u64 = counts.values().sum();
    let by_status = counts
        .into_iter()
        .map(|(status, count)| (status.as_str(), count))
        .collect();

    Ok(Json(StatsResponse { total, by_status }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonitorRequest {
    src_escrow_tx_hash: Option<String>,
    dst_escrow_tx_hash: Option<String>,
}

/// Record both escrow deposits and ask the maker for the secret right away
async fn monitor_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<MonitorRequest>, JsonRejection>,
) -> CoordinatorResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let request = body(payload)?;
    if request.src_escrow_tx_hash.is_none() || request.dst_escrow_tx_hash.is_none() {
        return Err(CoordinatorError::Validation(
            "srcEscrowTxHash and dstEscrowTxHash are required".to_string(),
        ));
    }

    let order = state
        .store
        .record_tx_hashes(
            id,
            TxHashUpdate {
                src_escrow_tx_hash: request.src_escrow_tx_hash,
                dst_escrow_tx_hash: request.dst_escrow_tx_hash,
                ..Default::default()
            },
        )
        .await?;

    let secret_requested = order.secret_ready() && state.relay.request_secret(id);
    Ok(Json(MonitorResponse {
        status: "success",
        secret_requested,
    }))
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session::run_session(socket, state.relay))
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    store: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    sessions: usize,
    store_healthy: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    total: u64,
    by_status: BTreeMap<&'static str, u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MonitorResponse {
    status: &'static str,
    secret_requested: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::hashlock;
    use crate::store::tests::{funded_order, memory_store, SECRET};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> (Arc<OrderStore>, Arc<SecretRelay>, Router) {
        let store = memory_store();
        let relay = Arc::new(SecretRelay::new(store.clone()));
        let state = AppState {
            store: store.clone(),
            relay: relay.clone(),
            started: Instant::now(),
        };
        (store, relay, router(state))
    }

    async fn call(app: &Router, method: Method, uri: &str, payload: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match payload {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn new_order_body(secret: &str) -> Value {
        json!({
            "fromChain": "EVM",
            "toChain": "TON",
            "fromToken": "0xToken",
            "toToken": "EQToken",
            "fromAmount": "1000000",
            "toAmount": "500000000000",
            "makerSrcAddress": "0xMaker",
            "makerDstAddress": "EQMaker",
            "hashlock": hashlock::hashlock_for(secret),
            "salt": 42,
            "orderHash": hashlock::hashlock_for(&format!("api:{}", secret)),
            "signature": "0xsig",
            "expiresAt": (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
        })
    }

    #[tokio::test]
    async fn test_create_accept_and_fetch() {
        let (_, _, app) = app();

        let (status, created) =
            call(&app, Method::POST, "/api/orders", Some(new_order_body(SECRET))).await;
        assert_eq!(status, StatusCode::CREATED);
        let order = &created["data"];
        assert_eq!(order["status"], "pending");
        assert_eq!(order["salt"], "42");
        let id = order["id"].as_str().unwrap().to_string();

        let (status, accepted) = call(
            &app,
            Method::POST,
            &format!("/api/orders/{}/accept", id),
            Some(json!({"resolverAddress": "resolverA"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(accepted["status"], "depositing");

        let (status, error) = call(
            &app,
            Method::POST,
            &format!("/api/orders/{}/accept", id),
            Some(json!({"resolverAddress": "resolverB"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(error["error"]["kind"], "conflict");

        let (status, fetched) = call(&app, Method::GET, &format!("/api/orders/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["resolverAddress"], "resolverA");
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let (_, _, app) = app();

        let mut invalid = new_order_body(SECRET);
        invalid["fromAmount"] = json!("-5");
        let (status, error) = call(&app, Method::POST, "/api/orders", Some(invalid)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["error"]["kind"], "validation_error");

        let (status, _) = call(&app, Method::GET, "/api/orders/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/api/orders/{}", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, created) =
            call(&app, Method::POST, "/api/orders", Some(new_order_body(SECRET))).await;
        let id = created["data"]["id"].as_str().unwrap().to_string();
        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/orders/{}/accept", id),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::PATCH,
            &format!("/api/orders/{}/status", id),
            Some(json!({"status": "bogus"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::PATCH,
            &format!("/api/orders/{}/status", id),
            Some(json!({"status": "completed"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_list_orders_with_lenient_paging() {
        let (_, _, app) = app();
        for i in 0..3 {
            let (status, _) = call(
                &app,
                Method::POST,
                "/api/orders",
                Some(new_order_body(&format!("secret-{}", i))),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, page) =
            call(&app, Method::GET, "/api/orders?page=abc&limit=2&status=pending", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["totalCount"], 3);
        assert_eq!(page["currentPage"], 1);
        assert_eq!(page["totalPages"], 2);
        assert_eq!(page["orders"].as_array().unwrap().len(), 2);

        let (status, _) = call(&app, Method::GET, "/api/orders?status=unknown", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_monitor_endpoint_records_hashes_and_requests_secret() {
        let (store, relay, app) = app();
        let order = store
            .create_order(crate::order::validation::tests::sample_new_order(SECRET))
            .await
            .unwrap();
        store.accept_order(order.id, "resolverA").await.unwrap();

        let (maker, mut maker_rx) = crate::relay::Session::new();
        relay
            .register(order.id, crate::relay::Role::Maker, &maker)
            .await
            .unwrap();

        let (status, response) = call(
            &app,
            Method::POST,
            &format!("/api/relayer/monitor/{}", order.id),
            Some(json!({"srcEscrowTxHash": "0xAA", "dstEscrowTxHash": "0xBB"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["secretRequested"], true);
        assert!(maker_rx.try_recv().is_ok());
        assert!(store.get_order(order.id).await.unwrap().secret_ready());
    }

    #[tokio::test]
    async fn test_relayer_endpoints() {
        let (store, _, app) = app();
        funded_order(&store).await;

        let (status, health) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "ok");

        let (status, ready) = call(&app, Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ready["ready"], true);

        let (status, stats) = call(&app, Method::GET, "/api/relayer/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total"], 1);
        assert_eq!(stats["byStatus"]["depositing"], 1);
        assert_eq!(stats["byStatus"]["pending"], 0);

        let (status, relayer) = call(&app, Method::GET, "/api/relayer/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(relayer["sessions"], 0);
        assert_eq!(relayer["storeHealthy"], true);
    }
}
