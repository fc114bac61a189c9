//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Order creation and status transitions
//! - Secret requests and deliveries
//! - Monitor sweep timing and failures
//! - Live relay sessions

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::order::OrderStatus;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_int_gauge, CounterVec, Encoder, Histogram,
    IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    // Order metrics
    pub static ref ORDERS_CREATED: CounterVec = register_counter_vec!(
        "swap_orders_created_total",
        "Total orders created by chain pair",
        &["from_chain", "to_chain"]
    ).unwrap();

    pub static ref ORDER_TRANSITIONS: CounterVec = register_counter_vec!(
        "swap_order_transitions_total",
        "Total order status transitions",
        &["from", "to"]
    ).unwrap();

    // Relay metrics
    pub static ref SECRET_REQUESTS: CounterVec = register_counter_vec!(
        "swap_secret_requests_total",
        "Secret requests sent to makers",
        &["delivered"]
    ).unwrap();

    pub static ref SECRET_DELIVERIES: CounterVec = register_counter_vec!(
        "swap_secret_deliveries_total",
        "Secrets forwarded to resolvers",
        &["delivered"]
    ).unwrap();

    pub static ref RELAY_SESSIONS: IntGauge = register_int_gauge!(
        "swap_relay_sessions",
        "Live (order, role) session bindings"
    ).unwrap();

    // Monitor metrics
    pub static ref SWEEP_DURATION: Histogram = register_histogram!(
        "swap_sweep_duration_seconds",
        "Escrow monitor sweep duration",
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    ).unwrap();

    pub static ref SWEEP_ERRORS: CounterVec = register_counter_vec!(
        "swap_sweep_errors_total",
        "Escrow monitor scan failures",
        &["scan"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> CoordinatorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| CoordinatorError::Internal(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| CoordinatorError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

// Helper functions to record metrics

pub fn record_order_created(from_chain: &str, to_chain: &str) {
    ORDERS_CREATED
        .with_label_values(&[&from_chain.to_lowercase(), &to_chain.to_lowercase()])
        .inc();
}

pub fn record_transition(from: OrderStatus, to: OrderStatus) {
    ORDER_TRANSITIONS
        .with_label_values(&[from.as_str(), to.as_str()])
        .inc();
}

pub fn record_secret_request(delivered: bool) {
    SECRET_REQUESTS
        .with_label_values(&[if delivered { "true" } else { "false" }])
        .inc();
}

pub fn record_secret_delivery(delivered: bool) {
    SECRET_DELIVERIES
        .with_label_values(&[if delivered { "true" } else { "false" }])
        .inc();
}

pub fn record_sessions(count: usize) {
    RELAY_SESSIONS.set(count as i64);
}

pub fn record_sweep(duration_secs: f64) {
    SWEEP_DURATION.observe(duration_secs);
}

pub fn record_sweep_error(scan: &str) {
    SWEEP_ERRORS.with_label_values(&[scan]).inc();
}
