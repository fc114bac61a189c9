//! Error types for the swap coordinator

use crate::order::OrderStatus;

use axum::http::StatusCode;
use thiserror::Error;

/// Main error type for the coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: OrderStatus, to: OrderStatus },

    #[error("Secret does not match the hashlock of order {order_id}")]
    InvalidSecret { order_id: String },

    #[error("Order store unavailable: {0}")]
    TransientStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    pub fn not_found(order_id: impl std::fmt::Display) -> Self {
        CoordinatorError::NotFound(format!("order {} not found", order_id))
    }

    /// Stable, machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::Validation(_) => "validation_error",
            CoordinatorError::NotFound(_) => "not_found",
            CoordinatorError::Conflict(_) | CoordinatorError::InvalidStateTransition { .. } => {
                "conflict"
            }
            CoordinatorError::InvalidSecret { .. } => "invalid_secret",
            CoordinatorError::TransientStore(_) => "store_unavailable",
            CoordinatorError::Config(_) | CoordinatorError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status reported by the gateway
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoordinatorError::Validation(_) | CoordinatorError::InvalidSecret { .. } => {
                StatusCode::BAD_REQUEST
            }
            CoordinatorError::NotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::Conflict(_) | CoordinatorError::InvalidStateTransition { .. } => {
                StatusCode::CONFLICT
            }
            CoordinatorError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoordinatorError::Config(_) | CoordinatorError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinatorError::TransientStore(_))
    }

    /// Check if error means the requested change is not allowed in the current state
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Conflict(_) | CoordinatorError::InvalidStateTransition { .. }
        )
    }
}

impl From<sqlx::Error> for CoordinatorError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => CoordinatorError::TransientStore(e.to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                CoordinatorError::Conflict(format!("duplicate order: {}", db.message()))
            }
            other => CoordinatorError::Internal(other.to_string()),
        }
    }
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
