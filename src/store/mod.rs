//! Order store
//!
//! Single source of truth for every swap order. Each mutator is one unit of
//! work: read the current row, apply the lifecycle transition to a copy, and
//! write it back with a compare-and-swap on the status and version it read.
//! No lock is held across I/O; concurrent writers race on the CAS and the
//! losers re-evaluate the lifecycle guard against the fresh row.

mod memory;
mod postgres;

pub use memory::MemoryOrderRepository;
pub use postgres::PgOrderRepository;

use crate::config::{OrderRulesConfig, PaginationConfig};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::{OrderChange, OrderEvent, OrderEventBus};
use crate::order::validation::build_order;
use crate::order::{
    EscrowAddressUpdate, NewOrder, Order, OrderFilter, OrderPage, OrderStatus, Side, TxHashUpdate,
};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Persistence backend for orders
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert a new order; `Conflict` if its order hash is already stored
    async fn insert(&self, order: &Order) -> CoordinatorResult<()>;

    async fn fetch(&self, id: Uuid) -> CoordinatorResult<Option<Order>>;

    /// Matching orders newest first, plus the total match count
    async fn list(
        &self,
        filter: &OrderFilter,
        offset: u64,
        limit: u32,
    ) -> CoordinatorResult<(Vec<Order>, u64)>;

    async fn count_by_status(&self) -> CoordinatorResult<HashMap<OrderStatus, u64>>;

    /// Replace `expected` with `updated` iff the stored status and version
    /// still match `expected`. The stored version is bumped on success.
    async fn compare_and_swap(&self, expected: &Order, updated: &Order)
        -> CoordinatorResult<bool>;

    /// depositing, both escrow tx hashes set, no secret
    async fn find_secret_ready(&self) -> CoordinatorResult<Vec<Order>>;

    /// withdrawing, both withdraw tx hashes set
    async fn find_completion_ready(&self) -> CoordinatorResult<Vec<Order>>;

    async fn health_check(&self) -> CoordinatorResult<()>;
}

/// Order store service shared by the gateway, relay and monitor
pub struct OrderStore {
    repository: Arc<dyn OrderRepository>,
    events: OrderEventBus,
    rules: OrderRulesConfig,
    pagination: PaginationConfig,
}

impl OrderStore {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        events: OrderEventBus,
        rules: OrderRulesConfig,
        pagination: PaginationConfig,
    ) -> Self {
        Self {
            repository,
            events,
            rules,
            pagination,
        }
    }

    /// Subscribe to order-changed notifications
    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.events.subscribe()
    }

    pub async fn health_check(&self) -> CoordinatorResult<()> {
        self.repository.health_check().await
    }

    /// Validate and persist a new pending order
    pub async fn create_order(&self, new: NewOrder) -> CoordinatorResult<Order> {
        let order = build_order(&new, &self.rules, Utc::now())?;
        self.repository.insert(&order).await?;

        info!(
            "Order {} created: {} {} -> {} {}",
            order.id, order.from_amount, order.from_chain, order.to_amount, order.to_chain
        );
        crate::metrics::record_order_created(&order.from_chain, &order.to_chain);
        self.events.publish(OrderChange::Created, &order);
        Ok(order)
    }

    pub async fn get_order(&self, id: Uuid) -> CoordinatorResult<Order> {
        self.repository
            .fetch(id)
            .await?
            .ok_or_else(|| CoordinatorError::not_found(id))
    }

    /// List orders newest first; out-of-range paging is clamped
    pub async fn list_orders(
        &self,
        filter: OrderFilter,
        page: Option<i64>,
        limit: Option<i64>,
    ) -> CoordinatorResult<OrderPage> {
        let (page, limit) = self.pagination.clamp(page, limit);
        let offset = (page as u64 - 1) * limit as u64;

        let (orders, total_count) = self.repository.list(&filter, offset, limit).await?;

        Ok(OrderPage {
            orders,
            total_count,
            current_page: page,
            total_pages: total_count.div_ceil(limit as u64),
        })
    }

    pub async fn stats(&self) -> CoordinatorResult<HashMap<OrderStatus, u64>> {
        self.repository.count_by_status().await
    }

    pub async fn find_secret_ready(&self) -> CoordinatorResult<Vec<Order>> {
        self.repository.find_secret_ready().await
    }

    pub async fn find_completion_ready(&self) -> CoordinatorResult<Vec<Order>> {
        self.repository.find_completion_ready().await
    }

    pub async fn accept_order(&self, id: Uuid, resolver_address: &str) -> CoordinatorResult<Order> {
        self.mutate(id, OrderChange::Accepted, |order| {
            order.accept(resolver_address, Utc::now())?;
            Ok(true)
        })
        .await
    }

    /// Record escrow and/or withdrawal tx hashes; all-or-nothing
    pub async fn record_tx_hashes(&self, id: Uuid, update: TxHashUpdate) -> CoordinatorResult<Order> {
        if update.is_empty() {
            return Err(CoordinatorError::Validation(
                "no transaction hash provided".to_string(),
            ));
        }

        self.mutate(id, OrderChange::TxHashesRecorded, |order| {
            let mut changed = false;
            if let Some(hash) = non_blank(&update.src_escrow_tx_hash) {
                changed |= order.record_escrow_tx(Side::Src, hash)?;
            }
            if let Some(hash) = non_blank(&update.dst_escrow_tx_hash) {
                changed |= order.record_escrow_tx(Side::Dst, hash)?;
            }
            if let Some(hash) = non_blank(&update.src_withdraw_tx_hash) {
                changed |= order.record_withdraw_tx(Side::Src, hash)?;
            }
            if let Some(hash) = non_blank(&update.dst_withdraw_tx_hash) {
                changed |= order.record_withdraw_tx(Side::Dst, hash)?;
            }
            Ok(changed)
        })
        .await
    }

    pub async fn record_escrow_addresses(
        &self,
        id: Uuid,
        update: EscrowAddressUpdate,
    ) -> CoordinatorResult<Order> {
        self.mutate(id, OrderChange::EscrowAddressesRecorded, |order| {
            let mut changed = false;
            if let Some(address) = non_blank(&update.escrow_src_address) {
                changed |= order.record_escrow_address(Side::Src, address)?;
            }
            if let Some(address) = non_blank(&update.escrow_dst_address) {
                changed |= order.record_escrow_address(Side::Dst, address)?;
            }
            Ok(changed)
        })
        .await
    }

    /// Administrative move to expired, cancelled or failed
    pub async fn update_status(&self, id: Uuid, status: OrderStatus) -> CoordinatorResult<Order> {
        self.mutate(id, OrderChange::StatusUpdated, |order| {
            order.administrative_transition(status)?;
            Ok(true)
        })
        .await
    }

    /// Durably store the maker's secret (depositing -> withdrawing)
    pub async fn reveal_secret(&self, id: Uuid, secret: &str) -> CoordinatorResult<Order> {
        self.mutate(id, OrderChange::SecretRevealed, |order| {
            order.reveal_secret(secret)?;
            Ok(true)
        })
        .await
    }

    /// withdrawing -> completed once both withdrawals are recorded
    pub async fn complete(&self, id: Uuid) -> CoordinatorResult<Order> {
        self.mutate(id, OrderChange::Completed, |order| {
            order.complete()?;
            Ok(true)
        })
        .await
    }

    /// Read, apply `apply` to a copy, CAS it back. `apply` returns whether it
    /// changed anything; unchanged orders are returned without a write.
    async fn mutate<F>(&self, id: Uuid, change: OrderChange, apply: F) -> CoordinatorResult<Order>
    where
        F: Fn(&mut Order) -> CoordinatorResult<bool>,
    {
        for attempt in 1..=self.rules.cas_attempts {
            let current = self.get_order(id).await?;
            let mut updated = current.clone();

            if !apply(&mut updated)? {
                debug!("Order {} {}: no change", id, change.name());
                return Ok(current);
            }
            updated.updated_at = Utc::now();

            if self.repository.compare_and_swap(&current, &updated).await? {
                updated.version = current.version + 1;
                if current.status != updated.status {
                    info!(
                        "Order {} transitioned {} -> {}",
                        id, current.status, updated.status
                    );
                    crate::metrics::record_transition(current.status, updated.status);
                } else {
                    debug!("Order {} {}", id, change.name());
                }
                self.events.publish(change, &updated);
                return Ok(updated);
            }

            debug!(
                "Order {} {}: lost compare-and-swap (attempt {})",
                id,
                change.name(),
                attempt
            );
        }

        Err(CoordinatorError::Conflict(format!(
            "order {} was modified concurrently",
            id
        )))
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
