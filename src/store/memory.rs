//! In-memory order repository for development and tests

use super::OrderRepository;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::order::{Order, OrderFilter, OrderStatus};

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    /// order_hash -> id
    order_hashes: HashMap<String, Uuid>,
}

/// Orders held in process memory; lost on restart
#[derive(Default)]
pub struct MemoryOrderRepository {
    tables: RwLock<Tables>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select<F>(&self, predicate: F) -> Vec<Order>
    where
        F: Fn(&Order) -> bool,
    {
        self.tables
            .read()
            .await
            .orders
            .values()
            .filter(|o| predicate(*o))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn insert(&self, order: &Order) -> CoordinatorResult<()> {
        let mut tables = self.tables.write().await;
        if tables.order_hashes.contains_key(&order.order_hash) {
            return Err(CoordinatorError::Conflict(format!(
                "order with hash {} already exists",
                order.order_hash
            )));
        }
        if tables.orders.contains_key(&order.id) {
            return Err(CoordinatorError::Conflict(format!("order {} already exists", order.id)));
        }

        tables.order_hashes.insert(order.order_hash.clone(), order.id);
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> CoordinatorResult<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn list(
        &self,
        filter: &OrderFilter,
        offset: u64,
        limit: u32,
    ) -> CoordinatorResult<(Vec<Order>, u64)> {
        let mut matching = self.select(|o| filter.matches(o)).await;
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn count_by_status(&self) -> CoordinatorResult<HashMap<OrderStatus, u64>> {
        let tables = self.tables.read().await;
        let mut counts: HashMap<OrderStatus, u64> =
            OrderStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for order in tables.orders.values() {
            *counts.entry(order.status).or_default() += 1;
        }
        Ok(counts)
    }

    async fn compare_and_swap(&self, expected: &Order, updated: &Order) -> CoordinatorResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(stored) = tables.orders.get_mut(&expected.id) else {
            return Err(CoordinatorError::not_found(expected.id));
        };

        if stored.status != expected.status || stored.version != expected.version {
            return Ok(false);
        }

        *stored = Order {
            version: expected.version + 1,
            ..updated.clone()
        };
        Ok(true)
    }

    async fn find_secret_ready(&self) -> CoordinatorResult<Vec<Order>> {
        Ok(self.select(Order::secret_ready).await)
    }

    async fn find_completion_ready(&self) -> CoordinatorResult<Vec<Order>> {
        Ok(self.select(Order::completion_ready).await)
    }

    async fn health_check(&self) -> CoordinatorResult<()> {
        Ok(())
    }
}
