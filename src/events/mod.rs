//! In-process "order changed" notifications
//!
//! Every successful store mutation publishes the new order snapshot. Delivery
//! is best-effort: slow subscribers may lag and miss events, which the
//! monitor's periodic sweep reconciles.

use crate::order::Order;

use tokio::sync::broadcast;
use tracing::trace;

/// What kind of mutation produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderChange {
    Created,
    Accepted,
    TxHashesRecorded,
    EscrowAddressesRecorded,
    SecretRevealed,
    Completed,
    StatusUpdated,
}

impl OrderChange {
    /// Get change name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            OrderChange::Created => "created",
            OrderChange::Accepted => "accepted",
            OrderChange::TxHashesRecorded => "tx_hashes_recorded",
            OrderChange::EscrowAddressesRecorded => "escrow_addresses_recorded",
            OrderChange::SecretRevealed => "secret_revealed",
            OrderChange::Completed => "completed",
            OrderChange::StatusUpdated => "status_updated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub change: OrderChange,
    pub order: Order,
}

/// Broadcast bus for order events
#[derive(Clone)]
pub struct OrderEventBus {
    tx: broadcast::Sender<OrderEvent>,
}

impl OrderEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, change: OrderChange, order: &Order) {
        let event = OrderEvent {
            change,
            order: order.clone(),
        };
        if self.tx.send(event).is_err() {
            // No receivers, that's okay
            trace!("No subscribers for {} event on order {}", change.name(), order.id);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.tx.subscribe()
    }
}
