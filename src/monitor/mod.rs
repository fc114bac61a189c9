//! Escrow monitor
//!
//! Fixed-interval reconciliation of order state against recorded on-chain
//! evidence. Each sweep runs two stateless scans:
//! 1. depositing orders with both escrow tx hashes and no secret get a
//!    secret request sent to their maker
//! 2. withdrawing orders with both withdraw tx hashes are completed
//!
//! Scan 1 never mutates an order, so repeating it after a crash or a missed
//! notification is harmless. Store errors are logged and the next tick
//! retries. Order-changed notifications are handled on the same task as the
//! sweeps, so the two never overlap.

use crate::config::MonitorConfig;
use crate::error::CoordinatorResult;
use crate::events::OrderEvent;
use crate::relay::SecretRelay;
use crate::store::OrderStore;

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Orders for which a secret request was issued
    pub secret_requests: Vec<Uuid>,
    pub completed: Vec<Uuid>,
    pub errors: usize,
}

/// Escrow reconciliation loop
pub struct EscrowMonitor {
    store: Arc<OrderStore>,
    relay: Arc<SecretRelay>,
    config: MonitorConfig,
    shutdown: watch::Sender<bool>,
}

impl EscrowMonitor {
    pub fn new(store: Arc<OrderStore>, relay: Arc<SecretRelay>, config: MonitorConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            relay,
            config,
            shutdown,
        }
    }

    /// Main monitoring loop; returns after `stop` once the current unit of
    /// work has finished
    pub async fn run(&self) -> CoordinatorResult<()> {
        let mut shutdown = self.shutdown.subscribe();
        let mut events = self.store.subscribe();
        let mut events_open = true;

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Escrow monitor started - sweeping every {}s",
            self.config.interval_secs
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown.changed() => {}

                _ = ticker.tick() => {
                    self.sweep().await;
                }

                event = events.recv(), if events_open => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Monitor lagged {} order events; next sweep will reconcile", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events_open = false;
                    }
                },
            }
        }

        info!("Escrow monitor stopped");
        Ok(())
    }

    /// Signal the loop to exit
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        info!("Escrow monitor shutdown initiated");
    }

    /// Fast path for a single order change
    async fn handle_event(&self, event: OrderEvent) {
        let order = event.order;

        if order.secret_ready() {
            debug!("Order {} became secret-ready ({})", order.id, event.change.name());
            self.relay.request_secret(order.id);
        } else if order.completion_ready() {
            debug!("Order {} became completion-ready ({})", order.id, event.change.name());
            if let Err(e) = self.store.complete(order.id).await {
                if e.is_conflict() {
                    debug!("Order {} already moved on: {}", order.id, e);
                } else {
                    warn!("Failed to complete order {}: {}", order.id, e);
                }
            }
        }
    }

    /// Run both scans once
    pub async fn sweep(&self) -> SweepReport {
        let started = Instant::now();
        let mut report = SweepReport::default();

        self.scan_secret_ready(&mut report).await;
        self.scan_completion_ready(&mut report).await;

        crate::metrics::record_sweep(started.elapsed().as_secs_f64());
        debug!(
            "Sweep finished: {} secret requests, {} completed, {} errors",
            report.secret_requests.len(),
            report.completed.len(),
            report.errors
        );
        report
    }

    async fn scan_secret_ready(&self, report: &mut SweepReport) {
        let orders = match self.store.find_secret_ready().await {
            Ok(orders) => orders,
            Err(e) => {
                error!("Secret-ready scan failed (retryable: {}): {}", e.is_retryable(), e);
                crate::metrics::record_sweep_error("secret_ready");
                report.errors += 1;
                return;
            }
        };

        for order in orders {
            debug!(
                "Order {} funded on both legs (src {:?}, dst {:?}), resolver {:?}",
                order.id, order.src_escrow_tx_hash, order.dst_escrow_tx_hash, order.resolver_address
            );
            self.relay.request_secret(order.id);
            report.secret_requests.push(order.id);
        }
    }

    async fn scan_completion_ready(&self, report: &mut SweepReport) {
        let orders = match self.store.find_completion_ready().await {
            Ok(orders) => orders,
            Err(e) => {
                error!("Completion scan failed (retryable: {}): {}", e.is_retryable(), e);
                crate::metrics::record_sweep_error("completion_ready");
                report.errors += 1;
                return;
            }
        };

        for order in orders {
            match self.store.complete(order.id).await {
                Ok(_) => report.completed.push(order.id),
                Err(e) if e.is_conflict() => {
                    debug!("Order {} no longer completion-ready: {}", order.id, e);
                }
                Err(e) => {
                    error!("Failed to complete order {}: {}", order.id, e);
                    crate::metrics::record_sweep_error("completion_ready");
                    report.errors += 1;
                }
            }
        }
    }
}
