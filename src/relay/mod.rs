//! Secret relay
//!
//! Pairs the maker and resolver sessions of an order and carries the secret
//! from one to the other. The secret is only forwarded after the order store
//! has durably recorded it; a resolver that is offline at that moment can
//! still read it from the order record.

pub mod messages;
pub mod session;

pub use messages::{InboundMessage, OutboundMessage, Role};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::order::Order;
use crate::store::OrderStore;

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type SessionId = Uuid;

/// Outbound half of a live participant connection
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl Session {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                outbound,
            },
            rx,
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue a message; false if the connection is gone
    fn send(&self, message: OutboundMessage) -> bool {
        self.outbound.send(message).is_ok()
    }
}

/// Sessions currently bound to one order
#[derive(Debug, Default)]
struct OrderSessions {
    maker: Option<Session>,
    resolver: Option<Session>,
}

impl OrderSessions {
    fn slot(&mut self, role: Role) -> &mut Option<Session> {
        match role {
            Role::Maker => &mut self.maker,
            Role::Resolver => &mut self.resolver,
        }
    }

    fn get(&self, role: Role) -> Option<&Session> {
        match role {
            Role::Maker => self.maker.as_ref(),
            Role::Resolver => self.resolver.as_ref(),
        }
    }

    fn is_empty(&self) -> bool {
        self.maker.is_none() && self.resolver.is_none()
    }
}

/// Registry of live participant sessions per order
pub struct SecretRelay {
    store: Arc<OrderStore>,
    /// order id -> bound sessions
    orders: DashMap<Uuid, OrderSessions>,
    /// session id -> (order id, role) bindings it holds
    bindings: DashMap<SessionId, HashSet<(Uuid, Role)>>,
}

impl SecretRelay {
    pub fn new(store: Arc<OrderStore>) -> Self {
        Self {
            store,
            orders: DashMap::new(),
            bindings: DashMap::new(),
        }
    }

    /// Number of live (order, role) bindings
    pub fn session_count(&self) -> usize {
        self.orders
            .iter()
            .map(|e| e.maker.is_some() as usize + e.resolver.is_some() as usize)
            .sum()
    }

    /// Bind a session to an order role, replacing any earlier session for it
    pub async fn register(&self, order_id: Uuid, role: Role, session: &Session) -> CoordinatorResult<()> {
        let order = self.store.get_order(order_id).await?;

        let replaced = self
            .orders
            .entry(order_id)
            .or_default()
            .slot(role)
            .replace(session.clone());

        if let Some(previous) = replaced {
            if previous.id != session.id {
                self.drop_binding(previous.id, order_id, role);
                debug!("Replaced {} session for order {}", role, order_id);
            }
        }
        self.bindings
            .entry(session.id)
            .or_default()
            .insert((order_id, role));

        info!("Registered {} session {} for order {}", role, session.id, order_id);
        crate::metrics::record_sessions(self.session_count());

        self.catch_up(&order, role, session);
        Ok(())
    }

    /// Bring a newly registered session up to date with the order record
    fn catch_up(&self, order: &Order, role: Role, session: &Session) {
        match role {
            Role::Maker if order.secret_ready() => {
                session.send(OutboundMessage::RequestSecret { order_id: order.id });
            }
            Role::Resolver => {
                if let Some(secret) = order.secret.clone() {
                    session.send(OutboundMessage::Secret {
                        order_id: order.id,
                        secret,
                    });
                }
            }
            _ => {}
        }
    }

    fn session_for(&self, order_id: Uuid, role: Role) -> Option<Session> {
        self.orders
            .get(&order_id)
            .and_then(|sessions| sessions.get(role).cloned())
    }

    /// Accept a secret from the order's registered maker session, persist it,
    /// then forward it to the resolver
    pub async fn submit_secret(
        &self,
        session_id: SessionId,
        order_id: Uuid,
        secret: &str,
    ) -> CoordinatorResult<Order> {
        match self.session_for(order_id, Role::Maker) {
            Some(maker) if maker.id == session_id => {}
            _ => {
                return Err(CoordinatorError::Validation(format!(
                    "session {} is not the registered maker for order {}",
                    session_id, order_id
                )))
            }
        }

        // durability precedes relay
        let order = self.store.reveal_secret(order_id, secret).await?;
        info!("Secret for order {} stored", order_id);

        if let Some(secret) = order.secret.as_deref() {
            self.deliver_secret(order_id, secret);
        }
        Ok(order)
    }

    /// Ask the maker for the secret. Returns whether a maker session was reached.
    pub fn request_secret(&self, order_id: Uuid) -> bool {
        let delivered = match self.session_for(order_id, Role::Maker) {
            Some(maker) => maker.send(OutboundMessage::RequestSecret { order_id }),
            None => false,
        };

        if delivered {
            info!("Requested secret from maker for order {}", order_id);
        } else {
            debug!("No maker session for order {}, will retry on next sweep", order_id);
        }
        crate::metrics::record_secret_request(delivered);
        delivered
    }

    /// Push the secret to the resolver if one is connected right now
    pub fn deliver_secret(&self, order_id: Uuid, secret: &str) -> bool {
        let delivered = match self.session_for(order_id, Role::Resolver) {
            Some(resolver) => resolver.send(OutboundMessage::Secret {
                order_id,
                secret: secret.to_string(),
            }),
            None => false,
        };

        if delivered {
            info!("Secret for order {} sent to resolver", order_id);
        } else {
            warn!(
                "No resolver session for order {}; secret remains available on the order",
                order_id
            );
        }
        crate::metrics::record_secret_delivery(delivered);
        delivered
    }

    /// Clear every binding a closed session still owns
    pub fn unregister_session(&self, session_id: SessionId) {
        let Some((_, held)) = self.bindings.remove(&session_id) else {
            return;
        };

        for (order_id, role) in held {
            let mut now_empty = false;
            if let Some(mut sessions) = self.orders.get_mut(&order_id) {
                let slot = sessions.slot(role);
                if slot.as_ref().map(|s| s.id) == Some(session_id) {
                    *slot = None;
                    debug!("Removed {} session for order {}", role, order_id);
                }
                now_empty = sessions.is_empty();
            }
            if now_empty {
                self.orders.remove_if(&order_id, |_, sessions| sessions.is_empty());
            }
        }

        crate::metrics::record_sessions(self.session_count());
    }

    fn drop_binding(&self, session_id: SessionId, order_id: Uuid, role: Role) {
        if let Some(mut held) = self.bindings.get_mut(&session_id) {
            held.remove(&(order_id, role));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderStatus;
    use crate::store::tests::{funded_order, memory_store, SECRET};

    fn relay() -> (Arc<OrderStore>, SecretRelay) {
        let store = memory_store();
        (store.clone(), SecretRelay::new(store))
    }

    #[tokio::test]
    async fn test_register_unknown_order_fails() {
        let (_, relay) = relay();
        let (session, _rx) = Session::new();
        let err = relay
            .register(Uuid::new_v4(), Role::Maker, &session)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(relay.session_count(), 0);
    }

    #[tokio::test]
    async fn test_request_secret_reaches_maker_only_when_connected() {
        let (store, relay) = relay();
        let order = funded_order(&store).await;

        assert!(!relay.request_secret(order.id));

        let (maker, mut maker_rx) = Session::new();
        relay.register(order.id, Role::Maker, &maker).await.unwrap();
        // catch-up on registration
        assert_eq!(
            maker_rx.try_recv().unwrap(),
            OutboundMessage::RequestSecret { order_id: order.id }
        );

        assert!(relay.request_secret(order.id));
        assert_eq!(
            maker_rx.try_recv().unwrap(),
            OutboundMessage::RequestSecret { order_id: order.id }
        );
    }

    #[tokio::test]
    async fn test_submit_secret_persists_then_delivers() {
        let (store, relay) = relay();
        let order = funded_order(&store).await;

        let (maker, _maker_rx) = Session::new();
        let (resolver, mut resolver_rx) = Session::new();
        relay.register(order.id, Role::Maker, &maker).await.unwrap();
        relay.register(order.id, Role::Resolver, &resolver).await.unwrap();
        assert!(resolver_rx.try_recv().is_err());

        let updated = relay.submit_secret(maker.id(), order.id, SECRET).await.unwrap();
        assert_eq!(updated.status, OrderStatus::Withdrawing);
        assert_eq!(
            store.get_order(order.id).await.unwrap().secret.as_deref(),
            Some(SECRET)
        );
        assert_eq!(
            resolver_rx.try_recv().unwrap(),
            OutboundMessage::Secret {
                order_id: order.id,
                secret: SECRET.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_wrong_secret_is_not_relayed() {
        let (store, relay) = relay();
        let order = funded_order(&store).await;

        let (maker, _maker_rx) = Session::new();
        let (resolver, mut resolver_rx) = Session::new();
        relay.register(order.id, Role::Maker, &maker).await.unwrap();
        relay.register(order.id, Role::Resolver, &resolver).await.unwrap();

        let err = relay.submit_secret(maker.id(), order.id, "guess").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_secret");
        assert!(resolver_rx.try_recv().is_err());
        assert!(store.get_order(order.id).await.unwrap().secret.is_none());
    }

    #[tokio::test]
    async fn test_only_registered_maker_may_submit() {
        let (store, relay) = relay();
        let order = funded_order(&store).await;

        let (maker, _maker_rx) = Session::new();
        let (resolver, _resolver_rx) = Session::new();
        relay.register(order.id, Role::Maker, &maker).await.unwrap();
        relay.register(order.id, Role::Resolver, &resolver).await.unwrap();

        let err = relay
            .submit_secret(resolver.id(), order.id, SECRET)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert!(store.get_order(order.id).await.unwrap().secret.is_none());
    }

    #[tokio::test]
    async fn test_secret_without_resolver_stays_on_order() {
        let (store, relay) = relay();
        let order = funded_order(&store).await;

        let (maker, _maker_rx) = Session::new();
        relay.register(order.id, Role::Maker, &maker).await.unwrap();
        relay.submit_secret(maker.id(), order.id, SECRET).await.unwrap();

        // late resolver picks the durable secret up on registration
        let (resolver, mut resolver_rx) = Session::new();
        relay.register(order.id, Role::Resolver, &resolver).await.unwrap();
        assert!(matches!(
            resolver_rx.try_recv().unwrap(),
            OutboundMessage::Secret { .. }
        ));
    }

    #[tokio::test]
    async fn test_reconnect_replaces_and_old_close_keeps_new_binding() {
        let (store, relay) = relay();
        let order = funded_order(&store).await;

        let (first, _first_rx) = Session::new();
        let (second, mut second_rx) = Session::new();
        relay.register(order.id, Role::Maker, &first).await.unwrap();
        relay.register(order.id, Role::Maker, &second).await.unwrap();
        second_rx.try_recv().unwrap();

        relay.unregister_session(first.id());
        assert_eq!(relay.session_count(), 1);
        assert!(relay.request_secret(order.id));
        assert!(second_rx.try_recv().is_ok());

        relay.unregister_session(second.id());
        assert_eq!(relay.session_count(), 0);
        assert!(!relay.request_secret(order.id));
    }

    #[tokio::test]
    async fn test_dropped_connection_counts_as_undelivered() {
        let (store, relay) = relay();
        let order = funded_order(&store).await;

        let (maker, maker_rx) = Session::new();
        relay.register(order.id, Role::Maker, &maker).await.unwrap();
        drop(maker_rx);

        assert!(!relay.request_secret(order.id));
    }
}
