//! WebSocket session handler
//!
//! One task per connected participant. Inbound frames are parsed and applied
//! to the relay; malformed or rejected messages are logged and dropped, never
//! acknowledged. Outbound messages queued by the relay are written by a
//! separate task so the relay never waits on a slow socket.

use super::{InboundMessage, SecretRelay, Session};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drive one participant connection until it closes
pub async fn run_session(socket: WebSocket, relay: Arc<SecretRelay>) {
    let (session, mut outbound_rx) = Session::new();
    let (mut sink, mut stream) = socket.split();
    info!("Session {} connected", session.id());

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode outbound message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_text(&relay, &session, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Session {} read error: {}", session.id(), e);
                break;
            }
        }
    }

    relay.unregister_session(session.id());
    writer.abort();
    info!("Session {} disconnected", session.id());
}

/// Apply one inbound text frame
pub async fn handle_text(relay: &SecretRelay, session: &Session, text: &str) {
    let message = match serde_json::from_str::<InboundMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Dropping malformed message from session {}: {}", session.id(), e);
            return;
        }
    };

    match message {
        InboundMessage::Register { order_id, role } => {
            if let Err(e) = relay.register(order_id, role, session).await {
                warn!(
                    "Dropping {} registration for order {} from session {}: {}",
                    role,
                    order_id,
                    session.id(),
                    e
                );
            }
        }
        InboundMessage::Secret { order_id, secret } => {
            if let Err(e) = relay.submit_secret(session.id(), order_id, &secret).await {
                warn!(
                    "Rejected secret for order {} from session {}: {}",
                    order_id,
                    session.id(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderStatus;
    use crate::relay::OutboundMessage;
    use crate::store::tests::{funded_order, memory_store, SECRET};
    use serde_json::json;

    #[tokio::test]
    async fn test_register_then_secret_over_text_frames() {
        let store = memory_store();
        let relay = SecretRelay::new(store.clone());
        let order = funded_order(&store).await;

        let (maker, mut maker_rx) = Session::new();
        let (resolver, mut resolver_rx) = Session::new();

        let register = |role: &str| {
            json!({"type": "register", "orderId": order.id, "role": role}).to_string()
        };
        handle_text(&relay, &maker, &register("maker")).await;
        handle_text(&relay, &resolver, &register("resolver")).await;
        assert_eq!(
            maker_rx.recv().await.unwrap(),
            OutboundMessage::RequestSecret { order_id: order.id }
        );

        let secret = json!({"type": "secret", "orderId": order.id, "secret": SECRET}).to_string();
        handle_text(&relay, &maker, &secret).await;

        assert_eq!(
            resolver_rx.recv().await.unwrap(),
            OutboundMessage::Secret {
                order_id: order.id,
                secret: SECRET.to_string()
            }
        );
        assert_eq!(
            store.get_order(order.id).await.unwrap().status,
            OrderStatus::Withdrawing
        );
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let store = memory_store();
        let relay = SecretRelay::new(store.clone());
        let order = funded_order(&store).await;
        let (session, mut rx) = Session::new();

        handle_text(&relay, &session, "{not json").await;
        handle_text(&relay, &session, r#"{"type":"register","orderId":"x"}"#).await;
        // secret from a session that never registered as maker
        let secret = json!({"type": "secret", "orderId": order.id, "secret": SECRET}).to_string();
        handle_text(&relay, &session, &secret).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(relay.session_count(), 0);
        assert!(store.get_order(order.id).await.unwrap().secret.is_none());
    }
}
