//! Session wire protocol
//!
//! JSON objects discriminated by `type`:
//! - inbound  `{"type":"register","orderId":..,"role":"maker"|"resolver"}`
//! - inbound  `{"type":"secret","orderId":..,"secret":..}`
//! - outbound `{"type":"requestSecret","orderId":..}`
//! - outbound `{"type":"secret","orderId":..,"secret":..}`

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Maker,
    Resolver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Maker => f.write_str("maker"),
            Role::Resolver => f.write_str("resolver"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    #[serde(rename_all = "camelCase")]
    Register { order_id: Uuid, role: Role },
    #[serde(rename_all = "camelCase")]
    Secret { order_id: Uuid, secret: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    RequestSecret { order_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Secret { order_id: Uuid, secret: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_inbound_messages() {
        let id = Uuid::new_v4();

        let msg: InboundMessage =
            serde_json::from_value(json!({"type": "register", "orderId": id, "role": "maker"}))
                .unwrap();
        assert_eq!(msg, InboundMessage::Register { order_id: id, role: Role::Maker });

        let msg: InboundMessage =
            serde_json::from_value(json!({"type": "secret", "orderId": id, "secret": "0x01"}))
                .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Secret { order_id: id, secret: "0x01".into() }
        );
    }

    #[test]
    fn test_rejects_unknown_or_incomplete_messages() {
        for raw in [
            r#"{"type":"hello"}"#,
            r#"{"type":"register","orderId":"not-a-uuid","role":"maker"}"#,
            r#"{"type":"register","orderId":"6f1c1f4e-8e0e-4d4e-9d1f-1f7c6c7e2a11","role":"taker"}"#,
            r#"{"orderId":"6f1c1f4e-8e0e-4d4e-9d1f-1f7c6c7e2a11"}"#,
            "not json",
        ] {
            assert!(serde_json::from_str::<InboundMessage>(raw).is_err(), "{}", raw);
        }
    }

    #[test]
    fn test_outbound_wire_shape() {
        let id = Uuid::new_v4();
        let value = serde_json::to_value(OutboundMessage::RequestSecret { order_id: id }).unwrap();
        assert_eq!(value, json!({"type": "requestSecret", "orderId": id}));

        let value = serde_json::to_value(OutboundMessage::Secret {
            order_id: id,
            secret: "s".into(),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "secret", "orderId": id, "secret": "s"}));
    }
}
