//! Swap order data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoordinatorError;

/// Lifecycle status of a swap order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Depositing,
    Withdrawing,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Depositing,
        OrderStatus::Withdrawing,
        OrderStatus::Completed,
        OrderStatus::Failed,
        OrderStatus::Expired,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Depositing => "depositing",
            OrderStatus::Withdrawing => "withdrawing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Expired => "expired",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Failed
                | OrderStatus::Expired
                | OrderStatus::Cancelled
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoordinatorError::Validation(format!("unknown order status '{}'", s)))
    }
}

/// Which leg of the swap a record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Src,
    Dst,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Src => f.write_str("src"),
            Side::Dst => f.write_str("dst"),
        }
    }
}

/// A cross-chain swap order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub status: OrderStatus,
    pub from_chain: String,
    pub to_chain: String,
    pub from_token: String,
    pub to_token: String,
    pub from_amount: String,
    pub to_amount: String,
    pub maker_src_address: String,
    pub maker_dst_address: String,
    pub resolver_address: Option<String>,
    pub hashlock: String,
    pub salt: String,
    pub order_hash: String,
    pub signature: String,
    pub escrow_src_address: Option<String>,
    pub escrow_dst_address: Option<String>,
    pub src_escrow_tx_hash: Option<String>,
    pub dst_escrow_tx_hash: Option<String>,
    pub src_withdraw_tx_hash: Option<String>,
    pub dst_withdraw_tx_hash: Option<String>,
    pub secret: Option<String>,
    pub relayer_fee: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped on every stored mutation
    #[serde(skip)]
    pub version: i64,
}

impl Order {
    pub fn escrow_tx_hash(&self, side: Side) -> Option<&str> {
        match side {
            Side::Src => self.src_escrow_tx_hash.as_deref(),
            Side::Dst => self.dst_escrow_tx_hash.as_deref(),
        }
    }

    pub fn withdraw_tx_hash(&self, side: Side) -> Option<&str> {
        match side {
            Side::Src => self.src_withdraw_tx_hash.as_deref(),
            Side::Dst => self.dst_withdraw_tx_hash.as_deref(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Order submission as received from a maker
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub from_chain: Option<String>,
    pub to_chain: Option<String>,
    pub from_token: Option<String>,
    pub to_token: Option<String>,
    pub from_amount: Option<String>,
    pub to_amount: Option<String>,
    pub maker_src_address: Option<String>,
    pub maker_dst_address: Option<String>,
    pub hashlock: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub salt: Option<String>,
    pub order_hash: Option<String>,
    pub signature: Option<String>,
    pub relayer_fee: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Transaction hashes reported by chain watchers
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxHashUpdate {
    pub src_escrow_tx_hash: Option<String>,
    pub dst_escrow_tx_hash: Option<String>,
    pub src_withdraw_tx_hash: Option<String>,
    pub dst_withdraw_tx_hash: Option<String>,
}

impl TxHashUpdate {
    pub fn is_empty(&self) -> bool {
        [
            &self.src_escrow_tx_hash,
            &self.dst_escrow_tx_hash,
            &self.src_withdraw_tx_hash,
            &self.dst_withdraw_tx_hash,
        ]
        .iter()
        .all(|field| field.as_deref().map_or(true, |v| v.trim().is_empty()))
    }
}

/// Escrow contract addresses reported once deployed
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowAddressUpdate {
    pub escrow_src_address: Option<String>,
    pub escrow_dst_address: Option<String>,
}

/// Filter for order listings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub resolver_address: Option<String>,
    pub maker_address: Option<String>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.status.map_or(true, |s| order.status == s)
            && self
                .resolver_address
                .as_deref()
                .map_or(true, |r| order.resolver_address.as_deref() == Some(r))
            && self
                .maker_address
                .as_deref()
                .map_or(true, |m| order.maker_src_address == m)
    }
}

/// One page of an order listing, newest first
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total_count: u64,
    pub current_page: u32,
    pub total_pages: u64,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("processing".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_salt_accepts_numbers() {
        let order: NewOrder = serde_json::from_str(r#"{"salt": 42}"#).unwrap();
        assert_eq!(order.salt.as_deref(), Some("42"));

        let order: NewOrder = serde_json::from_str(r#"{"salt": "0x01"}"#).unwrap();
        assert_eq!(order.salt.as_deref(), Some("0x01"));

        let order: NewOrder = serde_json::from_str(r#"{}"#).unwrap();
        assert!(order.salt.is_none());
    }

    #[test]
    fn test_blank_tx_hash_update_is_empty() {
        let update = TxHashUpdate {
            src_escrow_tx_hash: Some("  ".into()),
            ..Default::default()
        };
        assert!(update.is_empty());
    }
}
