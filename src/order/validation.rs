//! Creation-time validation of order submissions

use super::hashlock;
use super::model::{NewOrder, Order, OrderStatus};
use crate::config::OrderRulesConfig;
use crate::error::{CoordinatorError, CoordinatorResult};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

lazy_static! {
    static ref AMOUNT: Regex = Regex::new(r"^[0-9]+$").unwrap();
}

const MAX_FIELD_LEN: usize = 256;

fn required<'a>(value: &'a Option<String>, field: &str) -> CoordinatorResult<&'a str> {
    let value = value.as_deref().map(str::trim).unwrap_or_default();
    if value.is_empty() {
        return Err(CoordinatorError::Validation(format!(
            "missing required field: {}",
            field
        )));
    }
    if value.len() > MAX_FIELD_LEN {
        return Err(CoordinatorError::Validation(format!("{} is too long", field)));
    }
    Ok(value)
}

fn amount(value: &str, field: &str, allow_zero: bool) -> CoordinatorResult<String> {
    if !AMOUNT.is_match(value) {
        return Err(CoordinatorError::Validation(format!(
            "{} must be a non-negative integer string",
            field
        )));
    }
    if !allow_zero && value.bytes().all(|b| b == b'0') {
        return Err(CoordinatorError::Validation(format!("{} must be positive", field)));
    }
    Ok(value.to_string())
}

fn digest(value: &str, field: &str) -> CoordinatorResult<String> {
    hashlock::normalize(value).ok_or_else(|| {
        CoordinatorError::Validation(format!("{} must be a 0x-prefixed 32-byte hex string", field))
    })
}

fn chain(value: &str, field: &str, rules: &OrderRulesConfig) -> CoordinatorResult<String> {
    rules
        .supported_chains
        .iter()
        .find(|c| c.eq_ignore_ascii_case(value))
        .cloned()
        .ok_or_else(|| {
            CoordinatorError::Validation(format!("{} '{}' is not a supported chain", field, value))
        })
}

/// Validate a submission and build the pending order it describes
pub fn build_order(
    new: &NewOrder,
    rules: &OrderRulesConfig,
    now: DateTime<Utc>,
) -> CoordinatorResult<Order> {
    let from_chain = chain(required(&new.from_chain, "fromChain")?, "fromChain", rules)?;
    let to_chain = chain(required(&new.to_chain, "toChain")?, "toChain", rules)?;
    if from_chain == to_chain {
        return Err(CoordinatorError::Validation(
            "fromChain and toChain must differ".to_string(),
        ));
    }

    let from_token = required(&new.from_token, "fromToken")?.to_string();
    let to_token = required(&new.to_token, "toToken")?.to_string();
    let from_amount = amount(required(&new.from_amount, "fromAmount")?, "fromAmount", false)?;
    let to_amount = amount(required(&new.to_amount, "toAmount")?, "toAmount", false)?;
    let maker_src_address = required(&new.maker_src_address, "makerSrcAddress")?.to_string();
    let maker_dst_address = required(&new.maker_dst_address, "makerDstAddress")?.to_string();
    let hashlock = digest(required(&new.hashlock, "hashlock")?, "hashlock")?;
    let salt = required(&new.salt, "salt")?.to_string();
    let order_hash = digest(required(&new.order_hash, "orderHash")?, "orderHash")?;
    let signature = required(&new.signature, "signature")?.to_string();

    let relayer_fee = match new.relayer_fee.as_deref().map(str::trim) {
        Some(fee) if !fee.is_empty() => Some(amount(fee, "relayerFee", true)?),
        _ => None,
    };

    let expires_at = new
        .expires_at
        .ok_or_else(|| CoordinatorError::Validation("missing required field: expiresAt".into()))?;
    if expires_at <= now {
        return Err(CoordinatorError::Validation(
            "expiresAt must be in the future".to_string(),
        ));
    }

    Ok(Order {
        id: Uuid::new_v4(),
        status: OrderStatus::Pending,
        from_chain,
        to_chain,
        from_token,
        to_token,
        from_amount,
        to_amount,
        maker_src_address,
        maker_dst_address,
        resolver_address: None,
        hashlock,
        salt,
        order_hash,
        signature,
        escrow_src_address: None,
        escrow_dst_address: None,
        src_escrow_tx_hash: None,
        dst_escrow_tx_hash: None,
        src_withdraw_tx_hash: None,
        dst_withdraw_tx_hash: None,
        secret: None,
        relayer_fee,
        expires_at,
        created_at: now,
        updated_at: now,
        version: 0,
    })
}
