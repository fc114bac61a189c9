//! Order lifecycle state machine
//!
//! The transition table in [`OrderStatus::can_transition_to`] is the single
//! authority on which status changes are legal. Every mutator here works on an
//! in-memory order and leaves it untouched when it returns an error, so the
//! store can apply it to a snapshot and persist only on success.
//!
//! ```text
//! pending ──accept──> depositing ──revealSecret──> withdrawing ──complete──> completed
//!    │                    │                            │
//!    └────────────────────┴──── expired | cancelled | failed (administrative)
//! ```

use super::hashlock;
use super::model::{Order, OrderStatus, Side};
use crate::error::{CoordinatorError, CoordinatorResult};

use chrono::{DateTime, Utc};

impl OrderStatus {
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        match (self, next) {
            (Pending, Depositing) | (Depositing, Withdrawing) | (Withdrawing, Completed) => true,
            (from, Expired | Cancelled | Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Targets reachable through an administrative status update
    pub fn is_administrative(&self) -> bool {
        matches!(
            self,
            OrderStatus::Expired | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }
}

/// Write-once slot: identical value is a no-op, a different one a conflict
fn set_once(slot: &mut Option<String>, value: &str, field: &str) -> CoordinatorResult<bool> {
    match slot.as_deref() {
        Some(existing) if existing == value => Ok(false),
        Some(existing) => Err(CoordinatorError::Conflict(format!(
            "{} already recorded as {}",
            field, existing
        ))),
        None => {
            *slot = Some(value.to_string());
            Ok(true)
        }
    }
}

fn non_empty<'a>(value: &'a str, field: &str) -> CoordinatorResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CoordinatorError::Validation(format!("{} must not be empty", field)));
    }
    Ok(value)
}

impl Order {
    fn transition(&mut self, next: OrderStatus) -> CoordinatorResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoordinatorError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// pending -> depositing, binding the resolver
    pub fn accept(&mut self, resolver_address: &str, now: DateTime<Utc>) -> CoordinatorResult<()> {
        let resolver_address = non_empty(resolver_address, "resolverAddress")?;

        if self.status != OrderStatus::Pending {
            return Err(CoordinatorError::Conflict(format!(
                "order cannot be accepted in status {}",
                self.status
            )));
        }
        if self.is_expired_at(now) {
            return Err(CoordinatorError::Conflict(format!(
                "order expired at {}",
                self.expires_at
            )));
        }

        self.transition(OrderStatus::Depositing)?;
        self.resolver_address = Some(resolver_address.to_string());
        Ok(())
    }

    /// Record an escrow funding tx hash. Returns whether anything changed.
    pub fn record_escrow_tx(&mut self, side: Side, hash: &str) -> CoordinatorResult<bool> {
        let hash = non_empty(hash, "escrow tx hash")?;
        if self.escrow_tx_hash(side) == Some(hash) {
            return Ok(false);
        }
        if self.status != OrderStatus::Depositing {
            return Err(CoordinatorError::Conflict(format!(
                "{} escrow tx hash cannot be recorded in status {}",
                side, self.status
            )));
        }

        let slot = match side {
            Side::Src => &mut self.src_escrow_tx_hash,
            Side::Dst => &mut self.dst_escrow_tx_hash,
        };
        set_once(slot, hash, &format!("{}EscrowTxHash", side))
    }

    /// Both escrows funded and the secret not yet disclosed
    pub fn secret_ready(&self) -> bool {
        self.status == OrderStatus::Depositing
            && self.src_escrow_tx_hash.is_some()
            && self.dst_escrow_tx_hash.is_some()
            && self.secret.is_none()
    }

    /// Store the maker's secret and move depositing -> withdrawing
    pub fn reveal_secret(&mut self, secret: &str) -> CoordinatorResult<()> {
        if !self.secret_ready() {
            return Err(CoordinatorError::Conflict(format!(
                "order {} is not awaiting a secret (status {})",
                self.id, self.status
            )));
        }
        if !hashlock::verify(secret, &self.hashlock) {
            return Err(CoordinatorError::InvalidSecret {
                order_id: self.id.to_string(),
            });
        }

        self.transition(OrderStatus::Withdrawing)?;
        self.secret = Some(secret.to_string());
        Ok(())
    }

    /// Record a withdrawal tx hash. Returns whether anything changed.
    pub fn record_withdraw_tx(&mut self, side: Side, hash: &str) -> CoordinatorResult<bool> {
        let hash = non_empty(hash, "withdraw tx hash")?;
        if self.withdraw_tx_hash(side) == Some(hash) {
            return Ok(false);
        }
        if self.status != OrderStatus::Withdrawing {
            return Err(CoordinatorError::Conflict(format!(
                "{} withdraw tx hash cannot be recorded in status {}",
                side, self.status
            )));
        }

        let slot = match side {
            Side::Src => &mut self.src_withdraw_tx_hash,
            Side::Dst => &mut self.dst_withdraw_tx_hash,
        };
        set_once(slot, hash, &format!("{}WithdrawTxHash", side))
    }

    pub fn completion_ready(&self) -> bool {
        self.status == OrderStatus::Withdrawing
            && self.src_withdraw_tx_hash.is_some()
            && self.dst_withdraw_tx_hash.is_some()
    }

    /// withdrawing -> completed
    pub fn complete(&mut self) -> CoordinatorResult<()> {
        if !self.completion_ready() {
            return Err(CoordinatorError::Conflict(format!(
                "order {} is not ready to complete (status {})",
                self.id, self.status
            )));
        }
        self.transition(OrderStatus::Completed)
    }

    /// Record a deployed escrow address. Append-only, any non-terminal status.
    pub fn record_escrow_address(&mut self, side: Side, address: &str) -> CoordinatorResult<bool> {
        let address = non_empty(address, "escrow address")?;
        let slot = match side {
            Side::Src => &mut self.escrow_src_address,
            Side::Dst => &mut self.escrow_dst_address,
        };
        if slot.as_deref() == Some(address) {
            return Ok(false);
        }
        if self.status.is_terminal() {
            return Err(CoordinatorError::Conflict(format!(
                "escrow address cannot be recorded in status {}",
                self.status
            )));
        }
        set_once(slot, address, &format!("escrow{}Address", side))
    }

    /// Move to expired, cancelled or failed
    pub fn administrative_transition(&mut self, target: OrderStatus) -> CoordinatorResult<()> {
        if !target.is_administrative() {
            return Err(CoordinatorError::InvalidStateTransition {
                from: self.status,
                to: target,
            });
        }
        self.transition(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrderRulesConfig;
    use crate::order::validation::{build_order, tests::sample_new_order};
    use chrono::Duration;
    use tokio_test::{assert_err, assert_ok};

    const SECRET: &str = "0x5ec2e75ec2e75ec2e75ec2e75ec2e75ec2e75ec2e75ec2e75ec2e75ec2e75ec2";

    fn pending() -> Order {
        build_order(&sample_new_order(SECRET), &OrderRulesConfig::default(), Utc::now()).unwrap()
    }

    fn funded() -> Order {
        let mut order = pending();
        order.accept("resolverA", Utc::now()).unwrap();
        order.record_escrow_tx(Side::Src, "0xAA").unwrap();
        order.record_escrow_tx(Side::Dst, "0xBB").unwrap();
        order
    }

    #[test]
    fn test_transition_table() {
        use OrderStatus::*;

        let legal = [
            (Pending, Depositing),
            (Depositing, Withdrawing),
            (Withdrawing, Completed),
            (Pending, Expired),
            (Depositing, Cancelled),
            (Withdrawing, Failed),
        ];
        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                let expected = legal.contains(&(from, to))
                    || (to.is_administrative() && !from.is_terminal());
                assert_eq!(from.can_transition_to(to), expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_accept_binds_resolver() {
        let mut order = pending();
        assert_ok!(order.accept("resolverA", Utc::now()));
        assert_eq!(order.status, OrderStatus::Depositing);
        assert_eq!(order.resolver_address.as_deref(), Some("resolverA"));

        let before = order.clone();
        let err = order.accept("resolverB", Utc::now()).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(order, before);
    }

    #[test]
    fn test_accept_requires_resolver_and_unexpired_order() {
        let mut order = pending();
        let err = order.accept("  ", Utc::now()).unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        let later = order.expires_at + Duration::seconds(1);
        assert!(order.accept("resolverA", later).unwrap_err().is_conflict());
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.resolver_address.is_none());
    }

    #[test]
    fn test_escrow_hashes_are_append_only() {
        let mut order = pending();
        assert_err!(order.record_escrow_tx(Side::Src, "0xAA"));

        order.accept("resolverA", Utc::now()).unwrap();
        assert!(order.record_escrow_tx(Side::Src, "0xAA").unwrap());
        assert!(!order.record_escrow_tx(Side::Src, "0xAA").unwrap());
        assert!(order.record_escrow_tx(Side::Src, "0xCC").unwrap_err().is_conflict());
        assert_eq!(order.src_escrow_tx_hash.as_deref(), Some("0xAA"));
        assert!(!order.secret_ready());

        order.record_escrow_tx(Side::Dst, "0xBB").unwrap();
        assert!(order.secret_ready());
    }

    #[test]
    fn test_reveal_secret_checks_hashlock() {
        let mut order = funded();
        let before = order.clone();

        let err = order.reveal_secret("not-the-secret").unwrap_err();
        assert_eq!(err.kind(), "invalid_secret");
        assert_eq!(order, before);
        assert!(order.secret.is_none());

        assert_ok!(order.reveal_secret(SECRET));
        assert_eq!(order.status, OrderStatus::Withdrawing);
        assert_eq!(order.secret.as_deref(), Some(SECRET));
        assert!(!order.secret_ready());

        // write-once
        assert!(order.reveal_secret(SECRET).unwrap_err().is_conflict());
    }

    #[test]
    fn test_reveal_secret_needs_both_escrows() {
        let mut order = pending();
        order.accept("resolverA", Utc::now()).unwrap();
        order.record_escrow_tx(Side::Src, "0xAA").unwrap();
        assert!(order.reveal_secret(SECRET).unwrap_err().is_conflict());
        assert!(order.secret.is_none());
    }

    #[test]
    fn test_completion_requires_both_withdrawals() {
        let mut order = funded();
        assert_err!(order.record_withdraw_tx(Side::Src, "0xCC"));
        order.reveal_secret(SECRET).unwrap();

        order.record_withdraw_tx(Side::Src, "0xCC").unwrap();
        assert!(!order.completion_ready());
        assert!(order.complete().unwrap_err().is_conflict());

        order.record_withdraw_tx(Side::Dst, "0xDD").unwrap();
        assert!(order.completion_ready());
        assert_ok!(order.complete());
        assert_eq!(order.status, OrderStatus::Completed);

        // escrow hash identical to the stored one is still a no-op
        assert!(!order.record_escrow_tx(Side::Src, "0xAA").unwrap());
    }

    #[test]
    fn test_administrative_transitions() {
        let mut order = pending();
        assert!(order
            .administrative_transition(OrderStatus::Completed)
            .unwrap_err()
            .is_conflict());
        assert!(order
            .administrative_transition(OrderStatus::Depositing)
            .unwrap_err()
            .is_conflict());

        assert_ok!(order.administrative_transition(OrderStatus::Expired));
        assert_eq!(order.status, OrderStatus::Expired);

        assert!(order
            .administrative_transition(OrderStatus::Cancelled)
            .unwrap_err()
            .is_conflict());
        assert!(order.accept("resolverA", Utc::now()).unwrap_err().is_conflict());
    }

    #[test]
    fn test_escrow_addresses_frozen_after_terminal() {
        let mut order = pending();
        assert!(order.record_escrow_address(Side::Src, "0xE5").unwrap());
        assert!(order.record_escrow_address(Side::Src, "0xE6").unwrap_err().is_conflict());

        order.administrative_transition(OrderStatus::Cancelled).unwrap();
        assert!(!order.record_escrow_address(Side::Src, "0xE5").unwrap());
        assert!(order.record_escrow_address(Side::Dst, "0xE7").unwrap_err().is_conflict());
    }
}
