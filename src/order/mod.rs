//! Swap orders
//!
//! - Data model and wire representation
//! - Lifecycle state machine (legal transitions and their guards)
//! - Hashlock digests
//! - Submission validation

pub mod hashlock;
pub mod lifecycle;
pub mod model;
pub mod validation;

pub use model::{
    EscrowAddressUpdate, NewOrder, Order, OrderFilter, OrderPage, OrderStatus, Side, TxHashUpdate,
};
