//! Error taxonomy for engine operations.

use thiserror::Error;

use crate::Amount;
use crate::model::{OrderId, OrderStatus, ProductId, UserId, WithdrawalId, WithdrawalStatus};
use crate::store::StoreError;

/// Malformed input, rejected before any store read.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Amount),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),
}

/// The kind of entity a lookup failed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Product,
    Order,
    Withdrawal,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Entity::User => "user",
            Entity::Product => "product",
            Entity::Order => "order",
            Entity::Withdrawal => "withdrawal",
        };
        f.write_str(name)
    }
}

/// Top-level error returned by the engine operations.
///
/// User-visible variants carry human-readable messages; a failed primary
/// write always surfaces here, while dependent commission-write failures are
/// logged and reconciled instead of propagated.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("insufficient balance for user {user}: available {available}, requested {requested}")]
    InsufficientBalance {
        user: UserId,
        available: Amount,
        requested: Amount,
    },

    #[error("product {0} is out of stock")]
    OutOfStock(ProductId),

    #[error("{0} {1} not found")]
    NotFound(Entity, u64),

    #[error("user {0} is already registered")]
    UserExists(UserId),

    #[error("order {order}: invalid transition {from:?} -> {to:?}")]
    InvalidOrderTransition {
        order: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("withdrawal {withdrawal} is already {status:?}")]
    WithdrawalFinal {
        withdrawal: WithdrawalId,
        status: WithdrawalStatus,
    },

    #[error("ledger store failed: {0}")]
    Store(#[from] StoreError),
}
