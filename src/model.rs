//! Core domain types for the rewards ledger.

use crate::Amount;

/// User identifier.
pub type UserId = u32;

/// Cashback ledger entry identifier.
pub type TxId = u64;

/// Store order identifier.
pub type OrderId = u64;

/// Withdrawal request identifier.
pub type WithdrawalId = u64;

/// Store product identifier.
pub type ProductId = u32;

/// Reward tier, recomputed from rolling cashback earnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tier {
    #[default]
    Standard,
    Silver,
    Gold,
}

impl Tier {
    /// Tier for a given rolling monthly earnings figure.
    pub fn for_monthly_earnings(earnings: Amount) -> Self {
        if earnings >= Amount::from_units(2_000) {
            Tier::Gold
        } else if earnings >= Amount::from_units(500) {
            Tier::Silver
        } else {
            Tier::Standard
        }
    }
}

/// A platform user.
///
/// `referred_by` is a weak back-reference to the referring user, not
/// ownership. `monthly_earnings` is a cached rollup touched only by
/// cashback-ledger writes; it is a tier-eligibility signal, never the
/// spendable balance.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub referred_by: Option<UserId>,
    pub monthly_earnings: Amount,
    pub level: Tier,
}

impl User {
    pub fn new(id: UserId, referred_by: Option<UserId>) -> Self {
        Self {
            id,
            referred_by,
            monthly_earnings: Amount::ZERO,
            level: Tier::Standard,
        }
    }
}

/// What kind of downstream event generated a commission entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    /// Triggered by a manual cashback entry for the referred user.
    Cashback,
    /// Triggered by a referred user's order reaching `Delivered`.
    StorePurchase,
}

/// Traceability block carried only by referral-bonus ledger entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionSource {
    pub source_type: SourceType,
    /// The referred user whose activity generated the bonus.
    pub source_user_id: UserId,
    /// Deterministic key tying the entry to its triggering event; a second
    /// write with the same key is a no-op.
    pub idempotency_key: String,
}

/// Immutable cashback ledger entry. Append-only ledger of record: never
/// updated or deleted.
#[derive(Debug, Clone)]
pub struct CashbackTransaction {
    pub id: TxId,
    /// Beneficiary of the entry (the referrer, for commission entries).
    pub user_id: UserId,
    /// Source trading account, opaque to the ledger.
    pub account_id: String,
    pub broker: String,
    /// Positive for earnings, negative for clawbacks.
    pub amount: Amount,
    /// Unix seconds at which the entry was recorded.
    pub recorded_at: u64,
    /// Present only for referral-bonus entries.
    pub source: Option<CommissionSource>,
}

/// Withdrawal request status. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalStatus {
    Processing,
    Completed,
    Failed,
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WithdrawalStatus::Processing)
    }
}

/// A withdrawal request.
#[derive(Debug, Clone)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub amount: Amount,
    pub status: WithdrawalStatus,
    pub payment_method: String,
    /// Opaque payout details supplied by the user.
    pub details: String,
    /// Audit trail of superseded payout details across retries.
    pub previous_details: Vec<String>,
    /// External transaction reference, set on completion.
    pub tx_id: Option<String>,
    /// Operator-supplied reason, set on failure.
    pub rejection_reason: Option<String>,
}

/// Store order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Whether the admin-driven edge `self -> to` exists in the order state
    /// machine. `Cancelled` is terminal; repeating the current status is
    /// rejected.
    pub fn can_transition(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (*self, to),
            (Pending, Shipped) | (Shipped, Delivered) | (Delivered, Cancelled) | (Pending, Cancelled)
        )
    }
}

/// A store order.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub price: Amount,
    pub status: OrderStatus,
    /// Opaque shipping details supplied by the buyer.
    pub delivery_info: String,
    /// Idempotency flag: true iff a commission was awarded for this order and
    /// not since clawed back.
    pub referral_commission_awarded: bool,
}

/// A store catalog row; stock gates order placement.
#[derive(Debug, Clone)]
pub struct Product {
    pub id: ProductId,
    pub price: Amount,
    pub stock: u32,
}

/// Durable record of a commission write that failed after its triggering
/// write committed, for operator reconciliation.
#[derive(Debug, Clone)]
pub struct ReconciliationTask {
    /// User whose commission ledger needs operator review.
    pub user_id: UserId,
    pub reason: String,
}

/// An operation representing the possible inputs of the engine.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Create a user, optionally referred by an existing one.
    Register {
        user: UserId,
        referred_by: Option<UserId>,
    },
    /// Add a product to the store catalog.
    AddProduct {
        product: ProductId,
        price: Amount,
        stock: u32,
    },
    /// Admin-only: record a cashback entry for a user's trading activity.
    RecordCashback {
        user: UserId,
        account_id: String,
        broker: String,
        amount: Amount,
    },
    /// Create a `Processing` withdrawal, gated on available balance.
    RequestWithdrawal {
        user: UserId,
        amount: Amount,
        payment_method: String,
        details: String,
    },
    /// Create a `Pending` order and decrement stock, gated on balance.
    PlaceOrder {
        user: UserId,
        product: ProductId,
        delivery_info: String,
    },
    /// Admin-only order status transition.
    SetOrderStatus { order: OrderId, status: OrderStatus },
    /// Admin-only terminal transition: `Processing -> Completed`.
    ApproveWithdrawal {
        withdrawal: WithdrawalId,
        tx_id: String,
    },
    /// Admin-only terminal transition: `Processing -> Failed`.
    RejectWithdrawal {
        withdrawal: WithdrawalId,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_thresholds() {
        assert_eq!(
            Tier::for_monthly_earnings(Amount::ZERO),
            Tier::Standard
        );
        assert_eq!(
            Tier::for_monthly_earnings(Amount::from_float(499.99)),
            Tier::Standard
        );
        assert_eq!(
            Tier::for_monthly_earnings(Amount::from_units(500)),
            Tier::Silver
        );
        assert_eq!(
            Tier::for_monthly_earnings(Amount::from_units(2_000)),
            Tier::Gold
        );
    }

    #[test]
    fn order_state_machine_edges() {
        use OrderStatus::*;
        assert!(Pending.can_transition(Shipped));
        assert!(Pending.can_transition(Cancelled));
        assert!(Shipped.can_transition(Delivered));
        assert!(Delivered.can_transition(Cancelled));

        // No skipping, no reversing, no terminal exits, no self-loops.
        assert!(!Pending.can_transition(Delivered));
        assert!(!Shipped.can_transition(Cancelled));
        assert!(!Delivered.can_transition(Delivered));
        assert!(!Cancelled.can_transition(Pending));
        assert!(!Cancelled.can_transition(Cancelled));
    }

    #[test]
    fn withdrawal_terminal_states() {
        assert!(!WithdrawalStatus::Processing.is_terminal());
        assert!(WithdrawalStatus::Completed.is_terminal());
        assert!(WithdrawalStatus::Failed.is_terminal());
    }
}
