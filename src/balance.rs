//! Balance derivation.
//!
//! The spendable balance is never stored; it is recomputed from the full
//! per-user ledger history on every read, so the stored state can never
//! drift from the transaction history.

use crate::Amount;
use crate::model::{OrderStatus, UserId, WithdrawalStatus};
use crate::store::{StoreError, TransactionStore};

/// Per-user balance figures, each rounded to 2 decimal places at this
/// boundary (sums are exact internally).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceBreakdown {
    pub total_earned: Amount,
    pub completed_withdrawals: Amount,
    pub pending_withdrawals: Amount,
    pub total_spent_on_orders: Amount,
    pub available_balance: Amount,
}

/// Derive the balance breakdown for a user from the store.
///
/// Pure read: no side effects. A store failure propagates as a retryable
/// error; it is never reported as a zero balance. A user with no history
/// derives to all zeros.
pub fn derive<S: TransactionStore>(
    store: &S,
    user: UserId,
) -> Result<BalanceBreakdown, StoreError> {
    let total_earned: Amount = store
        .cashback_for_user(user)?
        .iter()
        .map(|tx| tx.amount)
        .sum();

    let withdrawals = store.withdrawals_for_user(user)?;
    let completed_withdrawals: Amount = withdrawals
        .iter()
        .filter(|w| w.status == WithdrawalStatus::Completed)
        .map(|w| w.amount)
        .sum();
    let pending_withdrawals: Amount = withdrawals
        .iter()
        .filter(|w| w.status == WithdrawalStatus::Processing)
        .map(|w| w.amount)
        .sum();

    let total_spent_on_orders: Amount = store
        .orders_for_user(user)?
        .iter()
        .filter(|o| o.status != OrderStatus::Cancelled)
        .map(|o| o.price)
        .sum();

    let available_balance =
        total_earned - completed_withdrawals - pending_withdrawals - total_spent_on_orders;

    Ok(BalanceBreakdown {
        total_earned: total_earned.round2(),
        completed_withdrawals: completed_withdrawals.round2(),
        pending_withdrawals: pending_withdrawals.round2(),
        total_spent_on_orders: total_spent_on_orders.round2(),
        available_balance: available_balance.round2(),
    })
}
