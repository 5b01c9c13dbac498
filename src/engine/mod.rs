//! Rewards engine.
//!
//! Implements the operations of the cashback platform core: balance reads,
//! spend-gated withdrawals and store orders, manual cashback entries, and the
//! admin-driven order/withdrawal lifecycles with their referral-commission
//! side effects. Also supports an async stream of operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_stream::{Stream, StreamExt};
use tracing::{error, info, warn};

use crate::Amount;
use crate::balance::{self, BalanceBreakdown};
use crate::model::{
    Operation, Order, OrderId, OrderStatus, Product, ProductId, ReconciliationTask, Tier, TxId,
    User, UserId, Withdrawal, WithdrawalId, WithdrawalStatus,
};
use crate::store::{NewCashback, StoreError, TransactionStore};

mod commission;
mod error;

pub use commission::{AwardOutcome, CommissionPolicy, DEFAULT_RATE_BPS};
pub use error::{EngineError, Entity, ValidationError};

/// The rewards engine.
///
/// Holds the store seam, the commission policy, and a per-user lock registry.
/// Every balance-affecting check-then-write sequence runs under the affected
/// user's lock, so two concurrent spends for one user cannot both pass the
/// gate; different users never contend.
pub struct Engine<S> {
    store: S,
    policy: CommissionPolicy,
    user_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

/// Public API
impl<S: TransactionStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self::with_policy(store, CommissionPolicy::default())
    }

    pub fn with_policy(store: S, policy: CommissionPolicy) -> Self {
        Self {
            store,
            policy,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run the engine over the given operation stream. A failed operation is
    /// logged and skipped; it never stops the stream.
    pub async fn run(&self, mut stream: impl Stream<Item = Operation> + Unpin) {
        while let Some(op) = stream.next().await {
            let _ = self.apply(op);
        }
    }

    /// Apply a single operation on top of the current ledger state.
    pub fn apply(&self, op: Operation) -> Result<(), EngineError> {
        match op {
            Operation::Register { user, referred_by } => {
                let result = self.register_user(user, referred_by);
                Self::log_result("register", user as u64, &result);
                result
            }
            Operation::AddProduct {
                product,
                price,
                stock,
            } => {
                let result = self.add_product(product, price, stock);
                Self::log_result("product", product as u64, &result);
                result
            }
            Operation::RecordCashback {
                user,
                account_id,
                broker,
                amount,
            } => {
                let result = self.record_cashback(user, &account_id, &broker, amount);
                Self::log_result("cashback", user as u64, &result);
                result.map(|_| ())
            }
            Operation::RequestWithdrawal {
                user,
                amount,
                payment_method,
                details,
            } => {
                let result = self.request_withdrawal(user, amount, &payment_method, &details);
                Self::log_result("withdraw", user as u64, &result);
                result.map(|_| ())
            }
            Operation::PlaceOrder {
                user,
                product,
                delivery_info,
            } => {
                let result = self.place_order(user, product, &delivery_info);
                Self::log_result("order", user as u64, &result);
                result.map(|_| ())
            }
            Operation::SetOrderStatus { order, status } => {
                let result = self.set_order_status(order, status);
                Self::log_result("order_status", order, &result);
                result
            }
            Operation::ApproveWithdrawal { withdrawal, tx_id } => {
                let result = self.approve_withdrawal(withdrawal, &tx_id);
                Self::log_result("approve", withdrawal, &result);
                result
            }
            Operation::RejectWithdrawal { withdrawal, reason } => {
                let result = self.reject_withdrawal(withdrawal, &reason);
                Self::log_result("reject", withdrawal, &result);
                result
            }
        }
    }

    /// Derive the balance breakdown for a user. Read-only; a user with no
    /// history derives to all zeros.
    pub fn available_balance(&self, user: UserId) -> Result<BalanceBreakdown, EngineError> {
        Ok(balance::derive(&self.store, user)?)
    }

    /// Create a user, optionally referred by an existing one.
    pub fn register_user(
        &self,
        user: UserId,
        referred_by: Option<UserId>,
    ) -> Result<(), EngineError> {
        if self.store.user(user)?.is_some() {
            return Err(EngineError::UserExists(user));
        }
        if let Some(referrer) = referred_by
            && self.store.user(referrer)?.is_none()
        {
            return Err(EngineError::NotFound(Entity::User, referrer as u64));
        }
        self.store.insert_user(User::new(user, referred_by))?;
        Ok(())
    }

    /// Add (or restock) a store catalog row.
    pub fn add_product(
        &self,
        product: ProductId,
        price: Amount,
        stock: u32,
    ) -> Result<(), EngineError> {
        if !price.is_positive() {
            return Err(ValidationError::NonPositiveAmount(price).into());
        }
        self.store.insert_product(Product {
            id: product,
            price,
            stock,
        })?;
        Ok(())
    }

    /// Admin-only: append a cashback ledger entry for a user's trading
    /// activity, then pay the referral commission if the user was referred.
    ///
    /// The commission is a dependent write: if it fails after the entry
    /// committed, this still returns success, and the failure is logged and
    /// recorded as a reconciliation task.
    pub fn record_cashback(
        &self,
        user: UserId,
        account_id: &str,
        broker: &str,
        amount: Amount,
    ) -> Result<TxId, EngineError> {
        if !amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount(amount).into());
        }
        if account_id.is_empty() {
            return Err(ValidationError::MissingField("account").into());
        }

        let beneficiary = self
            .store
            .user(user)?
            .ok_or(EngineError::NotFound(Entity::User, user as u64))?;

        let tx = {
            let lock = self.user_lock(user);
            let _guard = lock.lock().unwrap();
            let tx = self.store.insert_cashback(NewCashback {
                user_id: user,
                account_id: account_id.to_string(),
                broker: broker.to_string(),
                amount,
                source: None,
            })?;
            rollup_earnings(&self.store, user, amount)?;
            tx
        };

        if let Some(referrer) = beneficiary.referred_by {
            let lock = self.user_lock(referrer);
            let _guard = lock.lock().unwrap();
            match commission::award_for_cashback(&self.store, &self.policy, &beneficiary, tx, amount)
            {
                Ok(AwardOutcome::Paid { referrer, amount }) => {
                    info!(referrer, amount = %amount, source_user = user, "referral commission paid");
                }
                Ok(AwardOutcome::Duplicate { key }) => {
                    warn!(key = %key, "duplicate commission trigger ignored");
                }
                Ok(AwardOutcome::NoReferrer) => {}
                Err(e) => {
                    self.record_partial_failure(
                        referrer,
                        format!("cashback commission for ledger entry {tx} owed to user {referrer}"),
                        e,
                    );
                }
            }
        }

        Ok(tx)
    }

    /// Create a `Processing` withdrawal, gated on the derived balance.
    pub fn request_withdrawal(
        &self,
        user: UserId,
        amount: Amount,
        payment_method: &str,
        details: &str,
    ) -> Result<WithdrawalId, EngineError> {
        if !amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount(amount).into());
        }
        if payment_method.is_empty() {
            return Err(ValidationError::MissingField("payment_method").into());
        }
        if self.store.user(user)?.is_none() {
            return Err(EngineError::NotFound(Entity::User, user as u64));
        }

        let lock = self.user_lock(user);
        let _guard = lock.lock().unwrap();

        let breakdown = balance::derive(&self.store, user)?;
        if amount > breakdown.available_balance {
            return Err(EngineError::InsufficientBalance {
                user,
                available: breakdown.available_balance,
                requested: amount,
            });
        }

        let id = self.store.insert_withdrawal(
            user,
            amount,
            payment_method.to_string(),
            details.to_string(),
        )?;
        Ok(id)
    }

    /// Create a `Pending` order for one unit of a product, gated on the
    /// derived balance and on stock. `delivery_info` is opaque to the engine.
    pub fn place_order(
        &self,
        user: UserId,
        product: ProductId,
        delivery_info: &str,
    ) -> Result<OrderId, EngineError> {
        if self.store.user(user)?.is_none() {
            return Err(EngineError::NotFound(Entity::User, user as u64));
        }
        let catalog_row = self
            .store
            .product(product)?
            .ok_or(EngineError::NotFound(Entity::Product, product as u64))?;

        let lock = self.user_lock(user);
        let _guard = lock.lock().unwrap();

        let breakdown = balance::derive(&self.store, user)?;
        if catalog_row.price > breakdown.available_balance {
            return Err(EngineError::InsufficientBalance {
                user,
                available: breakdown.available_balance,
                requested: catalog_row.price,
            });
        }

        // Conditional decrement: the store refuses once stock hits zero, so a
        // concurrent racer cannot oversell the last unit.
        if !self.store.decrement_stock(product)? {
            return Err(EngineError::OutOfStock(product));
        }

        match self
            .store
            .insert_order(user, product, catalog_row.price, delivery_info.to_string())
        {
            Ok(id) => Ok(id),
            Err(e) => {
                // The stock unit is already taken; surface it for operator
                // review instead of silently losing it.
                self.record_reconciliation(
                    user,
                    format!("order insert for product {product} failed after stock decrement"),
                );
                Err(e.into())
            }
        }
    }

    /// Admin-only order transition. The `Delivered` and `Delivered ->
    /// Cancelled` edges carry commission side effects; all other edges are
    /// commission-neutral.
    pub fn set_order_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
    ) -> Result<(), EngineError> {
        let user = self
            .store
            .order(order_id)?
            .ok_or(EngineError::NotFound(Entity::Order, order_id))?
            .user_id;

        let lock = self.user_lock(user);
        let order = {
            let _guard = lock.lock().unwrap();
            // Re-read under the lock: a concurrent admin call may have moved
            // the order between the lookup and the lock.
            let mut order = self
                .store
                .order(order_id)?
                .ok_or(EngineError::NotFound(Entity::Order, order_id))?;
            if !order.status.can_transition(new_status) {
                return Err(EngineError::InvalidOrderTransition {
                    order: order_id,
                    from: order.status,
                    to: new_status,
                });
            }
            order.status = new_status;
            self.store.update_order(order.clone())?;
            order
        };

        // Dependent commission writes: logged and reconciled on failure, never
        // propagated once the status change has committed.
        self.order_commission_effects(&order);
        Ok(())
    }

    /// Admin-only terminal transition `Processing -> Completed`.
    pub fn approve_withdrawal(
        &self,
        withdrawal_id: WithdrawalId,
        tx_id: &str,
    ) -> Result<(), EngineError> {
        if tx_id.is_empty() {
            return Err(ValidationError::MissingField("tx_id").into());
        }
        let user = self.load_open_withdrawal(withdrawal_id)?.user_id;

        let lock = self.user_lock(user);
        let _guard = lock.lock().unwrap();
        // Re-read under the lock: a concurrent finalizer may have settled the
        // row between the lookup and the lock.
        let mut withdrawal = self.load_open_withdrawal(withdrawal_id)?;
        withdrawal.status = WithdrawalStatus::Completed;
        withdrawal.tx_id = Some(tx_id.to_string());
        self.store.update_withdrawal(withdrawal)?;
        Ok(())
    }

    /// Admin-only terminal transition `Processing -> Failed`. The amount is
    /// excluded from `pending_withdrawals` from now on, which restores the
    /// spendable balance without a compensating entry.
    pub fn reject_withdrawal(
        &self,
        withdrawal_id: WithdrawalId,
        reason: &str,
    ) -> Result<(), EngineError> {
        if reason.is_empty() {
            return Err(ValidationError::MissingField("reason").into());
        }
        let user = self.load_open_withdrawal(withdrawal_id)?.user_id;

        let lock = self.user_lock(user);
        let _guard = lock.lock().unwrap();
        // Re-read under the lock, as in `approve_withdrawal`.
        let mut withdrawal = self.load_open_withdrawal(withdrawal_id)?;
        withdrawal.status = WithdrawalStatus::Failed;
        withdrawal.rejection_reason = Some(reason.to_string());
        self.store.update_withdrawal(withdrawal)?;
        Ok(())
    }
}

/// Private API
impl<S: TransactionStore> Engine<S> {
    /// Small helper to log `apply` results
    fn log_result<T, E: std::fmt::Display>(op: &str, subject: u64, result: &Result<T, E>) {
        match result {
            Ok(_) => info!(op, subject, "operation applied"),
            Err(e) => warn!(op, subject, reason = %e, "operation skipped"),
        }
    }

    fn user_lock(&self, user: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap();
        // Entries held only by the registry (strong count 1) belong to no
        // in-flight operation; drop them so the map does not grow with every
        // user ever seen.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(user).or_default().clone()
    }

    fn load_open_withdrawal(&self, id: WithdrawalId) -> Result<Withdrawal, EngineError> {
        let withdrawal = self
            .store
            .withdrawal(id)?
            .ok_or(EngineError::NotFound(Entity::Withdrawal, id))?;
        if withdrawal.status.is_terminal() {
            return Err(EngineError::WithdrawalFinal {
                withdrawal: id,
                status: withdrawal.status,
            });
        }
        Ok(withdrawal)
    }

    /// Commission side effects of a committed order transition.
    fn order_commission_effects(&self, order: &Order) {
        match order.status {
            OrderStatus::Delivered if !order.referral_commission_awarded => {
                self.award_delivery_commission(order);
            }
            OrderStatus::Cancelled if order.referral_commission_awarded => {
                self.claw_back_delivery_commission(order);
            }
            _ => {}
        }
    }

    fn award_delivery_commission(&self, order: &Order) {
        let buyer = match self.store.user(order.user_id) {
            Ok(Some(buyer)) => buyer,
            Ok(None) => {
                warn!(order = order.id, user = order.user_id, "delivered order has no buyer row");
                return;
            }
            Err(e) => {
                self.record_partial_failure(
                    order.user_id,
                    format!("delivery commission for order {}: buyer read failed", order.id),
                    e,
                );
                return;
            }
        };
        let Some(referrer) = buyer.referred_by else {
            return;
        };

        let lock = self.user_lock(referrer);
        let _guard = lock.lock().unwrap();
        match commission::award_for_delivery(&self.store, &self.policy, &buyer, order) {
            Ok(AwardOutcome::Paid { referrer, amount }) => {
                info!(
                    order = order.id,
                    referrer,
                    amount = %amount,
                    "delivery commission paid"
                );
                self.set_commission_flag(order, true);
            }
            Ok(AwardOutcome::Duplicate { key }) => {
                // An entry exists but the flag was never set; repair the flag.
                warn!(order = order.id, key = %key, "duplicate delivery commission trigger ignored");
                self.set_commission_flag(order, true);
            }
            Ok(AwardOutcome::NoReferrer) => {}
            Err(e) => {
                self.record_partial_failure(
                    referrer,
                    format!("delivery commission for order {} owed to user {referrer}", order.id),
                    e,
                );
            }
        }
    }

    fn claw_back_delivery_commission(&self, order: &Order) {
        let referrer_lock = match self.store.user(order.user_id) {
            Ok(buyer) => buyer
                .and_then(|b| b.referred_by)
                .map(|referrer| self.user_lock(referrer)),
            Err(_) => None,
        };
        let _guard = referrer_lock.as_ref().map(|lock| lock.lock().unwrap());

        match commission::claw_back_for_order(&self.store, order) {
            Ok(Some((referrer, amount))) => {
                info!(
                    order = order.id,
                    referrer,
                    amount = %amount,
                    "delivery commission clawed back"
                );
                self.set_commission_flag(order, false);
            }
            Ok(None) => {
                warn!(
                    order = order.id,
                    "order flagged as awarded but no commission entry found"
                );
                self.record_reconciliation(
                    order.user_id,
                    format!("order {} awarded flag set without a commission entry", order.id),
                );
            }
            Err(e) => {
                self.record_partial_failure(
                    order.user_id,
                    format!("commission clawback for cancelled order {}", order.id),
                    e,
                );
            }
        }
    }

    /// Toggle `referral_commission_awarded` after a commission write. A
    /// failure here desynchronizes the flag from the ledger; it is logged and
    /// queued for reconciliation.
    fn set_commission_flag(&self, order: &Order, awarded: bool) {
        let mut updated = order.clone();
        updated.referral_commission_awarded = awarded;
        if let Err(e) = self.store.update_order(updated) {
            error!(order = order.id, reason = %e, "failed to update commission flag");
            self.record_reconciliation(
                order.user_id,
                format!("order {} commission flag out of sync with ledger", order.id),
            );
        }
    }

    /// A dependent commission write failed after the triggering write had
    /// committed. The primary operation still reports success; the lost
    /// commission is surfaced to operators through a reconciliation task.
    fn record_partial_failure(&self, user: UserId, context: String, err: StoreError) {
        warn!(user, reason = %err, context = %context, "commission write failed after primary commit");
        self.record_reconciliation(user, context);
    }

    fn record_reconciliation(&self, user: UserId, reason: String) {
        let task = ReconciliationTask {
            user_id: user,
            reason,
        };
        if let Err(e) = self.store.insert_reconciliation_task(task) {
            error!(user, reason = %e, "failed to record reconciliation task");
        }
    }
}

/// Update the cached earnings rollup and tier after a cashback-ledger write.
/// Withdrawals and orders never touch the rollup: it is a tier-eligibility
/// signal, not the spendable balance.
pub(crate) fn rollup_earnings<S: TransactionStore>(
    store: &S,
    user: UserId,
    delta: Amount,
) -> Result<(), StoreError> {
    let Some(mut row) = store.user(user)? else {
        return Ok(());
    };
    row.monthly_earnings += delta;
    row.level = Tier::for_monthly_earnings(row.monthly_earnings);
    store.update_user(row)
}
