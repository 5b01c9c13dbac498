//! Seam to the transactional store holding the ledger tables.
//!
//! The store is an external collaborator: it owns no logic, just durable
//! rows reachable through simple CRUD calls. Every call can fail with a
//! retryable [`StoreError`]; callers must propagate it and never treat a
//! failed read as a zero balance.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::Amount;
use crate::model::{
    CashbackTransaction, CommissionSource, Order, OrderId, OrderStatus, Product, ProductId,
    ReconciliationTask, TxId, User, UserId, Withdrawal, WithdrawalId, WithdrawalStatus,
};

/// Failure talking to the underlying store. All variants are retryable.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Fields of a cashback ledger entry before the store assigns id and
/// timestamp.
#[derive(Debug, Clone)]
pub struct NewCashback {
    pub user_id: UserId,
    pub account_id: String,
    pub broker: String,
    pub amount: Amount,
    pub source: Option<CommissionSource>,
}

/// CRUD surface over the ledger tables, one row per entity. Balance is never
/// persisted; it is always derived on read.
pub trait TransactionStore {
    fn insert_user(&self, user: User) -> Result<(), StoreError>;
    fn user(&self, id: UserId) -> Result<Option<User>, StoreError>;
    /// Overwrite a user row (rollup / tier updates).
    fn update_user(&self, user: User) -> Result<(), StoreError>;
    /// All user rows, for dashboards and reports.
    fn users(&self) -> Result<Vec<User>, StoreError>;

    /// Append an immutable ledger entry; the store assigns id and timestamp.
    fn insert_cashback(&self, entry: NewCashback) -> Result<TxId, StoreError>;
    fn cashback_for_user(&self, user: UserId) -> Result<Vec<CashbackTransaction>, StoreError>;
    /// Look up a commission entry by its idempotency key.
    fn commission_by_key(&self, key: &str) -> Result<Option<CashbackTransaction>, StoreError>;

    /// Insert a withdrawal in `Processing`; the store assigns the id.
    fn insert_withdrawal(
        &self,
        user: UserId,
        amount: Amount,
        payment_method: String,
        details: String,
    ) -> Result<WithdrawalId, StoreError>;
    fn withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>, StoreError>;
    fn withdrawals_for_user(&self, user: UserId) -> Result<Vec<Withdrawal>, StoreError>;
    fn update_withdrawal(&self, withdrawal: Withdrawal) -> Result<(), StoreError>;

    /// Insert an order in `Pending`; the store assigns the id.
    fn insert_order(
        &self,
        user: UserId,
        product: ProductId,
        price: Amount,
        delivery_info: String,
    ) -> Result<OrderId, StoreError>;
    fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;
    fn orders_for_user(&self, user: UserId) -> Result<Vec<Order>, StoreError>;
    fn update_order(&self, order: Order) -> Result<(), StoreError>;

    fn insert_product(&self, product: Product) -> Result<(), StoreError>;
    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;
    /// Conditional write: decrement stock only while `stock > 0`. Returns
    /// whether a unit was taken; a missing product counts as no stock.
    fn decrement_stock(&self, id: ProductId) -> Result<bool, StoreError>;

    fn insert_reconciliation_task(&self, task: ReconciliationTask) -> Result<(), StoreError>;
    fn reconciliation_tasks(&self) -> Result<Vec<ReconciliationTask>, StoreError>;
}

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    cashback: Vec<CashbackTransaction>,
    withdrawals: HashMap<WithdrawalId, Withdrawal>,
    orders: HashMap<OrderId, Order>,
    products: HashMap<ProductId, Product>,
    reconciliation: Vec<ReconciliationTask>,
    next_tx_id: TxId,
    next_withdrawal_id: WithdrawalId,
    next_order_id: OrderId,
}

/// Reference in-memory store, used by the replay binary, tests, and benches.
/// A single table-set mutex stands in for the store's transaction scope.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_unix() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

impl TransactionStore for MemoryStore {
    fn insert_user(&self, user: User) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        tables.users.insert(user.id, user);
        Ok(())
    }

    fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.users.get(&id).cloned())
    }

    fn update_user(&self, user: User) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        tables.users.insert(user.id, user);
        Ok(())
    }

    fn users(&self) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.users.values().cloned().collect())
    }

    fn insert_cashback(&self, entry: NewCashback) -> Result<TxId, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        tables.next_tx_id += 1;
        let id = tables.next_tx_id;
        tables.cashback.push(CashbackTransaction {
            id,
            user_id: entry.user_id,
            account_id: entry.account_id,
            broker: entry.broker,
            amount: entry.amount,
            recorded_at: Self::now_unix(),
            source: entry.source,
        });
        Ok(id)
    }

    fn cashback_for_user(&self, user: UserId) -> Result<Vec<CashbackTransaction>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .cashback
            .iter()
            .filter(|tx| tx.user_id == user)
            .cloned()
            .collect())
    }

    fn commission_by_key(&self, key: &str) -> Result<Option<CashbackTransaction>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .cashback
            .iter()
            .find(|tx| {
                tx.source
                    .as_ref()
                    .is_some_and(|s| s.idempotency_key == key)
            })
            .cloned())
    }

    fn insert_withdrawal(
        &self,
        user: UserId,
        amount: Amount,
        payment_method: String,
        details: String,
    ) -> Result<WithdrawalId, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        tables.next_withdrawal_id += 1;
        let id = tables.next_withdrawal_id;
        tables.withdrawals.insert(
            id,
            Withdrawal {
                id,
                user_id: user,
                amount,
                status: WithdrawalStatus::Processing,
                payment_method,
                details,
                previous_details: Vec::new(),
                tx_id: None,
                rejection_reason: None,
            },
        );
        Ok(id)
    }

    fn withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.withdrawals.get(&id).cloned())
    }

    fn withdrawals_for_user(&self, user: UserId) -> Result<Vec<Withdrawal>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .withdrawals
            .values()
            .filter(|w| w.user_id == user)
            .cloned()
            .collect())
    }

    fn update_withdrawal(&self, withdrawal: Withdrawal) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        tables.withdrawals.insert(withdrawal.id, withdrawal);
        Ok(())
    }

    fn insert_order(
        &self,
        user: UserId,
        product: ProductId,
        price: Amount,
        delivery_info: String,
    ) -> Result<OrderId, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        tables.next_order_id += 1;
        let id = tables.next_order_id;
        tables.orders.insert(
            id,
            Order {
                id,
                user_id: user,
                product_id: product,
                price,
                status: OrderStatus::Pending,
                delivery_info,
                referral_commission_awarded: false,
            },
        );
        Ok(id)
    }

    fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.orders.get(&id).cloned())
    }

    fn orders_for_user(&self, user: UserId) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .orders
            .values()
            .filter(|o| o.user_id == user)
            .cloned()
            .collect())
    }

    fn update_order(&self, order: Order) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        tables.orders.insert(order.id, order);
        Ok(())
    }

    fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        tables.products.insert(product.id, product);
        Ok(())
    }

    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.products.get(&id).cloned())
    }

    fn decrement_stock(&self, id: ProductId) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        match tables.products.get_mut(&id) {
            Some(product) if product.stock > 0 => {
                product.stock -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn insert_reconciliation_task(&self, task: ReconciliationTask) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        tables.reconciliation.push(task);
        Ok(())
    }

    fn reconciliation_tasks(&self) -> Result<Vec<ReconciliationTask>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.reconciliation.clone())
    }
}
