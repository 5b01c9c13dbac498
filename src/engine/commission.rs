//! Referral commission awards and clawbacks.
//!
//! Commissions are ordinary cashback ledger entries credited to the
//! referrer, tagged with a [`CommissionSource`] block. Every write carries a
//! deterministic idempotency key derived from its triggering event, so a
//! retried trigger becomes a logged no-op instead of a double-pay.

use crate::Amount;
use crate::model::{CommissionSource, Order, OrderId, SourceType, TxId, User, UserId};
use crate::store::{NewCashback, StoreError, TransactionStore};

/// Default referral rate: 10%.
pub const DEFAULT_RATE_BPS: u32 = 1_000;

/// Account tag carried by commission ledger entries.
const REFERRAL_ACCOUNT: &str = "referral";

/// Referral commission rate, in basis points of the triggering amount.
#[derive(Debug, Clone, Copy)]
pub struct CommissionPolicy {
    rate_bps: u32,
}

impl CommissionPolicy {
    pub fn new(rate_bps: u32) -> Self {
        Self { rate_bps }
    }

    pub fn from_percent(percent: f64) -> Self {
        Self::new((percent * 100.0).round() as u32)
    }

    /// Commission owed for a triggering amount, rounded at the cent.
    pub fn commission_for(&self, amount: Amount) -> Amount {
        amount.percent_of(self.rate_bps)
    }
}

impl Default for CommissionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_BPS)
    }
}

/// What an award attempt did, for caller logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardOutcome {
    Paid { referrer: UserId, amount: Amount },
    /// The triggering user has no referrer; nothing owed.
    NoReferrer,
    /// An entry with the same idempotency key already exists.
    Duplicate { key: String },
}

pub(crate) fn cashback_key(tx: TxId, referrer: UserId) -> String {
    format!("cashback:{tx}:{referrer}")
}

pub(crate) fn delivery_key(order: OrderId) -> String {
    format!("order-delivered:{order}")
}

pub(crate) fn clawback_key(order: OrderId) -> String {
    format!("order-cancelled:{order}")
}

/// Award the referrer their cut of a manual cashback entry `tx` credited to
/// `beneficiary`.
pub(crate) fn award_for_cashback<S: TransactionStore>(
    store: &S,
    policy: &CommissionPolicy,
    beneficiary: &User,
    tx: TxId,
    amount: Amount,
) -> Result<AwardOutcome, StoreError> {
    let Some(referrer) = beneficiary.referred_by else {
        return Ok(AwardOutcome::NoReferrer);
    };

    let key = cashback_key(tx, referrer);
    if store.commission_by_key(&key)?.is_some() {
        return Ok(AwardOutcome::Duplicate { key });
    }

    let bonus = policy.commission_for(amount);
    store.insert_cashback(NewCashback {
        user_id: referrer,
        account_id: REFERRAL_ACCOUNT.into(),
        broker: String::new(),
        amount: bonus,
        source: Some(CommissionSource {
            source_type: SourceType::Cashback,
            source_user_id: beneficiary.id,
            idempotency_key: key,
        }),
    })?;
    super::rollup_earnings(store, referrer, bonus)?;

    Ok(AwardOutcome::Paid {
        referrer,
        amount: bonus,
    })
}

/// Award the referrer their cut of a delivered order placed by `buyer`.
///
/// The caller gates on `order.referral_commission_awarded`; the idempotency
/// key is a second line of defense against a repeated trigger.
pub(crate) fn award_for_delivery<S: TransactionStore>(
    store: &S,
    policy: &CommissionPolicy,
    buyer: &User,
    order: &Order,
) -> Result<AwardOutcome, StoreError> {
    let Some(referrer) = buyer.referred_by else {
        return Ok(AwardOutcome::NoReferrer);
    };

    let key = delivery_key(order.id);
    if store.commission_by_key(&key)?.is_some() {
        return Ok(AwardOutcome::Duplicate { key });
    }

    let bonus = policy.commission_for(order.price);
    store.insert_cashback(NewCashback {
        user_id: referrer,
        account_id: REFERRAL_ACCOUNT.into(),
        broker: String::new(),
        amount: bonus,
        source: Some(CommissionSource {
            source_type: SourceType::StorePurchase,
            source_user_id: buyer.id,
            idempotency_key: key,
        }),
    })?;
    super::rollup_earnings(store, referrer, bonus)?;

    Ok(AwardOutcome::Paid {
        referrer,
        amount: bonus,
    })
}

/// Reverse a delivered-order commission with an equal-and-opposite entry.
///
/// The amount is negated from the original award looked up by its key, not
/// recomputed, so a policy change between award and clawback cannot leave a
/// residue. Returns the referrer and reversed amount, or `None` when there
/// is nothing to reverse.
pub(crate) fn claw_back_for_order<S: TransactionStore>(
    store: &S,
    order: &Order,
) -> Result<Option<(UserId, Amount)>, StoreError> {
    let Some(original) = store.commission_by_key(&delivery_key(order.id))? else {
        return Ok(None);
    };

    let key = clawback_key(order.id);
    if store.commission_by_key(&key)?.is_some() {
        return Ok(None);
    }

    let referrer = original.user_id;
    store.insert_cashback(NewCashback {
        user_id: referrer,
        account_id: REFERRAL_ACCOUNT.into(),
        broker: String::new(),
        amount: -original.amount,
        source: Some(CommissionSource {
            source_type: SourceType::StorePurchase,
            source_user_id: order.user_id,
            idempotency_key: key,
        }),
    })?;
    super::rollup_earnings(store, referrer, -original.amount)?;

    Ok(Some((referrer, original.amount)))
}
