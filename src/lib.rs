pub mod amount;
pub mod balance;
pub mod csv;
pub mod engine;
pub mod model;
pub mod store;

pub use amount::Amount;
pub use balance::BalanceBreakdown;
pub use engine::{CommissionPolicy, Engine, EngineError};
pub use model::{Operation, OrderId, UserId, WithdrawalId};
