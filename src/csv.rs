//! CSV surface for the replay binary: an operations file in, a per-user
//! balance report out.
//!
//! Input rows are `op,user,entity,amount,extra`; the meaning of `entity` and
//! `extra` depends on the op (see [`read_operations`]). Orders and
//! withdrawals are assigned sequential ids in creation order, so later rows
//! can reference them.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::balance::BalanceBreakdown;
use crate::model::{Operation, OrderStatus, UserId};
use crate::Amount;

/// Errors that can occur when parsing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized operation '{op}'")]
    UnrecognizedOp { line: usize, op: String },

    #[error("line {line}: {op} missing {column}")]
    MissingColumn {
        line: usize,
        op: &'static str,
        column: &'static str,
    },

    #[error("line {line}: {op} has non-numeric {column} '{value}'")]
    BadNumber {
        line: usize,
        op: &'static str,
        column: &'static str,
        value: String,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    user: Option<UserId>,
    entity: Option<String>,
    amount: Option<f64>,
    extra: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    user: UserId,
    total_earned: String,
    completed_withdrawals: String,
    pending_withdrawals: String,
    order_spend: String,
    available: String,
}

/// Read operations from a csv file.
///
/// Per-op columns:
/// - `register`: `user`, optional `entity` = referrer id
/// - `product`: `entity` = product id, `amount` = price, `extra` = stock
/// - `cashback`: `user`, `entity` = trading account, `amount`, `extra` = broker
/// - `withdraw`: `user`, `amount`, `extra` = payment method
/// - `order`: `user`, `entity` = product id, `extra` = delivery info
/// - `ship` / `deliver` / `cancel`: `entity` = order id
/// - `approve`: `entity` = withdrawal id, `extra` = external tx reference
/// - `reject`: `entity` = withdrawal id, `extra` = reason
pub fn read_operations(
    path: impl AsRef<Path>,
) -> impl Iterator<Item = Result<Operation, CsvError>> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .expect("failed to open csv file");

    reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_row(line, row)
        })
}

fn parse_row(line: usize, row: InputRow) -> Result<Operation, CsvError> {
    let op_name = row.op.as_str();
    match op_name {
        "register" => {
            let user = require_user(line, "register", row.user)?;
            let referred_by = match row.entity.as_deref().filter(|e| !e.is_empty()) {
                Some(referrer) => Some(parse_number(line, "register", "entity", referrer)?),
                None => None,
            };
            Ok(Operation::Register { user, referred_by })
        }
        "product" => {
            let product =
                parse_number(line, "product", "entity", require_entity(line, "product", &row)?)?;
            let price = require_amount(line, "product", row.amount)?;
            let stock = match row.extra.as_deref().filter(|e| !e.is_empty()) {
                Some(stock) => parse_number(line, "product", "extra", stock)?,
                None => {
                    return Err(CsvError::MissingColumn {
                        line,
                        op: "product",
                        column: "extra (stock)",
                    });
                }
            };
            Ok(Operation::AddProduct {
                product,
                price,
                stock,
            })
        }
        "cashback" => Ok(Operation::RecordCashback {
            user: require_user(line, "cashback", row.user)?,
            account_id: require_entity(line, "cashback", &row)?.to_string(),
            broker: row.extra.unwrap_or_default(),
            amount: require_amount(line, "cashback", row.amount)?,
        }),
        "withdraw" => Ok(Operation::RequestWithdrawal {
            user: require_user(line, "withdraw", row.user)?,
            amount: require_amount(line, "withdraw", row.amount)?,
            payment_method: row.extra.unwrap_or_default(),
            details: row.entity.unwrap_or_default(),
        }),
        "order" => Ok(Operation::PlaceOrder {
            user: require_user(line, "order", row.user)?,
            product: parse_number(line, "order", "entity", require_entity(line, "order", &row)?)?,
            delivery_info: row.extra.unwrap_or_default(),
        }),
        "ship" | "deliver" | "cancel" => {
            let status = match op_name {
                "ship" => OrderStatus::Shipped,
                "deliver" => OrderStatus::Delivered,
                _ => OrderStatus::Cancelled,
            };
            let order =
                parse_number(line, "order status", "entity", require_entity(line, "order status", &row)?)?;
            Ok(Operation::SetOrderStatus { order, status })
        }
        "approve" => Ok(Operation::ApproveWithdrawal {
            withdrawal: parse_number(
                line,
                "approve",
                "entity",
                require_entity(line, "approve", &row)?,
            )?,
            tx_id: row.extra.unwrap_or_default(),
        }),
        "reject" => Ok(Operation::RejectWithdrawal {
            withdrawal: parse_number(
                line,
                "reject",
                "entity",
                require_entity(line, "reject", &row)?,
            )?,
            reason: row.extra.unwrap_or_default(),
        }),
        other => Err(CsvError::UnrecognizedOp {
            line,
            op: other.to_string(),
        }),
    }
}

fn require_user(line: usize, op: &'static str, user: Option<UserId>) -> Result<UserId, CsvError> {
    user.ok_or(CsvError::MissingColumn {
        line,
        op,
        column: "user",
    })
}

fn require_amount(line: usize, op: &'static str, amount: Option<f64>) -> Result<Amount, CsvError> {
    amount.map(Amount::from_float).ok_or(CsvError::MissingColumn {
        line,
        op,
        column: "amount",
    })
}

fn require_entity<'a>(line: usize, op: &'static str, row: &'a InputRow) -> Result<&'a str, CsvError> {
    row.entity
        .as_deref()
        .filter(|e| !e.is_empty())
        .ok_or(CsvError::MissingColumn {
            line,
            op,
            column: "entity",
        })
}

fn parse_number<T: std::str::FromStr>(
    line: usize,
    op: &'static str,
    column: &'static str,
    value: &str,
) -> Result<T, CsvError> {
    value.parse().map_err(|_| CsvError::BadNumber {
        line,
        op,
        column,
        value: value.to_string(),
    })
}

/// write per-user balance breakdowns to stdout in csv format
pub fn write_balances(balances: impl IntoIterator<Item = (UserId, BalanceBreakdown)>) {
    let stdout = io::stdout();
    let mut writer = csv::Writer::from_writer(stdout.lock());

    for (user, breakdown) in balances {
        let row = OutputRow {
            user,
            total_earned: breakdown.total_earned.to_string(),
            completed_withdrawals: breakdown.completed_withdrawals.to_string(),
            pending_withdrawals: breakdown.pending_withdrawals.to_string(),
            order_spend: breakdown.total_spent_on_orders.to_string(),
            available: breakdown.available_balance.to_string(),
        };
        writer.serialize(&row).expect("failed to write csv row");
    }

    writer.flush().expect("failed to flush csv writer");
}
