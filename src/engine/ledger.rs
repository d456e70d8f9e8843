use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::ledger::{LedgerTransaction, TransactionSource};
use crate::state::AppState;

/// Appends an earn transaction. The balance snapshot and the push happen
/// under the user's entry guard, so per-user order is submission order.
pub fn credit(
    state: &AppState,
    user_id: Uuid,
    amount: i64,
    source: TransactionSource,
    description: String,
) -> Result<LedgerTransaction, AppError> {
    if amount <= 0 {
        return Err(AppError::validation("amount", "must be positive"));
    }

    let tx = {
        let mut entry = state.ledgers.entry(user_id).or_default();
        let ledger = entry.value_mut();
        let balance_after = ledger.balance + amount;

        let tx = LedgerTransaction {
            id: Uuid::new_v4(),
            user_id,
            delta: amount,
            balance_after,
            source,
            description,
            created_at: Utc::now(),
        };

        ledger.balance = balance_after;
        ledger.transactions.push(tx.clone());
        tx
    };

    state.metrics.points_issued_total.inc_by(amount as u64);
    debug!(user_id = %user_id, delta = amount, balance = tx.balance_after, "ledger credit");
    Ok(tx)
}

/// Appends a spend transaction. The balance check and the append are one
/// atomic step; an insufficient balance writes nothing.
pub fn debit(
    state: &AppState,
    user_id: Uuid,
    amount: i64,
    source: TransactionSource,
    description: String,
) -> Result<LedgerTransaction, AppError> {
    if amount <= 0 {
        return Err(AppError::validation("amount", "must be positive"));
    }

    let tx = {
        let mut entry = state.ledgers.entry(user_id).or_default();
        let ledger = entry.value_mut();

        if ledger.balance < amount {
            return Err(AppError::InsufficientBalance {
                required: amount,
                available: ledger.balance,
            });
        }

        let balance_after = ledger.balance - amount;
        let tx = LedgerTransaction {
            id: Uuid::new_v4(),
            user_id,
            delta: -amount,
            balance_after,
            source,
            description,
            created_at: Utc::now(),
        };

        ledger.balance = balance_after;
        ledger.transactions.push(tx.clone());
        tx
    };

    state.metrics.points_spent_total.inc_by(amount as u64);
    debug!(user_id = %user_id, delta = -amount, balance = tx.balance_after, "ledger debit");
    Ok(tx)
}

pub fn balance_of(state: &AppState, user_id: Uuid) -> i64 {
    state
        .ledgers
        .get(&user_id)
        .map(|ledger| ledger.balance)
        .unwrap_or(0)
}

/// Newest-first transaction history.
pub fn transactions_of(state: &AppState, user_id: Uuid) -> Vec<LedgerTransaction> {
    state
        .ledgers
        .get(&user_id)
        .map(|ledger| ledger.transactions.iter().rev().cloned().collect())
        .unwrap_or_default()
}
