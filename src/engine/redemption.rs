use chrono::Utc;
use rand::Rng;
use tracing::info;
use uuid::Uuid;

use crate::engine::ledger;
use crate::error::AppError;
use crate::models::ledger::TransactionSource;
use crate::models::reward::{RedemptionStatus, RewardRedemption};
use crate::state::AppState;

/// 0/O and 1/I are excluded so codes survive being read aloud or retyped.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Claims a fresh code in the global issued set. A collision regenerates,
/// bounded by the configured retry limit.
fn mint_code(state: &AppState) -> Result<String, AppError> {
    for _ in 0..state.policy.code_retry_limit {
        let code = generate_code(state.policy.code_length);
        if state.issued_codes.insert(code.clone()) {
            return Ok(code);
        }
    }
    Err(AppError::Conflict(
        "could not allocate a unique redemption code".to_string(),
    ))
}

/// Spends ledger balance against catalog inventory and mints a single-use
/// code. Debit, stock decrement, and redemption creation are one unit under
/// the item entry guard; any failure leaves all three untouched.
pub fn redeem(
    state: &AppState,
    user_id: Uuid,
    reward_item_id: Uuid,
    idempotency_key: Option<String>,
) -> Result<RewardRedemption, AppError> {
    if let Some(key) = &idempotency_key {
        if let Some(entry) = state.redeem_keys.get(key) {
            let redemption_id = *entry;
            drop(entry);

            return state
                .redemptions
                .get(&redemption_id)
                .map(|r| r.clone().resolved(Utc::now()))
                .ok_or_else(|| {
                    AppError::Internal("idempotency key points at a missing redemption".to_string())
                });
        }
    }

    let result = redeem_inner(state, user_id, reward_item_id, idempotency_key);
    let label = if result.is_ok() { "success" } else { "rejected" };
    state
        .metrics
        .redemptions_total
        .with_label_values(&[label])
        .inc();

    result
}

fn redeem_inner(
    state: &AppState,
    user_id: Uuid,
    reward_item_id: Uuid,
    idempotency_key: Option<String>,
) -> Result<RewardRedemption, AppError> {
    let now = Utc::now();

    let mut item = state
        .reward_items
        .get_mut(&reward_item_id)
        .ok_or_else(|| AppError::NotFound(format!("reward item {reward_item_id} not found")))?;

    if !item.active {
        return Err(AppError::NotFound(format!(
            "reward item {reward_item_id} not found"
        )));
    }
    if now < item.valid_from {
        return Err(AppError::Expired(format!(
            "reward item {} is not yet valid",
            item.name
        )));
    }
    if now > item.valid_until {
        return Err(AppError::Expired(format!(
            "reward item {} is past its validity window",
            item.name
        )));
    }
    if item.remaining_quantity == 0 {
        return Err(AppError::OutOfStock(item.name.clone()));
    }

    // mint before the debit: the unclaimed code is the only thing to roll
    // back, and everything after a successful debit is infallible
    let code = mint_code(state)?;
    let tx = match ledger::debit(
        state,
        user_id,
        item.points_cost,
        TransactionSource::Redemption,
        item.name.clone(),
    ) {
        Ok(tx) => tx,
        Err(err) => {
            state.issued_codes.remove(&code);
            return Err(err);
        }
    };

    if !item.unlimited() {
        item.remaining_quantity -= 1;
    }

    let redemption = RewardRedemption {
        id: Uuid::new_v4(),
        user_id,
        reward_item_id,
        code,
        status: RedemptionStatus::Active,
        expires_at: item.valid_until,
        redeemed_at: now,
        used_at: None,
    };
    state.redemptions.insert(redemption.id, redemption.clone());
    if let Some(key) = idempotency_key {
        state.redeem_keys.insert(key, redemption.id);
    }

    info!(
        user_id = %user_id,
        item = %item.name,
        transaction_id = %tx.id,
        remaining = item.remaining_quantity,
        "redemption issued"
    );
    state.notify(
        Some(user_id),
        "Reward redeemed",
        format!("{}: code {}", item.name, redemption.code),
    );

    Ok(redemption)
}

/// External redemption event: a code is presented and consumed.
pub fn mark_used(state: &AppState, redemption_id: Uuid) -> Result<RewardRedemption, AppError> {
    let mut redemption = state
        .redemptions
        .get_mut(&redemption_id)
        .ok_or_else(|| AppError::NotFound(format!("redemption {redemption_id} not found")))?;

    let now = Utc::now();
    match redemption.resolved_status(now) {
        RedemptionStatus::Expired => Err(AppError::Expired(format!(
            "redemption {redemption_id} has expired"
        ))),
        RedemptionStatus::Used => Err(AppError::StateTransition(format!(
            "redemption {redemption_id} was already used"
        ))),
        RedemptionStatus::Active => {
            redemption.status = RedemptionStatus::Used;
            redemption.used_at = Some(now);
            Ok(redemption.clone())
        }
    }
}

/// Newest-first, with expiry resolved lazily against the stored snapshot.
pub fn redemptions_of(state: &AppState, user_id: Uuid) -> Vec<RewardRedemption> {
    let now = Utc::now();
    let mut list: Vec<RewardRedemption> = state
        .redemptions
        .iter()
        .filter(|entry| entry.value().user_id == user_id)
        .map(|entry| entry.value().clone().resolved(now))
        .collect();
    list.sort_by(|a, b| b.redeemed_at.cmp(&a.redeemed_at).then(a.id.cmp(&b.id)));
    list
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{mark_used, redeem, redemptions_of};
    use crate::engine::ledger;
    use crate::models::ledger::TransactionSource;
    use crate::models::reward::{RedemptionStatus, RewardCategory, RewardItem};
    use crate::state::{AppState, RewardPolicy};

    fn test_state() -> AppState {
        AppState::new(RewardPolicy::default(), 16)
    }

    fn seed_item(state: &AppState, points_cost: i64, remaining: i64) -> Uuid {
        let id = Uuid::new_v4();
        state.reward_items.insert(
            id,
            RewardItem {
                id,
                name: "Transit pass".to_string(),
                description: "One-day transit pass".to_string(),
                category: RewardCategory::Voucher,
                points_cost,
                valid_from: Utc::now() - Duration::days(1),
                valid_until: Utc::now() + Duration::days(30),
                total_quantity: if remaining == -1 { -1 } else { remaining },
                remaining_quantity: remaining,
                active: true,
                display_order: 1,
                terms: None,
            },
        );
        id
    }

    fn fund(state: &AppState, user: Uuid, amount: i64) {
        ledger::credit(
            state,
            user,
            amount,
            TransactionSource::AdminAdjustment,
            "seed".to_string(),
        )
        .unwrap();
    }

    #[test]
    fn redeem_debits_decrements_and_mints_a_code() {
        let state = test_state();
        let user = Uuid::new_v4();
        let item = seed_item(&state, 40, 3);
        fund(&state, user, 100);

        let redemption = redeem(&state, user, item, None).unwrap();

        assert_eq!(redemption.status, RedemptionStatus::Active);
        assert_eq!(redemption.code.len(), 10);
        assert_eq!(ledger::balance_of(&state, user), 60);
        assert_eq!(state.reward_items.get(&item).unwrap().remaining_quantity, 2);
    }

    #[test]
    fn insufficient_balance_leaves_everything_untouched() {
        let state = test_state();
        let user = Uuid::new_v4();
        let item = seed_item(&state, 100, 5);
        fund(&state, user, 50);

        let err = redeem(&state, user, item, None).unwrap_err();

        assert_eq!(err.code(), "insufficient_balance");
        assert_eq!(ledger::balance_of(&state, user), 50);
        assert_eq!(state.reward_items.get(&item).unwrap().remaining_quantity, 5);
        assert!(state.redemptions.is_empty());
        assert!(state.issued_codes.is_empty());
    }

    #[test]
    fn out_of_stock_and_expired_windows_are_rejected() {
        let state = test_state();
        let user = Uuid::new_v4();
        fund(&state, user, 500);

        let sold_out = seed_item(&state, 10, 0);
        assert_eq!(redeem(&state, user, sold_out, None).unwrap_err().code(), "out_of_stock");

        let stale = seed_item(&state, 10, 5);
        state.reward_items.get_mut(&stale).unwrap().valid_until = Utc::now() - Duration::days(1);
        assert_eq!(redeem(&state, user, stale, None).unwrap_err().code(), "expired");

        let early = seed_item(&state, 10, 5);
        state.reward_items.get_mut(&early).unwrap().valid_from = Utc::now() + Duration::days(1);
        assert_eq!(redeem(&state, user, early, None).unwrap_err().code(), "expired");

        let hidden = seed_item(&state, 10, 5);
        state.reward_items.get_mut(&hidden).unwrap().active = false;
        assert_eq!(redeem(&state, user, hidden, None).unwrap_err().code(), "not_found");

        assert_eq!(ledger::balance_of(&state, user), 500);
    }

    #[tokio::test]
    async fn two_redemptions_for_the_last_unit_leave_exactly_one_winner() {
        let state = Arc::new(test_state());
        let item = seed_item(&state, 10, 1);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        fund(&state, alice, 100);
        fund(&state, bob, 100);

        let a = {
            let state = state.clone();
            tokio::spawn(async move { redeem(&state, alice, item, None) })
        };
        let b = {
            let state = state.clone();
            tokio::spawn(async move { redeem(&state, bob, item, None) })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert_eq!(state.reward_items.get(&item).unwrap().remaining_quantity, 0);

        let loser = results.iter().find(|r| r.is_err()).unwrap();
        assert_eq!(loser.as_ref().unwrap_err().code(), "out_of_stock");
    }

    #[tokio::test]
    async fn two_redemptions_against_one_balance_leave_exactly_one_winner() {
        let state = Arc::new(test_state());
        let item = seed_item(&state, 60, -1);
        let user = Uuid::new_v4();
        fund(&state, user, 100);

        let a = {
            let state = state.clone();
            tokio::spawn(async move { redeem(&state, user, item, None) })
        };
        let b = {
            let state = state.clone();
            tokio::spawn(async move { redeem(&state, user, item, None) })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert_eq!(ledger::balance_of(&state, user), 40);
    }

    #[test]
    fn unlimited_items_never_run_out() {
        let state = test_state();
        let user = Uuid::new_v4();
        let item = seed_item(&state, 1, -1);
        fund(&state, user, 100);

        for _ in 0..50 {
            redeem(&state, user, item, None).unwrap();
        }

        assert_eq!(state.reward_items.get(&item).unwrap().remaining_quantity, -1);
    }

    #[test]
    fn every_issued_code_is_distinct() {
        let state = test_state();
        let user = Uuid::new_v4();
        let item = seed_item(&state, 1, -1);
        fund(&state, user, 200);

        let mut codes = HashSet::new();
        for _ in 0..100 {
            let redemption = redeem(&state, user, item, None).unwrap();
            assert!(codes.insert(redemption.code));
        }
    }

    #[test]
    fn exhausted_code_space_fails_cleanly_before_the_debit() {
        let policy = RewardPolicy {
            code_length: 1,
            code_retry_limit: 4,
            ..RewardPolicy::default()
        };
        let state = AppState::new(policy, 16);
        let user = Uuid::new_v4();
        let item = seed_item(&state, 1, -1);
        fund(&state, user, 1000);

        // claim the entire one-character space
        for c in "ABCDEFGHJKLMNPQRSTUVWXYZ23456789".chars() {
            state.issued_codes.insert(c.to_string());
        }

        let err = redeem(&state, user, item, None).unwrap_err();
        assert_eq!(err.code(), "conflict");
        assert_eq!(ledger::balance_of(&state, user), 1000);
        assert!(state.redemptions.is_empty());
    }

    #[test]
    fn replayed_idempotency_key_returns_the_original_redemption() {
        let state = test_state();
        let user = Uuid::new_v4();
        let item = seed_item(&state, 10, 5);
        fund(&state, user, 100);

        let key = Some("retry-9".to_string());
        let first = redeem(&state, user, item, key.clone()).unwrap();
        let replay = redeem(&state, user, item, key).unwrap();

        assert_eq!(first.id, replay.id);
        assert_eq!(ledger::balance_of(&state, user), 90);
        assert_eq!(state.reward_items.get(&item).unwrap().remaining_quantity, 4);
    }

    #[test]
    fn stored_active_redemption_reads_back_expired_after_its_window() {
        let state = test_state();
        let user = Uuid::new_v4();
        let item = seed_item(&state, 10, 5);
        fund(&state, user, 100);

        let redemption = redeem(&state, user, item, None).unwrap();
        state
            .redemptions
            .get_mut(&redemption.id)
            .unwrap()
            .expires_at = Utc::now() - Duration::hours(1);

        let listed = redemptions_of(&state, user);
        assert_eq!(listed[0].status, RedemptionStatus::Expired);
        // the stored record still says active; only reads resolve it
        assert_eq!(
            state.redemptions.get(&redemption.id).unwrap().status,
            RedemptionStatus::Active
        );

        let err = mark_used(&state, redemption.id).unwrap_err();
        assert_eq!(err.code(), "expired");
    }

    #[test]
    fn a_code_is_single_use() {
        let state = test_state();
        let user = Uuid::new_v4();
        let item = seed_item(&state, 10, 5);
        fund(&state, user, 100);

        let redemption = redeem(&state, user, item, None).unwrap();
        let used = mark_used(&state, redemption.id).unwrap();
        assert_eq!(used.status, RedemptionStatus::Used);
        assert!(used.used_at.is_some());

        let err = mark_used(&state, redemption.id).unwrap_err();
        assert_eq!(err.code(), "state_transition");
    }
}
