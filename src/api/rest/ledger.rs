use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::ranking::{self, RankedUser, Timeframe};
use crate::engine::ledger;
use crate::error::AppError;
use crate::models::ledger::{LedgerTransaction, TransactionSource};
use crate::state::AppState;

const MAX_LEADERBOARD_LIMIT: usize = 100;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ledger/transactions", get(list_transactions))
        .route("/ledger/balance", get(balance))
        .route("/ledger/adjustments", post(create_adjustment))
        .route("/leaderboard", get(leaderboard))
}

#[derive(Deserialize)]
pub struct UserQuery {
    pub user_id: Uuid,
}

async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Json<Vec<LedgerTransaction>> {
    Json(ledger::transactions_of(&state, query.user_id))
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balance: i64,
}

async fn balance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Json<BalanceResponse> {
    Json(BalanceResponse {
        user_id: query.user_id,
        balance: ledger::balance_of(&state, query.user_id),
    })
}

#[derive(Deserialize)]
pub struct AdjustmentRequest {
    pub user_id: Uuid,
    pub delta: i64,
    pub description: String,
}

async fn create_adjustment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AdjustmentRequest>,
) -> Result<Json<LedgerTransaction>, AppError> {
    if payload.delta == 0 {
        return Err(AppError::validation("delta", "must be nonzero"));
    }

    let tx = if payload.delta > 0 {
        ledger::credit(
            &state,
            payload.user_id,
            payload.delta,
            TransactionSource::AdminAdjustment,
            payload.description,
        )?
    } else {
        ledger::debit(
            &state,
            payload.user_id,
            -payload.delta,
            TransactionSource::AdminAdjustment,
            payload.description,
        )?
    };

    Ok(Json(tx))
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_timeframe() -> String {
    "all".to_string()
}

fn default_limit() -> usize {
    10
}

async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<RankedUser>>, AppError> {
    let timeframe = Timeframe::parse(&query.timeframe)?;
    let limit = query.limit.min(MAX_LEADERBOARD_LIMIT);

    Ok(Json(ranking::top_users(&state, timeframe, limit)))
}
