use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::redemption;
use crate::error::AppError;
use crate::models::reward::{RewardCategory, RewardItem, RewardRedemption};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reward-items", post(create_item).get(list_items))
        .route("/reward-items/:id", put(update_item))
        .route("/reward-items/:id/redeem", post(redeem))
        .route("/redemptions", get(list_redemptions))
        .route("/redemptions/:id/use", post(use_redemption))
}

#[derive(Deserialize)]
pub struct CreateRewardItemRequest {
    pub name: String,
    pub description: String,
    pub category: RewardCategory,
    pub points_cost: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub total_quantity: i64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub display_order: u32,
    pub terms: Option<String>,
}

fn default_active() -> bool {
    true
}

fn validate_item_fields(
    name: &str,
    points_cost: i64,
    total_quantity: i64,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::validation("name", "cannot be empty"));
    }
    if points_cost <= 0 {
        return Err(AppError::validation("points_cost", "must be positive"));
    }
    if total_quantity != -1 && total_quantity <= 0 {
        return Err(AppError::validation(
            "total_quantity",
            "must be positive, or -1 for unlimited",
        ));
    }
    if valid_until <= valid_from {
        return Err(AppError::validation(
            "valid_until",
            "must be after valid_from",
        ));
    }
    Ok(())
}

async fn create_item(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRewardItemRequest>,
) -> Result<Json<RewardItem>, AppError> {
    validate_item_fields(
        &payload.name,
        payload.points_cost,
        payload.total_quantity,
        payload.valid_from,
        payload.valid_until,
    )?;

    let item = RewardItem {
        id: Uuid::new_v4(),
        name: payload.name,
        description: payload.description,
        category: payload.category,
        points_cost: payload.points_cost,
        valid_from: payload.valid_from,
        valid_until: payload.valid_until,
        total_quantity: payload.total_quantity,
        remaining_quantity: payload.total_quantity,
        active: payload.active,
        display_order: payload.display_order,
        terms: payload.terms,
    };

    state.reward_items.insert(item.id, item.clone());
    Ok(Json(item))
}

#[derive(Deserialize)]
pub struct UpdateRewardItemRequest {
    pub name: String,
    pub description: String,
    pub category: RewardCategory,
    pub points_cost: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub total_quantity: i64,
    pub active: bool,
    pub display_order: u32,
    pub terms: Option<String>,
}

async fn update_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRewardItemRequest>,
) -> Result<Json<RewardItem>, AppError> {
    validate_item_fields(
        &payload.name,
        payload.points_cost,
        payload.total_quantity,
        payload.valid_from,
        payload.valid_until,
    )?;

    let mut item = state
        .reward_items
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("reward item {id} not found")))?;

    // restocking shifts the remaining count by the same delta, keeping
    // 0 <= remaining <= total for finite stock
    item.remaining_quantity = if payload.total_quantity == -1 {
        -1
    } else if item.unlimited() {
        payload.total_quantity
    } else {
        (item.remaining_quantity + (payload.total_quantity - item.total_quantity))
            .clamp(0, payload.total_quantity)
    };

    item.name = payload.name;
    item.description = payload.description;
    item.category = payload.category;
    item.points_cost = payload.points_cost;
    item.valid_from = payload.valid_from;
    item.valid_until = payload.valid_until;
    item.total_quantity = payload.total_quantity;
    item.active = payload.active;
    item.display_order = payload.display_order;
    item.terms = payload.terms;

    Ok(Json(item.clone()))
}

#[derive(Deserialize)]
pub struct ListItemsQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

async fn list_items(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListItemsQuery>,
) -> Json<Vec<RewardItem>> {
    let mut items: Vec<RewardItem> = state
        .reward_items
        .iter()
        .filter(|entry| query.include_inactive || entry.value().active)
        .map(|entry| entry.value().clone())
        .collect();
    items.sort_by(|a, b| {
        a.display_order
            .cmp(&b.display_order)
            .then_with(|| a.name.cmp(&b.name))
    });

    Json(items)
}

#[derive(Deserialize)]
pub struct RedeemRequest {
    pub user_id: Uuid,
    pub idempotency_key: Option<String>,
}

async fn redeem(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RedeemRequest>,
) -> Result<Json<RewardRedemption>, AppError> {
    let redemption = redemption::redeem(&state, payload.user_id, id, payload.idempotency_key)?;
    Ok(Json(redemption))
}

#[derive(Deserialize)]
pub struct ListRedemptionsQuery {
    pub user_id: Uuid,
}

async fn list_redemptions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRedemptionsQuery>,
) -> Json<Vec<RewardRedemption>> {
    Json(redemption::redemptions_of(&state, query.user_id))
}

async fn use_redemption(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RewardRedemption>, AppError> {
    let redemption = redemption::mark_used(&state, id)?;
    Ok(Json(redemption))
}
