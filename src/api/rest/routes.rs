use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::routes;
use crate::error::AppError;
use crate::models::ledger::LedgerTransaction;
use crate::models::route::Route;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/routes", post(create_route).get(list_routes))
        .route("/routes/:id", get(get_route))
        .route("/routes/:id/start", post(start_route))
        .route("/routes/:id/close", post(close_route))
}

#[derive(Deserialize)]
pub struct CreateRouteRequest {
    pub collector_id: Uuid,
    pub bin_ids: Vec<Uuid>,
    pub scheduled_date: NaiveDate,
}

async fn create_route(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRouteRequest>,
) -> Result<Json<Route>, AppError> {
    let route = routes::create_route(
        &state,
        payload.collector_id,
        payload.bin_ids,
        payload.scheduled_date,
    )?;
    Ok(Json(route))
}

#[derive(Deserialize)]
pub struct ListRoutesQuery {
    pub collector_id: Option<Uuid>,
}

async fn list_routes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRoutesQuery>,
) -> Json<Vec<Route>> {
    Json(routes::routes_of(&state, query.collector_id))
}

async fn get_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Route>, AppError> {
    let route = state
        .routes
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("route {id} not found")))?;

    Ok(Json(route.value().clone()))
}

#[derive(Deserialize)]
pub struct StartRouteRequest {
    pub collector_id: Uuid,
}

async fn start_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StartRouteRequest>,
) -> Result<Json<Route>, AppError> {
    let route = routes::start_route(&state, id, payload.collector_id)?;
    Ok(Json(route))
}

#[derive(Serialize)]
pub struct CloseRouteResponse {
    pub route: Route,
    pub ledger_transaction: Option<LedgerTransaction>,
}

async fn close_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CloseRouteResponse>, AppError> {
    let (route, ledger_transaction) = routes::close_route(&state, id)?;
    Ok(Json(CloseRouteResponse {
        route,
        ledger_transaction,
    }))
}
