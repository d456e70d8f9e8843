use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::bins;
use crate::error::AppError;
use crate::geo;
use crate::models::bin::{Bin, BinStatus, CollectionSchedule, GeoPoint, Priority, WasteType};
use crate::models::ledger::LedgerTransaction;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bins", post(create_bin).get(list_bins))
        .route("/bins/nearby", get(nearby_bins))
        .route("/bins/:id", get(get_bin))
        .route("/bins/:id/report", post(report_bin))
        .route("/bins/:id/overflow", post(mark_overflow))
        .route("/bins/:id/fill", patch(update_fill))
}

#[derive(Deserialize)]
pub struct CreateBinRequest {
    pub address: String,
    pub location: GeoPoint,
    pub capacity_liters: u32,
    pub waste_type: WasteType,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    pub schedule: Option<CollectionSchedule>,
}

fn default_priority() -> Priority {
    Priority::Normal
}

async fn create_bin(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateBinRequest>,
) -> Result<Json<Bin>, AppError> {
    if payload.address.trim().is_empty() {
        return Err(AppError::validation("address", "cannot be empty"));
    }
    if payload.capacity_liters == 0 {
        return Err(AppError::validation("capacity_liters", "must be > 0"));
    }

    let now = Utc::now();
    let bin = Bin {
        id: Uuid::new_v4(),
        address: payload.address,
        location: payload.location,
        fill_level: 0,
        capacity_liters: payload.capacity_liters,
        waste_type: payload.waste_type,
        priority: payload.priority,
        status: BinStatus::Available,
        history: Vec::new(),
        schedule: payload.schedule,
        created_at: now,
        updated_at: now,
    };

    state.metrics.bin_status_moved(None, bin.status.as_str());
    state.bins.insert(bin.id, bin.clone());
    Ok(Json(bin))
}

async fn list_bins(State(state): State<Arc<AppState>>) -> Json<Vec<Bin>> {
    let bins = state
        .bins
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(bins)
}

async fn get_bin(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Bin>, AppError> {
    let bin = state
        .bins
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("bin {id} not found")))?;

    Ok(Json(bin.value().clone()))
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    /// kilometers
    pub radius: f64,
}

async fn nearby_bins(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<Bin>>, AppError> {
    if !query.radius.is_finite() || query.radius <= 0.0 {
        return Err(AppError::validation("radius", "must be positive"));
    }
    if query.lat.abs() > 90.0 {
        return Err(AppError::validation("lat", "must be within -90..=90"));
    }
    if query.lng.abs() > 180.0 {
        return Err(AppError::validation("lng", "must be within -180..=180"));
    }

    let center = GeoPoint {
        lat: query.lat,
        lng: query.lng,
    };

    let mut bins: Vec<Bin> = state
        .bins
        .iter()
        .filter(|entry| geo::within_radius(&center, &entry.value().location, query.radius))
        .map(|entry| entry.value().clone())
        .collect();
    bins.sort_by(|a, b| {
        geo::haversine_km(&center, &a.location).total_cmp(&geo::haversine_km(&center, &b.location))
    });

    Ok(Json(bins))
}

#[derive(Deserialize)]
pub struct ReportBinRequest {
    pub reporter_id: Uuid,
    pub note: Option<String>,
    pub coordinates: Option<GeoPoint>,
    #[serde(default)]
    pub overflow: bool,
}

#[derive(Serialize)]
pub struct ReportBinResponse {
    pub bin: Bin,
    pub ledger_transaction: Option<LedgerTransaction>,
}

async fn report_bin(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReportBinRequest>,
) -> Result<Json<ReportBinResponse>, AppError> {
    let (bin, ledger_transaction) = bins::report(
        &state,
        id,
        payload.reporter_id,
        payload.note,
        payload.coordinates,
        payload.overflow,
    )?;

    Ok(Json(ReportBinResponse {
        bin,
        ledger_transaction,
    }))
}

async fn mark_overflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Bin>, AppError> {
    let bin = bins::mark_overflow(&state, id)?;
    Ok(Json(bin))
}

#[derive(Deserialize)]
pub struct UpdateFillRequest {
    pub level: u8,
}

async fn update_fill(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateFillRequest>,
) -> Result<Json<Bin>, AppError> {
    let bin = bins::update_fill_level(&state, id, payload.level)?;
    Ok(Json(bin))
}
