use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::intake::{self, IntakeOutcome, ReportInput};
use crate::error::AppError;
use crate::models::report::{
    CollectionReport, ReportOutcome, WasteBreakdown, WasteUnit, WeatherSnapshot,
};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/reports", post(submit_report).get(list_reports))
}

#[derive(Deserialize)]
pub struct SubmitReportRequest {
    pub bin_id: Uuid,
    pub collector_id: Uuid,
    pub fill_level_after: u8,
    pub waste_volume: f64,
    pub waste_unit: WasteUnit,
    pub waste_categories: WasteBreakdown,
    pub status: ReportOutcome,
    pub notes: Option<String>,
    pub issue_notes: Option<String>,
    pub weather: Option<WeatherSnapshot>,
    pub photo_before: Option<String>,
    pub photo_after: Option<String>,
    pub duration_minutes: Option<u32>,
    pub idempotency_key: Option<String>,
}

async fn submit_report(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitReportRequest>,
) -> Result<Json<IntakeOutcome>, AppError> {
    let outcome = intake::submit_report(
        &state,
        ReportInput {
            bin_id: payload.bin_id,
            collector_id: payload.collector_id,
            fill_level_after: payload.fill_level_after,
            waste_volume: payload.waste_volume,
            waste_unit: payload.waste_unit,
            breakdown: payload.waste_categories,
            outcome: payload.status,
            notes: payload.notes,
            issue_notes: payload.issue_notes,
            weather: payload.weather,
            photo_before: payload.photo_before,
            photo_after: payload.photo_after,
            duration_minutes: payload.duration_minutes,
            idempotency_key: payload.idempotency_key,
        },
    )?;

    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct ListReportsQuery {
    pub bin_id: Option<Uuid>,
}

async fn list_reports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListReportsQuery>,
) -> Json<Vec<CollectionReport>> {
    let mut reports: Vec<CollectionReport> = state
        .reports
        .iter()
        .filter(|entry| query.bin_id.is_none_or(|id| entry.value().bin_id == id))
        .map(|entry| entry.value().clone())
        .collect();
    reports.sort_by(|a, b| b.reported_at.cmp(&a.reported_at).then(a.id.cmp(&b.id)));

    Json(reports)
}
