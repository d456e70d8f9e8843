use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::{bins, ledger, routes};
use crate::error::AppError;
use crate::models::bin::Bin;
use crate::models::ledger::{LedgerTransaction, TransactionSource};
use crate::models::report::{
    CollectionReport, ReportOutcome, WasteBreakdown, WasteUnit, WeatherSnapshot,
};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct ReportInput {
    pub bin_id: Uuid,
    pub collector_id: Uuid,
    pub fill_level_after: u8,
    pub waste_volume: f64,
    pub waste_unit: WasteUnit,
    pub breakdown: WasteBreakdown,
    pub outcome: ReportOutcome,
    pub notes: Option<String>,
    pub issue_notes: Option<String>,
    pub weather: Option<WeatherSnapshot>,
    pub photo_before: Option<String>,
    pub photo_after: Option<String>,
    pub duration_minutes: Option<u32>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntakeOutcome {
    pub report: CollectionReport,
    pub bin: Bin,
    pub ledger_transaction: Option<LedgerTransaction>,
}

/// Single write path for collector field data: validate, then append the
/// report, apply the bin outcome, mark the route stop, and credit the
/// collector as one unit. Nothing persists when any check fails.
pub fn submit_report(state: &AppState, input: ReportInput) -> Result<IntakeOutcome, AppError> {
    let started = Instant::now();
    let outcome = input.outcome;
    let result = submit_inner(state, input);

    let elapsed = started.elapsed().as_secs_f64();
    let label = if result.is_ok() { "success" } else { "error" };
    state
        .metrics
        .intake_latency_seconds
        .with_label_values(&[label])
        .observe(elapsed);
    match &result {
        Ok(_) => state
            .metrics
            .reports_total
            .with_label_values(&[outcome.as_str()])
            .inc(),
        Err(_) => state
            .metrics
            .reports_total
            .with_label_values(&["rejected"])
            .inc(),
    }

    result
}

fn submit_inner(state: &AppState, input: ReportInput) -> Result<IntakeOutcome, AppError> {
    // a replayed idempotency key returns the original report untouched
    if let Some(key) = &input.idempotency_key {
        if let Some(entry) = state.intake_keys.get(key) {
            let report_id = *entry;
            drop(entry);

            let report = state
                .reports
                .get(&report_id)
                .map(|r| r.clone())
                .ok_or_else(|| {
                    AppError::Internal("idempotency key points at a missing report".to_string())
                })?;
            let bin = state
                .bins
                .get(&report.bin_id)
                .map(|b| b.clone())
                .ok_or_else(|| AppError::NotFound(format!("bin {} not found", report.bin_id)))?;

            return Ok(IntakeOutcome {
                report,
                bin,
                ledger_transaction: None,
            });
        }
    }

    validate(state, &input)?;

    let now = Utc::now();
    let report_id = Uuid::new_v4();

    let (report, bin, tx) = {
        let mut bin = state
            .bins
            .get_mut(&input.bin_id)
            .ok_or_else(|| AppError::NotFound(format!("bin {} not found", input.bin_id)))?;

        let event = bins::collection_event(input.outcome);
        if bins::next_state(bin.status, event).is_none() {
            return Err(AppError::StateTransition(format!(
                "bin {}: {} does not accept {}",
                bin.id,
                bin.status.as_str(),
                event.as_str()
            )));
        }

        let route_id = state.active_route_by_bin.get(&input.bin_id).map(|r| *r);
        let mut route_guard = match route_id {
            Some(rid) => {
                let guard = state.routes.get_mut(&rid).ok_or_else(|| {
                    AppError::Internal(format!("active route {rid} is missing"))
                })?;
                routes::ensure_stop_open(&guard, input.bin_id, input.outcome)?;
                Some(guard)
            }
            None => None,
        };

        // every check has passed; the writes below are one unit under the
        // bin and route guards
        let fill_level_before = bin.fill_level;
        bins::apply_collection_outcome(
            state,
            &mut bin,
            input.fill_level_after,
            input.outcome,
            input.collector_id,
            input.issue_notes.clone(),
        )?;

        if let Some(route) = route_guard.as_deref_mut() {
            routes::close_stop(route, input.bin_id, input.outcome);
        }

        let report = CollectionReport {
            id: report_id,
            bin_id: input.bin_id,
            route_id,
            collector_id: input.collector_id,
            fill_level_before,
            fill_level_after: input.fill_level_after,
            waste_volume: input.waste_volume,
            waste_unit: input.waste_unit,
            breakdown: input.breakdown,
            outcome: input.outcome,
            notes: input.notes.clone(),
            issue_notes: input.issue_notes.clone(),
            weather: input.weather.clone(),
            photo_before: input.photo_before.clone(),
            photo_after: input.photo_after.clone(),
            reported_at: now,
            duration_minutes: input.duration_minutes,
        };
        state.reports.insert(report_id, report.clone());

        let tx = if input.outcome == ReportOutcome::Completed && state.policy.collection_points > 0
        {
            Some(ledger::credit(
                state,
                input.collector_id,
                state.policy.collection_points,
                TransactionSource::ReportSubmission,
                format!("collected bin {}", input.bin_id),
            )?)
        } else {
            None
        };

        if let Some(key) = &input.idempotency_key {
            state.intake_keys.insert(key.clone(), report_id);
        }

        (report, bin.clone(), tx)
    };

    state.notify(
        Some(input.collector_id),
        "Report recorded",
        format!("bin {} {}", input.bin_id, report.outcome.as_str()),
    );
    info!(
        report_id = %report.id,
        bin_id = %input.bin_id,
        outcome = report.outcome.as_str(),
        "collection report recorded"
    );

    Ok(IntakeOutcome {
        report,
        bin,
        ledger_transaction: tx,
    })
}

fn validate(state: &AppState, input: &ReportInput) -> Result<(), AppError> {
    if input.fill_level_after > 100 {
        return Err(AppError::validation(
            "fill_level_after",
            "must be within 0..=100",
        ));
    }
    if !input.waste_volume.is_finite() || input.waste_volume <= 0.0 {
        return Err(AppError::validation("waste_volume", "must be positive"));
    }

    let b = &input.breakdown;
    for (field, value) in [
        ("organic", b.organic),
        ("recyclable", b.recyclable),
        ("non_recyclable", b.non_recyclable),
        ("hazardous", b.hazardous),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(AppError::validation(field, "must be non-negative"));
        }
    }
    if b.total() > input.waste_volume + 1e-9 {
        return Err(AppError::validation(
            "breakdown",
            "parts exceed the reported volume",
        ));
    }

    if state.policy.require_report_photos {
        if input.photo_before.as_deref().is_none_or(str::is_empty) {
            return Err(AppError::validation("photo_before", "photo reference required"));
        }
        if input.photo_after.as_deref().is_none_or(str::is_empty) {
            return Err(AppError::validation("photo_after", "photo reference required"));
        }
    }

    Ok(())
}
