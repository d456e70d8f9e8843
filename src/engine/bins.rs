use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::ledger;
use crate::error::AppError;
use crate::models::bin::{Bin, BinStatus, GeoPoint, HistoryEntry};
use crate::models::ledger::{LedgerTransaction, TransactionSource};
use crate::models::report::ReportOutcome;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinEvent {
    Report,
    AssignToRoute,
    CollectionCompleted,
    CollectionDelayed,
    CollectionSkipped,
    Overflow,
    FillLevelFull,
    ReturnToService,
}

impl BinEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinEvent::Report => "report",
            BinEvent::AssignToRoute => "assign_to_route",
            BinEvent::CollectionCompleted => "collection_completed",
            BinEvent::CollectionDelayed => "collection_delayed",
            BinEvent::CollectionSkipped => "collection_skipped",
            BinEvent::Overflow => "overflow",
            BinEvent::FillLevelFull => "fill_level_full",
            BinEvent::ReturnToService => "return_to_service",
        }
    }
}

/// The bin lifecycle as an explicit edge set. Any (state, event) pair not
/// listed here is rejected with `StateTransition`.
const TRANSITIONS: &[(BinStatus, BinEvent, BinStatus)] = &[
    (BinStatus::Available, BinEvent::Report, BinStatus::Reported),
    (BinStatus::Full, BinEvent::Report, BinStatus::Reported),
    (BinStatus::Available, BinEvent::FillLevelFull, BinStatus::Full),
    (BinStatus::Reported, BinEvent::AssignToRoute, BinStatus::InProgress),
    (BinStatus::Full, BinEvent::AssignToRoute, BinStatus::InProgress),
    (
        BinStatus::InProgress,
        BinEvent::CollectionCompleted,
        BinStatus::Collected,
    ),
    (
        BinStatus::Overflow,
        BinEvent::CollectionCompleted,
        BinStatus::Collected,
    ),
    (
        BinStatus::InProgress,
        BinEvent::CollectionDelayed,
        BinStatus::Reported,
    ),
    (
        BinStatus::InProgress,
        BinEvent::CollectionSkipped,
        BinStatus::Full,
    ),
    (BinStatus::Available, BinEvent::Overflow, BinStatus::Overflow),
    (BinStatus::Full, BinEvent::Overflow, BinStatus::Overflow),
    (BinStatus::Reported, BinEvent::Overflow, BinStatus::Overflow),
    (BinStatus::InProgress, BinEvent::Overflow, BinStatus::Overflow),
    (
        BinStatus::Collected,
        BinEvent::ReturnToService,
        BinStatus::Available,
    ),
];

pub fn next_state(current: BinStatus, event: BinEvent) -> Option<BinStatus> {
    TRANSITIONS
        .iter()
        .find(|(state, ev, _)| *state == current && *ev == event)
        .map(|(_, _, next)| *next)
}

/// Applies one table edge to a bin held under its entry guard: status,
/// history entry, gauge, trace. Rejections leave the bin untouched.
fn transition(
    state: &AppState,
    bin: &mut Bin,
    event: BinEvent,
    note: Option<String>,
    collector_id: Option<Uuid>,
) -> Result<(), AppError> {
    let Some(next) = next_state(bin.status, event) else {
        return Err(AppError::StateTransition(format!(
            "bin {}: {} does not accept {}",
            bin.id,
            bin.status.as_str(),
            event.as_str()
        )));
    };

    let now = Utc::now();
    state
        .metrics
        .bin_status_moved(Some(bin.status.as_str()), next.as_str());
    state
        .metrics
        .bin_transitions_total
        .with_label_values(&[event.as_str()])
        .inc();

    bin.status = next;
    bin.updated_at = now;
    bin.history.push(HistoryEntry {
        timestamp: now,
        fill_level: bin.fill_level,
        status: next,
        note,
        collector_id,
    });

    debug!(bin_id = %bin.id, event = event.as_str(), status = next.as_str(), "bin transition");
    Ok(())
}

/// Resident report path. A report flagging overflow, or one arriving when
/// the fill level already crossed the overflow threshold, escalates instead
/// of the plain `reported` edge. Credits the reporter once per state change.
pub fn report(
    state: &AppState,
    bin_id: Uuid,
    reporter_id: Uuid,
    note: Option<String>,
    coordinates: Option<GeoPoint>,
    overflow: bool,
) -> Result<(Bin, Option<LedgerTransaction>), AppError> {
    let (bin, changed) = {
        let mut bin = state
            .bins
            .get_mut(&bin_id)
            .ok_or_else(|| AppError::NotFound(format!("bin {bin_id} not found")))?;

        let escalate = overflow || bin.fill_level >= state.policy.overflow_threshold;
        let changed = if escalate {
            if bin.status == BinStatus::Overflow {
                false
            } else {
                transition(state, &mut bin, BinEvent::Overflow, note, None)?;
                true
            }
        } else {
            transition(state, &mut bin, BinEvent::Report, note, None)?;
            true
        };

        (bin.clone(), changed)
    };

    if let Some(coords) = coordinates {
        debug!(bin_id = %bin_id, lat = coords.lat, lng = coords.lng, "reporter coordinates");
    }

    let tx = if changed && state.policy.report_points > 0 {
        Some(ledger::credit(
            state,
            reporter_id,
            state.policy.report_points,
            TransactionSource::ReportSubmission,
            format!("reported bin {bin_id}"),
        )?)
    } else {
        None
    };

    state.notify(
        Some(reporter_id),
        "Report received",
        format!("bin {bin_id} is now {}", bin.status.as_str()),
    );
    info!(bin_id = %bin_id, reporter_id = %reporter_id, status = bin.status.as_str(), "bin reported");

    Ok((bin, tx))
}

/// Idempotent escalation; only `collected` bins reject it.
pub fn mark_overflow(state: &AppState, bin_id: Uuid) -> Result<Bin, AppError> {
    let mut bin = state
        .bins
        .get_mut(&bin_id)
        .ok_or_else(|| AppError::NotFound(format!("bin {bin_id} not found")))?;

    if bin.status == BinStatus::Overflow {
        return Ok(bin.clone());
    }

    transition(state, &mut bin, BinEvent::Overflow, None, None)?;
    Ok(bin.clone())
}

/// Sensor/admin fill update. Crossing the configured thresholds drives the
/// `full` and `overflow` edges; below them only the level is stored.
pub fn update_fill_level(state: &AppState, bin_id: Uuid, level: u8) -> Result<Bin, AppError> {
    if level > 100 {
        return Err(AppError::validation("level", "must be within 0..=100"));
    }

    let mut bin = state
        .bins
        .get_mut(&bin_id)
        .ok_or_else(|| AppError::NotFound(format!("bin {bin_id} not found")))?;

    bin.fill_level = level;
    bin.updated_at = Utc::now();

    if level >= state.policy.overflow_threshold {
        if bin.status != BinStatus::Overflow && bin.status != BinStatus::Collected {
            transition(state, &mut bin, BinEvent::Overflow, None, None)?;
        }
    } else if level >= state.policy.full_threshold && bin.status == BinStatus::Available {
        transition(state, &mut bin, BinEvent::FillLevelFull, None, None)?;
    }

    Ok(bin.clone())
}

pub(crate) fn collection_event(outcome: ReportOutcome) -> BinEvent {
    match outcome {
        ReportOutcome::Completed => BinEvent::CollectionCompleted,
        ReportOutcome::Delayed => BinEvent::CollectionDelayed,
        ReportOutcome::Skipped => BinEvent::CollectionSkipped,
    }
}

/// Registry half of report intake. The caller holds the bin entry guard and
/// has already verified the edge exists, so this cannot fail after the
/// re-check; a rejected outcome leaves the fill level untouched.
pub(crate) fn apply_collection_outcome(
    state: &AppState,
    bin: &mut Bin,
    fill_level_after: u8,
    outcome: ReportOutcome,
    collector_id: Uuid,
    note: Option<String>,
) -> Result<(), AppError> {
    let event = collection_event(outcome);
    if next_state(bin.status, event).is_none() {
        return Err(AppError::StateTransition(format!(
            "bin {}: {} does not accept {}",
            bin.id,
            bin.status.as_str(),
            event.as_str()
        )));
    }

    bin.fill_level = fill_level_after;
    transition(state, bin, event, note, Some(collector_id))
}

/// Route assignment edge; membership claims are handled by the route
/// tracker before this is called.
pub(crate) fn assign_to_route(state: &AppState, bin_id: Uuid) -> Result<BinStatus, AppError> {
    let mut bin = state
        .bins
        .get_mut(&bin_id)
        .ok_or_else(|| AppError::NotFound(format!("bin {bin_id} not found")))?;

    let previous = bin.status;
    transition(state, &mut bin, BinEvent::AssignToRoute, None, None)?;
    Ok(previous)
}

/// Unwinds a just-applied route assignment when route creation aborts
/// part-way. Skips bins that moved on in the meantime (e.g. to overflow).
pub(crate) fn revert_route_assignment(state: &AppState, bin_id: Uuid, previous: BinStatus) {
    if let Some(mut bin) = state.bins.get_mut(&bin_id) {
        if bin.status == BinStatus::InProgress {
            bin.history.pop();
            state
                .metrics
                .bin_status_moved(Some(BinStatus::InProgress.as_str()), previous.as_str());
            bin.status = previous;
            bin.updated_at = Utc::now();
        }
    }
}

/// Cycle edge: collected bins go back into service when their route closes.
pub(crate) fn return_to_service(state: &AppState, bin_id: Uuid) {
    if let Some(mut bin) = state.bins.get_mut(&bin_id) {
        if bin.status == BinStatus::Collected {
            let _ = transition(
                state,
                &mut bin,
                BinEvent::ReturnToService,
                Some("route closed".to_string()),
                None,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{next_state, BinEvent};
    use crate::engine::{bins, ledger};
    use crate::models::bin::{Bin, BinStatus, GeoPoint, Priority, WasteType};
    use crate::state::{AppState, RewardPolicy};

    fn test_state() -> AppState {
        AppState::new(RewardPolicy::default(), 16)
    }

    fn seed_bin(state: &AppState, status: BinStatus, fill_level: u8) -> Uuid {
        let id = Uuid::new_v4();
        state.bins.insert(
            id,
            Bin {
                id,
                address: "12 Canal St".to_string(),
                location: GeoPoint {
                    lat: 52.52,
                    lng: 13.405,
                },
                fill_level,
                capacity_liters: 240,
                waste_type: WasteType::General,
                priority: Priority::Normal,
                status,
                history: Vec::new(),
                schedule: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        );
        id
    }

    #[test]
    fn table_rejects_unlisted_edges() {
        assert!(next_state(BinStatus::Available, BinEvent::CollectionCompleted).is_none());
        assert!(next_state(BinStatus::Collected, BinEvent::Report).is_none());
        assert!(next_state(BinStatus::Collected, BinEvent::Overflow).is_none());
        assert!(next_state(BinStatus::Overflow, BinEvent::AssignToRoute).is_none());
        assert!(next_state(BinStatus::Overflow, BinEvent::CollectionDelayed).is_none());
        assert!(next_state(BinStatus::Reported, BinEvent::Report).is_none());
    }

    #[test]
    fn table_follows_the_collection_cycle() {
        assert_eq!(
            next_state(BinStatus::Available, BinEvent::FillLevelFull),
            Some(BinStatus::Full)
        );
        assert_eq!(
            next_state(BinStatus::Full, BinEvent::Report),
            Some(BinStatus::Reported)
        );
        assert_eq!(
            next_state(BinStatus::Reported, BinEvent::AssignToRoute),
            Some(BinStatus::InProgress)
        );
        assert_eq!(
            next_state(BinStatus::InProgress, BinEvent::CollectionCompleted),
            Some(BinStatus::Collected)
        );
        assert_eq!(
            next_state(BinStatus::Collected, BinEvent::ReturnToService),
            Some(BinStatus::Available)
        );
    }

    #[test]
    fn report_moves_full_bin_to_reported_and_credits_reporter() {
        let state = test_state();
        let bin_id = seed_bin(&state, BinStatus::Full, 90);
        let reporter = Uuid::new_v4();

        let (bin, tx) = bins::report(&state, bin_id, reporter, None, None, false).unwrap();

        assert_eq!(bin.status, BinStatus::Reported);
        assert_eq!(bin.history.len(), 1);
        let tx = tx.unwrap();
        assert_eq!(tx.delta, 10);
        assert_eq!(ledger::balance_of(&state, reporter), 10);
    }

    #[test]
    fn report_from_in_progress_is_rejected_and_leaves_bin_untouched() {
        let state = test_state();
        let bin_id = seed_bin(&state, BinStatus::InProgress, 40);
        let reporter = Uuid::new_v4();

        let err = bins::report(&state, bin_id, reporter, None, None, false).unwrap_err();
        assert_eq!(err.code(), "state_transition");

        let bin = state.bins.get(&bin_id).unwrap();
        assert_eq!(bin.status, BinStatus::InProgress);
        assert!(bin.history.is_empty());
        assert_eq!(ledger::balance_of(&state, reporter), 0);
    }

    #[test]
    fn report_above_overflow_threshold_escalates() {
        let state = test_state();
        let bin_id = seed_bin(&state, BinStatus::Full, 99);
        let reporter = Uuid::new_v4();

        let (bin, tx) = bins::report(&state, bin_id, reporter, None, None, false).unwrap();

        assert_eq!(bin.status, BinStatus::Overflow);
        assert!(tx.is_some());
    }

    #[test]
    fn repeated_overflow_report_does_not_credit_twice() {
        let state = test_state();
        let bin_id = seed_bin(&state, BinStatus::Full, 50);
        let reporter = Uuid::new_v4();

        bins::report(&state, bin_id, reporter, None, None, true).unwrap();
        let (bin, tx) = bins::report(&state, bin_id, reporter, None, None, true).unwrap();

        assert_eq!(bin.status, BinStatus::Overflow);
        assert!(tx.is_none());
        assert_eq!(ledger::balance_of(&state, reporter), 10);
    }

    #[test]
    fn mark_overflow_is_idempotent() {
        let state = test_state();
        let bin_id = seed_bin(&state, BinStatus::Reported, 60);

        let first = bins::mark_overflow(&state, bin_id).unwrap();
        let second = bins::mark_overflow(&state, bin_id).unwrap();

        assert_eq!(first.status, BinStatus::Overflow);
        assert_eq!(second.status, BinStatus::Overflow);
        assert_eq!(second.history.len(), 1);
    }

    #[test]
    fn mark_overflow_rejects_collected_bin() {
        let state = test_state();
        let bin_id = seed_bin(&state, BinStatus::Collected, 0);

        let err = bins::mark_overflow(&state, bin_id).unwrap_err();
        assert_eq!(err.code(), "state_transition");
    }

    #[test]
    fn fill_update_crosses_full_and_overflow_thresholds() {
        let state = test_state();
        let bin_id = seed_bin(&state, BinStatus::Available, 10);

        let bin = bins::update_fill_level(&state, bin_id, 50).unwrap();
        assert_eq!(bin.status, BinStatus::Available);

        let bin = bins::update_fill_level(&state, bin_id, 85).unwrap();
        assert_eq!(bin.status, BinStatus::Full);

        let bin = bins::update_fill_level(&state, bin_id, 98).unwrap();
        assert_eq!(bin.status, BinStatus::Overflow);
    }

    #[test]
    fn fill_update_rejects_out_of_range_level() {
        let state = test_state();
        let bin_id = seed_bin(&state, BinStatus::Available, 10);

        let err = bins::update_fill_level(&state, bin_id, 101).unwrap_err();
        assert_eq!(err.code(), "validation");

        let bin = state.bins.get(&bin_id).unwrap();
        assert_eq!(bin.fill_level, 10);
    }
}
