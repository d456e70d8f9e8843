use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{bins, ledger};
use crate::error::AppError;
use crate::models::bin::BinStatus;
use crate::models::ledger::{LedgerTransaction, TransactionSource};
use crate::models::report::ReportOutcome;
use crate::models::route::{Route, RouteStatus, RouteStop, StopState};
use crate::state::AppState;

fn release_claims(state: &AppState, route_id: Uuid, bin_ids: &[Uuid]) {
    for bin_id in bin_ids {
        state
            .active_route_by_bin
            .remove_if(bin_id, |_, claimed| *claimed == route_id);
    }
}

/// Groups bins under one collector. Claims every bin in the active-route
/// index first; any conflict, missing bin, or disallowed state unwinds the
/// claims (and any applied assignment edges) and leaves no residue.
pub fn create_route(
    state: &AppState,
    collector_id: Uuid,
    bin_ids: Vec<Uuid>,
    scheduled_date: NaiveDate,
) -> Result<Route, AppError> {
    if bin_ids.is_empty() {
        return Err(AppError::validation("bin_ids", "must not be empty"));
    }
    let mut seen = HashSet::new();
    for bin_id in &bin_ids {
        if !seen.insert(*bin_id) {
            return Err(AppError::validation("bin_ids", "contains duplicates"));
        }
    }

    let route_id = Uuid::new_v4();
    let mut claimed: Vec<Uuid> = Vec::new();

    for &bin_id in &bin_ids {
        let conflict = match state.active_route_by_bin.entry(bin_id) {
            Entry::Occupied(existing) => Some(*existing.get()),
            Entry::Vacant(slot) => {
                slot.insert(route_id);
                claimed.push(bin_id);
                None
            }
        };
        if let Some(other) = conflict {
            release_claims(state, route_id, &claimed);
            return Err(AppError::Conflict(format!(
                "bin {bin_id} is already on active route {other}"
            )));
        }

        let status = state.bins.get(&bin_id).map(|bin| bin.status);
        match status {
            None => {
                release_claims(state, route_id, &claimed);
                return Err(AppError::NotFound(format!("bin {bin_id} not found")));
            }
            Some(status) if bins::next_state(status, bins::BinEvent::AssignToRoute).is_none() => {
                release_claims(state, route_id, &claimed);
                return Err(AppError::StateTransition(format!(
                    "bin {bin_id}: {} does not accept {}",
                    status.as_str(),
                    bins::BinEvent::AssignToRoute.as_str()
                )));
            }
            Some(_) => {}
        }
    }

    // claims held; apply the assignment edge per bin, unwinding the ones
    // already applied if a bin slipped to another state since the precheck
    let mut assigned: Vec<(Uuid, BinStatus)> = Vec::new();
    for &bin_id in &bin_ids {
        match bins::assign_to_route(state, bin_id) {
            Ok(previous) => assigned.push((bin_id, previous)),
            Err(err) => {
                for &(id, previous) in &assigned {
                    bins::revert_route_assignment(state, id, previous);
                }
                release_claims(state, route_id, &claimed);
                warn!(route_id = %route_id, bin_id = %bin_id, "route creation aborted");
                return Err(err);
            }
        }
    }

    let route = Route {
        id: route_id,
        collector_id,
        status: RouteStatus::Pending,
        scheduled_date,
        started_at: None,
        completed_at: None,
        stops: bin_ids
            .iter()
            .map(|&bin_id| RouteStop {
                bin_id,
                state: StopState::Pending,
                completed_at: None,
            })
            .collect(),
    };
    state.routes.insert(route_id, route.clone());

    state.notify(
        Some(collector_id),
        "Route assigned",
        format!("route {route_id} with {} stops", route.stops.len()),
    );
    info!(route_id = %route_id, collector_id = %collector_id, stops = route.stops.len(), "route created");

    Ok(route)
}

pub fn start_route(state: &AppState, route_id: Uuid, collector_id: Uuid) -> Result<Route, AppError> {
    let mut route = state
        .routes
        .get_mut(&route_id)
        .ok_or_else(|| AppError::NotFound(format!("route {route_id} not found")))?;

    if route.collector_id != collector_id {
        return Err(AppError::Conflict(format!(
            "route {route_id} is assigned to another collector"
        )));
    }
    if route.status != RouteStatus::Pending {
        return Err(AppError::StateTransition(format!(
            "route {route_id} is already {}",
            route.status.as_str()
        )));
    }

    route.status = RouteStatus::InProgress;
    route.started_at = Some(Utc::now());
    info!(route_id = %route_id, "route started");

    Ok(route.clone())
}

/// Pre-check used by intake before it mutates anything. `delayed` outcomes
/// leave the stop open, so they only require membership.
pub(crate) fn ensure_stop_open(
    route: &Route,
    bin_id: Uuid,
    outcome: ReportOutcome,
) -> Result<(), AppError> {
    let stop = route
        .stop(bin_id)
        .ok_or_else(|| AppError::NotFound(format!("bin {bin_id} is not on route {}", route.id)))?;

    if outcome != ReportOutcome::Delayed && stop.state != StopState::Pending {
        return Err(AppError::StateTransition(format!(
            "bin {bin_id} is already closed on route {}",
            route.id
        )));
    }
    Ok(())
}

/// Marks a stop terminal after the registry applied the outcome. Callers
/// have run `ensure_stop_open`, so this never fails.
pub(crate) fn close_stop(route: &mut Route, bin_id: Uuid, outcome: ReportOutcome) {
    let terminal = match outcome {
        ReportOutcome::Completed => StopState::Collected,
        ReportOutcome::Skipped => StopState::Skipped,
        ReportOutcome::Delayed => return,
    };

    if let Some(stop) = route.stops.iter_mut().find(|s| s.bin_id == bin_id) {
        stop.state = terminal;
        stop.completed_at = Some(Utc::now());
    }
}

/// Closes a route once every stop is terminal: releases the bin claims,
/// returns collected bins to service, and credits the completion bonus.
pub fn close_route(
    state: &AppState,
    route_id: Uuid,
) -> Result<(Route, Option<LedgerTransaction>), AppError> {
    let (route, collected_bins, all_bins) = {
        let mut route = state
            .routes
            .get_mut(&route_id)
            .ok_or_else(|| AppError::NotFound(format!("route {route_id} not found")))?;

        if route.status == RouteStatus::Completed {
            return Err(AppError::StateTransition(format!(
                "route {route_id} is already completed"
            )));
        }
        let open = route.open_stops();
        if open > 0 {
            return Err(AppError::StateTransition(format!(
                "route {route_id} still has {open} open stops"
            )));
        }

        route.status = RouteStatus::Completed;
        route.completed_at = Some(Utc::now());

        let collected: Vec<Uuid> = route
            .stops
            .iter()
            .filter(|s| s.state == StopState::Collected)
            .map(|s| s.bin_id)
            .collect();
        let all: Vec<Uuid> = route.stops.iter().map(|s| s.bin_id).collect();

        (route.clone(), collected, all)
    };

    release_claims(state, route_id, &all_bins);
    for bin_id in &collected_bins {
        bins::return_to_service(state, *bin_id);
    }

    let tx = if !collected_bins.is_empty() && state.policy.route_bonus_points > 0 {
        Some(ledger::credit(
            state,
            route.collector_id,
            state.policy.route_bonus_points,
            TransactionSource::RouteCompletion,
            format!("completed route {route_id}"),
        )?)
    } else {
        None
    };

    state.notify(
        Some(route.collector_id),
        "Route completed",
        format!("route {route_id}: {} bins collected", collected_bins.len()),
    );
    info!(route_id = %route_id, collected = collected_bins.len(), "route closed");

    Ok((route, tx))
}

pub fn routes_of(state: &AppState, collector_id: Option<Uuid>) -> Vec<Route> {
    let mut routes: Vec<Route> = state
        .routes
        .iter()
        .filter(|entry| collector_id.is_none_or(|id| entry.value().collector_id == id))
        .map(|entry| entry.value().clone())
        .collect();
    routes.sort_by(|a, b| b.scheduled_date.cmp(&a.scheduled_date).then(a.id.cmp(&b.id)));
    routes
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    use crate::engine::{ledger, routes};
    use crate::models::bin::{Bin, BinStatus, GeoPoint, Priority, WasteType};
    use crate::models::route::{RouteStatus, StopState};
    use crate::state::{AppState, RewardPolicy};

    fn test_state() -> AppState {
        AppState::new(RewardPolicy::default(), 16)
    }

    fn seed_bin(state: &AppState, status: BinStatus) -> Uuid {
        let id = Uuid::new_v4();
        state.bins.insert(
            id,
            Bin {
                id,
                address: "7 Dock Rd".to_string(),
                location: GeoPoint {
                    lat: 48.85,
                    lng: 2.35,
                },
                fill_level: 85,
                capacity_liters: 360,
                waste_type: WasteType::Recyclable,
                priority: Priority::High,
                status,
                history: Vec::new(),
                schedule: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        );
        id
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    #[test]
    fn create_route_assigns_all_bins() {
        let state = test_state();
        let collector = Uuid::new_v4();
        let b1 = seed_bin(&state, BinStatus::Reported);
        let b2 = seed_bin(&state, BinStatus::Full);

        let route = routes::create_route(&state, collector, vec![b1, b2], date()).unwrap();

        assert_eq!(route.status, RouteStatus::Pending);
        assert_eq!(route.stops.len(), 2);
        assert_eq!(state.bins.get(&b1).unwrap().status, BinStatus::InProgress);
        assert_eq!(state.bins.get(&b2).unwrap().status, BinStatus::InProgress);
        assert_eq!(*state.active_route_by_bin.get(&b1).unwrap(), route.id);
    }

    #[test]
    fn bin_on_active_route_cannot_be_routed_again() {
        let state = test_state();
        let b1 = seed_bin(&state, BinStatus::Reported);
        let b2 = seed_bin(&state, BinStatus::Reported);

        routes::create_route(&state, Uuid::new_v4(), vec![b1], date()).unwrap();
        let err = routes::create_route(&state, Uuid::new_v4(), vec![b2, b1], date()).unwrap_err();

        assert_eq!(err.code(), "conflict");
        // the partially-claimed second route left nothing behind
        assert_eq!(state.bins.get(&b2).unwrap().status, BinStatus::Reported);
        assert!(state.active_route_by_bin.get(&b2).is_none());
    }

    #[test]
    fn route_with_unassignable_bin_leaves_no_residue() {
        let state = test_state();
        let good = seed_bin(&state, BinStatus::Reported);
        let bad = seed_bin(&state, BinStatus::Available);

        let err = routes::create_route(&state, Uuid::new_v4(), vec![good, bad], date()).unwrap_err();

        assert_eq!(err.code(), "state_transition");
        assert_eq!(state.bins.get(&good).unwrap().status, BinStatus::Reported);
        assert!(state.bins.get(&good).unwrap().history.is_empty());
        assert!(state.active_route_by_bin.get(&good).is_none());
        assert!(state.routes.is_empty());
    }

    #[test]
    fn duplicate_bin_ids_are_rejected() {
        let state = test_state();
        let b1 = seed_bin(&state, BinStatus::Reported);

        let err = routes::create_route(&state, Uuid::new_v4(), vec![b1, b1], date()).unwrap_err();
        assert_eq!(err.code(), "validation");
        assert!(state.active_route_by_bin.get(&b1).is_none());
    }

    #[test]
    fn only_the_assigned_collector_may_start() {
        let state = test_state();
        let collector = Uuid::new_v4();
        let b1 = seed_bin(&state, BinStatus::Reported);
        let route = routes::create_route(&state, collector, vec![b1], date()).unwrap();

        let err = routes::start_route(&state, route.id, Uuid::new_v4()).unwrap_err();
        assert_eq!(err.code(), "conflict");

        let started = routes::start_route(&state, route.id, collector).unwrap();
        assert_eq!(started.status, RouteStatus::InProgress);
        assert!(started.started_at.is_some());
    }

    #[test]
    fn close_rejects_open_stops() {
        let state = test_state();
        let b1 = seed_bin(&state, BinStatus::Reported);
        let route = routes::create_route(&state, Uuid::new_v4(), vec![b1], date()).unwrap();

        let err = routes::close_route(&state, route.id).unwrap_err();
        assert_eq!(err.code(), "state_transition");
        assert_eq!(state.routes.get(&route.id).unwrap().status, RouteStatus::Pending);
    }

    #[test]
    fn close_releases_bins_and_credits_the_bonus() {
        let state = test_state();
        let collector = Uuid::new_v4();
        let b1 = seed_bin(&state, BinStatus::Reported);
        let route = routes::create_route(&state, collector, vec![b1], date()).unwrap();

        {
            let mut stored = state.routes.get_mut(&route.id).unwrap();
            routes::close_stop(&mut stored, b1, crate::models::report::ReportOutcome::Completed);
        }
        {
            let mut bin = state.bins.get_mut(&b1).unwrap();
            bin.status = BinStatus::Collected;
            bin.fill_level = 0;
        }

        let (closed, tx) = routes::close_route(&state, route.id).unwrap();

        assert_eq!(closed.status, RouteStatus::Completed);
        assert_eq!(closed.stops[0].state, StopState::Collected);
        assert_eq!(state.bins.get(&b1).unwrap().status, BinStatus::Available);
        assert!(state.active_route_by_bin.get(&b1).is_none());
        assert_eq!(tx.unwrap().delta, 50);
        assert_eq!(ledger::balance_of(&state, collector), 50);

        let err = routes::close_route(&state, route.id).unwrap_err();
        assert_eq!(err.code(), "state_transition");
    }

    #[test]
    fn skipped_only_route_earns_no_bonus() {
        let state = test_state();
        let collector = Uuid::new_v4();
        let b1 = seed_bin(&state, BinStatus::Reported);
        let route = routes::create_route(&state, collector, vec![b1], date()).unwrap();

        {
            let mut stored = state.routes.get_mut(&route.id).unwrap();
            routes::close_stop(&mut stored, b1, crate::models::report::ReportOutcome::Skipped);
        }
        {
            let mut bin = state.bins.get_mut(&b1).unwrap();
            bin.status = BinStatus::Full;
        }

        let (_, tx) = routes::close_route(&state, route.id).unwrap();
        assert!(tx.is_none());
        assert_eq!(ledger::balance_of(&state, collector), 0);
        // a skipped bin stays full and becomes routable again
        assert_eq!(state.bins.get(&b1).unwrap().status, BinStatus::Full);
        assert!(state.active_route_by_bin.get(&b1).is_none());
    }
}
