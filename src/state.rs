use chrono::Utc;
use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::bin::Bin;
use crate::models::ledger::LedgerTransaction;
use crate::models::notification::Notification;
use crate::models::report::CollectionReport;
use crate::models::reward::{RewardItem, RewardRedemption};
use crate::models::route::Route;
use crate::observability::metrics::Metrics;

/// Operational knobs shared by the engine: state-machine thresholds, point
/// amounts per earn trigger, and redemption-code settings.
#[derive(Debug, Clone)]
pub struct RewardPolicy {
    pub full_threshold: u8,
    pub overflow_threshold: u8,
    pub report_points: i64,
    pub collection_points: i64,
    pub route_bonus_points: i64,
    pub require_report_photos: bool,
    pub code_length: usize,
    pub code_retry_limit: usize,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            full_threshold: 80,
            overflow_threshold: 98,
            report_points: 10,
            collection_points: 25,
            route_bonus_points: 50,
            require_report_photos: false,
            code_length: 10,
            code_retry_limit: 8,
        }
    }
}

/// Per-user ledger: materialized balance plus the append-only transaction
/// log. Mutated only under the owning DashMap entry guard.
#[derive(Debug, Default)]
pub struct UserLedger {
    pub balance: i64,
    pub transactions: Vec<LedgerTransaction>,
}

pub struct AppState {
    pub bins: DashMap<Uuid, Bin>,
    pub routes: DashMap<Uuid, Route>,
    pub reports: DashMap<Uuid, CollectionReport>,
    pub reward_items: DashMap<Uuid, RewardItem>,
    pub redemptions: DashMap<Uuid, RewardRedemption>,
    pub ledgers: DashMap<Uuid, UserLedger>,
    /// bin id -> active (non-completed) route id; insertion is the atomic
    /// claim that enforces at-most-one-active-route per bin.
    pub active_route_by_bin: DashMap<Uuid, Uuid>,
    /// every redemption code ever issued; insertion is the uniqueness claim.
    pub issued_codes: DashSet<String>,
    pub intake_keys: DashMap<String, Uuid>,
    pub redeem_keys: DashMap<String, Uuid>,
    pub notifications_tx: broadcast::Sender<Notification>,
    pub policy: RewardPolicy,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(policy: RewardPolicy, event_buffer_size: usize) -> Self {
        let (notifications_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            bins: DashMap::new(),
            routes: DashMap::new(),
            reports: DashMap::new(),
            reward_items: DashMap::new(),
            redemptions: DashMap::new(),
            ledgers: DashMap::new(),
            active_route_by_bin: DashMap::new(),
            issued_codes: DashSet::new(),
            intake_keys: DashMap::new(),
            redeem_keys: DashMap::new(),
            notifications_tx,
            policy,
            metrics: Metrics::new(),
        }
    }

    pub fn notify(&self, user_id: Option<Uuid>, title: &str, message: String) {
        let _ = self.notifications_tx.send(Notification {
            user_id,
            title: title.to_string(),
            message,
            created_at: Utc::now(),
        });
    }
}
