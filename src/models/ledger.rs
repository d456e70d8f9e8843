use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    ReportSubmission,
    RouteCompletion,
    Redemption,
    AdminAdjustment,
}

/// One immutable signed point movement. `balance_after` snapshots the
/// running sum of deltas for the user at append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub delta: i64,
    pub balance_after: i64,
    pub source: TransactionSource,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
