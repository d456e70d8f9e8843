use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    All,
    Weekly,
    Monthly,
}

impl Timeframe {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "all" => Ok(Timeframe::All),
            "weekly" => Ok(Timeframe::Weekly),
            "monthly" => Ok(Timeframe::Monthly),
            other => Err(AppError::validation(
                "timeframe",
                format!("unknown timeframe {other:?}, expected all/weekly/monthly"),
            )),
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Timeframe::All => None,
            Timeframe::Weekly => Some(now - Duration::days(7)),
            Timeframe::Monthly => Some(now - Duration::days(30)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedUser {
    pub user_id: Uuid,
    pub points: i64,
}

/// Leaderboard over the ledger: current balance for `all`, points earned
/// inside the window otherwise. Descending, ties broken by user id so the
/// order is deterministic.
pub fn top_users(state: &AppState, timeframe: Timeframe, limit: usize) -> Vec<RankedUser> {
    let cutoff = timeframe.cutoff(Utc::now());

    let mut ranked: Vec<RankedUser> = state
        .ledgers
        .iter()
        .map(|entry| {
            let points = match cutoff {
                None => entry.value().balance,
                Some(cutoff) => entry
                    .value()
                    .transactions
                    .iter()
                    .filter(|tx| tx.delta > 0 && tx.created_at >= cutoff)
                    .map(|tx| tx.delta)
                    .sum(),
            };
            RankedUser {
                user_id: *entry.key(),
                points,
            }
        })
        .filter(|user| user.points > 0)
        .collect();

    ranked.sort_by(|a, b| b.points.cmp(&a.points).then(a.user_id.cmp(&b.user_id)));
    ranked.truncate(limit);
    ranked
}
