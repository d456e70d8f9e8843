use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Pending,
    InProgress,
    Completed,
}

impl RouteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStatus::Pending => "pending",
            RouteStatus::InProgress => "in_progress",
            RouteStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopState {
    Pending,
    Collected,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStop {
    pub bin_id: Uuid,
    pub state: StopState,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub collector_id: Uuid,
    pub status: RouteStatus,
    pub scheduled_date: NaiveDate,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stops: Vec<RouteStop>,
}

impl Route {
    pub fn is_active(&self) -> bool {
        self.status != RouteStatus::Completed
    }

    pub fn stop(&self, bin_id: Uuid) -> Option<&RouteStop> {
        self.stops.iter().find(|s| s.bin_id == bin_id)
    }

    pub fn open_stops(&self) -> usize {
        self.stops
            .iter()
            .filter(|s| s.state == StopState::Pending)
            .count()
    }
}
