use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    Completed,
    Delayed,
    Skipped,
}

impl ReportOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportOutcome::Completed => "completed",
            ReportOutcome::Delayed => "delayed",
            ReportOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WasteUnit {
    Kilograms,
    Liters,
    Bags,
}

/// Per-category split of the collected volume. Parts may not exceed the
/// reported total.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WasteBreakdown {
    pub organic: f64,
    pub recyclable: f64,
    pub non_recyclable: f64,
    pub hazardous: f64,
}

impl WasteBreakdown {
    pub fn total(&self) -> f64 {
        self.organic + self.recyclable + self.non_recyclable + self.hazardous
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub condition: String,
    pub temperature_c: f64,
}

/// A collector's field record for one bin. Immutable once created;
/// corrections are new reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionReport {
    pub id: Uuid,
    pub bin_id: Uuid,
    pub route_id: Option<Uuid>,
    pub collector_id: Uuid,
    pub fill_level_before: u8,
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
    pub reported_at: DateTime<Utc>,
    pub duration_minutes: Option<u32>,
}
