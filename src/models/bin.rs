use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinStatus {
    Available,
    Full,
    Reported,
    InProgress,
    Collected,
    Overflow,
}

impl BinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinStatus::Available => "available",
            BinStatus::Full => "full",
            BinStatus::Reported => "reported",
            BinStatus::InProgress => "in_progress",
            BinStatus::Collected => "collected",
            BinStatus::Overflow => "overflow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WasteType {
    General,
    Organic,
    Recyclable,
    Hazardous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

/// One append-only entry in a bin's collection history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub fill_level: u8,
    pub status: BinStatus,
    pub note: Option<String>,
    pub collector_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleFrequency {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSchedule {
    pub frequency: ScheduleFrequency,
    pub time_slot: String,
    pub days: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bin {
    pub id: Uuid,
    pub address: String,
    pub location: GeoPoint,
    pub fill_level: u8,
    pub capacity_liters: u32,
    pub waste_type: WasteType,
    pub priority: Priority,
    pub status: BinStatus,
    pub history: Vec<HistoryEntry>,
    pub schedule: Option<CollectionSchedule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
