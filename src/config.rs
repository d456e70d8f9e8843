use std::env;

use crate::error::AppError;
use crate::state::RewardPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub full_threshold: u8,
    pub overflow_threshold: u8,
    pub report_points: i64,
    pub collection_points: i64,
    pub route_bonus_points: i64,
    pub require_report_photos: bool,
    pub code_length: usize,
    pub code_retry_limit: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            full_threshold: parse_or_default("FULL_THRESHOLD", 80)?,
            overflow_threshold: parse_or_default("OVERFLOW_THRESHOLD", 98)?,
            report_points: parse_or_default("REPORT_POINTS", 10)?,
            collection_points: parse_or_default("COLLECTION_POINTS", 25)?,
            route_bonus_points: parse_or_default("ROUTE_BONUS_POINTS", 50)?,
            require_report_photos: parse_or_default("REQUIRE_REPORT_PHOTOS", false)?,
            code_length: parse_or_default("REDEMPTION_CODE_LENGTH", 10)?,
            code_retry_limit: parse_or_default("CODE_RETRY_LIMIT", 8)?,
        })
    }

    pub fn policy(&self) -> RewardPolicy {
        RewardPolicy {
            full_threshold: self.full_threshold,
            overflow_threshold: self.overflow_threshold,
            report_points: self.report_points,
            collection_points: self.collection_points,
            route_bonus_points: self.route_bonus_points,
            require_report_photos: self.require_report_photos,
            code_length: self.code_length,
            code_retry_limit: self.code_retry_limit,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
