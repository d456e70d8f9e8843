use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event fanned out on the push channel. `user_id` is None for broadcasts
/// addressed to every subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
