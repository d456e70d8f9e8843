use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardCategory {
    Voucher,
    Discount,
    Merchandise,
    Donation,
}

/// Catalog entry redeemable for points. `remaining_quantity == -1` means
/// unlimited stock; otherwise 0 <= remaining <= total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardItem {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub category: RewardCategory,
    pub points_cost: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub total_quantity: i64,
    pub remaining_quantity: i64,
    pub active: bool,
    pub display_order: u32,
    pub terms: Option<String>,
}

impl RewardItem {
    pub fn unlimited(&self) -> bool {
        self.remaining_quantity == -1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionStatus {
    Active,
    Used,
    Expired,
}

/// A single-use claim against a reward item. `expires_at` snapshots the
/// item's validity window at issue time; expiry is evaluated lazily at read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardRedemption {
    pub id: Uuid,
    pub user_id: Uuid,
    pub reward_item_id: Uuid,
    pub code: String,
    pub status: RedemptionStatus,
    pub expires_at: DateTime<Utc>,
    pub redeemed_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl RewardRedemption {
    pub fn resolved_status(&self, now: DateTime<Utc>) -> RedemptionStatus {
        if self.status == RedemptionStatus::Active && now > self.expires_at {
            RedemptionStatus::Expired
        } else {
            self.status
        }
    }

    /// Copy with the lazily-resolved status applied, for read paths.
    pub fn resolved(mut self, now: DateTime<Utc>) -> Self {
        self.status = self.resolved_status(now);
        self
    }
}
