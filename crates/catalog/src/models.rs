use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beat {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub bpm: i64,
    pub musical_key: String,
    pub genre: String,
    pub mood: String,
    pub price_cents: i64,
    pub preview_url: String,
    pub archive_object_key: String,
    pub archive_file_name: String,
    pub archive_file_type: String,
    pub archive_file_size: i64,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            other => Err(anyhow::anyhow!("Unknown order status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub beat_id: Uuid,
    pub stripe_checkout_id: String,
    pub stripe_payment_id: Option<String>,
    pub customer_email: String,
    pub amount_total_cents: i64,
    pub license_tier: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub fulfilled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLink {
    pub id: Uuid,
    pub token: String,
    pub order_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub downloads: i64,
    pub max_downloads: i64,
    pub created_at: DateTime<Utc>,
}

/// Redemption state, derived from the stored fields at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Active,
    Expired,
    Exhausted,
}

impl DownloadLink {
    /// Expiry wins over quota: a link past `expires_at` is `Expired` even if
    /// it still has downloads left.
    pub fn state_at(&self, now: DateTime<Utc>) -> LinkState {
        if now >= self.expires_at {
            LinkState::Expired
        } else if self.downloads >= self.max_downloads {
            LinkState::Exhausted
        } else {
            LinkState::Active
        }
    }

    pub fn remaining(&self) -> i64 {
        (self.max_downloads - self.downloads).max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBeatRequest {
    pub title: String,
    pub slug: String,
    pub bpm: i64,
    pub musical_key: String,
    pub genre: String,
    pub mood: String,
    pub price_cents: i64,
    pub preview_url: String,
    pub archive_object_key: String,
    pub archive_file_name: String,
    pub archive_file_type: String,
    pub archive_file_size: i64,
    pub is_published: bool,
}

/// Fields written on every payment confirmation, keyed by `stripe_checkout_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertOrderRequest {
    pub beat_id: Uuid,
    pub stripe_checkout_id: String,
    pub stripe_payment_id: Option<String>,
    pub customer_email: String,
    pub amount_total_cents: i64,
    pub license_tier: Option<String>,
    pub status: OrderStatus,
    pub fulfilled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDownloadLinkRequest {
    pub token: String,
    pub order_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub max_downloads: i64,
}
