use beatstore_auth::PresignedUpload;
use beatstore_catalog::Beat;
use beatstore_engine::{format_bytes, format_usd, LicenseTier};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct UploadUrlResponse {
    pub id: Uuid,
    pub upload: PresignedUpload,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

/// Public view of a published beat. The archive key never leaves the server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatView {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub bpm: i64,
    pub key: String,
    pub genre: String,
    pub mood: String,
    pub price_cents: i64,
    pub price: String,
    pub preview_url: String,
    pub archive_file_type: String,
    pub archive_file_size: i64,
    pub archive_size: String,
    pub created_at: DateTime<Utc>,
}

impl From<Beat> for BeatView {
    fn from(beat: Beat) -> Self {
        Self {
            price: format_usd(beat.price_cents),
            archive_size: format_bytes(beat.archive_file_size.max(0) as u64),
            id: beat.id,
            title: beat.title,
            slug: beat.slug,
            bpm: beat.bpm,
            key: beat.musical_key,
            genre: beat.genre,
            mood: beat.mood,
            price_cents: beat.price_cents,
            preview_url: beat.preview_url,
            archive_file_type: beat.archive_file_type,
            archive_file_size: beat.archive_file_size,
            created_at: beat.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse {
    pub beats: Vec<BeatView>,
    pub starting_at_cents: i64,
    pub starting_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseTierView {
    pub id: &'static str,
    pub name: &'static str,
    pub price_cents: i64,
    pub price: String,
}

impl From<LicenseTier> for LicenseTierView {
    fn from(tier: LicenseTier) -> Self {
        Self {
            id: tier.id,
            name: tier.name,
            price_cents: tier.price_cents,
            price: format_usd(tier.price_cents),
        }
    }
}
