use async_trait::async_trait;
use beatstore_auth::SigningError;
use beatstore_catalog::Beat;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::tiers::LicenseTier;

/// Failure talking to a third-party HTTP API.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("{service} request failed: {message}")]
    Transport { service: &'static str, message: String },

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} returned an unexpected response: {message}")]
    InvalidResponse { service: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub beat: Beat,
    pub tier: LicenseTier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct DownloadEmail {
    pub to: String,
    pub beat_title: String,
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, UpstreamError>;
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_download_email(&self, email: DownloadEmail) -> Result<(), UpstreamError>;
}

/// Turns an archive object key into a URL the customer is redirected to.
pub trait ArchiveLocator: Send + Sync {
    fn download_url(&self, object_key: &str) -> Result<String, SigningError>;
}
