use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;
use url::Url;

use crate::{error::ApiError, AppState};

/// Proof that the request carried the admin bearer secret.
#[derive(Debug)]
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        if state.admin.authorize(header) {
            Ok(AdminAuth)
        } else {
            tracing::warn!(path = %parts.uri.path(), "Rejected admin request");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Body of `POST /api/admin/upload-url`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    pub title: String,
    pub slug: String,
    pub bpm: i64,
    pub key: String,
    pub genre: String,
    pub mood: String,
    pub price_cents: i64,
    pub preview_url: String,
    pub archive_file_name: String,
    pub archive_file_type: String,
    pub archive_file_size: i64,
}

impl UploadUrlRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.title.chars().count() < 2 {
            return Err(invalid("title must be at least 2 characters"));
        }
        if !is_valid_slug(&self.slug) {
            return Err(invalid("slug must match ^[a-z0-9-]+$"));
        }
        if !(40..=240).contains(&self.bpm) {
            return Err(invalid("bpm must be between 40 and 240"));
        }
        for (name, value) in [
            ("key", &self.key),
            ("genre", &self.genre),
            ("mood", &self.mood),
            ("archiveFileName", &self.archive_file_name),
            ("archiveFileType", &self.archive_file_type),
        ] {
            if value.is_empty() {
                return Err(ApiError::Validation(format!("{} must not be empty", name)));
            }
        }
        if self.price_cents < 99 {
            return Err(invalid("priceCents must be at least 99"));
        }
        if !is_http_url(&self.preview_url) {
            return Err(invalid("previewUrl must be an http(s) URL"));
        }
        if self.archive_file_size < 1 {
            return Err(invalid("archiveFileSize must be at least 1"));
        }
        Ok(())
    }
}

/// Body of `POST /api/checkout`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    #[serde(alias = "beatId")]
    pub item_id: String,
    pub license_tier: String,
}

fn invalid(message: &str) -> ApiError {
    ApiError::Validation(message.to_string())
}

pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

fn is_http_url(value: &str) -> bool {
    match Url::parse(value) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some_and(|host| !host.is_empty())
        }
        Err(_) => false,
    }
}

/// Keeps `[A-Za-z0-9._-]`, replaces anything else with `-`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
