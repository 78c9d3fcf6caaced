use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use beatstore_auth::SIGNATURE_HEADER;
use beatstore_catalog::{Beat, BeatRepository, CreateBeatRequest};
use beatstore_engine::{
    find_tier, lowest_tier_price_cents, format_usd, stripe::CheckoutSessionObject,
    CheckoutRequest, StripeEvent, CHECKOUT_SESSION_COMPLETED, LICENSE_TIERS,
};

use crate::{
    error::{ApiError, ApiResult},
    extractors::{sanitize_file_name, AdminAuth, CheckoutBody, UploadUrlRequest},
    responses::*,
    AppState,
};

/// Admin uploads get a longer window than the signer default.
pub const UPLOAD_EXPIRES_SECONDS: u64 = 900;

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!("Rejected request body: {}", e);
        ApiError::Validation("Invalid payload".to_string())
    })
}

fn is_unique_violation(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|e| e.is_unique_violation())
}

/// A concurrent upload can claim the slug between the lookup and the insert.
fn slug_conflict(slug: &str, error: anyhow::Error) -> ApiError {
    if is_unique_violation(&error) {
        ApiError::Validation(format!("slug already exists: {}", slug))
    } else {
        ApiError::Internal(error)
    }
}

async fn find_published_beat(state: &AppState, id: &str) -> ApiResult<Beat> {
    let repo = BeatRepository::new(state.catalog.pool().clone());
    let beat = match Uuid::parse_str(id) {
        Ok(id) => repo.find_by_id(id).await?,
        Err(_) => None,
    };

    beat.filter(|beat| beat.is_published)
        .ok_or_else(|| ApiError::NotFound("Beat".to_string()))
}

pub async fn download(
    Path(token): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    let redemption = state.links.redeem(&token).await?;

    Ok((
        StatusCode::FOUND,
        [
            (header::LOCATION, redemption.location),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
    )
        .into_response())
}

pub async fn create_upload_url(
    State(state): State<AppState>,
    _admin: AdminAuth,
    body: Bytes,
) -> ApiResult<Json<UploadUrlResponse>> {
    let request: UploadUrlRequest = parse_json(&body)?;
    request.validate()?;

    let repo = BeatRepository::new(state.catalog.pool().clone());
    if repo.find_by_slug(&request.slug).await?.is_some() {
        return Err(ApiError::Validation(format!("slug already exists: {}", request.slug)));
    }

    let object_key = format!(
        "beats/{}-{}-{}",
        request.slug,
        Utc::now().timestamp_millis(),
        sanitize_file_name(&request.archive_file_name)
    );
    let upload = state.signer.presign_put(
        &object_key,
        &request.archive_file_type,
        Some(UPLOAD_EXPIRES_SECONDS),
    )?;

    let slug = request.slug.clone();
    let beat = repo
        .create(CreateBeatRequest {
            title: request.title,
            slug: request.slug,
            bpm: request.bpm,
            musical_key: request.key,
            genre: request.genre,
            mood: request.mood,
            price_cents: request.price_cents,
            preview_url: request.preview_url,
            archive_object_key: object_key,
            archive_file_name: request.archive_file_name,
            archive_file_type: request.archive_file_type,
            archive_file_size: request.archive_file_size,
            is_published: true,
        })
        .await
        .map_err(|e| slug_conflict(&slug, e))?;

    tracing::info!(beat_id = %beat.id, slug = %beat.slug, key = %upload.key, "Issued upload URL");

    Ok(Json(UploadUrlResponse { id: beat.id, upload }))
}

pub async fn create_checkout(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<CheckoutResponse>> {
    let payments = state.payments.clone().ok_or(ApiError::PaymentsNotConfigured)?;

    let request: CheckoutBody = parse_json(&body)?;
    if request.item_id.is_empty() || request.license_tier.is_empty() {
        return Err(ApiError::Validation("itemId and licenseTier are required".to_string()));
    }

    let beat = find_published_beat(&state, &request.item_id).await?;
    let tier = find_tier(&request.license_tier)
        .ok_or_else(|| ApiError::Validation("Invalid license tier".to_string()))?;

    let session = payments
        .create_checkout_session(CheckoutRequest { beat, tier })
        .await?;

    Ok(Json(CheckoutResponse { url: session.url }))
}

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::InvalidSignature("missing Stripe-Signature header".to_string()))?;
    let verifier = state.webhooks.clone().ok_or(ApiError::PaymentsNotConfigured)?;
    verifier.verify(signature, &body)?;

    let event: StripeEvent = parse_json(&body)?;
    if event.event_type == CHECKOUT_SESSION_COMPLETED {
        let session: CheckoutSessionObject = serde_json::from_value(event.data.object)
            .map_err(|e| ApiError::Validation(e.to_string()))?;
        let fulfillment = state.fulfillment.fulfill(session.into_completed()).await?;
        tracing::info!(
            event_id = %event.id,
            order_id = %fulfillment.order.id,
            link_created = fulfillment.link_created,
            "Processed checkout completion"
        );
    } else {
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
    }

    Ok((StatusCode::OK, "ok").into_response())
}

pub async fn list_beats(State(state): State<AppState>) -> ApiResult<Json<CatalogResponse>> {
    let repo = BeatRepository::new(state.catalog.pool().clone());
    let beats = repo.list(false).await?;

    Ok(Json(CatalogResponse {
        beats: beats.into_iter().map(BeatView::from).collect(),
        starting_at_cents: lowest_tier_price_cents(),
        starting_at: format_usd(lowest_tier_price_cents()),
    }))
}

pub async fn get_beat(
    Path(slug): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<BeatView>> {
    let repo = BeatRepository::new(state.catalog.pool().clone());
    let beat = repo
        .find_by_slug(&slug)
        .await?
        .filter(|beat| beat.is_published)
        .ok_or_else(|| ApiError::NotFound("Beat".to_string()))?;

    Ok(Json(BeatView::from(beat)))
}

pub async fn list_license_tiers() -> Json<Vec<LicenseTierView>> {
    Json(LICENSE_TIERS.into_iter().map(LicenseTierView::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatstore_catalog::CatalogService;

    fn beat(slug: &str) -> CreateBeatRequest {
        CreateBeatRequest {
            title: "Golden Window".to_string(),
            slug: slug.to_string(),
            bpm: 94,
            musical_key: "A minor".to_string(),
            genre: "Boom Bap".to_string(),
            mood: "Warm".to_string(),
            price_cents: 3999,
            preview_url: "https://cdn.example.com/golden-window.mp3".to_string(),
            archive_object_key: format!("beats/{}.zip", slug),
            archive_file_name: "golden-window.zip".to_string(),
            archive_file_type: "application/zip".to_string(),
            archive_file_size: 24_000_000,
            is_published: true,
        }
    }

    #[tokio::test]
    async fn losing_a_slug_race_is_a_validation_error() {
        let catalog = CatalogService::in_memory().await.unwrap();
        let repo = BeatRepository::new(catalog.pool().clone());
        repo.create(beat("golden-window")).await.unwrap();

        let err = repo.create(beat("golden-window")).await.unwrap_err();
        assert!(is_unique_violation(&err));
        assert!(matches!(
            slug_conflict("golden-window", err),
            ApiError::Validation(message) if message.contains("golden-window")
        ));
    }

    #[test]
    fn other_storage_failures_stay_internal() {
        let err = anyhow::anyhow!("disk full");
        assert!(!is_unique_violation(&err));
        assert!(matches!(slug_conflict("golden-window", err), ApiError::Internal(_)));
    }

    #[test]
    fn malformed_bodies_get_a_generic_message() {
        let err = parse_json::<CheckoutBody>(br#"{"itemId": 5, "secretField": }"#).unwrap_err();
        match err {
            ApiError::Validation(message) => assert_eq!(message, "Invalid payload"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
