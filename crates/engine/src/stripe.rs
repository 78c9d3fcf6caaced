use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::fulfillment::CompletedCheckout;
use crate::traits::{CheckoutRequest, CheckoutSession, PaymentGateway, UpstreamError};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";
pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

const SERVICE: &str = "stripe";

/// Keys copied from a template `.env` keep their `***` placeholder.
pub fn is_placeholder_key(key: &str) -> bool {
    key.trim().is_empty() || key.contains("***")
}

/// Checkout Sessions client speaking Stripe's form-encoded REST API.
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    app_url: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>, app_url: impl Into<String>) -> Self {
        Self::with_api_base(secret_key, app_url, DEFAULT_API_BASE)
    }

    pub fn with_api_base(
        secret_key: impl Into<String>,
        app_url: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            app_url: app_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .field("app_url", &self.app_url)
            .finish_non_exhaustive()
    }
}

/// Form fields for a one-item payment session.
pub fn checkout_form(request: &CheckoutRequest, app_url: &str) -> Vec<(String, String)> {
    let beat = &request.beat;
    let tier = &request.tier;
    let description = format!(
        "{} • {} • {} BPM • {}",
        tier.name, beat.genre, beat.bpm, beat.musical_key
    );

    vec![
        ("mode".to_string(), "payment".to_string()),
        (
            "success_url".to_string(),
            format!("{}/success?session_id={{CHECKOUT_SESSION_ID}}", app_url),
        ),
        ("cancel_url".to_string(), format!("{}/cancel", app_url)),
        ("allow_promotion_codes".to_string(), "true".to_string()),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        ("line_items[0][price_data][currency]".to_string(), "usd".to_string()),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            tier.price_cents.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            beat.title.clone(),
        ),
        (
            "line_items[0][price_data][product_data][description]".to_string(),
            description,
        ),
        ("metadata[beatId]".to_string(), beat.id.to_string()),
        ("metadata[licenseTier]".to_string(), tier.id.to_string()),
    ]
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, UpstreamError> {
        let url = format!("{}/v1/checkout/sessions", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&checkout_form(&request, &self.app_url))
            .send()
            .await
            .map_err(|e| UpstreamError::Transport {
                service: SERVICE,
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| UpstreamError::Transport {
            service: SERVICE,
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(UpstreamError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let session: SessionResponse =
            serde_json::from_str(&body).map_err(|e| UpstreamError::InvalidResponse {
                service: SERVICE,
                message: e.to_string(),
            })?;
        let url = session.url.ok_or_else(|| UpstreamError::InvalidResponse {
            service: SERVICE,
            message: "checkout session has no url".to_string(),
        })?;

        tracing::info!(session_id = %session.id, beat_id = %request.beat.id, tier = request.tier.id, "Created checkout session");
        Ok(CheckoutSession { id: session.id, url })
    }
}

/// Webhook event envelope. Only the fields fulfillment reads are modeled.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    /// A bare id, or an expanded object.
    #[serde(default)]
    pub payment_intent: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

impl CheckoutSessionObject {
    pub fn into_completed(self) -> CompletedCheckout {
        let metadata = self.metadata.unwrap_or_default();
        CompletedCheckout {
            session_id: self.id.filter(|id| !id.is_empty()),
            beat_id: metadata.get("beatId").cloned(),
            license_tier: metadata.get("licenseTier").cloned(),
            customer_email: self
                .customer_details
                .and_then(|details| details.email)
                .filter(|email| !email.is_empty()),
            amount_total_cents: self.amount_total,
            payment_intent_id: self
                .payment_intent
                .as_ref()
                .and_then(|value| value.as_str())
                .map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::find_tier;
    use beatstore_catalog::Beat;
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            beat: Beat {
                id: Uuid::new_v4(),
                title: "Midnight Asphalt".to_string(),
                slug: "midnight-asphalt".to_string(),
                bpm: 142,
                musical_key: "F minor".to_string(),
                genre: "Trap".to_string(),
                mood: "Dark".to_string(),
                price_cents: 4999,
                preview_url: "https://cdn.test/midnight.mp3".to_string(),
                archive_object_key: "beats/midnight.zip".to_string(),
                archive_file_name: "midnight.zip".to_string(),
                archive_file_type: "application/zip".to_string(),
                archive_file_size: 18_400_000,
                is_published: true,
                created_at: Utc::now(),
            },
            tier: find_tier("wav_stems").unwrap(),
        }
    }

    #[test]
    fn form_carries_price_metadata_and_urls() {
        let request = request();
        let form: HashMap<_, _> = checkout_form(&request, "https://beats.example.com")
            .into_iter()
            .collect();

        assert_eq!(form["mode"], "payment");
        assert_eq!(
            form["success_url"],
            "https://beats.example.com/success?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(form["cancel_url"], "https://beats.example.com/cancel");
        assert_eq!(form["allow_promotion_codes"], "true");
        assert_eq!(form["line_items[0][price_data][unit_amount]"], "5799");
        assert_eq!(form["line_items[0][price_data][currency]"], "usd");
        assert_eq!(form["line_items[0][price_data][product_data][name]"], "Midnight Asphalt");
        assert_eq!(
            form["line_items[0][price_data][product_data][description]"],
            "WAV + Stems • Trap • 142 BPM • F minor"
        );
        assert_eq!(form["metadata[beatId]"], request.beat.id.to_string());
        assert_eq!(form["metadata[licenseTier]"], "wav_stems");
    }

    #[tokio::test]
    async fn creates_a_session_and_returns_its_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(body_string_contains("mode=payment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_abc",
                "url": "https://checkout.stripe.com/c/pay/cs_test_abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = StripeClient::with_api_base("sk_test_123", "https://beats.example.com", server.uri());
        let session = client.create_checkout_session(request()).await.unwrap();

        assert_eq!(session.id, "cs_test_abc");
        assert_eq!(session.url, "https://checkout.stripe.com/c/pay/cs_test_abc");
    }

    #[tokio::test]
    async fn surfaces_processor_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(402).set_body_string(r#"{"error":{"message":"card declined"}}"#))
            .mount(&server)
            .await;

        let client = StripeClient::with_api_base("sk_test_123", "https://beats.example.com", server.uri());
        let err = client.create_checkout_session(request()).await.unwrap_err();

        assert!(matches!(err, UpstreamError::Status { status: 402, .. }));
    }

    #[test]
    fn extracts_completed_checkout_fields() {
        let event: StripeEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_abc",
                "amount_total": 2499,
                "payment_intent": "pi_123",
                "customer_details": { "email": "buyer@example.com" },
                "metadata": { "beatId": "b-1", "licenseTier": "mp3_tagged" }
            }}
        }))
        .unwrap();
        assert_eq!(event.event_type, CHECKOUT_SESSION_COMPLETED);

        let session: CheckoutSessionObject = serde_json::from_value(event.data.object).unwrap();
        let completed = session.into_completed();
        assert_eq!(completed.session_id.as_deref(), Some("cs_test_abc"));
        assert_eq!(completed.beat_id.as_deref(), Some("b-1"));
        assert_eq!(completed.license_tier.as_deref(), Some("mp3_tagged"));
        assert_eq!(completed.customer_email.as_deref(), Some("buyer@example.com"));
        assert_eq!(completed.amount_total_cents, Some(2499));
        assert_eq!(completed.payment_intent_id.as_deref(), Some("pi_123"));
    }

    #[test]
    fn tolerates_missing_and_expanded_fields() {
        let session: CheckoutSessionObject = serde_json::from_value(serde_json::json!({
            "id": "cs_test_abc",
            "metadata": null,
            "customer_details": null,
            "payment_intent": { "id": "pi_expanded" }
        }))
        .unwrap();
        let completed = session.into_completed();

        assert!(completed.beat_id.is_none());
        assert!(completed.customer_email.is_none());
        assert!(completed.payment_intent_id.is_none());
        assert!(completed.amount_total_cents.is_none());
    }

    #[test]
    fn detects_placeholder_keys() {
        assert!(is_placeholder_key("sk_test_***"));
        assert!(is_placeholder_key("  "));
        assert!(!is_placeholder_key("sk_test_51Habc"));
    }
}
