use beatstore_catalog::{
    BeatRepository, DownloadLink, Order, OrderRepository, OrderStatus, UpsertOrderRequest,
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::links::{download_page_url, DownloadLinkService};
use crate::traits::{DownloadEmail, Mailer, UpstreamError};

/// Fields of a completed checkout session that fulfillment needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedCheckout {
    pub session_id: Option<String>,
    pub beat_id: Option<String>,
    pub license_tier: Option<String>,
    pub customer_email: Option<String>,
    pub amount_total_cents: Option<i64>,
    pub payment_intent_id: Option<String>,
}

#[derive(Error, Debug)]
pub enum FulfillmentError {
    #[error("Missing session field: {0}")]
    MissingField(&'static str),

    #[error("Beat not found: {0}")]
    BeatNotFound(String),

    #[error("Failed to send download email: {0}")]
    Email(#[from] UpstreamError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct Fulfillment {
    pub order: Order,
    pub link: DownloadLink,
    /// `false` when a redelivered event found the link already issued.
    pub link_created: bool,
    pub download_url: String,
}

/// Turns a paid checkout into an order, a download link and an email.
/// Safe to run repeatedly for the same session.
pub struct FulfillmentService {
    beats: BeatRepository,
    orders: OrderRepository,
    links: Arc<DownloadLinkService>,
    mailer: Arc<dyn Mailer>,
    app_url: String,
}

impl FulfillmentService {
    pub fn new(
        pool: SqlitePool,
        links: Arc<DownloadLinkService>,
        mailer: Arc<dyn Mailer>,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            beats: BeatRepository::new(pool.clone()),
            orders: OrderRepository::new(pool),
            links,
            mailer,
            app_url: app_url.into(),
        }
    }

    pub async fn fulfill(&self, checkout: CompletedCheckout) -> Result<Fulfillment, FulfillmentError> {
        let beat_id = checkout
            .beat_id
            .filter(|id| !id.is_empty())
            .ok_or(FulfillmentError::MissingField("metadata.beatId"))?;
        let customer_email = checkout
            .customer_email
            .ok_or(FulfillmentError::MissingField("customer_details.email"))?;
        let session_id = checkout
            .session_id
            .ok_or(FulfillmentError::MissingField("id"))?;

        let beat = match Uuid::parse_str(&beat_id) {
            Ok(id) => self.beats.find_by_id(id).await?,
            Err(_) => None,
        }
        .ok_or_else(|| FulfillmentError::BeatNotFound(beat_id.clone()))?;

        let order = self
            .orders
            .upsert(UpsertOrderRequest {
                beat_id: beat.id,
                stripe_checkout_id: session_id,
                stripe_payment_id: checkout.payment_intent_id,
                customer_email: customer_email.clone(),
                amount_total_cents: checkout.amount_total_cents.unwrap_or(beat.price_cents),
                license_tier: checkout.license_tier,
                status: OrderStatus::Paid,
                fulfilled_at: Some(Utc::now()),
            })
            .await?;

        let (link, link_created) = self.links.issue_for_order(order.id).await?;
        let download_url = download_page_url(&self.app_url, &link.token);

        self.mailer
            .send_download_email(DownloadEmail {
                to: customer_email,
                beat_title: beat.title.clone(),
                download_url: download_url.clone(),
                expires_at: link.expires_at,
            })
            .await?;

        tracing::info!(
            order_id = %order.id,
            session_id = %order.stripe_checkout_id,
            beat = %beat.slug,
            link_created,
            "Order fulfilled"
        );

        Ok(Fulfillment {
            order,
            link,
            link_created,
            download_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::LinkPolicy;
    use crate::traits::ArchiveLocator;
    use async_trait::async_trait;
    use beatstore_auth::SigningError;
    use beatstore_catalog::{Beat, CatalogService, CreateBeatRequest, DownloadLinkRepository};
    use std::sync::Mutex;

    struct FixedLocator;

    impl ArchiveLocator for FixedLocator {
        fn download_url(&self, object_key: &str) -> Result<String, SigningError> {
            Ok(format!("https://cdn.test/{}", object_key))
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<DownloadEmail>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_download_email(&self, email: DownloadEmail) -> Result<(), UpstreamError> {
            if self.fail {
                return Err(UpstreamError::Status {
                    service: "test",
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            self.sent.lock().unwrap().push(email);
            Ok(())
        }
    }

    async fn setup(mailer: Arc<RecordingMailer>) -> (CatalogService, FulfillmentService, Beat) {
        let catalog = CatalogService::in_memory().await.unwrap();
        let beat = BeatRepository::new(catalog.pool().clone())
            .create(CreateBeatRequest {
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
            })
            .await
            .unwrap();

        let links = Arc::new(DownloadLinkService::new(
            catalog.pool().clone(),
            Arc::new(FixedLocator),
            LinkPolicy::default(),
        ));
        let service = FulfillmentService::new(
            catalog.pool().clone(),
            links,
            mailer,
            "https://beats.example.com/",
        );
        (catalog, service, beat)
    }

    fn checkout(beat: &Beat) -> CompletedCheckout {
        CompletedCheckout {
            session_id: Some("cs_test_1".to_string()),
            beat_id: Some(beat.id.to_string()),
            license_tier: Some("mp3_tagged".to_string()),
            customer_email: Some("buyer@example.com".to_string()),
            amount_total_cents: Some(2499),
            payment_intent_id: Some("pi_1".to_string()),
        }
    }

    #[tokio::test]
    async fn fulfills_a_paid_checkout() {
        let mailer = Arc::new(RecordingMailer::default());
        let (_catalog, service, beat) = setup(mailer.clone()).await;

        let done = service.fulfill(checkout(&beat)).await.unwrap();

        assert_eq!(done.order.status, OrderStatus::Paid);
        assert_eq!(done.order.amount_total_cents, 2499);
        assert_eq!(done.order.license_tier.as_deref(), Some("mp3_tagged"));
        assert!(done.order.fulfilled_at.is_some());
        assert!(done.link_created);
        assert_eq!(
            done.download_url,
            format!("https://beats.example.com/api/download/{}", done.link.token)
        );

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "buyer@example.com");
        assert_eq!(sent[0].beat_title, "Midnight Asphalt");
        assert_eq!(sent[0].expires_at, done.link.expires_at);
    }

    #[tokio::test]
    async fn redelivery_reuses_order_and_link() {
        let mailer = Arc::new(RecordingMailer::default());
        let (catalog, service, beat) = setup(mailer.clone()).await;

        let first = service.fulfill(checkout(&beat)).await.unwrap();
        let second = service.fulfill(checkout(&beat)).await.unwrap();

        assert_eq!(first.order.id, second.order.id);
        assert_eq!(first.link.token, second.link.token);
        assert!(!second.link_created);

        let link = DownloadLinkRepository::new(catalog.pool().clone())
            .find_by_order(first.order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.token, first.link.token);
        assert_eq!(mailer.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_the_beat_price() {
        let (_catalog, service, beat) = setup(Arc::new(RecordingMailer::default())).await;
        let mut session = checkout(&beat);
        session.amount_total_cents = None;

        let done = service.fulfill(session).await.unwrap();
        assert_eq!(done.order.amount_total_cents, 4999);
    }

    #[tokio::test]
    async fn rejects_incomplete_sessions() {
        let (_catalog, service, beat) = setup(Arc::new(RecordingMailer::default())).await;

        let mut no_beat = checkout(&beat);
        no_beat.beat_id = None;
        assert!(matches!(
            service.fulfill(no_beat).await,
            Err(FulfillmentError::MissingField("metadata.beatId"))
        ));

        let mut no_email = checkout(&beat);
        no_email.customer_email = None;
        assert!(matches!(
            service.fulfill(no_email).await,
            Err(FulfillmentError::MissingField("customer_details.email"))
        ));

        let mut unknown = checkout(&beat);
        unknown.beat_id = Some(Uuid::new_v4().to_string());
        assert!(matches!(service.fulfill(unknown).await, Err(FulfillmentError::BeatNotFound(_))));

        let mut garbage = checkout(&beat);
        garbage.beat_id = Some("not-a-uuid".to_string());
        assert!(matches!(service.fulfill(garbage).await, Err(FulfillmentError::BeatNotFound(_))));
    }

    #[tokio::test]
    async fn email_failure_is_reported_and_retry_reuses_link() {
        let failing = Arc::new(RecordingMailer {
            fail: true,
            ..Default::default()
        });
        let (catalog, service, beat) = setup(failing).await;

        let err = service.fulfill(checkout(&beat)).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Email(_)));

        let order = OrderRepository::new(catalog.pool().clone())
            .find_by_checkout_id("cs_test_1")
            .await
            .unwrap()
            .unwrap();
        let stored = DownloadLinkRepository::new(catalog.pool().clone())
            .find_by_order(order.id)
            .await
            .unwrap()
            .unwrap();

        let links = Arc::new(DownloadLinkService::new(
            catalog.pool().clone(),
            Arc::new(FixedLocator),
            LinkPolicy::default(),
        ));
        let retry = FulfillmentService::new(
            catalog.pool().clone(),
            links,
            Arc::new(RecordingMailer::default()),
            "https://beats.example.com",
        );
        let done = retry.fulfill(checkout(&beat)).await.unwrap();
        assert_eq!(done.link.token, stored.token);
    }
}
