use beatstore_auth::{generate_download_token, is_well_formed_token, SigningError};
use beatstore_catalog::{
    CreateDownloadLinkRequest, DownloadLink, DownloadLinkRepository, LinkState, OrderRepository,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::traits::ArchiveLocator;

pub const DEFAULT_LINK_TTL_HOURS: i64 = 72;
pub const DEFAULT_MAX_DOWNLOADS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPolicy {
    pub ttl: Duration,
    pub max_downloads: i64,
}

impl LinkPolicy {
    /// A fresh token for `order_id` with this policy's horizon and quota.
    pub fn new_link(&self, order_id: Uuid) -> CreateDownloadLinkRequest {
        CreateDownloadLinkRequest {
            token: generate_download_token(),
            order_id,
            expires_at: Utc::now() + self.ttl,
            max_downloads: self.max_downloads,
        }
    }
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(DEFAULT_LINK_TTL_HOURS),
            max_downloads: DEFAULT_MAX_DOWNLOADS,
        }
    }
}

#[derive(Error, Debug)]
pub enum RedeemError {
    #[error("Download link not found")]
    NotFound,

    #[error("Download link expired")]
    Expired,

    #[error("Download limit reached")]
    Exhausted,

    #[error("Could not build archive URL: {0}")]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A successful redemption: the link after its counter was bumped and the
/// archive URL to redirect to.
#[derive(Debug, Clone)]
pub struct Redemption {
    pub link: DownloadLink,
    pub location: String,
}

/// Issues and redeems download links.
pub struct DownloadLinkService {
    links: DownloadLinkRepository,
    orders: OrderRepository,
    locator: Arc<dyn ArchiveLocator>,
    policy: LinkPolicy,
}

impl DownloadLinkService {
    pub fn new(pool: SqlitePool, locator: Arc<dyn ArchiveLocator>, policy: LinkPolicy) -> Self {
        Self {
            links: DownloadLinkRepository::new(pool.clone()),
            orders: OrderRepository::new(pool),
            locator,
            policy,
        }
    }

    pub fn policy(&self) -> LinkPolicy {
        self.policy
    }

    /// Always mints a fresh link for the order.
    pub async fn issue(&self, order_id: Uuid) -> anyhow::Result<DownloadLink> {
        let link = self.links.create(self.policy.new_link(order_id)).await?;
        tracing::info!(order_id = %order_id, expires_at = %link.expires_at, "Issued download link");
        Ok(link)
    }

    /// Returns the order's link, minting it only if the order has none.
    /// The boolean is `true` when this call created it.
    pub async fn issue_for_order(&self, order_id: Uuid) -> anyhow::Result<(DownloadLink, bool)> {
        let (link, created) = self
            .links
            .create_if_absent_for_order(self.policy.new_link(order_id))
            .await?;

        if created {
            tracing::info!(order_id = %order_id, expires_at = %link.expires_at, "Issued download link");
        } else {
            tracing::info!(order_id = %order_id, "Reusing existing download link");
        }
        Ok((link, created))
    }

    pub async fn redeem(&self, token: &str) -> Result<Redemption, RedeemError> {
        self.redeem_at(token, Utc::now()).await
    }

    pub async fn redeem_at(&self, token: &str, now: DateTime<Utc>) -> Result<Redemption, RedeemError> {
        if !is_well_formed_token(token) {
            return Err(RedeemError::NotFound);
        }

        let link = self
            .links
            .find_by_token(token)
            .await?
            .ok_or(RedeemError::NotFound)?;
        check_state(&link, now)?;

        // The conditional update is the authority. A concurrent redemption can
        // take the last slot between the read above and this statement.
        let link = match self.links.try_consume(token, now).await? {
            Some(link) => link,
            None => {
                let current = self
                    .links
                    .find_by_token(token)
                    .await?
                    .ok_or(RedeemError::NotFound)?;
                check_state(&current, now)?;
                return Err(RedeemError::Exhausted);
            }
        };

        let object_key = self
            .orders
            .archive_object_key(link.order_id)
            .await?
            .ok_or(RedeemError::NotFound)?;
        let location = self.locator.download_url(&object_key)?;

        tracing::info!(
            order_id = %link.order_id,
            downloads = link.downloads,
            max_downloads = link.max_downloads,
            "Download link redeemed"
        );

        Ok(Redemption { link, location })
    }
}

fn check_state(link: &DownloadLink, now: DateTime<Utc>) -> Result<(), RedeemError> {
    match link.state_at(now) {
        LinkState::Active => Ok(()),
        LinkState::Expired => Err(RedeemError::Expired),
        LinkState::Exhausted => Err(RedeemError::Exhausted),
    }
}

/// Customer-facing URL for a token.
pub fn download_page_url(app_url: &str, token: &str) -> String {
    format!("{}/api/download/{}", app_url.trim_end_matches('/'), token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatstore_catalog::{
        BeatRepository, CatalogService, CreateBeatRequest, OrderStatus, UpsertOrderRequest,
    };

    struct FixedLocator;

    impl ArchiveLocator for FixedLocator {
        fn download_url(&self, object_key: &str) -> Result<String, SigningError> {
            Ok(format!("https://cdn.test/{}", object_key))
        }
    }

    async fn setup() -> (CatalogService, DownloadLinkService, Uuid) {
        setup_with(CatalogService::in_memory().await.unwrap()).await
    }

    async fn setup_with(catalog: CatalogService) -> (CatalogService, DownloadLinkService, Uuid) {
        let beat = BeatRepository::new(catalog.pool().clone())
            .create(CreateBeatRequest {
                title: "Golden Window".to_string(),
                slug: "golden-window".to_string(),
                bpm: 94,
                musical_key: "A minor".to_string(),
                genre: "Boom Bap".to_string(),
                mood: "Warm".to_string(),
                price_cents: 3999,
                preview_url: "https://cdn.test/golden-window.mp3".to_string(),
                archive_object_key: "beats/golden-window.zip".to_string(),
                archive_file_name: "golden-window.zip".to_string(),
                archive_file_type: "application/zip".to_string(),
                archive_file_size: 24_000_000,
                is_published: true,
            })
            .await
            .unwrap();
        let order = OrderRepository::new(catalog.pool().clone())
            .upsert(UpsertOrderRequest {
                beat_id: beat.id,
                stripe_checkout_id: "cs_test_links".to_string(),
                stripe_payment_id: None,
                customer_email: "buyer@example.com".to_string(),
                amount_total_cents: 3999,
                license_tier: Some("wav_no_tag".to_string()),
                status: OrderStatus::Paid,
                fulfilled_at: Some(Utc::now()),
            })
            .await
            .unwrap();

        let service = DownloadLinkService::new(
            catalog.pool().clone(),
            Arc::new(FixedLocator),
            LinkPolicy::default(),
        );
        (catalog, service, order.id)
    }

    #[tokio::test]
    async fn issued_links_follow_the_policy() {
        let (_catalog, service, order_id) = setup().await;
        let before = Utc::now();

        let link = service.issue(order_id).await.unwrap();

        assert!(is_well_formed_token(&link.token));
        assert_eq!(link.downloads, 0);
        assert_eq!(link.max_downloads, 5);
        assert!(link.expires_at >= before + Duration::hours(72) - Duration::seconds(1));
        assert!(link.expires_at <= Utc::now() + Duration::hours(72));
    }

    #[tokio::test]
    async fn five_redemptions_then_exhausted() {
        let (_catalog, service, order_id) = setup().await;
        let link = service.issue(order_id).await.unwrap();

        for expected in 1..=5 {
            let redemption = service.redeem(&link.token).await.unwrap();
            assert_eq!(redemption.link.downloads, expected);
            assert_eq!(redemption.location, "https://cdn.test/beats/golden-window.zip");
        }

        assert!(matches!(service.redeem(&link.token).await, Err(RedeemError::Exhausted)));
    }

    #[tokio::test]
    async fn expiry_beats_remaining_quota() {
        let (_catalog, service, order_id) = setup().await;
        let link = service.issue(order_id).await.unwrap();

        let result = service.redeem_at(&link.token, link.expires_at).await;
        assert!(matches!(result, Err(RedeemError::Expired)));

        let result = service
            .redeem_at(&link.token, link.expires_at + Duration::days(1))
            .await;
        assert!(matches!(result, Err(RedeemError::Expired)));

        // Failed attempts do not count.
        let redemption = service.redeem(&link.token).await.unwrap();
        assert_eq!(redemption.link.downloads, 1);
    }

    #[tokio::test]
    async fn unknown_tokens_are_not_found() {
        let (_catalog, service, _order_id) = setup().await;

        assert!(matches!(service.redeem("nope").await, Err(RedeemError::NotFound)));
        let unknown = generate_download_token();
        assert!(matches!(service.redeem(&unknown).await, Err(RedeemError::NotFound)));
    }

    #[tokio::test]
    async fn issue_for_order_reuses_the_first_link() {
        let (_catalog, service, order_id) = setup().await;

        let (first, created) = service.issue_for_order(order_id).await.unwrap();
        assert!(created);
        let (second, created) = service.issue_for_order(order_id).await.unwrap();
        assert!(!created);
        assert_eq!(first.token, second.token);
        assert_eq!(first.expires_at, second.expires_at);
    }

    /// Fires 20 simultaneous redemptions at one token and returns the granted
    /// counter values and the number of refusals.
    async fn redeem_concurrently(service: Arc<DownloadLinkService>, token: &str) -> (Vec<i64>, usize) {
        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = service.clone();
            let token = token.to_string();
            handles.push(tokio::spawn(async move { service.redeem(&token).await }));
        }

        let mut granted = Vec::new();
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(redemption) => granted.push(redemption.link.downloads),
                Err(RedeemError::Exhausted) => exhausted += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        granted.sort_unstable();
        (granted, exhausted)
    }

    #[tokio::test]
    async fn concurrent_redemptions_never_exceed_quota() {
        let (_catalog, service, order_id) = setup().await;
        let service = Arc::new(service);
        let link = service.issue(order_id).await.unwrap();

        let (granted, exhausted) = redeem_concurrently(service, &link.token).await;
        assert_eq!(granted, vec![1, 2, 3, 4, 5]);
        assert_eq!(exhausted, 15);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redemptions_across_pooled_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("beatstore.db").display());
        let (catalog, service, order_id) = setup_with(CatalogService::new(&url).await.unwrap()).await;
        let service = Arc::new(service);
        let link = service.issue(order_id).await.unwrap();

        let (granted, exhausted) = redeem_concurrently(service, &link.token).await;
        assert_eq!(granted, vec![1, 2, 3, 4, 5]);
        assert_eq!(exhausted, 15);

        let stored = DownloadLinkRepository::new(catalog.pool().clone())
            .find_by_token(&link.token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.downloads, 5);
        catalog.pool().close().await;
    }

    #[test]
    fn builds_download_page_urls() {
        assert_eq!(
            download_page_url("https://beats.example.com/", "abc"),
            "https://beats.example.com/api/download/abc"
        );
    }
}
