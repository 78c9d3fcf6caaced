use axum::{
    middleware::from_fn,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};

use beatstore_auth::{AdminCredential, UrlSigner, WebhookVerifier};
use beatstore_catalog::CatalogService;
use beatstore_engine::{
    DownloadLinkService, DownloadUrlPolicy, FulfillmentService, LinkPolicy, Mailer,
    PaymentGateway, StorageLocator,
};

pub mod handlers;
pub mod middleware;
pub mod error;
pub mod extractors;
pub mod responses;

pub use error::*;
pub use handlers::*;

#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogService,
    pub signer: Arc<UrlSigner>,
    pub admin: Arc<AdminCredential>,
    pub links: Arc<DownloadLinkService>,
    pub fulfillment: Arc<FulfillmentService>,
    /// `None` until a payment processor is configured.
    pub payments: Option<Arc<dyn PaymentGateway>>,
    pub webhooks: Option<Arc<WebhookVerifier>>,
}

impl AppState {
    pub fn new(
        catalog: CatalogService,
        signer: Arc<UrlSigner>,
        admin: AdminCredential,
        download_policy: DownloadUrlPolicy,
        mailer: Arc<dyn Mailer>,
        app_url: &str,
    ) -> Self {
        let locator = Arc::new(StorageLocator::new(signer.clone(), download_policy));
        let links = Arc::new(DownloadLinkService::new(
            catalog.pool().clone(),
            locator,
            LinkPolicy::default(),
        ));
        let fulfillment = Arc::new(FulfillmentService::new(
            catalog.pool().clone(),
            links.clone(),
            mailer,
            app_url,
        ));

        Self {
            catalog,
            signer,
            admin: Arc::new(admin),
            links,
            fulfillment,
            payments: None,
            webhooks: None,
        }
    }

    pub fn with_payments(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.payments = Some(gateway);
        self
    }

    pub fn with_webhooks(mut self, webhooks: WebhookVerifier) -> Self {
        self.webhooks = Some(Arc::new(webhooks));
        self
    }
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        // Storefront
        .route("/api/beats", get(handlers::list_beats))
        .route("/api/beats/:slug", get(handlers::get_beat))
        .route("/api/license-tiers", get(handlers::list_license_tiers))
        .route("/api/checkout", post(handlers::create_checkout))
        .route("/api/download/:token", get(handlers::download))
        // Payment processor callbacks
        .route("/api/webhooks/stripe", post(handlers::stripe_webhook))
        // Admin
        .route("/api/admin/upload-url", post(handlers::create_upload_url))
        // Health check
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .layer(from_fn(middleware::security_headers)),
        )
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "beatstore",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
