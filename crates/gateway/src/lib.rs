use anyhow::Result;
use beatstore_api::{create_router, AppState};
use beatstore_auth::{AdminCredential, WebhookVerifier};
use beatstore_catalog::CatalogService;
use beatstore_engine::{LogMailer, Mailer, ResendMailer, StripeClient};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod config;

pub use config::*;

pub struct BeatStoreServer {
    config: ServerConfig,
}

impl BeatStoreServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        self.setup_tracing()?;

        tracing::info!("Starting BeatStore server...");
        tracing::info!("Configuration: {:?}", self.config);

        self.config.validate()?;
        let state = self.build_state().await?;
        let app = create_router().with_state(state);

        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port).parse()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("BeatStore server listening on http://{}", addr);
        tracing::info!("Health check available at: http://{}/health", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server stopped");
        Ok(())
    }

    /// Wires the catalog, signer and external collaborators into the router
    /// state.
    pub async fn build_state(&self) -> Result<AppState> {
        let catalog = CatalogService::new(&self.config.database_url).await?;
        let signer = Arc::new(self.config.build_signer()?);

        let mailer: Arc<dyn Mailer> = if self.config.email_configured() {
            let email = &self.config.email;
            Arc::new(match &email.api_base {
                Some(base) => ResendMailer::with_api_base(&email.resend_api_key, &email.from, base),
                None => ResendMailer::new(&email.resend_api_key, &email.from),
            })
        } else {
            tracing::warn!("Email delivery is not configured; download links will only be logged");
            Arc::new(LogMailer)
        };

        let mut state = AppState::new(
            catalog,
            signer,
            AdminCredential::new(&self.config.admin_secret),
            self.config.download_policy(),
            mailer,
            &self.config.app_url,
        );

        if self.config.payments_configured() {
            let payments = &self.config.payments;
            let client = match &payments.api_base {
                Some(base) => StripeClient::with_api_base(&payments.stripe_secret_key, &self.config.app_url, base),
                None => StripeClient::new(&payments.stripe_secret_key, &self.config.app_url),
            };
            state = state.with_payments(Arc::new(client));
        } else {
            tracing::warn!("Stripe secret key is not configured; checkout is disabled");
        }

        if self.config.webhooks_configured() {
            state = state.with_webhooks(WebhookVerifier::new(&self.config.payments.stripe_webhook_secret));
        } else {
            tracing::warn!("Stripe webhook secret is not configured; webhook deliveries will be refused");
        }

        Ok(state)
    }

    fn setup_tracing(&self) -> Result<()> {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&self.config.log_level));

        let registry = tracing_subscriber::registry().with(filter);
        match self.config.log_format {
            LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init()?,
            LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
        }

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
