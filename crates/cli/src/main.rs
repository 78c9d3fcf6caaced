use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Result, WrapErr};
use uuid::Uuid;

use beatstore_auth::{StorageCredentials, UrlSigner};
use beatstore_catalog::{
    BeatRepository, CatalogService, CreateBeatRequest, DownloadLinkRepository, LinkState,
    OrderRepository,
};
use beatstore_engine::{download_page_url, format_bytes, format_usd, LinkPolicy};

#[derive(Parser, Debug)]
#[command(author, version, about = "BeatStore CLI - Manage the catalog, orders and download links", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:./beatstore.db", global = true)]
    database_url: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Beat {
        #[command(subcommand)]
        command: BeatCommands,
    },
    Order {
        #[command(subcommand)]
        command: OrderCommands,
    },
    Link {
        #[command(subcommand)]
        command: LinkCommands,
    },
    /// Presign an object storage request without starting the server.
    Presign {
        #[command(subcommand)]
        command: PresignCommands,
    },
}

#[derive(Subcommand, Debug)]
enum BeatCommands {
    /// Insert or refresh the demo catalog.
    Seed,
    List {
        #[arg(long, help = "Include unpublished beats")]
        all: bool,
    },
}

#[derive(Subcommand, Debug)]
enum OrderCommands {
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand, Debug)]
enum LinkCommands {
    /// Mint an additional download link for an order.
    Issue {
        order_id: Uuid,
        #[arg(long, env = "APP_URL", default_value = "http://localhost:3000")]
        app_url: String,
    },
    Show {
        token: String,
    },
}

#[derive(Args, Debug)]
struct StorageArgs {
    #[arg(long, env = "STORAGE_ACCESS_KEY_ID")]
    access_key_id: String,
    #[arg(long, env = "STORAGE_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_access_key: String,
    #[arg(long, env = "STORAGE_REGION", default_value = "auto")]
    region: String,
    #[arg(long, env = "STORAGE_BUCKET")]
    bucket: String,
    #[arg(long, env = "STORAGE_ENDPOINT")]
    endpoint: String,
}

#[derive(Subcommand, Debug)]
enum PresignCommands {
    Put {
        key: String,
        #[arg(long, default_value = "application/zip")]
        content_type: String,
        #[arg(long, default_value_t = 900)]
        expires: u64,
        #[arg(long, help = "Print the canonical request and string to sign")]
        explain: bool,
        #[command(flatten)]
        storage: StorageArgs,
    },
    Get {
        key: String,
        #[arg(long, default_value_t = 300)]
        expires: u64,
        #[arg(long, help = "Print the canonical request and string to sign")]
        explain: bool,
        #[command(flatten)]
        storage: StorageArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    match &cli.command {
        Commands::Beat { command } => handle_beat_command(command, &cli.database_url).await,
        Commands::Order { command } => handle_order_command(command, &cli.database_url).await,
        Commands::Link { command } => handle_link_command(command, &cli.database_url).await,
        Commands::Presign { command } => handle_presign_command(command),
    }
}

async fn open_catalog(database_url: &str) -> Result<CatalogService> {
    CatalogService::new(database_url)
        .await
        .map_err(|e| eyre!(e))
        .wrap_err_with(|| format!("Failed to open database {}", database_url))
}

fn demo_beats() -> Vec<CreateBeatRequest> {
    vec![
        CreateBeatRequest {
            title: "Midnight Asphalt".to_string(),
            slug: "midnight-asphalt".to_string(),
            bpm: 142,
            musical_key: "F minor".to_string(),
            genre: "Trap".to_string(),
            mood: "Dark".to_string(),
            price_cents: 4999,
            preview_url: "https://filesamples.com/samples/audio/mp3/sample3.mp3".to_string(),
            archive_object_key: "beats/midnight-asphalt.zip".to_string(),
            archive_file_name: "midnight-asphalt.zip".to_string(),
            archive_file_type: "application/zip".to_string(),
            archive_file_size: 18_400_000,
            is_published: true,
        },
        CreateBeatRequest {
            title: "Golden Window".to_string(),
            slug: "golden-window".to_string(),
            bpm: 94,
            musical_key: "C major".to_string(),
            genre: "Lo-Fi".to_string(),
            mood: "Warm".to_string(),
            price_cents: 3499,
            preview_url: "https://filesamples.com/samples/audio/mp3/sample1.mp3".to_string(),
            archive_object_key: "beats/golden-window.zip".to_string(),
            archive_file_name: "golden-window.zip".to_string(),
            archive_file_type: "application/zip".to_string(),
            archive_file_size: 12_100_000,
            is_published: true,
        },
    ]
}

async fn handle_beat_command(command: &BeatCommands, database_url: &str) -> Result<()> {
    let catalog = open_catalog(database_url).await?;
    let repo = BeatRepository::new(catalog.pool().clone());

    match command {
        BeatCommands::Seed => {
            for request in demo_beats() {
                let beat = repo.upsert_by_slug(request).await.map_err(|e| eyre!(e))?;
                println!("Seeded {} ({})", beat.slug, beat.id);
            }
        }
        BeatCommands::List { all } => {
            let beats = repo.list(*all).await.map_err(|e| eyre!(e))?;
            if beats.is_empty() {
                println!("No beats found");
            } else {
                println!("Beats:");
                for beat in beats {
                    let status = if beat.is_published { "Published" } else { "Draft" };
                    println!("  {} - {} ({})", beat.slug, beat.title, status);
                    println!("    ID: {}", beat.id);
                    println!(
                        "    {} BPM, {}, {} / {}",
                        beat.bpm, beat.musical_key, beat.genre, beat.mood
                    );
                    println!("    Price: {}", format_usd(beat.price_cents));
                    println!(
                        "    Archive: {} ({})",
                        beat.archive_object_key,
                        format_bytes(beat.archive_file_size.max(0) as u64)
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_order_command(command: &OrderCommands, database_url: &str) -> Result<()> {
    let catalog = open_catalog(database_url).await?;
    let repo = OrderRepository::new(catalog.pool().clone());

    match command {
        OrderCommands::List { limit } => {
            let orders = repo.list_recent(*limit).await.map_err(|e| eyre!(e))?;
            if orders.is_empty() {
                println!("No orders found");
            } else {
                println!("Orders:");
                for order in orders {
                    println!(
                        "  {} - {} {} ({})",
                        order.id,
                        order.status,
                        format_usd(order.amount_total_cents),
                        format_time(order.created_at)
                    );
                    println!("    Customer: {}", order.customer_email);
                    println!("    Checkout session: {}", order.stripe_checkout_id);
                    if let Some(tier) = order.license_tier {
                        println!("    License tier: {}", tier);
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_link_command(command: &LinkCommands, database_url: &str) -> Result<()> {
    let catalog = open_catalog(database_url).await?;
    let links = DownloadLinkRepository::new(catalog.pool().clone());

    match command {
        LinkCommands::Issue { order_id, app_url } => {
            let orders = OrderRepository::new(catalog.pool().clone());
            if orders.find_by_id(*order_id).await.map_err(|e| eyre!(e))?.is_none() {
                return Err(eyre!("Order '{}' not found", order_id));
            }

            let link = links
                .create(LinkPolicy::default().new_link(*order_id))
                .await
                .map_err(|e| eyre!(e))?;
            println!("Issued download link:");
            println!("  URL: {}", download_page_url(app_url, &link.token));
            println!("  Expires: {}", format_time(link.expires_at));
            println!("  Downloads allowed: {}", link.max_downloads);
        }
        LinkCommands::Show { token } => {
            let link = links
                .find_by_token(token)
                .await
                .map_err(|e| eyre!(e))?
                .ok_or_else(|| eyre!("Download link not found"))?;

            let state = match link.state_at(Utc::now()) {
                LinkState::Active => "Active",
                LinkState::Expired => "Expired",
                LinkState::Exhausted => "Exhausted",
            };
            println!("Download link for order {}:", link.order_id);
            println!("  State: {}", state);
            println!("  Downloads: {}/{} ({} remaining)", link.downloads, link.max_downloads, link.remaining());
            println!("  Expires: {}", format_time(link.expires_at));
            println!("  Created: {}", format_time(link.created_at));
        }
    }
    Ok(())
}

fn handle_presign_command(command: &PresignCommands) -> Result<()> {
    let (method, key, expires, explain, storage) = match command {
        PresignCommands::Put { key, expires, explain, storage, .. } => ("PUT", key, *expires, *explain, storage),
        PresignCommands::Get { key, expires, explain, storage } => ("GET", key, *expires, *explain, storage),
    };

    let signer = UrlSigner::new(StorageCredentials {
        access_key_id: storage.access_key_id.clone(),
        secret_access_key: storage.secret_access_key.clone(),
        region: storage.region.clone(),
        bucket: storage.bucket.clone(),
        endpoint: storage.endpoint.clone(),
    })?;
    let now = Utc::now();

    if explain {
        let parts = signer.signing_parts(method, key, expires, now)?;
        println!("Canonical request:\n{}\n", parts.canonical_request);
        println!("String to sign:\n{}\n", parts.string_to_sign);
        println!("Signature: {}\n", parts.signature);
    }

    match command {
        PresignCommands::Put { content_type, .. } => {
            let upload = signer.presign_put_at(key, content_type, Some(expires), now)?;
            println!("{} {}", upload.method, upload.url);
            for (name, value) in &upload.headers {
                println!("  {}: {}", name, value);
            }
        }
        PresignCommands::Get { .. } => {
            println!("GET {}", signer.presign_get_at(key, expires, now)?);
        }
    }
    Ok(())
}

fn format_time(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
