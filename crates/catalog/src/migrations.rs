use anyhow::Result;
use sqlx::{migrate::MigrateDatabase, Sqlite, SqlitePool};

pub async fn ensure_database_exists(database_url: &str) -> Result<()> {
    if database_url.contains(":memory:") {
        return Ok(());
    }
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        Sqlite::create_database(database_url).await?;
        tracing::info!("Database created: {}", database_url);
    }
    Ok(())
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS beats (
            id TEXT PRIMARY KEY NOT NULL,
            title TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            bpm INTEGER NOT NULL,
            musical_key TEXT NOT NULL,
            genre TEXT NOT NULL,
            mood TEXT NOT NULL,
            price_cents INTEGER NOT NULL,
            preview_url TEXT NOT NULL,
            archive_object_key TEXT NOT NULL,
            archive_file_name TEXT NOT NULL,
            archive_file_type TEXT NOT NULL,
            archive_file_size INTEGER NOT NULL,
            is_published BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY NOT NULL,
            beat_id TEXT NOT NULL,
            stripe_checkout_id TEXT NOT NULL UNIQUE,
            stripe_payment_id TEXT,
            customer_email TEXT NOT NULL,
            amount_total_cents INTEGER NOT NULL,
            license_tier TEXT,
            status TEXT NOT NULL DEFAULT 'PENDING',
            created_at TEXT NOT NULL,
            fulfilled_at TEXT,
            FOREIGN KEY (beat_id) REFERENCES beats (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS download_links (
            id TEXT PRIMARY KEY NOT NULL,
            token TEXT NOT NULL UNIQUE,
            order_id TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            downloads INTEGER NOT NULL DEFAULT 0,
            max_downloads INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (order_id) REFERENCES orders (id) ON DELETE CASCADE,
            CHECK (downloads >= 0 AND downloads <= max_downloads)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_beats_published ON beats (is_published, created_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_download_links_order ON download_links (order_id)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
