use anyhow::Result;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::*;

const BEAT_COLUMNS: &str = "id, title, slug, bpm, musical_key, genre, mood, price_cents, preview_url, archive_object_key, archive_file_name, archive_file_type, archive_file_size, is_published, created_at";
const ORDER_COLUMNS: &str = "id, beat_id, stripe_checkout_id, stripe_payment_id, customer_email, amount_total_cents, license_tier, status, created_at, fulfilled_at";
const LINK_COLUMNS: &str = "id, token, order_id, expires_at, downloads, max_downloads, created_at";

/// Fixed-width UTC text form. Every stored timestamp uses it, so string
/// comparison in SQL matches chronological order.
pub fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn beat_from_row(row: &SqliteRow) -> Result<Beat> {
    Ok(Beat {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        title: row.get("title"),
        slug: row.get("slug"),
        bpm: row.get("bpm"),
        musical_key: row.get("musical_key"),
        genre: row.get("genre"),
        mood: row.get("mood"),
        price_cents: row.get("price_cents"),
        preview_url: row.get("preview_url"),
        archive_object_key: row.get("archive_object_key"),
        archive_file_name: row.get("archive_file_name"),
        archive_file_type: row.get("archive_file_type"),
        archive_file_size: row.get("archive_file_size"),
        is_published: row.get("is_published"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn order_from_row(row: &SqliteRow) -> Result<Order> {
    Ok(Order {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        beat_id: Uuid::parse_str(&row.get::<String, _>("beat_id"))?,
        stripe_checkout_id: row.get("stripe_checkout_id"),
        stripe_payment_id: row.get("stripe_payment_id"),
        customer_email: row.get("customer_email"),
        amount_total_cents: row.get("amount_total_cents"),
        license_tier: row.get("license_tier"),
        status: row.get::<String, _>("status").parse()?,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        fulfilled_at: row
            .get::<Option<String>, _>("fulfilled_at")
            .map(|s| parse_timestamp(&s))
            .transpose()?,
    })
}

fn link_from_row(row: &SqliteRow) -> Result<DownloadLink> {
    Ok(DownloadLink {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        token: row.get("token"),
        order_id: Uuid::parse_str(&row.get::<String, _>("order_id"))?,
        expires_at: parse_timestamp(&row.get::<String, _>("expires_at"))?,
        downloads: row.get("downloads"),
        max_downloads: row.get("max_downloads"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

pub struct BeatRepository {
    pool: SqlitePool,
}

impl BeatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, req: CreateBeatRequest) -> Result<Beat> {
        let id = Uuid::new_v4();
        let now = Utc::now().trunc_subsecs(6);

        sqlx::query(
            r#"
            INSERT INTO beats (id, title, slug, bpm, musical_key, genre, mood, price_cents, preview_url,
                               archive_object_key, archive_file_name, archive_file_type, archive_file_size,
                               is_published, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&req.title)
        .bind(&req.slug)
        .bind(req.bpm)
        .bind(&req.musical_key)
        .bind(&req.genre)
        .bind(&req.mood)
        .bind(req.price_cents)
        .bind(&req.preview_url)
        .bind(&req.archive_object_key)
        .bind(&req.archive_file_name)
        .bind(&req.archive_file_type)
        .bind(req.archive_file_size)
        .bind(req.is_published)
        .bind(timestamp(now))
        .execute(&self.pool)
        .await?;

        Ok(Beat {
            id,
            title: req.title,
            slug: req.slug,
            bpm: req.bpm,
            musical_key: req.musical_key,
            genre: req.genre,
            mood: req.mood,
            price_cents: req.price_cents,
            preview_url: req.preview_url,
            archive_object_key: req.archive_object_key,
            archive_file_name: req.archive_file_name,
            archive_file_type: req.archive_file_type,
            archive_file_size: req.archive_file_size,
            is_published: req.is_published,
            created_at: now,
        })
    }

    /// Insert-or-update keyed by slug. Used for seeding.
    pub async fn upsert_by_slug(&self, req: CreateBeatRequest) -> Result<Beat> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO beats (id, title, slug, bpm, musical_key, genre, mood, price_cents, preview_url,
                               archive_object_key, archive_file_name, archive_file_type, archive_file_size,
                               is_published, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                title = excluded.title,
                bpm = excluded.bpm,
                musical_key = excluded.musical_key,
                genre = excluded.genre,
                mood = excluded.mood,
                price_cents = excluded.price_cents,
                preview_url = excluded.preview_url,
                archive_object_key = excluded.archive_object_key,
                archive_file_name = excluded.archive_file_name,
                archive_file_type = excluded.archive_file_type,
                archive_file_size = excluded.archive_file_size,
                is_published = excluded.is_published
            RETURNING {}
            "#,
            BEAT_COLUMNS
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(&req.title)
        .bind(&req.slug)
        .bind(req.bpm)
        .bind(&req.musical_key)
        .bind(&req.genre)
        .bind(&req.mood)
        .bind(req.price_cents)
        .bind(&req.preview_url)
        .bind(&req.archive_object_key)
        .bind(&req.archive_file_name)
        .bind(&req.archive_file_type)
        .bind(req.archive_file_size)
        .bind(req.is_published)
        .bind(timestamp(Utc::now()))
        .fetch_one(&self.pool)
        .await?;

        beat_from_row(&row)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Beat>> {
        let row = sqlx::query(&format!("SELECT {} FROM beats WHERE id = ?", BEAT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(beat_from_row).transpose()
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<Beat>> {
        let row = sqlx::query(&format!("SELECT {} FROM beats WHERE slug = ?", BEAT_COLUMNS))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(beat_from_row).transpose()
    }

    pub async fn list(&self, include_unpublished: bool) -> Result<Vec<Beat>> {
        let rows = if include_unpublished {
            sqlx::query(&format!("SELECT {} FROM beats ORDER BY created_at DESC", BEAT_COLUMNS))
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query(&format!(
                "SELECT {} FROM beats WHERE is_published = true ORDER BY created_at DESC",
                BEAT_COLUMNS
            ))
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(beat_from_row).collect()
    }
}

pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create-if-absent, else update, keyed by the checkout session id. One
    /// statement, so concurrent deliveries of the same event converge on a
    /// single row.
    pub async fn upsert(&self, req: UpsertOrderRequest) -> Result<Order> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders (id, beat_id, stripe_checkout_id, stripe_payment_id, customer_email,
                                amount_total_cents, license_tier, status, created_at, fulfilled_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(stripe_checkout_id) DO UPDATE SET
                stripe_payment_id = excluded.stripe_payment_id,
                customer_email = excluded.customer_email,
                amount_total_cents = excluded.amount_total_cents,
                license_tier = COALESCE(excluded.license_tier, orders.license_tier),
                status = excluded.status,
                fulfilled_at = excluded.fulfilled_at
            RETURNING {}
            "#,
            ORDER_COLUMNS
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(req.beat_id.to_string())
        .bind(&req.stripe_checkout_id)
        .bind(&req.stripe_payment_id)
        .bind(&req.customer_email)
        .bind(req.amount_total_cents)
        .bind(&req.license_tier)
        .bind(req.status.as_str())
        .bind(timestamp(Utc::now()))
        .bind(req.fulfilled_at.map(timestamp))
        .fetch_one(&self.pool)
        .await?;

        order_from_row(&row)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {} FROM orders WHERE id = ?", ORDER_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    pub async fn find_by_checkout_id(&self, stripe_checkout_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE stripe_checkout_id = ?",
            ORDER_COLUMNS
        ))
        .bind(stripe_checkout_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    pub async fn list_recent(&self, limit: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders ORDER BY created_at DESC LIMIT ?",
            ORDER_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    /// Object key of the archive purchased by an order.
    pub async fn archive_object_key(&self, order_id: Uuid) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT b.archive_object_key
            FROM orders o
            JOIN beats b ON b.id = o.beat_id
            WHERE o.id = ?
            "#,
        )
        .bind(order_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.get("archive_object_key")))
    }
}

pub struct DownloadLinkRepository {
    pool: SqlitePool,
}

impl DownloadLinkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, req: CreateDownloadLinkRequest) -> Result<DownloadLink> {
        let id = Uuid::new_v4();
        let now = Utc::now().trunc_subsecs(6);
        let expires_at = req.expires_at.trunc_subsecs(6);

        sqlx::query(
            r#"
            INSERT INTO download_links (id, token, order_id, expires_at, downloads, max_downloads, created_at)
            VALUES (?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&req.token)
        .bind(req.order_id.to_string())
        .bind(timestamp(expires_at))
        .bind(req.max_downloads)
        .bind(timestamp(now))
        .execute(&self.pool)
        .await?;

        Ok(DownloadLink {
            id,
            token: req.token,
            order_id: req.order_id,
            expires_at,
            downloads: 0,
            max_downloads: req.max_downloads,
            created_at: now,
        })
    }

    /// Inserts the link only when the order has none yet. Returns the order's
    /// link and whether it was created by this call.
    pub async fn create_if_absent_for_order(
        &self,
        req: CreateDownloadLinkRequest,
    ) -> Result<(DownloadLink, bool)> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO download_links (id, token, order_id, expires_at, downloads, max_downloads, created_at)
            SELECT ?, ?, ?, ?, 0, ?, ?
            WHERE NOT EXISTS (SELECT 1 FROM download_links WHERE order_id = ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&req.token)
        .bind(req.order_id.to_string())
        .bind(timestamp(req.expires_at))
        .bind(req.max_downloads)
        .bind(timestamp(now))
        .bind(req.order_id.to_string())
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() > 0;
        let link = self
            .find_by_order(req.order_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Download link for order {} vanished", req.order_id))?;

        Ok((link, created))
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<DownloadLink>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM download_links WHERE token = ?",
            LINK_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(link_from_row).transpose()
    }

    /// Earliest link issued for an order.
    pub async fn find_by_order(&self, order_id: Uuid) -> Result<Option<DownloadLink>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM download_links WHERE order_id = ? ORDER BY created_at ASC LIMIT 1",
            LINK_COLUMNS
        ))
        .bind(order_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(link_from_row).transpose()
    }

    /// Consumes one download. The check and the increment are a single
    /// conditional UPDATE, so `downloads` can never pass `max_downloads` and
    /// an expired link is never counted. Returns the updated link, or `None`
    /// when nothing matched (unknown token, expired, or quota spent).
    pub async fn try_consume(&self, token: &str, now: DateTime<Utc>) -> Result<Option<DownloadLink>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE download_links
            SET downloads = downloads + 1
            WHERE token = ? AND downloads < max_downloads AND expires_at > ?
            RETURNING {}
            "#,
            LINK_COLUMNS
        ))
        .bind(token)
        .bind(timestamp(now))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(link_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CatalogService;
    use chrono::Duration;

    fn beat_request(slug: &str) -> CreateBeatRequest {
        CreateBeatRequest {
            title: "Midnight Asphalt".to_string(),
            slug: slug.to_string(),
            bpm: 142,
            musical_key: "F minor".to_string(),
            genre: "Trap".to_string(),
            mood: "Dark".to_string(),
            price_cents: 4999,
            preview_url: "https://cdn.example.com/preview.mp3".to_string(),
            archive_object_key: format!("beats/{}.zip", slug),
            archive_file_name: format!("{}.zip", slug),
            archive_file_type: "application/zip".to_string(),
            archive_file_size: 18_400_000,
            is_published: true,
        }
    }

    fn order_request(beat_id: Uuid, session: &str) -> UpsertOrderRequest {
        UpsertOrderRequest {
            beat_id,
            stripe_checkout_id: session.to_string(),
            stripe_payment_id: Some("pi_123".to_string()),
            customer_email: "buyer@example.com".to_string(),
            amount_total_cents: 2499,
            license_tier: Some("mp3_tagged".to_string()),
            status: OrderStatus::Paid,
            fulfilled_at: Some(Utc::now()),
        }
    }

    async fn seeded_order(catalog: &CatalogService) -> Order {
        let beat = BeatRepository::new(catalog.pool().clone())
            .create(beat_request("midnight-asphalt"))
            .await
            .unwrap();
        OrderRepository::new(catalog.pool().clone())
            .upsert(order_request(beat.id, "cs_test_1"))
            .await
            .unwrap()
    }

    fn link_request(order_id: Uuid, token: &str, expires_at: DateTime<Utc>) -> CreateDownloadLinkRequest {
        CreateDownloadLinkRequest {
            token: token.to_string(),
            order_id,
            expires_at,
            max_downloads: 5,
        }
    }

    #[tokio::test]
    async fn beats_round_trip_and_filter_unpublished() {
        let catalog = CatalogService::in_memory().await.unwrap();
        let repo = BeatRepository::new(catalog.pool().clone());

        let published = repo.create(beat_request("golden-window")).await.unwrap();
        let mut hidden = beat_request("draft-beat");
        hidden.is_published = false;
        repo.create(hidden).await.unwrap();

        let found = repo.find_by_slug("golden-window").await.unwrap().unwrap();
        assert_eq!(found.id, published.id);
        assert_eq!(found.created_at, published.created_at);
        assert_eq!(repo.list(false).await.unwrap().len(), 1);
        assert_eq!(repo.list(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upsert_by_slug_keeps_one_row() {
        let catalog = CatalogService::in_memory().await.unwrap();
        let repo = BeatRepository::new(catalog.pool().clone());

        let first = repo.upsert_by_slug(beat_request("golden-window")).await.unwrap();
        let mut changed = beat_request("golden-window");
        changed.bpm = 94;
        let second = repo.upsert_by_slug(changed).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.bpm, 94);
        assert_eq!(repo.list(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn order_upsert_is_keyed_by_checkout_session() {
        let catalog = CatalogService::in_memory().await.unwrap();
        let beat = BeatRepository::new(catalog.pool().clone())
            .create(beat_request("midnight-asphalt"))
            .await
            .unwrap();
        let orders = OrderRepository::new(catalog.pool().clone());

        let first = orders.upsert(order_request(beat.id, "cs_test_1")).await.unwrap();
        let mut again = order_request(beat.id, "cs_test_1");
        again.amount_total_cents = 1999;
        let second = orders.upsert(again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.amount_total_cents, 1999);
        assert_eq!(second.status, OrderStatus::Paid);
        assert_eq!(orders.list_recent(10).await.unwrap().len(), 1);
        assert_eq!(
            orders.archive_object_key(first.id).await.unwrap().as_deref(),
            Some("beats/midnight-asphalt.zip")
        );
    }

    #[tokio::test]
    async fn try_consume_stops_at_quota() {
        let catalog = CatalogService::in_memory().await.unwrap();
        let order = seeded_order(&catalog).await;
        let links = DownloadLinkRepository::new(catalog.pool().clone());
        let now = Utc::now();

        links
            .create(link_request(order.id, "tok-quota", now + Duration::hours(72)))
            .await
            .unwrap();

        for expected in 1..=5 {
            let link = links.try_consume("tok-quota", now).await.unwrap().unwrap();
            assert_eq!(link.downloads, expected);
        }
        assert!(links.try_consume("tok-quota", now).await.unwrap().is_none());

        let stored = links.find_by_token("tok-quota").await.unwrap().unwrap();
        assert_eq!(stored.downloads, 5);
    }

    #[tokio::test]
    async fn try_consume_refuses_expired_links() {
        let catalog = CatalogService::in_memory().await.unwrap();
        let order = seeded_order(&catalog).await;
        let links = DownloadLinkRepository::new(catalog.pool().clone());
        let now = Utc::now();

        let link = links
            .create(link_request(order.id, "tok-expiry", now + Duration::hours(1)))
            .await
            .unwrap();

        assert!(links.try_consume("tok-expiry", link.expires_at).await.unwrap().is_none());
        assert!(links
            .try_consume("tok-expiry", link.expires_at - Duration::microseconds(1))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn create_if_absent_reuses_the_first_link() {
        let catalog = CatalogService::in_memory().await.unwrap();
        let order = seeded_order(&catalog).await;
        let links = DownloadLinkRepository::new(catalog.pool().clone());
        let expires_at = Utc::now() + Duration::hours(72);

        let (first, created) = links
            .create_if_absent_for_order(link_request(order.id, "tok-first", expires_at))
            .await
            .unwrap();
        assert!(created);

        let (second, created) = links
            .create_if_absent_for_order(link_request(order.id, "tok-second", expires_at))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(second.token, first.token);
        assert!(links.find_by_token("tok-second").await.unwrap().is_none());
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let a = Utc::now();
        let b = a + Duration::milliseconds(5);
        let c = b + Duration::days(400);
        assert!(timestamp(a) < timestamp(b));
        assert!(timestamp(b) < timestamp(c));
        assert_eq!(timestamp(a).len(), timestamp(c).len());
    }
}
