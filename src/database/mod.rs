use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::{Price, ProductIdentity, ProductRecord, SourceSite};
use crate::traits::{ProductFilter, ProductStore, UpsertOutcome};

const COLUMNS: &str = "source, category, foreign_id, variant_id, brand, name, price_minor, currency, \
    rating, size, description, images, ingredients, url, content_hash, first_seen_at, scraped_at";

/// SQLite-backed product store
///
/// Clones share the pool and the write lock, so upserts from every clone
/// commit one at a time.
pub struct Database {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl Database {
    /// Open (creating if needed) the database at `db_url` and run migrations
    pub async fn new(db_url: &str) -> Result<Self> {
        let in_memory = db_url.contains(":memory:") || db_url.contains("mode=memory");

        let pool = if in_memory {
            // Every connection to an in-memory database sees its own empty file
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(db_url)
                .await?
        } else {
            if let Some(parent) = database_path(db_url).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }

            // Create database file if it doesn't exist
            if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
                info!("Creating database file {}", db_url);
                Sqlite::create_database(db_url).await?;
            }
            SqlitePool::connect(db_url).await?
        };

        // Run migrations
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn database_path(db_url: &str) -> &Path {
    let path = db_url.trim_start_matches("sqlite:").trim_start_matches("//");
    Path::new(path.split('?').next().unwrap_or(path))
}

fn product_from_row(row: &SqliteRow) -> Result<ProductRecord> {
    let source: String = row.get("source");
    let variant_id: String = row.get("variant_id");
    let images: String = row.get("images");
    let ingredients: String = row.get("ingredients");

    Ok(ProductRecord {
        source: source.parse::<SourceSite>()?,
        category: row.get("category"),
        foreign_id: row.get("foreign_id"),
        variant_id: (!variant_id.is_empty()).then_some(variant_id),
        brand: row.get("brand"),
        name: row.get("name"),
        price: Price::new(row.get("price_minor"), row.get::<String, _>("currency")),
        rating: row.get("rating"),
        size: row.get("size"),
        description: row.get("description"),
        images: serde_json::from_str(&images).context("Corrupt images column")?,
        ingredients: serde_json::from_str(&ingredients).context("Corrupt ingredients column")?,
        url: row.get("url"),
        scraped_at: row.get::<DateTime<Utc>, _>("scraped_at"),
    })
}

#[async_trait]
impl ProductStore for Database {
    async fn upsert(&self, record: &ProductRecord) -> Result<UpsertOutcome> {
        let variant_id = record.variant_id.as_deref().unwrap_or_default();
        let hash = record.content_hash();

        // One writer at a time: a deferred transaction that has already read
        // cannot take the write lock while another connection holds it
        let _write = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT content_hash FROM products
             WHERE source = ? AND category = ? AND foreign_id = ? AND variant_id = ?",
        )
        .bind(record.source.as_str())
        .bind(&record.category)
        .bind(&record.foreign_id)
        .bind(variant_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            None => UpsertOutcome::Inserted,
            Some(previous) if previous == hash => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Replaced,
        };

        // first_seen_at is left alone on conflict
        sqlx::query(&format!(
            r"
            INSERT INTO products ({COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (source, category, foreign_id, variant_id) DO UPDATE SET
                brand = excluded.brand,
                name = excluded.name,
                price_minor = excluded.price_minor,
                currency = excluded.currency,
                rating = excluded.rating,
                size = excluded.size,
                description = excluded.description,
                images = excluded.images,
                ingredients = excluded.ingredients,
                url = excluded.url,
                content_hash = excluded.content_hash,
                scraped_at = excluded.scraped_at
            "
        ))
        .bind(record.source.as_str())
        .bind(&record.category)
        .bind(&record.foreign_id)
        .bind(variant_id)
        .bind(&record.brand)
        .bind(&record.name)
        .bind(record.price.minor_units)
        .bind(&record.price.currency)
        .bind(record.rating)
        .bind(&record.size)
        .bind(&record.description)
        .bind(serde_json::to_string(&record.images)?)
        .bind(serde_json::to_string(&record.ingredients)?)
        .bind(&record.url)
        .bind(&hash)
        .bind(record.scraped_at)
        .bind(record.scraped_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            "{:?} {}/{}/{}{}",
            outcome,
            record.source,
            record.category,
            record.foreign_id,
            record.variant_id.as_deref().map(|v| format!("#{v}")).unwrap_or_default()
        );
        Ok(outcome)
    }

    async fn find(&self, identity: &ProductIdentity) -> Result<Option<ProductRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM products
             WHERE source = ? AND category = ? AND foreign_id = ? AND variant_id = ?"
        ))
        .bind(identity.source.as_str())
        .bind(&identity.category)
        .bind(&identity.foreign_id)
        .bind(identity.variant_id.as_deref().unwrap_or_default())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn scan(&self, filter: &ProductFilter) -> Result<Vec<ProductRecord>> {
        let source = filter.source.map(SourceSite::as_str);
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM products
             WHERE (? IS NULL OR source = ?) AND (? IS NULL OR category = ?)
             ORDER BY row_id"
        ))
        .bind(source)
        .bind(source)
        .bind(&filter.category)
        .bind(&filter.category)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(product_from_row).collect()
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            write_lock: self.write_lock.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn record(foreign_id: &str, variant_id: Option<&str>) -> ProductRecord {
        ProductRecord {
            source: SourceSite::Sephora,
            category: "cleanser".to_string(),
            foreign_id: foreign_id.to_string(),
            variant_id: variant_id.map(str::to_string),
            brand: "Tatcha".to_string(),
            name: "The Rice Wash".to_string(),
            price: Price::new(4_000, "USD"),
            rating: Some(4.5),
            size: Some("4 fl oz".to_string()),
            description: None,
            images: vec!["https://www.sephora.com/a.jpg".to_string()],
            ingredients: vec!["water".to_string(), "rice bran".to_string()],
            url: format!("https://www.sephora.com/product/rice-wash-{foreign_id}"),
            scraped_at: Utc::now(),
        }
    }

    async fn first_seen(db: &Database, foreign_id: &str) -> String {
        sqlx::query_scalar("SELECT first_seen_at FROM products WHERE foreign_id = ?")
            .bind(foreign_id)
            .fetch_one(&db.pool)
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_to_a_file_database_all_commit() {
        let path = std::env::temp_dir().join(format!(
            "catalog-upsert-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let db = Database::new(&format!("sqlite://{}", path.display())).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..64 {
            let db = db.clone();
            tasks.push(tokio::spawn(async move {
                let mut product = record("P1", None);
                product.scraped_at = Utc::now();
                db.upsert(&product).await
            }));
        }
        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.unwrap().unwrap());
        }

        let inserted = outcomes.iter().filter(|o| **o == UpsertOutcome::Inserted).count();
        let unchanged = outcomes.iter().filter(|o| **o == UpsertOutcome::Unchanged).count();
        assert_eq!((inserted, unchanged), (1, 63));
        assert_eq!(db.count().await.unwrap(), 1);

        db.pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }

    #[test]
    fn strips_scheme_from_file_urls() {
        assert_eq!(
            database_path("sqlite:database/catalog.db"),
            Path::new("database/catalog.db")
        );
        assert_eq!(
            database_path("sqlite:///tmp/catalog.db?mode=rwc"),
            Path::new("/tmp/catalog.db")
        );
    }

    #[tokio::test]
    async fn repeated_upsert_keeps_one_row() {
        let db = memory_db().await;
        let product = record("P1", None);

        assert_eq!(db.upsert(&product).await.unwrap(), UpsertOutcome::Inserted);
        let seen = first_seen(&db, "P1").await;

        let mut again = product.clone();
        again.scraped_at = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(db.upsert(&again).await.unwrap(), UpsertOutcome::Unchanged);

        assert_eq!(db.count().await.unwrap(), 1);
        assert_eq!(first_seen(&db, "P1").await, seen);
    }

    #[tokio::test]
    async fn changed_content_replaces_every_field() {
        let db = memory_db().await;
        db.upsert(&record("P1", None)).await.unwrap();

        let mut changed = record("P1", None);
        changed.price = Price::new(3_600, "USD");
        changed.rating = None;
        changed.ingredients = vec!["rice bran".to_string()];
        assert_eq!(db.upsert(&changed).await.unwrap(), UpsertOutcome::Replaced);

        let stored = db.find(&changed.identity()).await.unwrap().unwrap();
        assert_eq!(stored.price, Price::new(3_600, "USD"));
        assert_eq!(stored.rating, None);
        assert_eq!(stored.ingredients, vec!["rice bran".to_string()]);
        assert_eq!(db.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn variants_are_distinct_identities() {
        let db = memory_db().await;
        db.upsert(&record("P1", None)).await.unwrap();
        db.upsert(&record("P1", Some("101"))).await.unwrap();
        db.upsert(&record("P1", Some("102"))).await.unwrap();

        assert_eq!(db.count().await.unwrap(), 3);
        let plain = db.find(&record("P1", None).identity()).await.unwrap().unwrap();
        assert_eq!(plain.variant_id, None);
        let variant = db.find(&record("P1", Some("102")).identity()).await.unwrap().unwrap();
        assert_eq!(variant.variant_id.as_deref(), Some("102"));
        assert!(db.find(&record("P2", None).identity()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scan_filters_and_keeps_insertion_order() {
        let db = memory_db().await;
        db.upsert(&record("P2", None)).await.unwrap();
        db.upsert(&record("P1", None)).await.unwrap();
        let mut lips = record("P3", None);
        lips.category = "lip-treatments".to_string();
        db.upsert(&lips).await.unwrap();
        let mut other_site = record("P4", None);
        other_site.source = SourceSite::Walgreens;
        db.upsert(&other_site).await.unwrap();

        let all = db.scan(&ProductFilter::default()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.foreign_id.as_str()).collect();
        assert_eq!(ids, vec!["P2", "P1", "P3", "P4"]);

        let cleansers = db
            .scan(&ProductFilter {
                source: Some(SourceSite::Sephora),
                category: Some("cleanser".to_string()),
            })
            .await
            .unwrap();
        let ids: Vec<_> = cleansers.iter().map(|r| r.foreign_id.as_str()).collect();
        assert_eq!(ids, vec!["P2", "P1"]);
        assert_eq!(cleansers[0].images, vec!["https://www.sephora.com/a.jpg".to_string()]);
    }
}
