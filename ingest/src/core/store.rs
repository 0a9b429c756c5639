use serde::Serialize;
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite};
use std::collections::HashSet;
use uuid::Uuid;

use crate::core::error::Result;
use crate::core::settings::{RetellSettings, SETTINGS_KEY};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Country {
    pub id: String,
    pub code: String,
    pub name: String,
}

/// A configured RSS/Atom source, joined with its country code.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Feed {
    pub id: String,
    pub country_id: Option<String>,
    pub country_code: Option<String>,
    pub name: Option<String>,
    pub url: String,
    pub category: Option<String>,
    pub is_active: bool,
    pub last_fetched_at: Option<i64>,
    pub fetch_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct NewsItem {
    pub id: String,
    pub feed_id: String,
    pub country_id: Option<String>,
    pub external_id: String,
    pub title: String,
    pub title_en: Option<String>,
    pub description: Option<String>,
    pub description_en: Option<String>,
    pub content: Option<String>,
    pub content_en: Option<String>,
    pub original_content: Option<String>,
    pub url: String,
    pub slug: Option<String>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub published_at: Option<i64>,
    pub fetched_at: i64,
    pub chat_dialogue: Option<String>,
    pub tweets: Option<String>,
}

/// Row about to be written by the insertion stage.
#[derive(Debug, Clone)]
pub struct NewNewsItem<'a> {
    pub feed_id: &'a str,
    pub country_id: Option<&'a str>,
    pub url: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub content: &'a str,
    pub original_content: &'a str,
    pub slug: &'a str,
    pub image_url: Option<&'a str>,
    pub category: Option<&'a str>,
    pub published_at: Option<i64>,
}

/// Identity of an item the AI stages still have to handle.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PendingItem {
    pub id: String,
    pub title: String,
    pub slug: Option<String>,
    pub country_code: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PendingCount {
    pub country_code: String,
    pub country_name: String,
    pub pending: i64,
}

const FEED_COLUMNS: &str = "f.id, f.country_id, c.code AS country_code, f.name, f.url, f.category, \
     f.is_active, f.last_fetched_at, f.fetch_error \
     FROM feeds f LEFT JOIN countries c ON c.id = f.country_id";

#[derive(Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
}

impl Store {
    /// Connects to `database_url`, creating the file when needed, and runs the
    /// schema migration. In-memory URLs get a single long-lived connection.
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(database_url)
                .await?
        } else {
            if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
                Sqlite::create_database(database_url).await?;
            }
            SqlitePool::connect(database_url).await?
        };

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS countries (
                id TEXT PRIMARY KEY,
                code TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS feeds (
                id TEXT PRIMARY KEY,
                country_id TEXT,
                name TEXT,
                url TEXT NOT NULL,
                category TEXT,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                last_fetched_at INTEGER,
                fetch_error TEXT,
                created_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS news_items (
                id TEXT PRIMARY KEY,
                feed_id TEXT NOT NULL,
                country_id TEXT,
                external_id TEXT NOT NULL,
                title TEXT NOT NULL,
                title_en TEXT,
                description TEXT,
                description_en TEXT,
                content TEXT,
                content_en TEXT,
                original_content TEXT,
                url TEXT NOT NULL,
                slug TEXT,
                image_url TEXT,
                category TEXT,
                published_at INTEGER,
                fetched_at INTEGER NOT NULL,
                chat_dialogue TEXT,
                tweets TEXT,
                UNIQUE (feed_id, external_id)
            );
            CREATE INDEX IF NOT EXISTS idx_news_items_pending ON news_items (fetched_at) WHERE content_en IS NULL;
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- countries & feeds ---

    pub async fn create_country(&self, code: &str, name: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO countries (id, code, name) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(code.to_lowercase())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn find_country(&self, id: &str) -> Result<Option<Country>> {
        let country = sqlx::query_as::<_, Country>("SELECT id, code, name FROM countries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(country)
    }

    pub async fn countries(&self) -> Result<Vec<Country>> {
        let countries = sqlx::query_as::<_, Country>("SELECT id, code, name FROM countries ORDER BY code")
            .fetch_all(&self.pool)
            .await?;
        Ok(countries)
    }

    pub async fn create_feed(
        &self,
        country_id: &str,
        name: &str,
        url: &str,
        category: Option<&str>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO feeds (id, country_id, name, url, category, is_active, created_at) VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&id)
        .bind(country_id)
        .bind(name)
        .bind(url)
        .bind(category)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn set_feed_active(&self, feed_id: &str, active: bool) -> Result<()> {
        sqlx::query("UPDATE feeds SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn find_feed(&self, feed_id: &str) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>(&format!("SELECT {} WHERE f.id = ?", FEED_COLUMNS))
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn active_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {} WHERE f.is_active = 1 ORDER BY f.rowid",
            FEED_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn active_feeds_for_country(&self, country_id: &str) -> Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {} WHERE f.is_active = 1 AND f.country_id = ? ORDER BY f.rowid",
            FEED_COLUMNS
        ))
        .bind(country_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn mark_feed_fetched(&self, feed_id: &str) -> Result<()> {
        sqlx::query("UPDATE feeds SET last_fetched_at = ?, fetch_error = NULL WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_feed_failed(&self, feed_id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE feeds SET last_fetched_at = ?, fetch_error = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- news items ---

    /// Every stored source URL for the feed, in one query.
    pub async fn existing_urls(&self, feed_id: &str) -> Result<HashSet<String>> {
        let rows = sqlx::query_as::<_, (String,)>("SELECT external_id FROM news_items WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    pub async fn count_items_for_feed(&self, feed_id: &str) -> Result<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM news_items WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Inserts a new row and returns its id, or `None` when `(feed_id, url)`
    /// is already stored. Title and description are copied into the `_en`
    /// columns as placeholders; `content_en` stays empty until retold.
    pub async fn insert_news_item(&self, item: &NewNewsItem<'_>) -> Result<Option<String>> {
        let id = Uuid::new_v4().to_string();
        let result = sqlx::query(
            r#"
            INSERT INTO news_items (
                id, feed_id, country_id, external_id, title, title_en, description, description_en,
                content, original_content, url, slug, image_url, category, published_at, fetched_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (feed_id, external_id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(item.feed_id)
        .bind(item.country_id)
        .bind(item.url)
        .bind(item.title)
        .bind(item.title)
        .bind(item.description)
        .bind(item.description)
        .bind(item.content)
        .bind(item.original_content)
        .bind(item.url)
        .bind(item.slug)
        .bind(item.image_url)
        .bind(item.category)
        .bind(item.published_at)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok((result.rows_affected() > 0).then_some(id))
    }

    pub async fn find_news_item(&self, id: &str) -> Result<Option<NewsItem>> {
        let item = sqlx::query_as::<_, NewsItem>(
            r#"
            SELECT id, feed_id, country_id, external_id, title, title_en, description, description_en,
                   content, content_en, original_content, url, slug, image_url, category,
                   published_at, fetched_at, chat_dialogue, tweets
            FROM news_items WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    /// Additive write of retold fields; absent values leave columns untouched.
    pub async fn save_retell(
        &self,
        id: &str,
        title_en: Option<&str>,
        description_en: Option<&str>,
        content_en: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE news_items SET title_en = COALESCE(?, title_en), description_en = COALESCE(?, description_en), \
             content_en = COALESCE(?, content_en) WHERE id = ?",
        )
        .bind(title_en)
        .bind(description_en)
        .bind(content_en)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_dialogue(&self, id: &str, dialogue: &str, tweets: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE news_items SET chat_dialogue = ?, tweets = COALESCE(?, tweets) WHERE id = ?")
            .bind(dialogue)
            .bind(tweets)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn items_missing_slug(&self, limit: usize) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT id, title FROM news_items WHERE slug IS NULL OR slug = '' ORDER BY fetched_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn set_slug(&self, id: &str, slug: &str) -> Result<()> {
        sqlx::query("UPDATE news_items SET slug = ? WHERE id = ?")
            .bind(slug)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Items without `content_en`, fetched at or after `since`, whose country
    /// is one of `country_codes`. Newest first.
    pub async fn pending_items(
        &self,
        country_codes: &[String],
        since: i64,
        limit: usize,
    ) -> Result<Vec<PendingItem>> {
        if country_codes.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; country_codes.len()].join(",");
        let query = format!(
            "SELECT n.id, n.title, n.slug, c.code AS country_code \
             FROM news_items n JOIN countries c ON c.id = n.country_id \
             WHERE n.content_en IS NULL AND n.fetched_at >= ? AND c.code IN ({}) \
             ORDER BY n.fetched_at DESC, n.rowid DESC LIMIT ?",
            placeholders
        );

        let mut query_builder = sqlx::query_as::<_, PendingItem>(&query).bind(since);
        for code in country_codes {
            query_builder = query_builder.bind(code);
        }
        let items = query_builder.bind(limit as i64).fetch_all(&self.pool).await?;
        Ok(items)
    }

    pub async fn pending_counts(&self, country_codes: &[String], since: i64) -> Result<Vec<PendingCount>> {
        if country_codes.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; country_codes.len()].join(",");
        let query = format!(
            "SELECT c.code AS country_code, c.name AS country_name, COUNT(n.id) AS pending \
             FROM countries c LEFT JOIN news_items n \
               ON n.country_id = c.id AND n.content_en IS NULL AND n.fetched_at >= ? \
             WHERE c.code IN ({}) GROUP BY c.code, c.name ORDER BY c.code",
            placeholders
        );

        let mut query_builder = sqlx::query_as::<_, PendingCount>(&query).bind(since);
        for code in country_codes {
            query_builder = query_builder.bind(code);
        }
        Ok(query_builder.fetch_all(&self.pool).await?)
    }

    // --- settings ---

    /// Stored retell settings, or defaults when none are saved or the stored
    /// value no longer parses.
    pub async fn load_settings(&self) -> Result<RetellSettings> {
        let row = sqlx::query_as::<_, (String,)>("SELECT value FROM settings WHERE key = ?")
            .bind(SETTINGS_KEY)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some((value,)) => serde_json::from_str(&value).unwrap_or_else(|e| {
                log::warn!("Stored {} settings are unreadable ({}), using defaults", SETTINGS_KEY, e);
                RetellSettings::default()
            }),
            None => RetellSettings::default(),
        })
    }

    pub async fn save_settings(&self, settings: &RetellSettings) -> Result<()> {
        let value = serde_json::to_string(settings).map_err(anyhow::Error::from)?;
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(SETTINGS_KEY)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
