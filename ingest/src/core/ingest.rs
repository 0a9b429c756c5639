use serde::Serialize;
use std::sync::Arc;

use crate::core::error::Result;
use crate::core::feed_parser::{self, parse_pub_date, RawFeedItem};
use crate::core::fetcher::FeedFetcher;
use crate::core::scraper::Scraper;
use crate::core::services::ServiceClient;
use crate::core::store::{Feed, NewNewsItem, Store};
use crate::core::text::generate_slug;

/// A row created during this run, as handed to the AI stages.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertedItem {
    pub id: String,
    pub feed_id: String,
    pub country_code: Option<String>,
    pub title: String,
    pub slug: String,
}

#[derive(Debug, Default)]
pub struct InsertOutcome {
    pub inserted: Vec<InsertedItem>,
    pub duplicates: usize,
    pub failed: usize,
}

/// Per-feed line of an orchestrator report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRunResult {
    pub feed_id: String,
    pub feed_url: String,
    pub success: bool,
    pub parsed: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// Items parsed but not stored because the insert itself failed.
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub new_items: Vec<InsertedItem>,
}

/// Picks the text later AI stages treat as source truth. Feed content wins
/// over the description; a scraped page replaces it only when longer.
pub fn choose_original_content<'a>(scraped: Option<&'a str>, content: &'a str, description: &'a str) -> &'a str {
    let feed_text = if content.trim().is_empty() { description } else { content };
    match scraped {
        Some(page) if page.chars().count() > feed_text.chars().count() => page,
        _ => feed_text,
    }
}

/// Fetch, parse and dedup-insert stage for one feed at a time.
pub struct FeedIngestor {
    store: Store,
    fetcher: Arc<FeedFetcher>,
    scraper: Arc<Scraper>,
    services: ServiceClient,
}

impl FeedIngestor {
    pub fn new(store: Store, fetcher: Arc<FeedFetcher>, scraper: Arc<Scraper>, services: ServiceClient) -> Self {
        Self { store, fetcher, scraper, services }
    }

    /// Inserts parsed items whose link is not yet stored for this feed, in
    /// parse order, stopping after `limit` inserts.
    pub async fn insert_items(&self, feed: &Feed, items: &[RawFeedItem], limit: usize) -> Result<InsertOutcome> {
        let mut seen = self.store.existing_urls(&feed.id).await?;
        let mut outcome = InsertOutcome::default();

        for item in items {
            if outcome.inserted.len() >= limit {
                break;
            }
            if seen.contains(&item.link) {
                outcome.duplicates += 1;
                continue;
            }

            let scraped = self.scraper.scrape(&item.link).await;
            let original_content = choose_original_content(scraped.as_deref(), &item.content, &item.description);
            let slug = generate_slug(&item.title);
            let published_at = item
                .pub_date
                .as_deref()
                .and_then(parse_pub_date)
                .map(|dt| dt.timestamp());

            let row = NewNewsItem {
                feed_id: &feed.id,
                country_id: feed.country_id.as_deref(),
                url: &item.link,
                title: &item.title,
                description: &item.description,
                content: &item.content,
                original_content,
                slug: &slug,
                image_url: item.image_url.as_deref(),
                category: feed.category.as_deref(),
                published_at,
            };

            match self.store.insert_news_item(&row).await {
                Ok(Some(id)) => {
                    seen.insert(item.link.clone());
                    self.services.refresh_page_cache(&slug);
                    outcome.inserted.push(InsertedItem {
                        id,
                        feed_id: feed.id.clone(),
                        country_code: feed.country_code.clone(),
                        title: item.title.clone(),
                        slug,
                    });
                }
                Ok(None) => {
                    seen.insert(item.link.clone());
                    outcome.duplicates += 1;
                }
                Err(e) => {
                    log::warn!("Failed to insert {} for feed {}: {}", item.link, feed.id, e);
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Fetches, parses and inserts one feed, recording the attempt on the
    /// feed row. Failures end up in the result instead of propagating.
    pub async fn run_feed(&self, feed: &Feed, limit: usize) -> FeedRunResult {
        let mut result = FeedRunResult {
            feed_id: feed.id.clone(),
            feed_url: feed.url.clone(),
            success: false,
            parsed: 0,
            inserted: 0,
            duplicates: 0,
            failed: 0,
            error: None,
            new_items: Vec::new(),
        };

        let attempt = async {
            let body = self.fetcher.fetch(&feed.url).await?;
            let items = feed_parser::parse(&body);
            let outcome = self.insert_items(feed, &items, limit).await?;
            Ok::<_, crate::core::error::IngestError>((items.len(), outcome))
        };

        match attempt.await {
            Ok((parsed, outcome)) => {
                if let Err(e) = self.store.mark_feed_fetched(&feed.id).await {
                    log::warn!("Could not record fetch of feed {}: {}", feed.id, e);
                }
                log::info!(
                    "Feed {} ({}): parsed {}, inserted {}, duplicates {}, failed {}",
                    feed.id,
                    feed.url,
                    parsed,
                    outcome.inserted.len(),
                    outcome.duplicates,
                    outcome.failed
                );
                result.success = true;
                result.parsed = parsed;
                result.inserted = outcome.inserted.len();
                result.duplicates = outcome.duplicates;
                result.failed = outcome.failed;
                result.new_items = outcome.inserted;
            }
            Err(e) => {
                let message = e.to_string();
                log::warn!("Feed {} ({}) failed: {}", feed.id, feed.url, message);
                if let Err(e) = self.store.mark_feed_failed(&feed.id, &message).await {
                    log::warn!("Could not record failure of feed {}: {}", feed.id, e);
                }
                result.error = Some(message);
            }
        }

        result
    }
}
