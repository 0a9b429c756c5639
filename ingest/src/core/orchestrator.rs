//! Named compositions of the ingestion and AI stages.
//!
//! Every operation is safe to re-run: insertion dedups on `(feed_id, url)` and
//! the AI stages only pick up items still missing `content_en`.

use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::config::{Config, PipelineConfig};
use crate::core::error::{IngestError, Result};
use crate::core::feed_parser;
use crate::core::fetcher::FeedFetcher;
use crate::core::ingest::{FeedIngestor, FeedRunResult, InsertedItem};
use crate::core::pipeline::{pause, ContentPipeline, Stage, StageLog, StageTally, WorkItem};
use crate::core::scraper::Scraper;
use crate::core::services::ServiceClient;
use crate::core::settings::RetellSettings;
use crate::core::store::{Country, Feed, PendingCount, Store};
use crate::core::text::generate_slug;
use crate::core::validator::{self, ValidationReport};

/// Items inserted during one orchestrator call, in insertion order.
#[derive(Debug, Default)]
pub struct InsertedBatch {
    items: Vec<InsertedItem>,
}

impl InsertedBatch {
    pub fn absorb(&mut self, result: &mut FeedRunResult) {
        self.items.append(&mut result.new_items);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn per_country(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            *counts.entry(item.country_code.clone().unwrap_or_default()).or_insert(0) += 1;
        }
        counts
    }

    pub fn work_items(&self) -> Vec<WorkItem> {
        self.items.iter().map(WorkItem::from).collect()
    }

    pub fn slugs(&self) -> Vec<String> {
        self.items.iter().map(|i| i.slug.clone()).collect()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlugBackfillReport {
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFeedReport {
    pub feed_id: String,
    pub feed_url: String,
    pub rss_items: usize,
    pub stored_items: i64,
    pub new_items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryFetchReport {
    pub country_id: String,
    pub country_code: String,
    pub feeds_processed: usize,
    pub feeds_failed: usize,
    pub total_inserted: usize,
    pub results: Vec<FeedRunResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReport {
    #[serde(flatten)]
    pub fetch: CountryFetchReport,
    pub queued_for_retell: usize,
    pub retell: StageTally,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullPipelineReport {
    #[serde(flatten)]
    pub fetch: CountryFetchReport,
    pub retell: StageTally,
    pub dialogue: StageTally,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSweepReport {
    pub feeds_processed: usize,
    pub feeds_failed: usize,
    pub total_inserted: usize,
    pub inserted_by_country: BTreeMap<String, usize>,
    pub eligible: usize,
    pub total_processed: usize,
    pub skipped_due_to_limit: usize,
    pub retell: StageTally,
    pub dialogue: StageTally,
    pub results: Vec<FeedRunResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingStatsReport {
    pub window_hours: i64,
    pub total_pending: i64,
    pub countries: Vec<PendingCount>,
}

#[derive(Debug, Default, Clone)]
pub struct PendingRequest {
    pub country_code: Option<String>,
    pub limit: Option<usize>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReport {
    pub found: usize,
    pub batch_size: usize,
    pub batches: usize,
    pub retell: StageTally,
    pub dialogue: StageTally,
    pub logs: Vec<StageLog>,
}

pub struct Orchestrator {
    store: Store,
    fetcher: Arc<FeedFetcher>,
    ingestor: FeedIngestor,
    pipeline: ContentPipeline,
    services: ServiceClient,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(store: Store, config: Config) -> Self {
        let fetcher = Arc::new(FeedFetcher::new(config.fetch.clone()));
        let scraper = Arc::new(Scraper::new(config.services.clone(), config.fetch.scrape_enabled));
        let services = ServiceClient::new(config.services.clone(), config.site.clone());
        let ingestor = FeedIngestor::new(store.clone(), fetcher.clone(), scraper, services.clone());
        let pipeline = ContentPipeline::new(store.clone(), services.clone(), config.pipeline.clone());

        Self {
            store,
            fetcher,
            ingestor,
            pipeline,
            services,
            config: config.pipeline,
        }
    }

    pub async fn validate(&self, url: &str) -> ValidationReport {
        validator::validate(&self.fetcher, url).await
    }

    /// Assigns slugs to stored items that have none, up to the backfill limit.
    pub async fn generate_slugs(&self) -> Result<SlugBackfillReport> {
        let missing = self.store.items_missing_slug(self.config.slug_backfill_limit).await?;
        let mut report = SlugBackfillReport { updated: 0, failed: 0 };

        for (id, title) in missing {
            match self.store.set_slug(&id, &generate_slug(&title)).await {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    log::warn!("Failed to set slug for {}: {}", id, e);
                    report.failed += 1;
                }
            }
        }

        log::info!("Slug backfill: {} updated, {} failed", report.updated, report.failed);
        Ok(report)
    }

    /// Compares what the feed currently lists with what is stored. No writes.
    pub async fn check_feed(&self, feed_id: &str) -> Result<CheckFeedReport> {
        let feed = self.require_feed(feed_id).await?;
        let stored_items = self.store.count_items_for_feed(&feed.id).await?;
        let mut report = CheckFeedReport {
            feed_id: feed.id.clone(),
            feed_url: feed.url.clone(),
            rss_items: 0,
            stored_items,
            new_items: 0,
            error: None,
        };

        match self.fetcher.fetch(&feed.url).await {
            Ok(body) => {
                let items = feed_parser::parse(&body);
                let known = self.store.existing_urls(&feed.id).await?;
                report.rss_items = items.len();
                report.new_items = items.iter().filter(|i| !known.contains(&i.link)).count();
            }
            Err(e) => report.error = Some(e.to_string()),
        }
        Ok(report)
    }

    /// Fetch and insert one feed; no AI stages.
    pub async fn fetch_feed(&self, feed_id: &str, limit: Option<usize>) -> Result<FeedRunResult> {
        let feed = self.require_feed(feed_id).await?;
        let limit = limit.unwrap_or(self.config.feed_item_limit);
        if limit == 0 {
            return Err(IngestError::BadRequest("limit must be positive".to_string()));
        }
        Ok(self.ingestor.run_feed(&feed, limit).await)
    }

    /// `fetch_feed` over every active feed of one country.
    pub async fn fetch_country(&self, country_id: &str) -> Result<CountryFetchReport> {
        let (report, _batch) = self.sweep_country(country_id).await?;
        Ok(report)
    }

    /// Country fetch, then retell for every `bulk_stride`-th inserted item.
    pub async fn fetch_country_bulk(&self, country_id: &str) -> Result<BulkReport> {
        let settings = self.store.load_settings().await?;
        let (fetch, batch) = self.sweep_country(country_id).await?;

        let queued = stride_sample(&batch.work_items(), self.config.bulk_stride);
        log::info!(
            "Bulk fetch for {}: {} inserted, {} queued for retell",
            fetch.country_code,
            fetch.total_inserted,
            queued.len()
        );
        let retell = self.pipeline.retell_all(&queued, &settings.default_model).await;

        Ok(BulkReport {
            fetch,
            queued_for_retell: queued.len(),
            retell,
        })
    }

    /// Country fetch, then a retell pass and a dialogue pass over every
    /// inserted item.
    pub async fn fetch_country_full(&self, country_id: &str) -> Result<FullPipelineReport> {
        let settings = self.store.load_settings().await?;
        let (fetch, batch) = self.sweep_country(country_id).await?;
        let items = batch.work_items();

        let retell = self.pipeline.retell_all(&items, &settings.default_model).await;
        let dialogue = self.pipeline.dialogue_all(&items, &settings).await;

        Ok(FullPipelineReport { fetch, retell, dialogue })
    }

    /// Global sweep: fetch every active feed, sample inserted items against
    /// their country's retell ratio and process at most `per_run_cap` of them.
    /// The rest stay pending for the next sweep or `process_pending`.
    pub async fn fetch_all(&self) -> Result<GlobalSweepReport> {
        let settings = self.store.load_settings().await?;
        let feeds = self.store.active_feeds().await?;
        log::info!("Global sweep over {} active feeds", feeds.len());

        let (results, batch) = self.sweep_feeds(&feeds).await;

        let eligible: Vec<WorkItem> = if settings.retell_enabled {
            batch
                .work_items()
                .into_iter()
                .filter(|item| settings.sample(&item.country_code))
                .collect()
        } else {
            Vec::new()
        };

        let (to_process, skipped_due_to_limit) = apply_cap(&eligible, self.config.per_run_cap);
        if skipped_due_to_limit > 0 {
            log::info!(
                "{} eligible items deferred past the per-run cap of {}",
                skipped_due_to_limit,
                self.config.per_run_cap
            );
        }

        let mut retell = StageTally::default();
        let mut dialogue = StageTally::default();
        for (idx, item) in to_process.iter().enumerate() {
            if idx > 0 {
                pause(self.config.retell_delay_ms).await;
            }
            for log in self.pipeline.process_item(item, &settings, settings.dialogue_enabled).await {
                match log.stage {
                    Stage::Retell => retell.record(log.success),
                    Stage::Dialogue => dialogue.record(log.success),
                }
            }
        }

        if !batch.is_empty() {
            self.services.ping_search_engines(batch.slugs());
        }

        let feeds_failed = results.iter().filter(|r| !r.success).count();
        Ok(GlobalSweepReport {
            feeds_processed: results.len(),
            feeds_failed,
            total_inserted: batch.len(),
            inserted_by_country: batch.per_country(),
            eligible: eligible.len(),
            total_processed: to_process.len(),
            skipped_due_to_limit,
            retell,
            dialogue,
            results,
        })
    }

    /// Unprocessed item counts for every country at 100% retell ratio.
    pub async fn pending_stats(&self) -> Result<PendingStatsReport> {
        let settings = self.store.load_settings().await?;
        let codes = self.full_ratio_codes(&settings, None).await?;
        let countries = self.store.pending_counts(&codes, self.pending_since()).await?;

        Ok(PendingStatsReport {
            window_hours: self.config.pending_window_hours,
            total_pending: countries.iter().map(|c| c.pending).sum(),
            countries,
        })
    }

    /// Catch-up sweep: recent items still missing `content_en` in 100%-ratio
    /// countries, processed in small concurrent batches.
    pub async fn process_pending(&self, request: PendingRequest) -> Result<PendingReport> {
        let settings = self.store.load_settings().await?;
        let limit = request.limit.unwrap_or(self.config.default_pending_limit).max(1);
        let batch_size = request
            .batch_size
            .unwrap_or(self.config.default_batch_size)
            .clamp(1, self.config.max_batch_size.max(1));

        let codes = self.full_ratio_codes(&settings, request.country_code.as_deref()).await?;
        let items: Vec<WorkItem> = self
            .store
            .pending_items(&codes, self.pending_since(), limit)
            .await?
            .into_iter()
            .map(WorkItem::from)
            .collect();

        log::info!(
            "Processing {} pending items in batches of {} (countries: {:?})",
            items.len(),
            batch_size,
            codes
        );

        let mut report = PendingReport {
            found: items.len(),
            batch_size,
            batches: 0,
            retell: StageTally::default(),
            dialogue: StageTally::default(),
            logs: Vec::new(),
        };

        for (idx, chunk) in items.chunks(batch_size).enumerate() {
            if idx > 0 {
                pause(self.config.batch_delay_ms).await;
            }
            let outcomes = join_all(
                chunk
                    .iter()
                    .map(|item| self.pipeline.process_item(item, &settings, settings.dialogue_enabled)),
            )
            .await;

            for log in outcomes.into_iter().flatten() {
                match log.stage {
                    Stage::Retell => report.retell.record(log.success),
                    Stage::Dialogue => report.dialogue.record(log.success),
                }
                report.logs.push(log);
            }
            report.batches += 1;
        }

        Ok(report)
    }

    async fn require_feed(&self, feed_id: &str) -> Result<Feed> {
        self.store
            .find_feed(feed_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("Feed {} not found", feed_id)))
    }

    async fn require_country(&self, country_id: &str) -> Result<Country> {
        self.store
            .find_country(country_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("Country {} not found", country_id)))
    }

    async fn sweep_country(&self, country_id: &str) -> Result<(CountryFetchReport, InsertedBatch)> {
        let country = self.require_country(country_id).await?;
        let feeds = self.store.active_feeds_for_country(&country.id).await?;
        log::info!("Fetching {} feeds for country {}", feeds.len(), country.code);

        let (results, batch) = self.sweep_feeds(&feeds).await;
        let report = CountryFetchReport {
            country_id: country.id,
            country_code: country.code,
            feeds_processed: results.len(),
            feeds_failed: results.iter().filter(|r| !r.success).count(),
            total_inserted: batch.len(),
            results,
        };
        Ok((report, batch))
    }

    /// Runs the single-feed routine over `feeds` in order. One feed failing
    /// does not stop the others.
    async fn sweep_feeds(&self, feeds: &[Feed]) -> (Vec<FeedRunResult>, InsertedBatch) {
        let mut batch = InsertedBatch::default();
        let mut results = Vec::with_capacity(feeds.len());

        for feed in feeds {
            let mut result = self.ingestor.run_feed(feed, self.config.feed_item_limit).await;
            batch.absorb(&mut result);
            results.push(result);
        }
        (results, batch)
    }

    async fn full_ratio_codes(&self, settings: &RetellSettings, only: Option<&str>) -> Result<Vec<String>> {
        let only = only.map(str::to_lowercase);
        Ok(self
            .store
            .countries()
            .await?
            .into_iter()
            .map(|c| c.code)
            .filter(|code| settings.is_full_ratio(code))
            .filter(|code| only.as_deref().map_or(true, |o| o == code))
            .collect())
    }

    fn pending_since(&self) -> i64 {
        chrono::Utc::now().timestamp() - self.config.pending_window_hours * 3600
    }
}

/// Every `stride`-th item (the stride-th, 2*stride-th, ...).
pub fn stride_sample(items: &[WorkItem], stride: usize) -> Vec<WorkItem> {
    let stride = stride.max(1);
    items
        .iter()
        .enumerate()
        .filter(|(idx, _)| (idx + 1) % stride == 0)
        .map(|(_, item)| item.clone())
        .collect()
}

/// Splits off the first `cap` items; returns them with the deferred count.
pub fn apply_cap(items: &[WorkItem], cap: usize) -> (&[WorkItem], usize) {
    let take = items.len().min(cap);
    (&items[..take], items.len() - take)
}
