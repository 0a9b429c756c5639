use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::core::config::PipelineConfig;
use crate::core::error::{IngestError, Result};
use crate::core::ingest::InsertedItem;
use crate::core::services::{DialogueRequest, ServiceClient};
use crate::core::settings::{language_for_country, RetellSettings};
use crate::core::store::{NewsItem, PendingItem, Store};
use crate::core::text::truncate_chars;

pub const DIALOGUE_DESCRIPTION_MAX_CHARS: usize = 1000;
pub const DIALOGUE_CONTENT_MAX_CHARS: usize = 5000;

/// Minimal identity the AI stages need for one news item.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub slug: Option<String>,
    pub country_code: String,
}

impl From<&InsertedItem> for WorkItem {
    fn from(item: &InsertedItem) -> Self {
        Self {
            id: item.id.clone(),
            title: item.title.clone(),
            slug: Some(item.slug.clone()),
            country_code: item.country_code.clone().unwrap_or_default(),
        }
    }
}

impl From<PendingItem> for WorkItem {
    fn from(item: PendingItem) -> Self {
        Self {
            id: item.id,
            title: item.title,
            slug: item.slug,
            country_code: item.country_code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Retell,
    Dialogue,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageTally {
    pub succeeded: usize,
    pub failed: usize,
}

impl StageTally {
    pub fn record(&mut self, ok: bool) {
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// One stage attempt for one item.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageLog {
    pub news_id: String,
    pub title: String,
    pub country_code: String,
    pub stage: Stage,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Builds the dialogue payload, preferring English fields over the source
/// language ones.
pub fn build_dialogue_request(item: &NewsItem, country_code: &str, settings: &RetellSettings) -> DialogueRequest {
    fn prefer(en: &Option<String>, source: &Option<String>) -> String {
        en.as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(source.as_deref())
            .unwrap_or_default()
            .to_string()
    }

    let title = Some(item.title.clone());
    DialogueRequest {
        news_id: item.id.clone(),
        title: prefer(&item.title_en, &title),
        description: truncate_chars(&prefer(&item.description_en, &item.description), DIALOGUE_DESCRIPTION_MAX_CHARS),
        content: truncate_chars(&prefer(&item.content_en, &item.content), DIALOGUE_CONTENT_MAX_CHARS),
        country_code: country_code.to_string(),
        language: language_for_country(country_code).to_string(),
        dialogue_count: settings.dialogue_count,
        generate_tweets: settings.tweets_enabled,
        tweet_count: if settings.tweets_enabled { settings.tweet_count } else { 0 },
    }
}

/// Column text for a collaborator payload. A JSON string is stored as-is
/// (it already holds serialized JSON); arrays and objects are serialized.
pub fn stored_json(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Retell and dialogue stages over already-inserted items. Each item is
/// isolated: a failure is logged and counted, never propagated.
pub struct ContentPipeline {
    store: Store,
    services: ServiceClient,
    config: PipelineConfig,
}

impl ContentPipeline {
    pub fn new(store: Store, services: ServiceClient, config: PipelineConfig) -> Self {
        Self { store, services, config }
    }

    pub async fn retell(&self, item: &WorkItem, model: &str) -> Result<()> {
        let outcome = self.services.retell(&item.id, model).await?;
        self.store
            .save_retell(
                &item.id,
                outcome.title_en.as_deref(),
                outcome.description_en.as_deref(),
                outcome.content_en.as_deref(),
            )
            .await?;

        if let Some(slug) = item.slug.as_deref().filter(|s| !s.is_empty()) {
            self.services.refresh_page_cache(slug);
        }
        Ok(())
    }

    pub async fn generate_dialogue(&self, item: &WorkItem, settings: &RetellSettings) -> Result<()> {
        let news = self
            .store
            .find_news_item(&item.id)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("News item {} not found", item.id)))?;

        let request = build_dialogue_request(&news, &item.country_code, settings);
        let outcome = self.services.generate_dialogue(&request).await?;

        let dialogue = outcome.dialogue.and_then(stored_json).unwrap_or_default();
        let tweets = outcome
            .tweets
            .filter(|_| settings.tweets_enabled)
            .and_then(stored_json);
        self.store.save_dialogue(&item.id, &dialogue, tweets.as_deref()).await
    }

    async fn timed<F>(&self, item: &WorkItem, stage: Stage, fut: F) -> StageLog
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => log::info!("{:?} ok for {} ({}) in {}ms", stage, item.id, item.title, duration_ms),
            Err(e) => log::warn!("{:?} failed for {} ({}): {}", stage, item.id, item.title, e),
        }

        StageLog {
            news_id: item.id.clone(),
            title: item.title.clone(),
            country_code: item.country_code.clone(),
            stage,
            success: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
            duration_ms,
        }
    }

    pub async fn retell_logged(&self, item: &WorkItem, model: &str) -> StageLog {
        self.timed(item, Stage::Retell, self.retell(item, model)).await
    }

    pub async fn dialogue_logged(&self, item: &WorkItem, settings: &RetellSettings) -> StageLog {
        self.timed(item, Stage::Dialogue, self.generate_dialogue(item, settings)).await
    }

    /// Retell, then dialogue when `with_dialogue` and the retell succeeded.
    pub async fn process_item(&self, item: &WorkItem, settings: &RetellSettings, with_dialogue: bool) -> Vec<StageLog> {
        let retell = self.retell_logged(item, &settings.default_model).await;
        let retold = retell.success;
        let mut logs = vec![retell];

        if with_dialogue && retold {
            logs.push(self.dialogue_logged(item, settings).await);
        }
        logs
    }

    /// Sequential retell pass with the retell delay between items.
    pub async fn retell_all(&self, items: &[WorkItem], model: &str) -> StageTally {
        let mut tally = StageTally::default();
        for (idx, item) in items.iter().enumerate() {
            if idx > 0 {
                pause(self.config.retell_delay_ms).await;
            }
            tally.record(self.retell_logged(item, model).await.success);
        }
        tally
    }

    /// Sequential dialogue pass with the dialogue delay between items.
    pub async fn dialogue_all(&self, items: &[WorkItem], settings: &RetellSettings) -> StageTally {
        let mut tally = StageTally::default();
        for (idx, item) in items.iter().enumerate() {
            if idx > 0 {
                pause(self.config.dialogue_delay_ms).await;
            }
            tally.record(self.dialogue_logged(item, settings).await.success);
        }
        tally
    }
}

pub(crate) async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn news(title_en: Option<&str>, content_en: Option<&str>) -> NewsItem {
        NewsItem {
            id: "n1".to_string(),
            feed_id: "f1".to_string(),
            country_id: None,
            external_id: "https://x/1".to_string(),
            title: "Заголовок".to_string(),
            title_en: title_en.map(str::to_string),
            description: Some("Опис".to_string()),
            description_en: Some("   ".to_string()),
            content: Some("з".repeat(6000)),
            content_en: content_en.map(str::to_string),
            original_content: None,
            url: "https://x/1".to_string(),
            slug: None,
            image_url: None,
            category: None,
            published_at: None,
            fetched_at: 0,
            chat_dialogue: None,
            tweets: None,
        }
    }

    #[test]
    fn dialogue_request_prefers_english_and_falls_back() {
        let settings = RetellSettings::default();

        let request = build_dialogue_request(&news(Some("Headline"), Some("Body")), "ua", &settings);
        assert_eq!(request.title, "Headline");
        assert_eq!(request.description, "Опис");
        assert_eq!(request.content, "Body");
        assert_eq!(request.language, "uk");

        let request = build_dialogue_request(&news(None, None), "in", &settings);
        assert_eq!(request.title, "Заголовок");
        assert_eq!(request.content.chars().count(), DIALOGUE_CONTENT_MAX_CHARS);
        assert_eq!(request.language, "hi");
    }

    #[test]
    fn tweets_follow_settings() {
        let mut settings = RetellSettings::default();
        settings.tweets_enabled = false;
        let request = build_dialogue_request(&news(None, None), "pl", &settings);
        assert!(!request.generate_tweets);
        assert_eq!(request.tweet_count, 0);

        settings.tweets_enabled = true;
        settings.tweet_count = 4;
        let request = build_dialogue_request(&news(None, None), "pl", &settings);
        assert!(request.generate_tweets);
        assert_eq!(request.tweet_count, 4);
    }

    #[test]
    fn string_payloads_are_stored_without_requoting() {
        assert_eq!(
            stored_json(Value::String(r#"[{"s":"A"}]"#.to_string())).as_deref(),
            Some(r#"[{"s":"A"}]"#)
        );
        assert_eq!(
            stored_json(serde_json::json!([{ "s": "A" }])).as_deref(),
            Some(r#"[{"s":"A"}]"#)
        );
        assert_eq!(stored_json(Value::Null), None);
    }

    #[test]
    fn tally_counts_both_outcomes() {
        let mut tally = StageTally::default();
        tally.record(true);
        tally.record(false);
        tally.record(true);
        assert_eq!(tally, StageTally { succeeded: 2, failed: 1 });
    }
}
