use serde::Deserialize;
use std::fs;
use anyhow::Result;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub services: ServicesConfig,
    pub site: SiteConfig,
    pub fetch: FetchConfig,
    pub pipeline: PipelineConfig,
}

/// Sibling functions (scrape, retell, dialogue, cache refresh, search ping).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServicesConfig {
    pub base_url: String,
    pub auth_key: String,
    pub timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321/functions/v1".to_string(),
            auth_key: String::new(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SiteConfig {
    pub public_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:8080".to_string(),
        }
    }
}

impl SiteConfig {
    pub fn article_url(&self, slug: &str) -> String {
        format!("{}/news/{}", self.public_url.trim_end_matches('/'), slug)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub accept: String,
    pub scrape_enabled: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            accept: "application/rss+xml, application/atom+xml, application/xml, text/xml, */*".to_string(),
            scrape_enabled: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub retell_delay_ms: u64,
    pub dialogue_delay_ms: u64,
    pub batch_delay_ms: u64,
    /// Items handed to the AI stages by one `fetch_all` run.
    pub per_run_cap: usize,
    pub max_batch_size: usize,
    pub default_batch_size: usize,
    pub default_pending_limit: usize,
    pub pending_window_hours: i64,
    pub feed_item_limit: usize,
    pub slug_backfill_limit: usize,
    pub bulk_stride: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retell_delay_ms: 500,
            dialogue_delay_ms: 300,
            batch_delay_ms: 500,
            per_run_cap: 20,
            max_batch_size: 5,
            default_batch_size: 3,
            default_pending_limit: 20,
            pending_window_hours: 24,
            feed_item_limit: 200,
            slug_backfill_limit: 500,
            bulk_stride: 5,
        }
    }
}

impl PipelineConfig {
    /// No inter-item pauses; used where the collaborators are local stubs.
    pub fn without_delays(mut self) -> Self {
        self.retell_delay_ms = 0;
        self.dialogue_delay_ms = 0;
        self.batch_delay_ms = 0;
        self
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_a_valid_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.pipeline.per_run_cap, 20);
        assert_eq!(config.pipeline.max_batch_size, 5);
        assert_eq!(config.pipeline.feed_item_limit, 200);
        assert!(config.fetch.scrape_enabled);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: Config = toml::from_str(
            r#"
[services]
base_url = "https://fn.example.com"
auth_key = "secret"

[pipeline]
per_run_cap = 5
"#,
        )
        .unwrap();

        assert_eq!(config.services.base_url, "https://fn.example.com");
        assert_eq!(config.services.timeout_secs, 120);
        assert_eq!(config.pipeline.per_run_cap, 5);
        assert_eq!(config.pipeline.slug_backfill_limit, 500);
    }

    #[test]
    fn article_url_joins_without_double_slash() {
        let site = SiteConfig {
            public_url: "https://news.example.com/".to_string(),
        };
        assert_eq!(site.article_url("abc-1"), "https://news.example.com/news/abc-1");
    }
}
