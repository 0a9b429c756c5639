use reqwest::Client;
use serde::Deserialize;

use crate::core::config::ServicesConfig;
use crate::core::services::ServiceClient;
use crate::core::text::truncate_chars;

pub const SCRAPE_PATH: &str = "scrape-news";
pub const SCRAPE_MAX_CHARS: usize = 10_000;

/// Best-effort bridge to the full-article extraction function.
pub struct Scraper {
    client: Client,
    config: ServicesConfig,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default, alias = "markdown", alias = "text")]
    content: Option<String>,
}

impl Scraper {
    pub fn new(config: ServicesConfig, enabled: bool) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
            enabled,
        }
    }

    /// Full article text for `article_url`, capped at 10k chars. Any failure
    /// yields `None` so ingestion falls back to the feed's own text.
    pub async fn scrape(&self, article_url: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let url = ServiceClient::endpoint(&self.config, SCRAPE_PATH);
        let res = match self
            .client
            .post(&url)
            .bearer_auth(&self.config.auth_key)
            .json(&serde_json::json!({ "url": article_url }))
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => {
                log::warn!("Scrape request for {} failed: {}", article_url, e);
                return None;
            }
        };

        if !res.status().is_success() {
            log::warn!("Scrape of {} returned {}", article_url, res.status());
            return None;
        }

        let body: ScrapeResponse = match res.json().await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Unreadable scrape response for {}: {}", article_url, e);
                return None;
            }
        };

        if body.success == Some(false) {
            return None;
        }

        body.content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .map(|c| truncate_chars(&c, SCRAPE_MAX_CHARS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scraper_for(server: &mockito::Server) -> Scraper {
        Scraper::new(
            ServicesConfig {
                base_url: server.url(),
                auth_key: "k".to_string(),
                timeout_secs: 5,
            },
            true,
        )
    }

    #[tokio::test]
    async fn returns_truncated_content() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({ "success": true, "content": "a".repeat(12_000) });
        let _m = server
            .mock("POST", "/scrape-news")
            .with_body(body.to_string())
            .create_async()
            .await;

        let text = scraper_for(&server).scrape("https://news/1").await.unwrap();
        assert_eq!(text.chars().count(), SCRAPE_MAX_CHARS);
    }

    #[tokio::test]
    async fn failures_yield_none() {
        let mut server = mockito::Server::new_async().await;
        let _err = server
            .mock("POST", "/scrape-news")
            .with_status(502)
            .create_async()
            .await;
        assert_eq!(scraper_for(&server).scrape("https://news/1").await, None);
    }

    #[tokio::test]
    async fn missing_content_yields_none() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/scrape-news")
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;
        assert_eq!(scraper_for(&server).scrape("https://news/1").await, None);
    }

    #[tokio::test]
    async fn disabled_scraper_never_calls_out() {
        let mut server = mockito::Server::new_async().await;
        let m = server.mock("POST", "/scrape-news").expect(0).create_async().await;

        let scraper = Scraper::new(
            ServicesConfig {
                base_url: server.url(),
                ..ServicesConfig::default()
            },
            false,
        );
        assert_eq!(scraper.scrape("https://news/1").await, None);
        m.assert_async().await;
    }
}
