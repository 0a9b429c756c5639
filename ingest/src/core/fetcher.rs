use reqwest::header::ACCEPT;
use reqwest::Client;

use crate::core::config::FetchConfig;
use crate::core::error::{IngestError, Result};

/// Downloads feed bodies with a browser-like identity; some publishers
/// reject obvious bots outright.
pub struct FeedFetcher {
    client: Client,
    config: FetchConfig,
}

impl FeedFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            client: Client::builder()
                .user_agent(config.user_agent.clone())
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    /// GETs `url` and returns the body. Non-2xx becomes `UpstreamStatus`.
    pub async fn fetch(&self, url: &str) -> Result<String> {
        let res = self
            .client
            .get(url)
            .header(ACCEPT, &self.config.accept)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            log::warn!("Feed {} answered {}", url, status);
            return Err(IngestError::UpstreamStatus(status.as_u16()));
        }

        Ok(res.text().await?)
    }
}
