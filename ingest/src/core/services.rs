use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::config::{ServicesConfig, SiteConfig};
use crate::core::error::{IngestError, Result};

pub const RETELL_PATH: &str = "retell-news";
pub const DIALOGUE_PATH: &str = "generate-dialogue";
pub const CACHE_REFRESH_PATH: &str = "cache-refresh";
pub const SEARCH_PING_PATH: &str = "ping-search-engines";

/// Client for the sibling functions the pipeline delegates to.
#[derive(Clone)]
pub struct ServiceClient {
    client: Client,
    config: ServicesConfig,
    site: SiteConfig,
}

/// Body of a retell response. The retell function normally persists its own
/// output; when it echoes the retold fields back they are written here too.
#[derive(Debug, Default, Deserialize)]
pub struct RetellOutcome {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "titleEn")]
    pub title_en: Option<String>,
    #[serde(default, alias = "descriptionEn")]
    pub description_en: Option<String>,
    #[serde(default, alias = "contentEn")]
    pub content_en: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueRequest {
    pub news_id: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub country_code: String,
    pub language: String,
    pub dialogue_count: u32,
    pub generate_tweets: bool,
    pub tweet_count: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct DialogueOutcome {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "chat_dialogue", alias = "chatDialogue")]
    pub dialogue: Option<Value>,
    #[serde(default)]
    pub tweets: Option<Value>,
}

impl ServiceClient {
    pub fn new(config: ServicesConfig, site: SiteConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_secs))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
            site,
        }
    }

    pub(crate) fn endpoint(config: &ServicesConfig, path: &str) -> String {
        format!("{}/{}", config.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Value> {
        let url = Self::endpoint(&self.config, path);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.config.auth_key)
            .json(body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(IngestError::Collaborator(format!(
                "{} failed: {} - {}",
                path, status, text
            )));
        }

        // Some functions answer 204 or plain text; treat as an empty object.
        let text = res.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::Object(Default::default())))
    }

    /// Asks the retell function to rewrite `news_id` with `model`.
    pub async fn retell(&self, news_id: &str, model: &str) -> Result<RetellOutcome> {
        let body = serde_json::json!({ "newsId": news_id, "model": model });
        let value = self.post_json(RETELL_PATH, &body).await?;
        let outcome: RetellOutcome = serde_json::from_value(value).unwrap_or_default();

        if outcome.success == Some(false) {
            return Err(IngestError::Collaborator(
                outcome.error.unwrap_or_else(|| "Retell reported failure".to_string()),
            ));
        }
        Ok(outcome)
    }

    /// Generates the character dialogue (and optionally tweets) for one item.
    pub async fn generate_dialogue(&self, request: &DialogueRequest) -> Result<DialogueOutcome> {
        let value = self.post_json(DIALOGUE_PATH, request).await?;
        let outcome: DialogueOutcome = serde_json::from_value(value).unwrap_or_default();

        if outcome.success == Some(false) {
            return Err(IngestError::Collaborator(
                outcome.error.unwrap_or_else(|| "Dialogue generation reported failure".to_string()),
            ));
        }
        if outcome.dialogue.as_ref().map_or(true, Value::is_null) {
            return Err(IngestError::Collaborator("No dialogue in response".to_string()));
        }
        Ok(outcome)
    }

    /// Fire-and-forget refresh of the cached public page for `slug`.
    pub fn refresh_page_cache(&self, slug: &str) {
        let this = self.clone();
        let page_url = self.site.article_url(slug);
        tokio::spawn(async move {
            let body = serde_json::json!({ "url": page_url });
            if let Err(e) = this.post_json(CACHE_REFRESH_PATH, &body).await {
                log::debug!("Cache refresh for {} failed: {}", page_url, e);
            }
        });
    }

    /// Fire-and-forget notification that new article pages exist.
    pub fn ping_search_engines(&self, slugs: Vec<String>) {
        if slugs.is_empty() {
            return;
        }
        let this = self.clone();
        let urls: Vec<String> = slugs.iter().map(|s| self.site.article_url(s)).collect();
        tokio::spawn(async move {
            let body = serde_json::json!({ "urls": urls });
            match this.post_json(SEARCH_PING_PATH, &body).await {
                Ok(_) => log::info!("Pinged search engines with {} urls", urls.len()),
                Err(e) => log::warn!("Search engine ping failed: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server) -> ServiceClient {
        ServiceClient::new(
            ServicesConfig {
                base_url: server.url(),
                auth_key: "k".to_string(),
                timeout_secs: 5,
            },
            SiteConfig::default(),
        )
    }

    #[tokio::test]
    async fn retell_sends_id_and_model_with_bearer_key() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/retell-news")
            .match_header("authorization", "Bearer k")
            .match_body(Matcher::Json(serde_json::json!({ "newsId": "n1", "model": "m" })))
            .with_body(r#"{"success":true,"content_en":"Retold"}"#)
            .create_async()
            .await;

        let outcome = client_for(&server).retell("n1", "m").await.unwrap();
        m.assert_async().await;
        assert_eq!(outcome.content_en.as_deref(), Some("Retold"));
    }

    #[tokio::test]
    async fn retell_failure_flag_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/retell-news")
            .with_body(r#"{"success":false,"error":"quota"}"#)
            .create_async()
            .await;

        let err = client_for(&server).retell("n1", "m").await.unwrap_err();
        assert_eq!(err.to_string(), "quota");
    }

    #[tokio::test]
    async fn dialogue_requires_a_dialogue_payload() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/generate-dialogue")
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let request = DialogueRequest {
            news_id: "n1".to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            content: "c".to_string(),
            country_code: "ua".to_string(),
            language: "uk".to_string(),
            dialogue_count: 4,
            generate_tweets: false,
            tweet_count: 0,
        };
        assert!(client_for(&server).generate_dialogue(&request).await.is_err());
    }

    #[tokio::test]
    async fn non_success_status_is_a_collaborator_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/retell-news")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = client_for(&server).retell("n1", "m").await.unwrap_err();
        assert!(matches!(err, IngestError::Collaborator(_)));
        assert!(err.to_string().contains("boom"));
    }
}
