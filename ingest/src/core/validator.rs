use serde::Serialize;

use crate::core::feed_parser;
use crate::core::fetcher::FeedFetcher;

pub const NOT_A_FEED: &str = "Not a valid RSS/Atom feed";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<usize>,
}

impl ValidationReport {
    fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            item_count: None,
        }
    }
}

/// True when the body carries an RSS or Atom root marker.
pub fn looks_like_feed(body: &str) -> bool {
    body.contains("<rss") || body.contains("<feed") || body.contains("<channel>")
}

/// Checks that `url` serves something parseable as a feed. Never fails: every
/// problem is reported inside the returned report.
pub async fn validate(fetcher: &FeedFetcher, url: &str) -> ValidationReport {
    let body = match fetcher.fetch(url).await {
        Ok(body) => body,
        Err(e) => {
            log::info!("Validation of {} failed: {}", url, e);
            return ValidationReport::invalid(e.to_string());
        }
    };

    if !looks_like_feed(&body) {
        return ValidationReport::invalid(NOT_A_FEED);
    }

    let items = feed_parser::parse(&body);
    ValidationReport {
        valid: true,
        error: None,
        item_count: Some(items.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FetchConfig;

    fn rss_with_items(n: usize) -> String {
        let items: String = (0..n)
            .map(|i| format!("<item><title>T{0}</title><link>https://x/{0}</link></item>", i))
            .collect();
        format!("<rss version=\"2.0\"><channel><title>F</title>{}</channel></rss>", items)
    }

    #[tokio::test]
    async fn reports_http_status_for_missing_feed() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("GET", "/missing").with_status(404).create_async().await;

        let fetcher = FeedFetcher::new(FetchConfig::default());
        let report = validate(&fetcher, &format!("{}/missing", server.url())).await;

        assert_eq!(report, ValidationReport::invalid("HTTP 404"));
    }

    #[tokio::test]
    async fn counts_items_of_valid_feed() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/rss")
            .with_status(200)
            .with_header("content-type", "application/rss+xml")
            .with_body(rss_with_items(5))
            .create_async()
            .await;

        let fetcher = FeedFetcher::new(FetchConfig::default());
        let report = validate(&fetcher, &format!("{}/rss", server.url())).await;

        assert!(report.valid);
        assert_eq!(report.item_count, Some(5));
        assert_eq!(report.error, None);
    }

    #[tokio::test]
    async fn empty_feed_is_still_valid() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/empty")
            .with_body("<rss><channel><title>Nothing yet</title></channel></rss>")
            .create_async()
            .await;

        let fetcher = FeedFetcher::new(FetchConfig::default());
        let report = validate(&fetcher, &format!("{}/empty", server.url())).await;

        assert!(report.valid);
        assert_eq!(report.item_count, Some(0));
    }

    #[tokio::test]
    async fn rejects_html_pages() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/page")
            .with_body("<html><body><h1>Hello</h1></body></html>")
            .create_async()
            .await;

        let fetcher = FeedFetcher::new(FetchConfig::default());
        let report = validate(&fetcher, &format!("{}/page", server.url())).await;

        assert_eq!(report, ValidationReport::invalid(NOT_A_FEED));
    }

    #[tokio::test]
    async fn network_errors_become_reports() {
        let fetcher = FeedFetcher::new(FetchConfig::default());
        let report = validate(&fetcher, "http://127.0.0.1:1/feed").await;

        assert!(!report.valid);
        assert!(report.error.is_some());
    }

    #[test]
    fn serializes_camel_case_without_empty_fields() {
        let json = serde_json::to_value(ValidationReport {
            valid: true,
            error: None,
            item_count: Some(3),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "valid": true, "itemCount": 3 }));
    }
}
