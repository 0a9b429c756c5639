use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::AppState;
use ingest::core::error::IngestError;
use ingest::core::orchestrator::PendingRequest;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub action: Option<String>,
    pub feed_id: Option<String>,
    pub feed_url: Option<String>,
    pub country_id: Option<String>,
    pub limit: Option<usize>,
    pub batch_size: Option<usize>,
    pub country_code: Option<String>,
}

pub struct ApiError(IngestError);

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            IngestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            IngestError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("action failed: {}", self.0);
        }
        (status, Json(json!({ "success": false, "error": self.0.to_string() }))).into_response()
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError(IngestError::BadRequest(format!("Missing required field: {}", name))))
}

/// Serializes `payload` into the response object, adding `success: true`
/// unless the payload reports its own outcome.
fn respond<T: Serialize>(payload: T) -> Result<Response, ApiError> {
    let body = serde_json::to_value(payload).map_err(|e| IngestError::Other(e.into()))?;
    let body = match body {
        Value::Object(mut map) => {
            map.entry("success").or_insert(Value::Bool(true));
            Value::Object(map)
        }
        other => json!({ "success": true, "data": other }),
    };
    Ok(Json(body).into_response())
}

pub async fn handle_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Response {
    if let Some(expected) = state.api_key.as_deref() {
        let given = headers.get("X-GATEWAY-KEY").and_then(|v| v.to_str().ok());
        if given != Some(expected) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "error": "Invalid API Key" })),
            )
                .into_response();
        }
    }

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return ApiError(IngestError::BadRequest(rejection.body_text())).into_response(),
    };

    tracing::debug!("action {:?}", request.action);
    match dispatch(&state, &request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn dispatch(state: &AppState, req: &ActionRequest) -> Result<Response, ApiError> {
    let orchestrator = &state.orchestrator;
    let action = required(&req.action, "action")?;

    match action {
        "validate" => respond(orchestrator.validate(required(&req.feed_url, "feedUrl")?).await),
        "generate_slugs" => respond(orchestrator.generate_slugs().await?),
        "check_feed" => respond(orchestrator.check_feed(required(&req.feed_id, "feedId")?).await?),
        "fetch_feed_limited" => {
            let feed_id = required(&req.feed_id, "feedId")?;
            let limit = req
                .limit
                .ok_or_else(|| IngestError::BadRequest("Missing required field: limit".to_string()))?;
            respond(orchestrator.fetch_feed(feed_id, Some(limit)).await?)
        }
        "fetch_feed" => respond(orchestrator.fetch_feed(required(&req.feed_id, "feedId")?, None).await?),
        "fetch_country" => respond(orchestrator.fetch_country(required(&req.country_id, "countryId")?).await?),
        "fetch_all" => respond(orchestrator.fetch_all().await?),
        "get_pending_stats" => respond(orchestrator.pending_stats().await?),
        "process_pending" => {
            let request = PendingRequest {
                country_code: req.country_code.clone().filter(|c| !c.trim().is_empty()),
                limit: req.limit,
                batch_size: req.batch_size,
            };
            respond(orchestrator.process_pending(request).await?)
        }
        "fetch_country_bulk" => {
            respond(orchestrator.fetch_country_bulk(required(&req.country_id, "countryId")?).await?)
        }
        "fetch_country_full" => {
            respond(orchestrator.fetch_country_full(required(&req.country_id, "countryId")?).await?)
        }
        other => Err(IngestError::BadRequest(format!("Unknown action: {}", other)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use ingest::core::config::Config;
    use ingest::core::orchestrator::Orchestrator;
    use ingest::core::store::Store;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn state(api_key: Option<&str>) -> AppState {
        let store = Store::open("sqlite::memory:").await.unwrap();
        AppState {
            orchestrator: Arc::new(Orchestrator::new(store, Config::default())),
            api_key: api_key.map(str::to_string),
        }
    }

    async fn call(state: AppState, body: &str, key: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/fetch-rss")
            .header("content-type", "application/json");
        if let Some(key) = key {
            request = request.header("X-GATEWAY-KEY", key);
        }
        let response = crate::app(state)
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_success() {
        let response = crate::app(state(None).await)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_and_unknown_actions_are_bad_requests() {
        let (status, body) = call(state(None).await, "{}", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Missing required field: action");

        let (status, body) = call(state(None).await, r#"{"action":"explode"}"#, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unknown action: explode");
    }

    #[tokio::test]
    async fn missing_required_fields_are_rejected_before_work() {
        for (body, field) in [
            (r#"{"action":"fetch_feed"}"#, "feedId"),
            (r#"{"action":"check_feed","feedId":"  "}"#, "feedId"),
            (r#"{"action":"fetch_feed_limited","feedId":"f1"}"#, "limit"),
            (r#"{"action":"validate"}"#, "feedUrl"),
            (r#"{"action":"fetch_country_full"}"#, "countryId"),
        ] {
            let (status, json) = call(state(None).await, body, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
            assert_eq!(json["error"], format!("Missing required field: {}", field));
        }
    }

    #[tokio::test]
    async fn unknown_feed_is_not_found() {
        let (status, body) = call(state(None).await, r#"{"action":"fetch_feed","feedId":"missing"}"#, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("missing"));

        let (status, _) = call(state(None).await, r#"{"action":"fetch_country_bulk","countryId":"x"}"#, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let (status, body) = call(state(None).await, "{not json", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn read_only_actions_succeed_on_empty_store() {
        let (status, body) = call(state(None).await, r#"{"action":"get_pending_stats"}"#, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["totalPending"], 0);

        let (status, body) = call(state(None).await, r#"{"action":"generate_slugs"}"#, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"], 0);

        let (status, body) = call(state(None).await, r#"{"action":"process_pending","batchSize":9}"#, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["found"], 0);
        assert_eq!(body["batchSize"], 5);
    }

    #[tokio::test]
    async fn gateway_key_is_enforced_when_configured() {
        let body = r#"{"action":"get_pending_stats"}"#;

        let (status, json) = call(state(Some("secret")).await, body, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["success"], false);

        let (status, _) = call(state(Some("secret")).await, body, Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(state(Some("secret")).await, body, Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
    }
}
