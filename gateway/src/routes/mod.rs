use axum::response::Json;
use serde_json::{json, Value};

pub mod actions;

pub async fn health() -> Json<Value> {
    Json(json!({ "success": true }))
}
