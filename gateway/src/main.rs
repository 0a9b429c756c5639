use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ingest::core::config::{load_config, Config};
use ingest::core::orchestrator::Orchestrator;

mod db;
mod routes;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Shared secret expected in `X-GATEWAY-KEY`; `None` leaves the gateway open.
    pub api_key: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", post(routes::actions::handle_action))
        .route("/fetch-rss", post(routes::actions::handle_action))
        .route("/health", get(routes::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn read_config() -> Result<Config> {
    let config_path = std::env::var("INGEST_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    if !std::path::Path::new(&config_path).exists() {
        tracing::warn!("{} not found, using built-in defaults", config_path);
        return Ok(Config::default());
    }
    load_config(&config_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gateway=debug,ingest=info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = read_config()?;
    let store = db::init_db().await?;

    let api_key = std::env::var("GATEWAY_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        tracing::warn!("GATEWAY_KEY not set, accepting unauthenticated requests");
    }

    let state = AppState {
        orchestrator: Arc::new(Orchestrator::new(store, config)),
        api_key,
    };

    let port = std::env::var("PORT").unwrap_or_else(|_| "8899".to_string()).parse::<u16>().unwrap_or(8899);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}
