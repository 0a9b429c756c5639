use ingest::core::error::Result;
use ingest::core::store::Store;
use std::env;

/// Opens the SQLite store named by `DATABASE_URL`, creating file and schema if needed.
pub async fn init_db() -> Result<Store> {
    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:newsroom.db".to_string());
    tracing::info!("opening database {}", database_url);
    Store::open(&database_url).await
}
