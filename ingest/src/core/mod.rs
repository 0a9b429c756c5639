pub mod config;
pub mod error;
pub mod feed_parser;
pub mod fetcher;
pub mod ingest;
pub mod orchestrator;
pub mod pipeline;
pub mod scraper;
pub mod services;
pub mod settings;
pub mod store;
pub mod text;
pub mod validator;
