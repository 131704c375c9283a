pub mod analytics;
pub mod config;
pub mod error;
pub mod ingest;
pub mod query;
pub mod routes;
pub mod storage;
pub mod types;
