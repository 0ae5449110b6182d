//! Sync orchestration and the transport-agnostic query service.

use std::path::PathBuf;

use thiserror::Error;

use aoc_adapters::AdapterError;
use aoc_core::ValidationError;
use aoc_store::StoreError;

pub mod rules;
pub mod service;

pub use rules::{default_portal_catalogue, load_keyword_rules, load_portal_catalogue};
pub use service::{sync_portals, SyncSummary, TenderListing, TenderService};

pub const CRATE_NAME: &str = "aoc-sync";

pub const DEFAULT_MAX_SCAN_ROWS: usize = 5000;

#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed filter configuration; rejected before any query executes.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("no adapter registered for portal {0}")]
    NoAdapter(String),
}

/// Environment-driven runtime configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub max_scan_rows: usize,
    pub keywords_path: Option<PathBuf>,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("AOC_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://ao.db".to_string()),
            max_scan_rows: std::env::var("AOC_MAX_SCAN_ROWS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_SCAN_ROWS),
            keywords_path: std::env::var("AOC_KEYWORDS_FILE").map(PathBuf::from).ok(),
        }
    }
}
