//! Persistence for webhook deliveries and derived timeline items.
//!
//! Provides a `Store` trait with implementations for:
//! - **SQLite** — embedded file database via sqlx
//! - **Supabase** — hosted Postgres reached through its PostgREST HTTP API

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::DunehookError;
use crate::models::{NewRawResult, NewTimelineItem, RawResult, TimelineItem};

pub mod sqlite;
pub mod supabase;

pub use sqlite::SqliteStore;
pub use supabase::SupabaseStore;

/// Read API bound for `GET /api/timeline`.
pub const TIMELINE_LIMIT: u32 = 50;

/// Read API bound for `GET /api/dune-data`.
pub const RAW_RESULTS_LIMIT: u32 = 100;

pub const RAW_RESULTS_TABLE: &str = "dune_results";
pub const TIMELINE_TABLE: &str = "timeline_items";

// ============================================================================
// Store trait
// ============================================================================

/// Abstraction over the relational store. Implementations must be safe for
/// concurrent use from many request handlers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create tables and indexes if missing. Called once before serving traffic.
    async fn init_schema(&self) -> Result<(), DunehookError>;

    async fn insert_raw_result(&self, row: NewRawResult) -> Result<i64, DunehookError>;

    async fn insert_timeline_item(&self, item: NewTimelineItem) -> Result<i64, DunehookError>;

    /// Newest first by creation time.
    async fn list_timeline_items(&self, limit: u32) -> Result<Vec<TimelineItem>, DunehookError>;

    /// Newest first by receipt time.
    async fn list_raw_results(&self, limit: u32) -> Result<Vec<RawResult>, DunehookError>;

    async fn latest_raw_result(&self) -> Result<Option<RawResult>, DunehookError> {
        Ok(self.list_raw_results(1).await?.into_iter().next())
    }

    /// Probe the backend; returns a short description on success.
    async fn health_check(&self) -> Result<String, DunehookError>;

    /// Flush and release connections. Called once on shutdown.
    async fn close(&self);

    /// Backend name for logging and `/health`.
    fn name(&self) -> &str;
}

/// Connect the configured backend. Schema initialization is left to the caller.
pub async fn create_store(config: &StorageConfig) -> Result<Arc<dyn Store>, DunehookError> {
    match config.backend {
        StorageBackend::Sqlite => Ok(Arc::new(SqliteStore::connect(&config.sqlite).await?)),
        StorageBackend::Supabase => Ok(Arc::new(SupabaseStore::new(&config.supabase)?)),
    }
}

/// Same as `create_store`, followed by `init_schema`.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn Store>, DunehookError> {
    let store = create_store(config).await?;
    store.init_schema().await?;
    tracing::info!(backend = store.name(), "Store schema initialized");
    Ok(store)
}
