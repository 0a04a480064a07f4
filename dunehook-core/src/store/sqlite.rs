use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::Store;
use crate::config::SqliteConfig;
use crate::error::DunehookError;
use crate::models::{NewRawResult, NewTimelineItem, RawResult, TimelineItem};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS dune_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        query_id TEXT NOT NULL,
        execution_id TEXT,
        timestamp TEXT NOT NULL,
        data TEXT NOT NULL,
        metadata TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS timeline_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        year INTEGER,
        title TEXT NOT NULL,
        ticker TEXT,
        description TEXT,
        data TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dune_results_timestamp ON dune_results(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_timeline_items_created_at ON timeline_items(created_at)",
];

/// Embedded store backed by a SQLite file.
///
/// Timestamps are stored as fixed-width RFC 3339 UTC text (microsecond precision),
/// so ordering by the text column is ordering by time.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct RawResultRow {
    id: i64,
    query_id: String,
    execution_id: Option<String>,
    timestamp: String,
    data: String,
    metadata: Option<String>,
    created_at: String,
}

#[derive(Debug, FromRow)]
struct TimelineItemRow {
    id: i64,
    year: Option<i64>,
    title: String,
    ticker: Option<String>,
    description: Option<String>,
    data: Option<String>,
    created_at: String,
}

impl SqliteStore {
    pub async fn connect(config: &SqliteConfig) -> Result<Self, DunehookError> {
        let pool = if config.path == ":memory:" {
            // Every connection to :memory: is a separate database; pin a single one.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
                .await?
        } else {
            let options = SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(options)
                .await?
        };

        tracing::info!(path = %config.path, "Connected to SQLite database");
        Ok(Self { pool })
    }

    /// Fresh in-memory store with schema applied. Used by tests and dry runs.
    pub async fn in_memory() -> Result<Self, DunehookError> {
        let store = Self::connect(&SqliteConfig {
            path: ":memory:".to_string(),
            max_connections: 1,
        })
        .await?;
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, DunehookError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| DunehookError::Other(format!("bad stored timestamp {:?}: {}", value, e)))
}

fn parse_json(value: Option<String>) -> Result<Option<serde_json::Value>, DunehookError> {
    value
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(DunehookError::from)
}

impl TryFrom<RawResultRow> for RawResult {
    type Error = DunehookError;

    fn try_from(row: RawResultRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            query_id: row.query_id,
            execution_id: row.execution_id,
            timestamp: parse_ts(&row.timestamp)?,
            data: serde_json::from_str(&row.data)?,
            metadata: parse_json(row.metadata)?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

impl TryFrom<TimelineItemRow> for TimelineItem {
    type Error = DunehookError;

    fn try_from(row: TimelineItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            year: row.year.map(|y| y as i32),
            title: row.title,
            ticker: row.ticker,
            description: row.description,
            data: parse_json(row.data)?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn init_schema(&self) -> Result<(), DunehookError> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_raw_result(&self, row: NewRawResult) -> Result<i64, DunehookError> {
        let received_at = format_ts(row.received_at);
        let result = sqlx::query(
            r#"
            INSERT INTO dune_results (query_id, execution_id, timestamp, data, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&row.query_id)
        .bind(&row.execution_id)
        .bind(&received_at)
        .bind(serde_json::to_string(&row.data)?)
        .bind(serde_json::to_string(&row.metadata)?)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn insert_timeline_item(&self, item: NewTimelineItem) -> Result<i64, DunehookError> {
        let result = sqlx::query(
            r#"
            INSERT INTO timeline_items (year, title, ticker, description, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(item.year)
        .bind(&item.title)
        .bind(&item.ticker)
        .bind(&item.description)
        .bind(serde_json::to_string(&item.data)?)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_timeline_items(&self, limit: u32) -> Result<Vec<TimelineItem>, DunehookError> {
        let rows: Vec<TimelineItemRow> = sqlx::query_as(
            r#"
            SELECT id, year, title, ticker, description, data, created_at
            FROM timeline_items
            ORDER BY created_at DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TimelineItem::try_from).collect()
    }

    async fn list_raw_results(&self, limit: u32) -> Result<Vec<RawResult>, DunehookError> {
        let rows: Vec<RawResultRow> = sqlx::query_as(
            r#"
            SELECT id, query_id, execution_id, timestamp, data, metadata, created_at
            FROM dune_results
            ORDER BY timestamp DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RawResult::try_from).collect()
    }

    async fn health_check(&self) -> Result<String, DunehookError> {
        let row: (String,) = sqlx::query_as("SELECT sqlite_version()")
            .fetch_one(&self.pool)
            .await?;
        Ok(format!("SQLite {}", row.0))
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
