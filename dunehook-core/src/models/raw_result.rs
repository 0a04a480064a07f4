use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted webhook delivery. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    pub id: i64,
    pub query_id: String,
    pub execution_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewRawResult {
    pub query_id: String,
    pub execution_id: Option<String>,
    /// Receipt time; stored in the `timestamp` column.
    #[serde(rename = "timestamp")]
    pub received_at: DateTime<Utc>,
    pub data: serde_json::Value,
    pub metadata: serde_json::Value,
}
