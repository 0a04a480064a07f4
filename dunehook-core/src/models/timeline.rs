use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    pub id: i64,
    pub year: Option<i32>,
    pub title: String,
    pub ticker: Option<String>,
    pub description: Option<String>,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A timeline entry derived from a single result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTimelineItem {
    pub year: i32,
    pub title: String,
    pub ticker: String,
    pub description: String,
    pub data: serde_json::Value,
}
