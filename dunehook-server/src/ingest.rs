//! Webhook ingestion: persists a delivery and derives timeline items from its rows.
//!
//! Payload shape is not validated. Missing fields fall back to defaults so that every
//! authenticated, well-formed JSON delivery is stored. Timeline derivation is
//! best-effort: a row that fails to insert is logged and skipped.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use dunehook_core::models::{NewRawResult, NewTimelineItem};
use dunehook_core::{AuthMethod, DunehookError, Store};
use serde_json::{json, Value};
use uuid::Uuid;

const DEFAULT_QUERY_ID: &str = "unknown";
const DEFAULT_TITLE: &str = "New Token";
const DEFAULT_TICKER: &str = "TOKEN";

/// Request-level facts recorded alongside the payload.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub delivery_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub auth_method: AuthMethod,
    /// Request headers, already redacted.
    pub headers: Value,
    /// Query parameters, already redacted.
    pub query_params: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub raw_result_id: i64,
    pub rows_seen: usize,
    pub timeline_items: usize,
    pub failed_rows: usize,
}

/// Loose truthiness: absent, null, false, 0 and "" all count as missing.
fn field_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(_) => true,
    }
}

/// `body.result` when present, otherwise the whole body.
pub fn result_section(body: &Value) -> &Value {
    match body.get("result") {
        Some(result) if is_present(Some(result)) => result,
        _ => body,
    }
}

/// The row array of a delivery, if it has one.
pub fn extract_rows(body: &Value) -> Option<&Vec<Value>> {
    result_section(body).get("rows").and_then(Value::as_array)
}

pub fn build_raw_result(body: &Value, ctx: &DeliveryContext) -> NewRawResult {
    let query_metadata = if is_present(body.get("query_metadata")) {
        body["query_metadata"].clone()
    } else {
        Value::Null
    };

    NewRawResult {
        query_id: field_text(body.get("query_id")).unwrap_or_else(|| DEFAULT_QUERY_ID.to_string()),
        execution_id: field_text(body.get("execution_id")),
        received_at: ctx.received_at,
        data: result_section(body).clone(),
        metadata: json!({
            "headers": ctx.headers,
            "query_params": ctx.query_params,
            "received_at": ctx.received_at.to_rfc3339(),
            "query_metadata": query_metadata,
            "auth_method": ctx.auth_method.as_str(),
            "delivery_id": ctx.delivery_id.to_string(),
        }),
    }
}

/// Calendar year of a row's `created_at`. Accepts RFC 3339, `YYYY-MM-DD[ T]HH:MM:SS[.f]`
/// (optionally suffixed ` UTC`), `YYYY-MM-DD`, and epoch milliseconds.
pub fn parse_year(value: Option<&Value>) -> Option<i32> {
    match value? {
        Value::String(s) => {
            let s = s.trim();
            let s = s.strip_suffix(" UTC").unwrap_or(s);
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc).year());
            }
            for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(dt.year());
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(|d| d.year())
        }
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(millis).single().map(|dt| dt.year())
        }
        _ => None,
    }
}

/// Map one result row to a timeline item. Non-object rows yield `None`.
pub fn map_row(row: &Value, now: DateTime<Utc>) -> Option<NewTimelineItem> {
    let obj = row.as_object()?;

    let title = field_text(obj.get("name"))
        .or_else(|| field_text(obj.get("title")))
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let ticker = field_text(obj.get("symbol"))
        .or_else(|| field_text(obj.get("ticker")))
        .unwrap_or_else(|| DEFAULT_TICKER.to_string());

    let description = field_text(obj.get("description")).unwrap_or_else(|| {
        let market_cap = field_text(obj.get("market_cap")).unwrap_or_else(|| "N/A".to_string());
        format!("Market cap: {}", market_cap)
    });

    let year = parse_year(obj.get("created_at")).unwrap_or_else(|| now.year());

    Some(NewTimelineItem {
        year,
        title,
        ticker,
        description,
        data: row.clone(),
    })
}

pub fn derive_timeline_items(body: &Value, now: DateTime<Utc>) -> Vec<NewTimelineItem> {
    extract_rows(body)
        .map(|rows| rows.iter().filter_map(|row| map_row(row, now)).collect())
        .unwrap_or_default()
}

/// Persist the delivery, then each derived timeline item independently.
///
/// Only the raw insert can fail the call.
pub async fn ingest_webhook(
    body: &Value,
    ctx: &DeliveryContext,
    store: &dyn Store,
) -> Result<IngestReport, DunehookError> {
    let raw = build_raw_result(body, ctx);
    let query_id = raw.query_id.clone();
    let execution_id = raw.execution_id.clone().unwrap_or_default();

    tracing::info!(
        query_id = %query_id,
        execution_id = %execution_id,
        delivery_id = %ctx.delivery_id,
        auth_method = ctx.auth_method.as_str(),
        "Received Dune webhook"
    );

    let raw_result_id = store.insert_raw_result(raw).await.map_err(|e| {
        tracing::error!(
            query_id = %query_id,
            execution_id = %execution_id,
            delivery_id = %ctx.delivery_id,
            error = %e,
            "Failed to store webhook delivery"
        );
        e
    })?;

    let mut report = IngestReport {
        raw_result_id,
        ..Default::default()
    };

    let Some(rows) = extract_rows(body) else {
        return Ok(report);
    };
    report.rows_seen = rows.len();

    for (index, row) in rows.iter().enumerate() {
        let Some(item) = map_row(row, ctx.received_at) else {
            tracing::warn!(
                query_id = %query_id,
                execution_id = %execution_id,
                row = index,
                "Skipping non-object result row"
            );
            report.failed_rows += 1;
            continue;
        };

        match store.insert_timeline_item(item).await {
            Ok(_) => report.timeline_items += 1,
            Err(e) => {
                tracing::warn!(
                    query_id = %query_id,
                    execution_id = %execution_id,
                    row = index,
                    error = %e,
                    "Failed to insert timeline item"
                );
                report.failed_rows += 1;
            }
        }
    }

    tracing::info!(
        query_id = %query_id,
        raw_result_id = raw_result_id,
        timeline_items = report.timeline_items,
        failed_rows = report.failed_rows,
        "Webhook processed"
    );

    Ok(report)
}
