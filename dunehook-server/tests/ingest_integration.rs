//! Failure-policy tests for webhook ingestion.
//!
//! Wraps the in-memory SQLite store to inject insert failures and checks that a
//! failing timeline row never blocks its siblings or the parent delivery, while a
//! failing raw insert fails the request.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use dunehook_core::models::{NewRawResult, NewTimelineItem, RawResult, TimelineItem};
use dunehook_core::{Authenticator, DunehookConfig, DunehookError, SqliteStore, Store};
use dunehook_server::http::{dune_webhook_inner, HttpState};
use serde_json::json;

const SECRET: &str = "ingest-secret";

/// Delegates to SQLite, but rejects chosen inserts.
struct FlakyStore {
    inner: SqliteStore,
    fail_title: Option<&'static str>,
    fail_raw: bool,
}

#[async_trait]
impl Store for FlakyStore {
    async fn init_schema(&self) -> Result<(), DunehookError> {
        self.inner.init_schema().await
    }

    async fn insert_raw_result(&self, row: NewRawResult) -> Result<i64, DunehookError> {
        if self.fail_raw {
            return Err(DunehookError::Other("raw insert rejected".to_string()));
        }
        self.inner.insert_raw_result(row).await
    }

    async fn insert_timeline_item(&self, item: NewTimelineItem) -> Result<i64, DunehookError> {
        if self.fail_title == Some(item.title.as_str()) {
            return Err(DunehookError::Other("timeline insert rejected".to_string()));
        }
        self.inner.insert_timeline_item(item).await
    }

    async fn list_timeline_items(&self, limit: u32) -> Result<Vec<TimelineItem>, DunehookError> {
        self.inner.list_timeline_items(limit).await
    }

    async fn list_raw_results(&self, limit: u32) -> Result<Vec<RawResult>, DunehookError> {
        self.inner.list_raw_results(limit).await
    }

    async fn health_check(&self) -> Result<String, DunehookError> {
        self.inner.health_check().await
    }

    async fn close(&self) {
        self.inner.close().await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

async fn make_state(fail_title: Option<&'static str>, fail_raw: bool) -> HttpState {
    let inner = SqliteStore::in_memory().await.expect("in-memory store");
    HttpState {
        store: Arc::new(FlakyStore {
            inner,
            fail_title,
            fail_raw,
        }),
        auth: Authenticator::new(SECRET),
        config: DunehookConfig::default(),
    }
}

fn secret_params() -> HashMap<String, String> {
    let mut params = HashMap::new();
    params.insert("dune_secret".to_string(), SECRET.to_string());
    params
}

#[tokio::test]
async fn test_failing_row_does_not_block_siblings_or_parent() {
    let state = make_state(Some("Boom"), false).await;
    let body = json!({
        "query_id": "77",
        "execution_id": "exec-77",
        "result": {"rows": [
            {"name": "Foo", "symbol": "FOO", "created_at": "2021-05-01"},
            {"name": "Boom", "symbol": "BOOM"},
            {}
        ]}
    })
    .to_string();

    let (status, resp) =
        dune_webhook_inner(&state, &secret_params(), &HeaderMap::new(), body.as_bytes()).await;

    assert_eq!(status, StatusCode::OK, "{:?}", resp);
    assert_eq!(resp["success"], true);
    assert_eq!(resp["timeline_items"], 2);

    let raw = state.store.latest_raw_result().await.unwrap().unwrap();
    assert_eq!(raw.query_id, "77");

    let titles: Vec<String> = state
        .store
        .list_timeline_items(50)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.title)
        .collect();
    assert_eq!(titles, vec!["New Token".to_string(), "Foo".to_string()]);
}

#[tokio::test]
async fn test_every_row_failing_still_succeeds() {
    let state = make_state(Some("New Token"), false).await;
    let body = json!({"result": {"rows": [{}, {}, {}]}}).to_string();

    let (status, resp) =
        dune_webhook_inner(&state, &secret_params(), &HeaderMap::new(), body.as_bytes()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["timeline_items"], 0);
    let raw = state.store.latest_raw_result().await.unwrap().unwrap();
    assert_eq!(raw.query_id, "unknown");
}

#[tokio::test]
async fn test_raw_insert_failure_is_500_and_skips_derivation() {
    let state = make_state(None, true).await;
    let body = json!({"query_id": "88", "result": {"rows": [{"name": "Foo"}]}}).to_string();

    let (status, resp) =
        dune_webhook_inner(&state, &secret_params(), &HeaderMap::new(), body.as_bytes()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp["error"], "Database error");
    assert!(state.store.list_timeline_items(50).await.unwrap().is_empty());
}
