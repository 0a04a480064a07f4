use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Store, RAW_RESULTS_TABLE, TIMELINE_TABLE};
use crate::config::SupabaseConfig;
use crate::error::DunehookError;
use crate::models::{NewRawResult, NewTimelineItem, RawResult, TimelineItem};

/// DDL sent through the `exec_sql` RPC. Must already be installed in the project.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS dune_results (
    id SERIAL PRIMARY KEY,
    query_id TEXT NOT NULL,
    execution_id TEXT,
    timestamp TIMESTAMPTZ DEFAULT NOW(),
    data JSONB NOT NULL,
    metadata JSONB,
    created_at TIMESTAMPTZ DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS timeline_items (
    id SERIAL PRIMARY KEY,
    year INTEGER,
    title TEXT NOT NULL,
    ticker TEXT,
    description TEXT,
    data JSONB,
    created_at TIMESTAMPTZ DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_dune_results_timestamp ON dune_results(timestamp);
CREATE INDEX IF NOT EXISTS idx_timeline_items_created_at ON timeline_items(created_at);
"#;

// ============================================================================
// PostgREST wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ExecSqlRequest<'a> {
    sql: &'a str,
}

#[derive(Debug, Deserialize)]
struct InsertedId {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    message: Option<String>,
    code: Option<String>,
}

// ============================================================================
// SupabaseStore
// ============================================================================

/// Hosted store. Talks to the Supabase PostgREST endpoint with a service-role key.
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    rest_url: String,
    service_key: String,
}

impl SupabaseStore {
    pub fn new(config: &SupabaseConfig) -> Result<Self, DunehookError> {
        if config.url.trim().is_empty() || config.service_key.trim().is_empty() {
            return Err(DunehookError::InvalidConfig(
                "storage.supabase.url and storage.supabase.service_key are required \
                 (SUPABASE_URL / SUPABASE_SERVICE_ROLE_KEY)"
                    .to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()?;

        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            service_key: config.service_key.clone(),
        })
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn insert<T: Serialize + Sync>(&self, table: &str, row: &T) -> Result<i64, DunehookError> {
        let url = format!("{}/{}", self.rest_url, table);
        let response = self
            .authed(self.client.post(&url))
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;

        let inserted: Vec<InsertedId> = read_json(response).await?;
        inserted
            .into_iter()
            .next()
            .map(|r| r.id)
            .ok_or_else(|| DunehookError::Other(format!("insert into {} returned no row", table)))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        order: &str,
        limit: u32,
    ) -> Result<Vec<T>, DunehookError> {
        let url = format!("{}/{}", self.rest_url, table);
        let limit = limit.to_string();
        let response = self
            .authed(self.client.get(&url))
            .query(&[("select", "*"), ("order", order), ("limit", limit.as_str())])
            .send()
            .await?;

        read_json(response).await
    }
}

/// Decode a 2xx body, or turn the PostgREST error body into `DunehookError::Api`.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, DunehookError> {
    let status = response.status();

    if !status.is_success() {
        let error_body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<PostgrestError>(&error_body)
            .ok()
            .map(|e| match (e.code, e.message) {
                (Some(code), Some(msg)) => format!("{}: {}", code, msg),
                (None, Some(msg)) => msg,
                _ => error_body.clone(),
            })
            .unwrap_or(error_body);

        tracing::error!(code = status.as_u16(), message = %message, "Supabase API error");

        return Err(DunehookError::Api {
            code: status.as_u16(),
            message,
        });
    }

    Ok(response.json().await?)
}

#[async_trait]
impl Store for SupabaseStore {
    async fn init_schema(&self) -> Result<(), DunehookError> {
        let url = format!("{}/rpc/exec_sql", self.rest_url);
        let response = self
            .authed(self.client.post(&url))
            .json(&ExecSqlRequest { sql: SCHEMA_SQL })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("Supabase tables created/verified");
        } else {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                code = status.as_u16(),
                body = %body,
                "exec_sql RPC unavailable; assuming tables were created out of band"
            );
        }

        // Tables must be reachable either way before traffic is accepted.
        self.health_check().await.map(|_| ())
    }

    async fn insert_raw_result(&self, row: NewRawResult) -> Result<i64, DunehookError> {
        self.insert(RAW_RESULTS_TABLE, &row).await
    }

    async fn insert_timeline_item(&self, item: NewTimelineItem) -> Result<i64, DunehookError> {
        self.insert(TIMELINE_TABLE, &item).await
    }

    async fn list_timeline_items(&self, limit: u32) -> Result<Vec<TimelineItem>, DunehookError> {
        self.select(TIMELINE_TABLE, "created_at.desc,id.desc", limit).await
    }

    async fn list_raw_results(&self, limit: u32) -> Result<Vec<RawResult>, DunehookError> {
        self.select(RAW_RESULTS_TABLE, "timestamp.desc,id.desc", limit).await
    }

    async fn health_check(&self) -> Result<String, DunehookError> {
        let url = format!("{}/{}", self.rest_url, RAW_RESULTS_TABLE);
        let response = self
            .authed(self.client.get(&url))
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await?;
        let _: Vec<serde_json::Value> = read_json(response).await?;
        Ok(format!("Supabase {}", self.rest_url))
    }

    async fn close(&self) {
        // reqwest holds no server-side state; idle connections drop with the client.
    }

    fn name(&self) -> &str {
        "supabase"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(url: &str) -> SupabaseConfig {
        SupabaseConfig {
            url: url.to_string(),
            service_key: "service-role-key".to_string(),
            timeout_seconds: 5,
        }
    }

    fn raw_row_json(id: i64, query_id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "query_id": query_id,
            "execution_id": null,
            "timestamp": "2024-03-01T12:00:00.123456+00:00",
            "data": {"rows": []},
            "metadata": {"auth_method": "header"},
            "created_at": "2024-03-01T12:00:00.123456+00:00"
        })
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let mut config = test_config("https://example.supabase.co");
        config.service_key = String::new();
        assert!(matches!(
            SupabaseStore::new(&config),
            Err(DunehookError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_raw_result_posts_row_with_auth_headers() {
        let mock_server = MockServer::start().await;
        let store = SupabaseStore::new(&test_config(&format!("{}/", mock_server.uri()))).unwrap();

        Mock::given(method("POST"))
            .and(path("/rest/v1/dune_results"))
            .and(header("apikey", "service-role-key"))
            .and(header("authorization", "Bearer service-role-key"))
            .and(header("prefer", "return=representation"))
            .and(body_partial_json(json!({
                "query_id": "4242",
                "execution_id": "01HX",
                "data": {"rows": [{"name": "Foo"}]}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([raw_row_json(7, "4242")])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let id = store
            .insert_raw_result(NewRawResult {
                query_id: "4242".to_string(),
                execution_id: Some("01HX".to_string()),
                received_at: Utc::now(),
                data: json!({"rows": [{"name": "Foo"}]}),
                metadata: json!({}),
            })
            .await
            .unwrap();

        assert_eq!(id, 7);
    }

    #[tokio::test]
    async fn test_insert_error_maps_to_api_error() {
        let mock_server = MockServer::start().await;
        let store = SupabaseStore::new(&test_config(&mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .and(path("/rest/v1/timeline_items"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "23502",
                "message": "null value in column \"title\" violates not-null constraint"
            })))
            .mount(&mock_server)
            .await;

        let result = store
            .insert_timeline_item(NewTimelineItem {
                year: 2024,
                title: "Foo".to_string(),
                ticker: "FOO".to_string(),
                description: "Market cap: N/A".to_string(),
                data: json!({}),
            })
            .await;

        match result {
            Err(DunehookError::Api { code, message }) => {
                assert_eq!(code, 400);
                assert!(message.starts_with("23502"), "unexpected message: {}", message);
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_timeline_items_orders_and_limits() {
        let mock_server = MockServer::start().await;
        let store = SupabaseStore::new(&test_config(&mock_server.uri())).unwrap();

        Mock::given(method("GET"))
            .and(path("/rest/v1/timeline_items"))
            .and(query_param("order", "created_at.desc,id.desc"))
            .and(query_param("limit", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": 2, "year": 2021, "title": "Foo", "ticker": "FOO",
                    "description": "Market cap: N/A", "data": {"name": "Foo"},
                    "created_at": "2024-03-01T12:00:01+00:00"
                },
                {
                    "id": 1, "year": null, "title": "New Token", "ticker": null,
                    "description": null, "data": null,
                    "created_at": "2024-03-01T12:00:00+00:00"
                }
            ])))
            .mount(&mock_server)
            .await;

        let items = store.list_timeline_items(50).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Foo");
        assert_eq!(items[0].year, Some(2021));
        assert_eq!(items[1].ticker, None);
        assert!(items[0].created_at > items[1].created_at);
    }

    #[tokio::test]
    async fn test_latest_raw_result_empty_and_present() {
        let mock_server = MockServer::start().await;
        let store = SupabaseStore::new(&test_config(&mock_server.uri())).unwrap();

        Mock::given(method("GET"))
            .and(path("/rest/v1/dune_results"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/dune_results"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([raw_row_json(3, "q")])))
            .mount(&mock_server)
            .await;

        assert!(store.latest_raw_result().await.unwrap().is_none());
        let latest = store.latest_raw_result().await.unwrap().unwrap();
        assert_eq!(latest.id, 3);
        assert_eq!(latest.query_id, "q");
        assert_eq!(latest.execution_id, None);
    }

    #[tokio::test]
    async fn test_init_schema_tolerates_missing_rpc_when_tables_reachable() {
        let mock_server = MockServer::start().await;
        let store = SupabaseStore::new(&test_config(&mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/exec_sql"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "code": "PGRST202",
                "message": "Could not find the function public.exec_sql"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/dune_results"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&mock_server)
            .await;

        store.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_init_schema_fails_when_tables_unreachable() {
        let mock_server = MockServer::start().await;
        let store = SupabaseStore::new(&test_config(&mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/exec_sql"))
            .and(body_partial_json(json!({})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/dune_results"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "message": "Invalid API key"
            })))
            .mount(&mock_server)
            .await;

        match store.init_schema().await {
            Err(DunehookError::Api { code, message }) => {
                assert_eq!(code, 401);
                assert_eq!(message, "Invalid API key");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }
}
