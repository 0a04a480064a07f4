use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Secret value shipped in the original example config. Treated as "not configured".
pub const PLACEHOLDER_SECRET: &str = "your-secret-key";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DunehookConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Directory served for any path not matched by an API route.
    pub static_dir: String,
    pub body_limit_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            static_dir: ".".to_string(),
            body_limit_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebhookConfig {
    pub secret: String,
    /// Accept every delivery while `secret` is still the placeholder. Development only.
    pub allow_placeholder_secret: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: PLACEHOLDER_SECRET.to_string(),
            allow_placeholder_secret: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Supabase,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub sqlite: SqliteConfig,
    #[serde(default)]
    pub supabase: SupabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SqliteConfig {
    /// File path, or `:memory:` for a throwaway database.
    pub path: String,
    pub max_connections: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "./dune_data.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
    pub timeout_seconds: u64,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            service_key: String::new(),
            timeout_seconds: 30,
        }
    }
}

impl DunehookConfig {
    /// Load from an optional TOML file, then `DUNEHOOK__SECTION__KEY` variables,
    /// then the legacy variable names used by existing deployments.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("DUNEHOOK")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .set_override_option("http.port", std::env::var("PORT").ok())?
            .set_override_option("webhook.secret", std::env::var("DUNE_WEBHOOK_SECRET").ok())?
            .set_override_option("storage.sqlite.path", std::env::var("DB_PATH").ok())?
            .set_override_option("storage.supabase.url", std::env::var("SUPABASE_URL").ok())?
            .set_override_option(
                "storage.supabase.service_key",
                std::env::var("SUPABASE_SERVICE_ROLE_KEY").ok(),
            )?
            .build()?;
        s.try_deserialize()
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_legacy_deployment() {
        let config = DunehookConfig::default();
        assert_eq!(config.http.port, 3000);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.sqlite.path, "./dune_data.db");
        assert_eq!(config.webhook.secret, PLACEHOLDER_SECRET);
        assert!(!config.webhook.allow_placeholder_secret);
        assert_eq!(config.http.body_limit_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn load_parses_toml_file() {
        let dir = std::env::temp_dir().join(format!("dunehook-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dunehook.toml");
        std::fs::write(
            &path,
            r#"
[http]
host = "127.0.0.1"
port = 8080
static_dir = "public"
body_limit_bytes = 1024

[webhook]
secret = "s3cret"

[storage]
backend = "supabase"

[storage.supabase]
url = "https://example.supabase.co"
service_key = "service-key"
timeout_seconds = 5
"#,
        )
        .unwrap();

        let config = DunehookConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.http.host, "127.0.0.1");
        assert_eq!(config.http.static_dir, "public");
        assert_eq!(config.storage.backend, StorageBackend::Supabase);
        assert_eq!(config.storage.supabase.url, "https://example.supabase.co");
        assert_eq!(config.storage.supabase.timeout_seconds, 5);
        // sqlite section omitted entirely: defaults fill in
        assert_eq!(config.storage.sqlite.max_connections, 5);

        std::fs::remove_dir_all(&dir).ok();
    }
}
