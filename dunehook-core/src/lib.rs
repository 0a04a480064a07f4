pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod store;

pub use auth::{AuthMethod, AuthOutcome, Authenticator};
pub use config::DunehookConfig;
pub use error::DunehookError;
pub use store::{create_store, open_store, SqliteStore, Store, SupabaseStore};
