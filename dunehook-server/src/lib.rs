pub mod http;
pub mod ingest;
pub mod server;
