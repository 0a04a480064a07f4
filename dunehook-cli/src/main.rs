//! dunehook-cli: operator tool for a running Dunehook server
//!
//! # Subcommands
//! - `send <file> [--secret <s>] [--query-secret]` — sign and deliver a webhook payload
//! - `timeline [-n <limit>] [--json]`              — show derived timeline items
//! - `latest`                                       — print the newest stored delivery
//! - `status`                                       — show server health

use std::io::Read;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dunehook_core::auth::{sign_body, SECRET_QUERY_PARAM, SIGNATURE_HEADER};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:3000";
const DEFAULT_LIMIT: usize = 50;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "dunehook-cli",
    version,
    about = "Send signed Dune webhook deliveries and read the derived timeline"
)]
struct Cli {
    /// Dunehook HTTP server URL (overrides DUNEHOOK_URL env var)
    #[arg(long, env = "DUNEHOOK_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Deliver a JSON payload to /webhook/dune
    Send {
        /// Payload file, or "-" for stdin
        file: String,

        /// Shared webhook secret
        #[arg(long, env = "DUNE_WEBHOOK_SECRET")]
        secret: String,

        /// Authenticate with the query parameter instead of a signature header
        #[arg(long)]
        query_secret: bool,
    },

    /// Show the newest timeline items
    Timeline {
        /// Maximum number of items to print
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the newest stored delivery as JSON
    Latest,

    /// Show Dunehook server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

/// A timeline item as returned by GET /api/timeline
#[derive(Debug, Deserialize)]
pub struct TimelineEntry {
    pub id: i64,
    pub year: Option<i32>,
    pub title: String,
    pub ticker: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<String>,
}

/// One human-readable line per timeline item.
pub fn format_timeline_line(entry: &TimelineEntry) -> String {
    let year = entry
        .year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "----".to_string());
    let ticker = entry.ticker.as_deref().unwrap_or("?");
    let description: String = entry
        .description
        .as_deref()
        .unwrap_or("")
        .chars()
        .take(80)
        .collect();
    format!("{}  ${:<10} {}  {}", year, ticker, entry.title, description)
        .trim_end()
        .to_string()
}

/// Webhook URL, with the shared secret form-encoded into the query when query
/// authentication is used.
pub fn webhook_url(server: &str, query_secret: Option<&str>) -> anyhow::Result<reqwest::Url> {
    let base = format!("{}/webhook/dune", server);
    let url = match query_secret {
        Some(secret) => reqwest::Url::parse_with_params(&base, &[(SECRET_QUERY_PARAM, secret)])?,
        None => reqwest::Url::parse(&base)?,
    };
    Ok(url)
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn read_payload(file: &str) -> anyhow::Result<Vec<u8>> {
    if file == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read(file)?)
    }
}

/// Deliver a payload exactly as read from disk; the signature covers those bytes.
fn do_send(server: &str, file: &str, secret: &str, query_secret: bool) -> anyhow::Result<()> {
    let body = read_payload(file)?;
    serde_json::from_slice::<serde_json::Value>(&body)
        .map_err(|e| anyhow::anyhow!("{} is not valid JSON: {}", file, e))?;

    let url = webhook_url(server, query_secret.then_some(secret))?;
    let mut req = client(30)?
        .post(url)
        .header("content-type", "application/json");
    if !query_secret {
        req = req.header(SIGNATURE_HEADER, sign_body(secret, &body));
    }

    let resp = match req.body(body).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("dunehook-cli: connection failed to {}: {}", server, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let text = resp.text().unwrap_or_default();
    if !status.is_success() {
        eprintln!("dunehook-cli: server returned {}: {}", status, text);
        std::process::exit(1);
    }
    println!("{}", text);
    Ok(())
}

fn do_timeline(server: &str, limit: usize, json_output: bool) -> anyhow::Result<()> {
    let url = format!("{}/api/timeline", server);
    let resp = client(30)?.get(&url).send()?;
    if !resp.status().is_success() {
        eprintln!("dunehook-cli: server returned {}", resp.status());
        std::process::exit(1);
    }

    let items: Vec<serde_json::Value> = resp.json()?;
    let items: Vec<serde_json::Value> = items.into_iter().take(limit).collect();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        eprintln!("Timeline is empty");
        return Ok(());
    }
    for item in items {
        let entry: TimelineEntry = serde_json::from_value(item)?;
        println!("{}", format_timeline_line(&entry));
    }
    Ok(())
}

fn do_latest(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/dune-data/latest", server);
    let resp = client(30)?.get(&url).send()?;
    if !resp.status().is_success() {
        eprintln!("dunehook-cli: server returned {}", resp.status());
        std::process::exit(1);
    }
    let body: serde_json::Value = resp.json()?;
    if body.as_object().map(|o| o.is_empty()).unwrap_or(false) {
        eprintln!("No deliveries stored yet");
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(10)?.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Dunehook server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
            println!("Database:        {}", body["database"].as_str().unwrap_or("?"));
            println!("Timestamp:       {}", body["timestamp"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("dunehook-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("dunehook-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Send {
            file,
            secret,
            query_secret,
        } => do_send(&server, &file, &secret, query_secret),
        Commands::Timeline { limit, json } => do_timeline(&server, limit, json),
        Commands::Latest => do_latest(&server),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("dunehook-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
