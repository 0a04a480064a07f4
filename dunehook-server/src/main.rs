use clap::Parser;
use dunehook_core::DunehookConfig;
use tracing_subscriber::{fmt, EnvFilter};

use dunehook_server::server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "dunehook.toml")]
    config: String,

    /// Check store connectivity and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match DunehookConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if args.health {
        let store = match dunehook_core::open_store(&config.storage).await {
            Ok(s) => s,
            Err(e) => {
                println!("❌ {:?} store unavailable: {}", config.storage.backend, e);
                std::process::exit(1);
            }
        };
        match store.health_check().await {
            Ok(v) => println!("✅ {} connected: {}", store.name(), v),
            Err(e) => {
                println!("❌ {} health check failed: {}", store.name(), e);
                std::process::exit(1);
            }
        }
        store.close().await;
        println!("✅ Dunehook store health check passed");
        return Ok(());
    }

    server::run(config).await
}
