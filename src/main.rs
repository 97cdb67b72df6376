use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manifest_proxy::{
    config::Config,
    origin::HttpManifestFetcher,
    services::ManifestService,
    utils::time::SystemClock,
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "manifest-proxy")]
#[command(version)]
#[command(about = "Rewrites HLS and DASH manifests using filters embedded in the request path")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with specified level
    let log_filter = if cli.log_level == "trace" {
        format!("manifest_proxy={},tower_http=trace", cli.log_level)
    } else {
        format!("manifest_proxy={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Manifest Proxy v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    // Override config with CLI arguments
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }

    let fetcher = Arc::new(HttpManifestFetcher::new(&config.origin)?);
    let manifests = ManifestService::new(&config, fetcher, Arc::new(SystemClock))?;
    info!("Origin: {}", config.origin.base_url);

    let server = WebServer::new(&config, manifests)?;
    info!("Listening on http://{}:{}", server.host(), server.port());
    server.serve().await
}
