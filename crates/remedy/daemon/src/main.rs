//! remedyd - Remedy repair loop daemon

use clap::Parser;
use remedy_daemon::{DaemonConfig, DaemonResult, Server};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "remedyd")]
#[command(about = "Remedy autonomous repair loop daemon")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "REMEDY_CONFIG", default_value = "remedy.toml")]
    config: String,

    /// Listen address (overrides the config file)
    #[arg(short, long, env = "REMEDY_LISTEN")]
    listen: Option<String>,

    /// Log level (overrides the config file)
    #[arg(long, env = "REMEDY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "REMEDY_JSON_LOGS")]
    json: bool,

    /// Start the repair loop immediately
    #[arg(long)]
    autostart: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(&cli.config)?;
    if let Some(listen) = &cli.listen {
        config.set_listen_addr(listen)?;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= cli.json;
    config.autostart |= cli.autostart;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config,
        "Starting remedyd"
    );

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
