//! Chain Sweeper - multi-backend balance monitor
//!
//! # WARNING
//! - Every detected balance is moved to the configured destination.
//! - Check `sweep.destination` twice, or start with `sweep.dry_run = true`.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use chain_sweeper::cli::App;
use chain_sweeper::config::Config;

/// Chain Sweeper - sweep balances from many EVM chains to one address
#[derive(Parser)]
#[command(name = "sweeper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "sweeper.toml", env = "SWEEPER_CONFIG")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chain_sweeper=info".parse()?),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let app = match App::build(config).await {
        Ok(app) => app,
        Err(e) => {
            error!("Initialization failed: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = app.run_menu().await;
    app.shutdown().await;

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Goodbye");
    Ok(())
}
