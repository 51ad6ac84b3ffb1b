use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use chat_relay::{
    cli::{Cli, Command},
    client,
    config::RelayConfig,
    server::Relay,
};

/// `RUST_LOG` overrides `default_level`.
fn init_tracing(default_level: LevelFilter) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("failed to install tracing subscriber")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // The client shares the terminal with chat output, so it stays quiet by default.
    let default_level = match cli.command {
        Command::Server(_) => LevelFilter::INFO,
        Command::Client(_) => LevelFilter::WARN,
    };
    init_tracing(default_level)?;

    match cli.command {
        Command::Server(args) => {
            let relay = Relay::bind(RelayConfig::from(&args)).await?;
            let addr = relay.local_addr()?;
            info!("relay listening on {}", addr);
            relay.run_until_ctrl_c().await;
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
