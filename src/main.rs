mod cli;
mod config;
mod connectors;
mod logging;
mod mapping;
mod model;
mod sync;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::info;

use connectors::portfolio::PortfolioClient;
use connectors::tracker::TrackerClient;
use sync::SyncEngine;

#[tokio::main]
async fn main() -> Result<()> {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let args = cli::parse_args(&raw_args)?;
    if args.help {
        cli::print_help();
        return Ok(());
    }

    logging::init_logging()?;

    let config = config::load_config(args.config.as_deref())?;
    if config.projects.is_empty() {
        bail!("No project pairs configured. Add [[projects]] entries to the config file");
    }

    let portfolio = Arc::new(PortfolioClient::new(
        config.portfolio.base_url.clone(),
        config.portfolio.token.clone(),
    ));
    let tracker = Arc::new(TrackerClient::new(
        config.tracker.base_url.clone(),
        config.tracker.email.clone(),
        config.tracker.api_token.clone(),
    ));
    let engine = SyncEngine::new(
        portfolio,
        tracker,
        config.run_from.clone().unwrap_or_default(),
    );

    let interval = args.interval.unwrap_or(config.interval_secs);
    loop {
        engine.run_cycle(&config.projects).await;
        if args.once {
            break;
        }
        info!(seconds = interval, "sleeping until next cycle");
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }

    Ok(())
}
