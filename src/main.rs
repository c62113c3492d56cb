use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use stock_updater::cli::{Cli, Commands};
use stock_updater::config::{load_settings, IndexSource, Settings};
use stock_updater::fetch::{
    CsvIndexProvider, IndexProvider, JpxIndexProvider, StooqHistoryUpdater, StooqQuoteSource,
};
use stock_updater::manager::{Collaborators, Manager};
use stock_updater::records::{JsonStore, Store};
use stock_updater::updates::UpdateEventAggregator;
use stock_updater::utils::local_now;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = load_settings(Path::new("."), &cli.config)
        .context("Failed to load updater configuration")?;
    let manager = Arc::new(build_manager(&settings)?);

    match cli.command {
        Commands::Run => {
            manager
                .run(settings.tick_interval, async {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for ctrl-c: {err}");
                    }
                    info!("Shutdown requested");
                })
                .await?;
        }
        Commands::Status => {
            for line in manager.status(local_now())? {
                println!("{line}");
            }
            finish(manager).await?;
        }
        Commands::Reconcile => {
            let delta = manager.reconcile_now(local_now()).await?;
            println!(
                "{} symbols added, {} removed",
                delta.added.len(),
                delta.removed.len()
            );
            finish(manager).await?;
        }
        Commands::Refresh { category } => {
            let outcome = manager.refresh_now(category, local_now()).await;
            finish(manager).await?;
            outcome?;
            println!("{category} refreshed");
        }
    }

    Ok(())
}

fn build_manager(settings: &Settings) -> Result<Manager> {
    let store: Arc<dyn Store> = Arc::new(
        JsonStore::open(&settings.store_path)
            .with_context(|| format!("Failed to open store {}", settings.store_path.display()))?,
    );

    let aggregator = UpdateEventAggregator::new(Arc::clone(&store), settings.aggregator.clone())
        .spawn();

    let index_provider: Arc<dyn IndexProvider> = match &settings.index_source {
        IndexSource::Jpx { url } => Arc::new(JpxIndexProvider::new(url.clone())),
        IndexSource::Csv { path } => Arc::new(CsvIndexProvider::new(path.clone())),
    };
    let quotes = Arc::new(StooqQuoteSource::new(
        settings.quote_endpoint.clone(),
        settings.symbol_suffix.clone(),
    ));
    let history = Arc::new(StooqHistoryUpdater::new(
        settings.history_endpoint.clone(),
        settings.symbol_suffix.clone(),
        settings.data_dir.clone(),
        Arc::clone(&store),
        aggregator.sender(),
    ));

    Ok(Manager::new(
        settings.registry(),
        Collaborators {
            store,
            index_provider,
            quotes,
            history,
        },
        aggregator,
    ))
}

/// Drain the aggregator before a one-shot command exits.
async fn finish(manager: Arc<Manager>) -> Result<()> {
    match Arc::try_unwrap(manager) {
        Ok(manager) => Ok(manager.shutdown().await?),
        Err(_) => Ok(()),
    }
}
