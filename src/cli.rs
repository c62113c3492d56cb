use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;
use crate::schedule::Category;

#[derive(Parser)]
#[command(name = "stock-updater")]
#[command(about = "Keeps a local market-data store fresh on a trading-calendar schedule")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Updater configuration file; builtin defaults apply when it is missing
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Tick the scheduler until interrupted
    Run,

    /// Show last update, rule and due state per category
    Status,

    /// Fetch the symbol index and reconcile the store now
    Reconcile,

    /// Refresh one category now, regardless of schedule
    Refresh {
        /// symbol_index, key_stats, intraday or historical
        category: Category,
    },
}
