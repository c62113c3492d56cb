use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::history::STOOQ_HISTORY_ENDPOINT;
use crate::fetch::listing::JPX_LISTING_URL;
use crate::fetch::quotes::STOOQ_QUOTE_ENDPOINT;
use crate::schedule::{Category, ScheduleRegistry, ScheduleRule};
use crate::updates::AggregatorConfig;

pub mod loader;
pub mod validator;

pub use loader::load_settings;

pub const DEFAULT_CONFIG_PATH: &str = "assets/configs/updater.json";

/// Where the listed-symbol index comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSource {
    Jpx { url: String },
    Csv { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub store_path: PathBuf,
    pub data_dir: PathBuf,
    pub tick_interval: Duration,
    pub symbol_suffix: String,
    pub index_source: IndexSource,
    pub quote_endpoint: String,
    pub history_endpoint: String,
    pub aggregator: AggregatorConfig,
    pub schedule_overrides: Vec<(Category, ScheduleRule)>,
}

impl Settings {
    pub fn builtin() -> Self {
        Self {
            store_path: PathBuf::from("assets/store/market.json"),
            data_dir: PathBuf::from("assets/history"),
            tick_interval: Duration::from_secs(5),
            symbol_suffix: ".jp".to_string(),
            index_source: IndexSource::Jpx {
                url: JPX_LISTING_URL.to_string(),
            },
            quote_endpoint: STOOQ_QUOTE_ENDPOINT.to_string(),
            history_endpoint: STOOQ_HISTORY_ENDPOINT.to_string(),
            aggregator: AggregatorConfig::default(),
            schedule_overrides: Vec::new(),
        }
    }

    pub fn registry(&self) -> ScheduleRegistry {
        ScheduleRegistry::with_overrides(self.schedule_overrides.iter().copied())
    }

    /// Anchor relative paths at `root`.
    pub(crate) fn rooted(mut self, root: &Path) -> Self {
        self.store_path = rooted_path(root, self.store_path);
        self.data_dir = rooted_path(root, self.data_dir);
        if let IndexSource::Csv { path } = self.index_source {
            self.index_source = IndexSource::Csv {
                path: rooted_path(root, path),
            };
        }
        self
    }
}

fn rooted_path(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}
