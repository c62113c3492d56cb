use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use chrono::{NaiveTime, Weekday};
use log::{info, warn};
use serde::Deserialize;

use crate::error::{AppError, Context, Result};
use crate::schedule::{Category, ScheduleRule};
use crate::updates::OverflowCheck;

use super::{validator, IndexSource, Settings};

/// Load settings from `config_path`, falling back to the builtin defaults when
/// the file does not exist. Relative paths are anchored at `root`.
pub fn load_settings(root: &Path, config_path: &Path) -> Result<Settings> {
    let settings = if config_path.exists() {
        let json = fs::read_to_string(config_path).with_context(|| {
            format!("failed to read updater config at {}", config_path.display())
        })?;
        let settings = parse_settings(&json).with_context(|| {
            format!("failed to parse updater config at {}", config_path.display())
        })?;
        info!("Loaded updater config from {}", config_path.display());
        settings
    } else {
        warn!(
            "No updater config at {}, using builtin defaults",
            config_path.display()
        );
        Settings::builtin()
    };

    let settings = settings.rooted(root);
    validator::validate_settings(&settings)?;
    Ok(settings)
}

/// Overlay a JSON document on the builtin defaults.
pub fn parse_settings(json: &str) -> Result<Settings> {
    let raw: RawSettings = serde_json::from_str(json)?;
    raw.into_settings()
}

#[derive(Debug, Deserialize, Default)]
struct RawSettings {
    store_path: Option<String>,
    data_dir: Option<String>,
    tick_interval_secs: Option<u64>,
    symbol_suffix: Option<String>,
    index_source: Option<RawIndexSource>,
    quote_endpoint: Option<String>,
    history_endpoint: Option<String>,
    #[serde(default)]
    aggregator: RawAggregator,
    #[serde(default)]
    schedules: BTreeMap<String, RawScheduleRule>,
}

impl RawSettings {
    fn into_settings(self) -> Result<Settings> {
        let mut settings = Settings::builtin();

        if let Some(path) = self.store_path {
            settings.store_path = PathBuf::from(path);
        }
        if let Some(dir) = self.data_dir {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = self.tick_interval_secs {
            settings.tick_interval = Duration::from_secs(secs);
        }
        if let Some(suffix) = self.symbol_suffix {
            settings.symbol_suffix = suffix;
        }
        if let Some(source) = self.index_source {
            settings.index_source = source.into_index_source();
        }
        if let Some(endpoint) = self.quote_endpoint {
            settings.quote_endpoint = endpoint;
        }
        if let Some(endpoint) = self.history_endpoint {
            settings.history_endpoint = endpoint;
        }

        self.aggregator.apply(&mut settings)?;

        for (key, rule) in self.schedules {
            let category = Category::from_str(&key)?;
            let rule = rule
                .into_rule()
                .with_context(|| format!("invalid schedule for `{key}`"))?;
            settings.schedule_overrides.push((category, rule));
        }

        Ok(settings)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawIndexSource {
    Jpx { url: Option<String> },
    Csv { path: String },
}

impl RawIndexSource {
    fn into_index_source(self) -> IndexSource {
        match self {
            RawIndexSource::Jpx { url } => IndexSource::Jpx {
                url: url.unwrap_or_else(|| crate::fetch::listing::JPX_LISTING_URL.to_string()),
            },
            RawIndexSource::Csv { path } => IndexSource::Csv {
                path: PathBuf::from(path),
            },
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawAggregator {
    flush_threshold: Option<usize>,
    overflow_check: Option<String>,
    max_retained: Option<usize>,
    channel_capacity: Option<usize>,
}

impl RawAggregator {
    fn apply(self, settings: &mut Settings) -> Result<()> {
        let aggregator = &mut settings.aggregator;
        if let Some(threshold) = self.flush_threshold {
            aggregator.flush_threshold = threshold;
        }
        if let Some(order) = self.overflow_check {
            aggregator.overflow_check = parse_overflow_check(&order)?;
        }
        if let Some(cap) = self.max_retained {
            aggregator.max_retained = cap;
        }
        if let Some(capacity) = self.channel_capacity {
            aggregator.channel_capacity = capacity;
        }
        Ok(())
    }
}

fn parse_overflow_check(value: &str) -> Result<OverflowCheck> {
    match value.trim().to_ascii_lowercase().as_str() {
        "after_append" => Ok(OverflowCheck::AfterAppend),
        "before_append" => Ok(OverflowCheck::BeforeAppend),
        other => Err(AppError::Config(format!(
            "aggregator.overflow_check must be `after_append` or `before_append`, found `{other}`"
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawScheduleRule {
    Weekly { weekday: String, time: String },
    TradingDays { time: String },
    Interval { seconds: u64 },
}

impl RawScheduleRule {
    fn into_rule(self) -> Result<ScheduleRule> {
        Ok(match self {
            RawScheduleRule::Weekly { weekday, time } => ScheduleRule::Weekly {
                weekday: parse_weekday(&weekday)?,
                time_of_day: parse_time(&time)?,
            },
            RawScheduleRule::TradingDays { time } => ScheduleRule::TradingDays {
                time_of_day: parse_time(&time)?,
            },
            RawScheduleRule::Interval { seconds } => ScheduleRule::Interval {
                interval: Duration::from_secs(seconds),
            },
        })
    }
}

fn parse_weekday(value: &str) -> Result<Weekday> {
    Weekday::from_str(value.trim())
        .map_err(|_| AppError::Config(format!("unknown weekday `{value}`")))
}

fn parse_time(value: &str) -> Result<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| AppError::Config(format!("time `{value}` is not HH:MM")))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::schedule::ScheduleRegistry;

    #[test]
    fn empty_document_yields_builtin_settings() {
        let settings = parse_settings("{}").unwrap();
        let builtin = Settings::builtin();

        assert_eq!(settings.store_path, builtin.store_path);
        assert_eq!(settings.index_source, builtin.index_source);
        assert!(settings.schedule_overrides.is_empty());
        assert_eq!(settings.aggregator.flush_threshold, 1000);
    }

    #[test]
    fn schedule_overrides_replace_builtin_rules() {
        let json = r#"{
            "index_source": { "type": "csv", "path": "assets/symbols.csv" },
            "aggregator": { "flush_threshold": 10, "overflow_check": "before_append" },
            "schedules": {
                "symbol_index": { "type": "weekly", "weekday": "fri", "time": "18:00" },
                "intraday": { "type": "interval", "seconds": 60 }
            }
        }"#;
        let settings = parse_settings(json).unwrap();
        let registry = settings.registry();

        assert_eq!(
            registry.rule(Category::SymbolIndex),
            ScheduleRule::Weekly {
                weekday: Weekday::Fri,
                time_of_day: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            }
        );
        assert_eq!(
            registry.rule(Category::Intraday),
            ScheduleRule::Interval {
                interval: Duration::from_secs(60)
            }
        );
        assert_eq!(
            registry.rule(Category::KeyStats),
            ScheduleRegistry::builtin().rule(Category::KeyStats)
        );
        assert_eq!(settings.aggregator.overflow_check, OverflowCheck::BeforeAppend);
        assert_eq!(
            settings.index_source,
            IndexSource::Csv {
                path: PathBuf::from("assets/symbols.csv")
            }
        );
    }

    #[test]
    fn rejects_unknown_categories_and_bad_times() {
        let unknown = r#"{ "schedules": { "dividends": { "type": "interval", "seconds": 5 } } }"#;
        assert!(matches!(parse_settings(unknown), Err(AppError::Config(_))));

        let bad_time =
            r#"{ "schedules": { "key_stats": { "type": "trading_days", "time": "25:99" } } }"#;
        assert!(parse_settings(bad_time).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_builtin_rooted_paths() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(dir.path(), &dir.path().join("absent.json")).unwrap();

        assert_eq!(
            settings.store_path,
            dir.path().join("assets/store/market.json")
        );
        assert!(settings.data_dir.starts_with(dir.path()));
    }

    #[test]
    fn loads_and_validates_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("updater.json");

        let mut file = fs::File::create(&path).unwrap();
        write!(file, r#"{{ "tick_interval_secs": 0 }}"#).unwrap();
        drop(file);
        let err = load_settings(dir.path(), &path).unwrap_err();
        assert!(err.to_string().contains("tick_interval"));

        fs::write(&path, r#"{ "tick_interval_secs": 2, "data_dir": "/var/bars" }"#).unwrap();
        let settings = load_settings(dir.path(), &path).unwrap();
        assert_eq!(settings.tick_interval, Duration::from_secs(2));
        assert_eq!(settings.data_dir, PathBuf::from("/var/bars"));
    }
}
