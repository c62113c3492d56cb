use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::calendar::{market_close, market_close_historical, market_open};

/// The data kinds kept fresh by the updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SymbolIndex,
    KeyStats,
    Intraday,
    Historical,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::SymbolIndex,
        Category::KeyStats,
        Category::Intraday,
        Category::Historical,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::SymbolIndex => "symbol_index",
            Category::KeyStats => "key_stats",
            Category::Intraday => "intraday",
            Category::Historical => "historical",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.label() == s)
            .ok_or_else(|| AppError::Config(format!("unknown update category `{s}`")))
    }
}

/// When a category becomes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleRule {
    /// Refresh once a week after `time_of_day` on `weekday`.
    Weekly {
        weekday: Weekday,
        time_of_day: NaiveTime,
    },
    /// Refresh every trading day after `time_of_day`.
    TradingDays { time_of_day: NaiveTime },
    /// Refresh whenever `interval` has elapsed, any day of the week.
    Interval { interval: Duration },
}

impl fmt::Display for ScheduleRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleRule::Weekly {
                weekday,
                time_of_day,
            } => write!(f, "weekly on {weekday} after {}", time_of_day.format("%H:%M")),
            ScheduleRule::TradingDays { time_of_day } => {
                write!(f, "trading days after {}", time_of_day.format("%H:%M"))
            }
            ScheduleRule::Interval { interval } => write!(f, "every {}s", interval.as_secs()),
        }
    }
}

/// Immutable category-to-rule table built once at startup.
#[derive(Debug, Clone)]
pub struct ScheduleRegistry {
    rules: HashMap<Category, ScheduleRule>,
}

impl ScheduleRegistry {
    pub fn builtin() -> Self {
        let rules = HashMap::from([
            (
                Category::SymbolIndex,
                ScheduleRule::Weekly {
                    weekday: Weekday::Mon,
                    time_of_day: market_open(),
                },
            ),
            (
                Category::KeyStats,
                ScheduleRule::TradingDays {
                    time_of_day: market_close(),
                },
            ),
            (
                Category::Intraday,
                ScheduleRule::Interval {
                    interval: Duration::from_secs(25),
                },
            ),
            (
                Category::Historical,
                ScheduleRule::TradingDays {
                    time_of_day: market_close_historical(),
                },
            ),
        ]);
        Self { rules }
    }

    /// Builtin table with the given entries replaced.
    pub fn with_overrides(overrides: impl IntoIterator<Item = (Category, ScheduleRule)>) -> Self {
        let mut registry = Self::builtin();
        registry.rules.extend(overrides);
        registry
    }

    pub fn rule(&self, category: Category) -> ScheduleRule {
        // Every category is seeded by `builtin`, overrides only replace.
        self.rules[&category]
    }
}
