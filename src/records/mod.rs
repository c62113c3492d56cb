use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schedule::Category;

pub mod json_store;

pub use json_store::JsonStore;

pub type SymbolId = u64;

/// A listed instrument as delivered by the index provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub industry: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorRecord {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndustryRecord {
    pub name: String,
    pub sector: String,
}

/// Bar frequency; the label doubles as the per-symbol timestamp field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Minute,
    Day,
    Week,
    Month,
}

impl Frequency {
    pub fn label(self) -> &'static str {
        match self {
            Frequency::Minute => "minute",
            Frequency::Day => "day",
            Frequency::Week => "week",
            Frequency::Month => "month",
        }
    }

    /// Interval code understood by the Stooq CSV endpoint.
    pub fn stooq_interval(self) -> &'static str {
        match self {
            // Finest intraday series Stooq publishes.
            Frequency::Minute => "5",
            Frequency::Day => "d",
            Frequency::Week => "w",
            Frequency::Month => "m",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of a bulk per-symbol timestamp write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolUpdate {
    pub symbol_id: SymbolId,
    pub field: String,
    pub timestamp: Option<NaiveDateTime>,
}

/// Latest quote for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub symbol: String,
    pub as_of: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub prev_close: f64,
    pub volume: f64,
}

/// Daily statistics derived from a closing quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStats {
    pub symbol: String,
    pub as_of: NaiveDateTime,
    pub change_pct: f64,
    pub amplitude_pct: f64,
    pub turnover: f64,
    pub traded_value: f64,
}

impl KeyStats {
    pub fn from_quote(quote: &QuoteSnapshot) -> Self {
        let (change_pct, amplitude_pct) = if quote.prev_close.abs() > f64::EPSILON {
            (
                (quote.close - quote.prev_close) / quote.prev_close * 100.0,
                (quote.high - quote.low) / quote.prev_close * 100.0,
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            symbol: quote.symbol.clone(),
            as_of: quote.as_of,
            change_pct,
            amplitude_pct,
            turnover: quote.volume / 1_000_000.0,
            traded_value: quote.volume * quote.close / 1_000_000.0,
        }
    }
}

/// Persistence surface consumed by the scheduler, reconciler and aggregator.
pub trait Store: Send + Sync {
    fn get_updated(&self, category: Category) -> Result<Option<NaiveDateTime>>;
    fn set_updated(&self, category: Category, at: NaiveDateTime) -> Result<()>;

    fn get_symbols(&self) -> Result<BTreeSet<String>>;
    fn get_symbol_id(&self, symbol: &str) -> Result<Option<SymbolId>>;
    fn delete_symbol(&self, symbol: &str) -> Result<()>;

    fn insert_or_update_sectors(&self, sectors: &[SectorRecord]) -> Result<()>;
    fn insert_or_update_industries(&self, industries: &[IndustryRecord]) -> Result<()>;
    fn insert_or_update_symbols(&self, symbols: &[SymbolRecord]) -> Result<()>;

    fn get_symbol_updated(&self, symbol: &str, field: &str) -> Result<Option<NaiveDateTime>>;
    fn bulk_set_symbol_updated(&self, updates: &[SymbolUpdate]) -> Result<()>;

    fn insert_or_update_quotes(&self, quotes: &[QuoteSnapshot]) -> Result<()>;
    fn insert_or_update_key_stats(&self, stats: &[KeyStats]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(close: f64, prev_close: f64) -> QuoteSnapshot {
        QuoteSnapshot {
            symbol: "7203".to_string(),
            as_of: NaiveDateTime::parse_from_str("2024-03-08 16:00:00", "%Y-%m-%d %H:%M:%S")
                .unwrap(),
            open: 100.0,
            high: 110.0,
            low: 95.0,
            close,
            prev_close,
            volume: 2_000_000.0,
        }
    }

    #[test]
    fn key_stats_derive_percentages_from_previous_close() {
        let stats = KeyStats::from_quote(&quote(105.0, 100.0));
        assert!((stats.change_pct - 5.0).abs() < 1e-9);
        assert!((stats.amplitude_pct - 15.0).abs() < 1e-9);
        assert!((stats.turnover - 2.0).abs() < 1e-9);
        assert!((stats.traded_value - 210.0).abs() < 1e-9);
    }

    #[test]
    fn key_stats_tolerate_missing_previous_close() {
        let stats = KeyStats::from_quote(&quote(105.0, 0.0));
        assert_eq!(stats.change_pct, 0.0);
        assert_eq!(stats.amplitude_pct, 0.0);
    }
}
