use async_trait::async_trait;

use crate::error::Result;
use crate::index::SymbolIndex;
use crate::records::{Frequency, QuoteSnapshot};

pub mod history;
pub mod listing;
pub mod quotes;

pub use history::{Bar, StooqHistoryUpdater};
pub use listing::{CsvIndexProvider, JpxIndexProvider};
pub use quotes::StooqQuoteSource;

/// Default concurrency guard applied when issuing per-symbol requests.
pub const REQUEST_CONCURRENCY_LIMIT: usize = 5;

#[inline]
pub fn ensure_concurrency_limit(limit: usize) -> usize {
    limit.max(1)
}

/// Source of the full listed-symbol index.
#[async_trait]
pub trait IndexProvider: Send + Sync {
    async fn fetch_symbol_index(&self) -> Result<SymbolIndex>;
}

/// Source of latest quotes, used for intraday snapshots and key statistics.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteSnapshot>>;
}

/// Refreshes stored bars and reports each finished symbol on its notification channel.
#[async_trait]
pub trait HistoricalUpdater: Send + Sync {
    /// Download the complete history for symbols with no bars yet.
    async fn initialize_symbols(&self, symbols: &[String], frequency: Frequency) -> Result<()>;

    /// Download bars newer than each symbol's recorded timestamp.
    async fn update_symbols(&self, symbols: &[String], frequency: Frequency) -> Result<()>;
}
