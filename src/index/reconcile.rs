use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDateTime;
use log::info;

use crate::error::{Context, Result};
use crate::records::Store;
use crate::schedule::Category;

use super::SymbolIndex;

/// Symbols gained and lost between the stored index and a fresh one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolIndexDelta {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl SymbolIndexDelta {
    pub fn diff<'a>(
        new_symbols: impl IntoIterator<Item = &'a str>,
        existing: &BTreeSet<String>,
    ) -> Self {
        let new_symbols: BTreeSet<String> = new_symbols.into_iter().map(str::to_string).collect();
        Self {
            added: new_symbols.difference(existing).cloned().collect(),
            removed: existing.difference(&new_symbols).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Applies a fetched symbol index to the store.
pub struct IndexReconciler {
    store: Arc<dyn Store>,
}

impl IndexReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// True once any index pass has completed.
    pub fn index_initialized(&self) -> Result<bool> {
        Ok(self.store.get_updated(Category::SymbolIndex)?.is_some())
    }

    /// Delete vanished symbols, upsert sectors, industries and symbols, then
    /// mark the index as updated. The mark is skipped if any step fails so
    /// the next tick sees the index as stale again.
    pub fn reconcile(&self, index: &SymbolIndex, now: NaiveDateTime) -> Result<SymbolIndexDelta> {
        let existing = self
            .store
            .get_symbols()
            .context("Failed to read stored symbols")?;
        let delta = SymbolIndexDelta::diff(index.symbol_codes(), &existing);

        for symbol in &delta.removed {
            self.store
                .delete_symbol(symbol)
                .with_context(|| format!("Failed to delete symbol {symbol}"))?;
        }

        self.store
            .insert_or_update_sectors(&index.sectors)
            .context("Failed to store sectors")?;
        self.store
            .insert_or_update_industries(&index.industries)
            .context("Failed to store industries")?;
        self.store
            .insert_or_update_symbols(&index.symbols)
            .context("Failed to store symbols")?;

        self.store
            .set_updated(Category::SymbolIndex, now)
            .context("Failed to mark symbol index as updated")?;

        report(&delta);
        Ok(delta)
    }
}

fn report(delta: &SymbolIndexDelta) {
    if delta.added.is_empty() {
        info!("No new symbols in this index update");
    } else {
        info!("Newly added symbols: {:?}", delta.added);
    }

    if delta.removed.is_empty() {
        info!("No removed symbols in this index update");
    } else {
        info!("Removed symbols: {:?}", delta.removed);
    }
}
