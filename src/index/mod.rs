use crate::records::{IndustryRecord, SectorRecord, SymbolRecord};

pub mod reconcile;

pub use reconcile::{IndexReconciler, SymbolIndexDelta};

/// A freshly fetched symbol index together with its classification tables.
#[derive(Debug, Clone, Default)]
pub struct SymbolIndex {
    pub symbols: Vec<SymbolRecord>,
    pub sectors: Vec<SectorRecord>,
    pub industries: Vec<IndustryRecord>,
}

impl SymbolIndex {
    pub fn symbol_codes(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(|record| record.symbol.as_str())
    }
}
