use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use chrono::NaiveDateTime;

use crate::error::{AppError, Result};
use crate::records::{
    IndustryRecord, KeyStats, QuoteSnapshot, SectorRecord, Store, SymbolId, SymbolRecord,
    SymbolUpdate,
};
use crate::schedule::Category;

pub fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

/// Store fake that records every write and can be told to fail one kind of call.
#[derive(Default)]
pub struct RecordingStore {
    pub calls: Mutex<Vec<String>>,
    pub symbols: Mutex<BTreeMap<String, SymbolId>>,
    pub updated: Mutex<BTreeMap<Category, NaiveDateTime>>,
    pub symbol_updated: Mutex<BTreeMap<(String, String), NaiveDateTime>>,
    pub bulk_writes: Mutex<Vec<Vec<SymbolUpdate>>>,
    fail_on: Mutex<Option<&'static str>>,
}

impl RecordingStore {
    pub fn with_symbols(symbols: &[&str]) -> Self {
        let store = Self::default();
        *store.symbols.lock().unwrap() = symbols
            .iter()
            .enumerate()
            .map(|(id, s)| (s.to_string(), id as SymbolId))
            .collect();
        store
    }

    pub fn fail_on(&self, call: &'static str) {
        *self.fail_on.lock().unwrap() = Some(call);
    }

    pub fn recover(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn bulk_writes(&self) -> Vec<Vec<SymbolUpdate>> {
        self.bulk_writes.lock().unwrap().clone()
    }

    pub fn mark_symbol(&self, symbol: &str, field: &str, at: NaiveDateTime) {
        self.symbol_updated
            .lock()
            .unwrap()
            .insert((symbol.to_string(), field.to_string()), at);
    }

    fn record(&self, call: &'static str, detail: String) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{call}({detail})"));
        if *self.fail_on.lock().unwrap() == Some(call) {
            return Err(AppError::message(format!("{call} failed")));
        }
        Ok(())
    }
}

impl Store for RecordingStore {
    fn get_updated(&self, category: Category) -> Result<Option<NaiveDateTime>> {
        Ok(self.updated.lock().unwrap().get(&category).copied())
    }

    fn set_updated(&self, category: Category, at: NaiveDateTime) -> Result<()> {
        self.record("set_updated", category.to_string())?;
        self.updated.lock().unwrap().insert(category, at);
        Ok(())
    }

    fn get_symbols(&self) -> Result<BTreeSet<String>> {
        Ok(self.symbols.lock().unwrap().keys().cloned().collect())
    }

    fn get_symbol_id(&self, symbol: &str) -> Result<Option<SymbolId>> {
        if *self.fail_on.lock().unwrap() == Some("get_symbol_id") {
            return Err(AppError::message("get_symbol_id failed"));
        }
        Ok(self.symbols.lock().unwrap().get(symbol).copied())
    }

    fn delete_symbol(&self, symbol: &str) -> Result<()> {
        self.record("delete_symbol", symbol.to_string())?;
        self.symbols.lock().unwrap().remove(symbol);
        Ok(())
    }

    fn insert_or_update_sectors(&self, sectors: &[SectorRecord]) -> Result<()> {
        self.record("sectors", sectors.len().to_string())
    }

    fn insert_or_update_industries(&self, industries: &[IndustryRecord]) -> Result<()> {
        self.record("industries", industries.len().to_string())
    }

    fn insert_or_update_symbols(&self, symbols: &[SymbolRecord]) -> Result<()> {
        let codes: Vec<&str> = symbols.iter().map(|s| s.symbol.as_str()).collect();
        self.record("symbols", codes.join(","))?;
        let mut stored = self.symbols.lock().unwrap();
        for code in codes {
            let next = stored.values().max().map_or(0, |id| id + 1);
            stored.entry(code.to_string()).or_insert(next);
        }
        Ok(())
    }

    fn get_symbol_updated(&self, symbol: &str, field: &str) -> Result<Option<NaiveDateTime>> {
        Ok(self
            .symbol_updated
            .lock()
            .unwrap()
            .get(&(symbol.to_string(), field.to_string()))
            .copied())
    }

    fn bulk_set_symbol_updated(&self, updates: &[SymbolUpdate]) -> Result<()> {
        self.record("bulk_set_symbol_updated", updates.len().to_string())?;
        self.bulk_writes.lock().unwrap().push(updates.to_vec());
        Ok(())
    }

    fn insert_or_update_quotes(&self, quotes: &[QuoteSnapshot]) -> Result<()> {
        self.record("quotes", quotes.len().to_string())
    }

    fn insert_or_update_key_stats(&self, stats: &[KeyStats]) -> Result<()> {
        self.record("key_stats", stats.len().to_string())
    }
}
