use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDateTime;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Context, Result};
use crate::schedule::Category;

use super::{
    IndustryRecord, KeyStats, QuoteSnapshot, SectorRecord, Store, SymbolId, SymbolRecord,
    SymbolUpdate,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    updated: BTreeMap<Category, NaiveDateTime>,
    #[serde(default)]
    next_symbol_id: SymbolId,
    #[serde(default)]
    sectors: BTreeMap<String, SectorRecord>,
    #[serde(default)]
    industries: BTreeMap<String, IndustryRecord>,
    #[serde(default)]
    symbols: BTreeMap<String, StoredSymbol>,
    #[serde(default)]
    quotes: BTreeMap<String, QuoteSnapshot>,
    #[serde(default)]
    key_stats: BTreeMap<String, KeyStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSymbol {
    id: SymbolId,
    name: String,
    #[serde(default)]
    industry: Option<String>,
    #[serde(default)]
    updated: BTreeMap<String, Option<NaiveDateTime>>,
}

/// Single-file JSON store. Every write lands on a copy of the document that
/// only replaces the in-memory state once it has been persisted.
pub struct JsonStore {
    path: PathBuf,
    doc: Mutex<StoreDocument>,
}

impl JsonStore {
    /// Open the store at `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse store file {}", path.display()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("No store at {}, starting empty", path.display());
                StoreDocument::default()
            }
            Err(err) => {
                return Err(AppError::message(format!(
                    "Failed to read store file {}: {}",
                    path.display(),
                    err
                )));
            }
        };

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    fn read(&self) -> MutexGuard<'_, StoreDocument> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<T>(&self, apply: impl FnOnce(&mut StoreDocument) -> Result<T>) -> Result<T> {
        let mut guard = self.read();
        let mut next = guard.clone();
        let out = apply(&mut next)?;
        persist(&self.path, &next)?;
        *guard = next;
        Ok(out)
    }
}

fn persist(path: &Path, doc: &StoreDocument) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create store directory {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(doc).context("Failed to serialize store")?;
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp)
        .with_context(|| format!("Failed to create store file {}", tmp.display()))?;
    file.write_all(&json)
        .with_context(|| format!("Failed to write store file {}", tmp.display()))?;
    file.sync_all()?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace store file {}", path.display()))?;
    Ok(())
}

impl Store for JsonStore {
    fn get_updated(&self, category: Category) -> Result<Option<NaiveDateTime>> {
        Ok(self.read().updated.get(&category).copied())
    }

    fn set_updated(&self, category: Category, at: NaiveDateTime) -> Result<()> {
        self.write(|doc| {
            doc.updated.insert(category, at);
            Ok(())
        })
    }

    fn get_symbols(&self) -> Result<BTreeSet<String>> {
        Ok(self.read().symbols.keys().cloned().collect())
    }

    fn get_symbol_id(&self, symbol: &str) -> Result<Option<SymbolId>> {
        Ok(self.read().symbols.get(symbol).map(|stored| stored.id))
    }

    fn delete_symbol(&self, symbol: &str) -> Result<()> {
        self.write(|doc| {
            if doc.symbols.remove(symbol).is_none() {
                return Err(AppError::UnknownSymbol(symbol.to_string()));
            }
            doc.quotes.remove(symbol);
            doc.key_stats.remove(symbol);
            Ok(())
        })
    }

    fn insert_or_update_sectors(&self, sectors: &[SectorRecord]) -> Result<()> {
        self.write(|doc| {
            for sector in sectors {
                doc.sectors.insert(sector.name.clone(), sector.clone());
            }
            Ok(())
        })
    }

    fn insert_or_update_industries(&self, industries: &[IndustryRecord]) -> Result<()> {
        self.write(|doc| {
            for industry in industries {
                if !doc.sectors.contains_key(&industry.sector) {
                    return Err(AppError::message(format!(
                        "industry `{}` references unknown sector `{}`",
                        industry.name, industry.sector
                    )));
                }
                doc.industries.insert(industry.name.clone(), industry.clone());
            }
            Ok(())
        })
    }

    fn insert_or_update_symbols(&self, symbols: &[SymbolRecord]) -> Result<()> {
        self.write(|doc| {
            for record in symbols {
                match doc.symbols.get_mut(&record.symbol) {
                    Some(stored) => {
                        stored.name = record.name.clone();
                        stored.industry = record.industry.clone();
                    }
                    None => {
                        let id = doc.next_symbol_id;
                        doc.next_symbol_id += 1;
                        doc.symbols.insert(
                            record.symbol.clone(),
                            StoredSymbol {
                                id,
                                name: record.name.clone(),
                                industry: record.industry.clone(),
                                updated: BTreeMap::new(),
                            },
                        );
                    }
                }
            }
            Ok(())
        })
    }

    fn get_symbol_updated(&self, symbol: &str, field: &str) -> Result<Option<NaiveDateTime>> {
        Ok(self
            .read()
            .symbols
            .get(symbol)
            .and_then(|stored| stored.updated.get(field).copied().flatten()))
    }

    fn bulk_set_symbol_updated(&self, updates: &[SymbolUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        self.write(|doc| {
            let by_id: HashMap<SymbolId, String> = doc
                .symbols
                .iter()
                .map(|(symbol, stored)| (stored.id, symbol.clone()))
                .collect();

            for update in updates {
                let Some(symbol) = by_id.get(&update.symbol_id) else {
                    warn!("Dropping update for unknown symbol id {}", update.symbol_id);
                    continue;
                };
                if let Some(stored) = doc.symbols.get_mut(symbol) {
                    stored
                        .updated
                        .insert(update.field.clone(), update.timestamp);
                }
            }
            Ok(())
        })
    }

    fn insert_or_update_quotes(&self, quotes: &[QuoteSnapshot]) -> Result<()> {
        self.write(|doc| {
            for quote in quotes {
                if doc.symbols.contains_key(&quote.symbol) {
                    doc.quotes.insert(quote.symbol.clone(), quote.clone());
                }
            }
            Ok(())
        })
    }

    fn insert_or_update_key_stats(&self, stats: &[KeyStats]) -> Result<()> {
        self.write(|doc| {
            for entry in stats {
                if doc.symbols.contains_key(&entry.symbol) {
                    doc.key_stats.insert(entry.symbol.clone(), entry.clone());
                }
            }
            Ok(())
        })
    }
}
