use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::PathBuf;

use async_trait::async_trait;
use calamine::{Data, Reader, Xlsx};
use log::debug;
use serde::Deserialize;

use crate::error::{AppError, Context, Result};
use crate::index::SymbolIndex;
use crate::records::{IndustryRecord, SectorRecord, SymbolRecord};

use super::IndexProvider;

pub const JPX_LISTING_URL: &str =
    "https://www.jpx.co.jp/english/markets/statistics-equities/misc/tvdivq0000001vg2-att/jyoujyou(updated)_e.xlsx";

// Column layout of the JPX listed-issues workbook.
const CODE_COL: usize = 1;
const NAME_COL: usize = 2;
const INDUSTRY_COL: usize = 5;
const SECTOR_COL: usize = 7;

/// Listed issues published by the Japan Exchange Group. The 17-sector
/// classification becomes the sector table, the 33-sector one the industries.
pub struct JpxIndexProvider {
    url: String,
}

impl JpxIndexProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for JpxIndexProvider {
    fn default() -> Self {
        Self::new(JPX_LISTING_URL)
    }
}

#[async_trait]
impl IndexProvider for JpxIndexProvider {
    async fn fetch_symbol_index(&self) -> Result<SymbolIndex> {
        let response = reqwest::get(&self.url)
            .await
            .context("Failed to request JPX listings")?;

        if !response.status().is_success() {
            return Err(AppError::message(format!(
                "JPX listing request failed with status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read JPX listing payload")?;

        let mut workbook =
            Xlsx::new(Cursor::new(bytes)).context("Failed to parse JPX listing workbook")?;
        let range = workbook
            .worksheet_range("Sheet1")
            .context("Sheet1 not found in JPX listing workbook")?;

        let index = index_from_rows(range.rows().skip(1));
        debug!(
            "JPX listing: {} symbols, {} sectors, {} industries",
            index.symbols.len(),
            index.sectors.len(),
            index.industries.len()
        );
        Ok(index)
    }
}

fn index_from_rows<'a>(rows: impl Iterator<Item = &'a [Data]>) -> SymbolIndex {
    let mut builder = IndexBuilder::default();

    for row in rows {
        let Some(code) = row.get(CODE_COL).and_then(format_code) else {
            continue;
        };
        let Some(name) = row.get(NAME_COL).and_then(cell_to_string) else {
            continue;
        };
        let sector = row.get(SECTOR_COL).and_then(classification);
        let industry = row.get(INDUSTRY_COL).and_then(classification);

        builder.push(code, name, sector, industry);
    }

    builder.finish()
}

/// Headers: `symbol,name,sector,industry`; the last two may be blank.
pub struct CsvIndexProvider {
    path: PathBuf,
}

impl CsvIndexProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Debug, Deserialize)]
struct CsvIndexRow {
    symbol: String,
    name: String,
    #[serde(default)]
    sector: Option<String>,
    #[serde(default)]
    industry: Option<String>,
}

#[async_trait]
impl IndexProvider for CsvIndexProvider {
    async fn fetch_symbol_index(&self) -> Result<SymbolIndex> {
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Failed to open symbol index {}", self.path.display()))?;

        let mut builder = IndexBuilder::default();
        for row in reader.deserialize::<CsvIndexRow>() {
            let row = row.context("Failed to read symbol index record")?;
            let symbol = row.symbol.trim();
            if symbol.is_empty() || symbol.starts_with('#') {
                continue;
            }
            builder.push(
                symbol.to_string(),
                row.name.trim().to_string(),
                non_blank(row.sector),
                non_blank(row.industry),
            );
        }

        let index = builder.finish();
        if index.symbols.is_empty() {
            return Err(AppError::message(format!(
                "Symbol index is empty: {}",
                self.path.display()
            )));
        }
        Ok(index)
    }
}

/// Collects symbols while deduplicating sectors and industries. The first
/// sector seen for an industry wins.
#[derive(Default)]
struct IndexBuilder {
    symbols: BTreeMap<String, SymbolRecord>,
    sectors: BTreeMap<String, SectorRecord>,
    industries: BTreeMap<String, IndustryRecord>,
}

impl IndexBuilder {
    fn push(
        &mut self,
        symbol: String,
        name: String,
        sector: Option<String>,
        industry: Option<String>,
    ) {
        if let Some(sector) = &sector {
            self.sectors
                .entry(sector.clone())
                .or_insert_with(|| SectorRecord {
                    name: sector.clone(),
                });
        }

        // An industry is only kept when its sector is known.
        let industry = match (industry, sector) {
            (Some(industry), Some(sector)) => {
                self.industries
                    .entry(industry.clone())
                    .or_insert_with(|| IndustryRecord {
                        name: industry.clone(),
                        sector,
                    });
                Some(industry)
            }
            _ => None,
        };

        self.symbols.entry(symbol.clone()).or_insert(SymbolRecord {
            symbol,
            name,
            industry,
        });
    }

    fn finish(self) -> SymbolIndex {
        SymbolIndex {
            symbols: self.symbols.into_values().collect(),
            sectors: self.sectors.into_values().collect(),
            industries: self.industries.into_values().collect(),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// JPX marks unclassified issues (ETFs, REITs) with `-`.
fn classification(cell: &Data) -> Option<String> {
    cell_to_string(cell).filter(|value| !value.is_empty() && value != "-")
}

fn cell_to_string(cell: &Data) -> Option<String> {
    match cell {
        Data::String(s) => Some(s.trim().to_string()),
        Data::Float(f) => Some(format_number(*f)),
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(value) => Some(value.to_string()),
        Data::DateTimeIso(s) => Some(s.clone()),
        Data::DurationIso(s) => Some(s.clone()),
        Data::Empty => None,
        Data::Error(_) => None,
    }
}

fn format_code(cell: &Data) -> Option<String> {
    match cell {
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Data::Float(f) if f.is_finite() => Some(format_with_padding(*f as i64)),
        Data::Int(i) => Some(format_with_padding(*i)),
        _ => None,
    }
}

fn format_with_padding(value: i64) -> String {
    if value >= 10000 {
        value.to_string()
    } else {
        format!("{:04}", value)
    }
}

fn format_number(value: f64) -> String {
    if value.fract().abs() < f64::EPSILON {
        format_with_padding(value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn row(code: Data, name: &str, industry: &str, sector: &str) -> Vec<Data> {
        vec![
            Data::Int(20240301),
            code,
            Data::String(name.to_string()),
            Data::String("Prime Market".to_string()),
            Data::String("3700".to_string()),
            Data::String(industry.to_string()),
            Data::String("6".to_string()),
            Data::String(sector.to_string()),
        ]
    }

    #[test]
    fn builds_index_from_listing_rows() {
        let rows = vec![
            row(
                Data::Float(7203.0),
                "TOYOTA MOTOR",
                "Transportation Equipment",
                "AUTOMOBILES",
            ),
            row(
                Data::Int(130),
                "SMALL CO",
                "Foods",
                "FOODS",
            ),
            row(
                Data::String("1306".to_string()),
                "TOPIX ETF",
                "-",
                "-",
            ),
            row(Data::Empty, "NO CODE", "Foods", "FOODS"),
        ];

        let index = index_from_rows(rows.iter().map(Vec::as_slice));

        let codes: Vec<&str> = index.symbol_codes().collect();
        assert_eq!(codes, vec!["0130", "1306", "7203"]);
        assert_eq!(index.sectors.len(), 2);
        assert_eq!(index.industries.len(), 2);

        let etf = &index.symbols[1];
        assert_eq!(etf.industry, None);
        let toyota = &index.symbols[2];
        assert_eq!(toyota.industry.as_deref(), Some("Transportation Equipment"));
    }

    #[tokio::test]
    async fn csv_index_skips_comments_and_blank_classifications() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "symbol,name,sector,industry").unwrap();
        writeln!(file, "7203,Toyota,Automobiles,Transportation Equipment").unwrap();
        writeln!(file, "#9999,Ignored,,").unwrap();
        writeln!(file, "1306,TOPIX ETF,,").unwrap();
        writeln!(file, "6758,Sony,Electronics,").unwrap();
        file.flush().unwrap();

        let index = CsvIndexProvider::new(file.path())
            .fetch_symbol_index()
            .await
            .unwrap();

        let codes: Vec<&str> = index.symbol_codes().collect();
        assert_eq!(codes, vec!["1306", "6758", "7203"]);
        assert_eq!(
            index.sectors,
            vec![
                SectorRecord {
                    name: "Automobiles".to_string()
                },
                SectorRecord {
                    name: "Electronics".to_string()
                },
            ]
        );
        assert_eq!(index.industries.len(), 1);
        assert_eq!(index.industries[0].sector, "Automobiles");
    }

    #[tokio::test]
    async fn empty_csv_index_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "symbol,name,sector,industry").unwrap();
        file.flush().unwrap();

        assert!(CsvIndexProvider::new(file.path())
            .fetch_symbol_index()
            .await
            .is_err());
    }
}
