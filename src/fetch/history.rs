use std::fs::{self, OpenOptions};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Context, Result};
use crate::records::{Frequency, Store};
use crate::updates::{UpdateNotification, UpdateSender};
use crate::utils::symbol_file_slug;

use super::{ensure_concurrency_limit, HistoricalUpdater, REQUEST_CONCURRENCY_LIMIT};

pub const STOOQ_HISTORY_ENDPOINT: &str = "https://stooq.com/q/d/l/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Downloads bars from Stooq into `<data_dir>/<frequency>/<symbol>.csv` and
/// reports each finished symbol on the aggregator channel, followed by a
/// flush request once the whole batch is done.
pub struct StooqHistoryUpdater {
    client: Client,
    endpoint: String,
    symbol_suffix: String,
    data_dir: PathBuf,
    store: Arc<dyn Store>,
    notifications: UpdateSender,
    concurrency_limit: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Initialize,
    Update,
}

impl StooqHistoryUpdater {
    pub fn new(
        endpoint: impl Into<String>,
        symbol_suffix: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        store: Arc<dyn Store>,
        notifications: UpdateSender,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            symbol_suffix: symbol_suffix.into(),
            data_dir: data_dir.into(),
            store,
            notifications,
            concurrency_limit: ensure_concurrency_limit(REQUEST_CONCURRENCY_LIMIT),
        }
    }

    pub fn bars_path(&self, symbol: &str, frequency: Frequency) -> PathBuf {
        self.data_dir
            .join(frequency.label())
            .join(format!("{}.csv", symbol_file_slug(symbol)))
    }

    async fn run(&self, symbols: &[String], frequency: Frequency, mode: Mode) -> Result<()> {
        let failures: Vec<String> = stream::iter(symbols.iter().cloned())
            .map(|symbol| async move {
                match self.refresh_symbol(&symbol, frequency, mode).await {
                    Ok(()) => None,
                    Err(err) => {
                        warn!("Historical {frequency} refresh failed for {symbol}: {err}");
                        Some(symbol)
                    }
                }
            })
            .buffer_unordered(self.concurrency_limit)
            .filter_map(|failed| async move { failed })
            .collect()
            .await;

        // Flush whatever completed, even when some symbols failed.
        if self.notifications.send(UpdateNotification::Flush).await.is_err() {
            warn!("Update aggregator is gone; per-symbol timestamps were not recorded");
        }

        if failures.is_empty() {
            info!("Historical {frequency} refresh finished for {} symbols", symbols.len());
            Ok(())
        } else {
            Err(AppError::message(format!(
                "historical {frequency} refresh failed for {} of {} symbols",
                failures.len(),
                symbols.len()
            )))
        }
    }

    async fn refresh_symbol(&self, symbol: &str, frequency: Frequency, mode: Mode) -> Result<()> {
        let since = match mode {
            Mode::Initialize => None,
            Mode::Update => self.store.get_symbol_updated(symbol, frequency.label())?,
        };

        let body = self.download(symbol, frequency, since).await?;
        let bars: Vec<Bar> = parse_bars(&body)?
            .into_iter()
            .filter(|bar| since.map_or(true, |since| bar.timestamp > since))
            .collect();

        let path = self.bars_path(symbol, frequency);
        match mode {
            Mode::Initialize => write_bars(&path, &bars)?,
            Mode::Update => append_bars(&path, &bars)?,
        }

        let latest = bars.last().map(|bar| bar.timestamp).or(since);
        debug!("{symbol}: stored {} {frequency} bars up to {latest:?}", bars.len());

        self.notifications
            .send(UpdateNotification::Completed {
                symbol: symbol.to_string(),
                frequency,
                to_date_time: latest,
            })
            .await
            .map_err(|_| AppError::message("update aggregator channel closed"))
    }

    async fn download(
        &self,
        symbol: &str,
        frequency: Frequency,
        since: Option<NaiveDateTime>,
    ) -> Result<String> {
        let mut url = format!(
            "{endpoint}?s={symbol}{suffix}&i={interval}",
            endpoint = self.endpoint,
            symbol = symbol.to_lowercase(),
            suffix = self.symbol_suffix,
            interval = frequency.stooq_interval()
        );
        if let Some(since) = since {
            url.push_str(&format!("&d1={}", since.date().format("%Y%m%d")));
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("History request failed for {}", symbol))?;

        if !response.status().is_success() {
            return Err(AppError::message(format!(
                "History request returned error status {} for {}",
                response.status(),
                symbol
            )));
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read history body for {}", symbol))?;
        Ok(body)
    }
}

#[async_trait]
impl HistoricalUpdater for StooqHistoryUpdater {
    async fn initialize_symbols(&self, symbols: &[String], frequency: Frequency) -> Result<()> {
        info!("Initializing {frequency} history for {} symbols", symbols.len());
        self.run(symbols, frequency, Mode::Initialize).await
    }

    async fn update_symbols(&self, symbols: &[String], frequency: Frequency) -> Result<()> {
        info!("Updating {frequency} history for {} symbols", symbols.len());
        self.run(symbols, frequency, Mode::Update).await
    }
}

/// Parse a Stooq CSV download. Daily and coarser files carry `Date`; intraday
/// files add a `Time` column.
pub fn parse_bars(body: &str) -> Result<Vec<Bar>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(Cursor::new(body));

    let headers = reader.headers().context("Failed to read history header")?.clone();
    let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

    let Some(date_col) = column("Date") else {
        // Stooq answers unknown symbols with a plain-text body.
        return Err(AppError::message(format!(
            "Unexpected history payload: {}",
            body.lines().next().unwrap_or_default()
        )));
    };
    let time_col = column("Time");
    let (Some(open_col), Some(high_col), Some(low_col), Some(close_col)) =
        (column("Open"), column("High"), column("Low"), column("Close"))
    else {
        return Err(AppError::message("History payload is missing price columns"));
    };
    let volume_col = column("Volume");

    let mut bars = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read historical record")?;
        let parse_number = |idx: usize| -> Option<f64> {
            record
                .get(idx)
                .and_then(|field| field.trim().parse::<f64>().ok())
        };

        let Some(date) = record
            .get(date_col)
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
        else {
            continue;
        };
        let time = match time_col.and_then(|idx| record.get(idx)) {
            Some(raw) => match NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S") {
                Ok(time) => time,
                Err(_) => continue,
            },
            None => NaiveTime::default(),
        };

        let (Some(open), Some(high), Some(low), Some(close)) = (
            parse_number(open_col),
            parse_number(high_col),
            parse_number(low_col),
            parse_number(close_col),
        ) else {
            continue;
        };

        bars.push(Bar {
            timestamp: date.and_time(time),
            open,
            high,
            low,
            close,
            volume: volume_col.and_then(parse_number).unwrap_or(0.0),
        });
    }

    bars.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(bars)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

fn write_bars(path: &Path, bars: &[Bar]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create bar file {}", path.display()))?;
    for bar in bars {
        writer.serialize(bar)?;
    }
    writer.flush()?;
    Ok(())
}

fn append_bars(path: &Path, bars: &[Bar]) -> Result<()> {
    if !path.exists() {
        return write_bars(path, bars);
    }
    if bars.is_empty() {
        return Ok(());
    }

    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open bar file {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    for bar in bars {
        writer.serialize(bar)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
fn read_bars(path: &Path) -> Result<Vec<Bar>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open bar file {}", path.display()))?;
    let mut bars = Vec::new();
    for bar in reader.deserialize() {
        bars.push(bar.context("Failed to read bar record")?);
    }
    Ok(bars)
}
