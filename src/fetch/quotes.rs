use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use reqwest::Client;

use crate::error::{AppError, Context, Result};
use crate::records::QuoteSnapshot;

use super::{ensure_concurrency_limit, QuoteSource, REQUEST_CONCURRENCY_LIMIT};

pub const STOOQ_QUOTE_ENDPOINT: &str = "https://stooq.com/q/l/";

/// Latest quotes from Stooq's CSV quote endpoint, fetched concurrently.
pub struct StooqQuoteSource {
    client: Client,
    endpoint: String,
    symbol_suffix: String,
    concurrency_limit: usize,
}

impl StooqQuoteSource {
    pub fn new(endpoint: impl Into<String>, symbol_suffix: impl Into<String>) -> Self {
        Self::with_concurrency_limit(endpoint, symbol_suffix, REQUEST_CONCURRENCY_LIMIT)
    }

    pub fn with_concurrency_limit(
        endpoint: impl Into<String>,
        symbol_suffix: impl Into<String>,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            symbol_suffix: symbol_suffix.into(),
            concurrency_limit: ensure_concurrency_limit(concurrency_limit),
        }
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot> {
        let url = format!(
            "{endpoint}?s={symbol}{suffix}&f=sd2t2ohlcpv&h=1&e=csv",
            endpoint = self.endpoint,
            symbol = symbol.to_lowercase(),
            suffix = self.symbol_suffix
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Quote request failed for {symbol}"))?;
        if !response.status().is_success() {
            return Err(AppError::message(format!(
                "Request for stock {} failed with status {}",
                symbol,
                response.status()
            )));
        }

        let body = response.text().await?;
        parse_quote(symbol, &body)
    }
}

#[async_trait]
impl QuoteSource for StooqQuoteSource {
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteSnapshot>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.concurrency_limit));

        // Fan out while honouring the concurrency guard to stay friendly to the API.
        let results: Vec<Option<QuoteSnapshot>> = stream::iter(symbols.iter().cloned())
            .map(|symbol| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore.acquire().await.ok()?;
                    match self.fetch_quote(&symbol).await {
                        Ok(quote) => Some(quote),
                        Err(err) => {
                            debug!("No quote for {symbol}: {err}");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency_limit)
            .collect()
            .await;

        let quotes: Vec<QuoteSnapshot> = results.into_iter().flatten().collect();
        if quotes.is_empty() {
            return Err(AppError::message("Failed to fetch any quotes"));
        }
        if quotes.len() < symbols.len() {
            warn!(
                "Fetched quotes for {} of {} symbols",
                quotes.len(),
                symbols.len()
            );
        }
        Ok(quotes)
    }
}

/// Parse a `sd2t2ohlcpv` response: header line, then one data line.
fn parse_quote(symbol: &str, body: &str) -> Result<QuoteSnapshot> {
    let mut lines = body.lines();
    let _header = lines.next();
    let Some(data_line) = lines.next() else {
        return Err(AppError::message(format!(
            "No quote data returned for {}",
            symbol
        )));
    };

    let fields: Vec<&str> = data_line.split(',').map(str::trim).collect();
    if fields.len() < 9 {
        return Err(AppError::message(format!(
            "Unexpected quote format for {}",
            symbol
        )));
    }

    let date = NaiveDate::parse_from_str(fields[1], "%Y-%m-%d")
        .with_context(|| format!("Failed to parse quote date '{}' for {}", fields[1], symbol))?;
    let time = NaiveTime::parse_from_str(fields[2], "%H:%M:%S")
        .with_context(|| format!("Failed to parse quote time '{}' for {}", fields[2], symbol))?;

    Ok(QuoteSnapshot {
        symbol: symbol.to_string(),
        as_of: NaiveDateTime::new(date, time),
        open: parse_number(fields[3])?,
        high: parse_number(fields[4])?,
        low: parse_number(fields[5])?,
        close: parse_number(fields[6])?,
        prev_close: parse_number(fields[7])?,
        volume: parse_number(fields[8])?,
    })
}

fn parse_number(value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| AppError::message(format!("Failed to parse numeric value: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quote_line() {
        let body = "Symbol,Date,Time,Open,High,Low,Close,Prev,Volume\n\
                    7203.JP,2024-03-08,15:00:00,3600,3650,3580,3620,3590,18000000\n";
        let quote = parse_quote("7203", body).unwrap();

        assert_eq!(quote.symbol, "7203");
        assert_eq!(
            quote.as_of,
            NaiveDateTime::parse_from_str("2024-03-08 15:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
        );
        assert!((quote.close - 3620.0).abs() < 1e-9);
        assert!((quote.prev_close - 3590.0).abs() < 1e-9);
        assert!((quote.volume - 18_000_000.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_missing_data() {
        let body = "Symbol,Date,Time,Open,High,Low,Close,Prev,Volume\n\
                    XXXX.JP,N/D,N/D,N/D,N/D,N/D,N/D,N/D,N/D\n";
        assert!(parse_quote("XXXX", body).is_err());
        assert!(parse_quote("XXXX", "Symbol,Date\n").is_err());
    }
}
