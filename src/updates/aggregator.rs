use std::sync::Arc;

use chrono::NaiveDateTime;
use log::{debug, error, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::records::{Frequency, Store, SymbolUpdate};

/// Default number of buffered records tolerated before a flush is forced.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1000;

pub type UpdateSender = mpsc::Sender<UpdateNotification>;

/// Message emitted by the historical updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateNotification {
    /// Bars for `symbol` were refreshed up to `to_date_time`.
    Completed {
        symbol: String,
        frequency: Frequency,
        to_date_time: Option<NaiveDateTime>,
    },
    /// Write out whatever is buffered.
    Flush,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdateRecord {
    pub field: &'static str,
    pub symbol: String,
    pub timestamp: Option<NaiveDateTime>,
}

/// Where the overflow test sits relative to appending the incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowCheck {
    /// Append, then flush when the buffer holds more than the threshold.
    #[default]
    AfterAppend,
    /// Flush an over-full buffer first, then append the incoming record.
    BeforeAppend,
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub flush_threshold: usize,
    pub overflow_check: OverflowCheck,
    /// Buffer size at which repeated flush failures become fatal.
    pub max_retained: usize,
    pub channel_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            overflow_check: OverflowCheck::AfterAppend,
            max_retained: DEFAULT_FLUSH_THRESHOLD * 50,
            channel_capacity: 256,
        }
    }
}

/// Buffers per-symbol completion notices and writes them to the store in bulk.
pub struct UpdateEventAggregator {
    store: Arc<dyn Store>,
    config: AggregatorConfig,
    buffer: Vec<PendingUpdateRecord>,
}

impl UpdateEventAggregator {
    pub fn new(store: Arc<dyn Store>, config: AggregatorConfig) -> Self {
        Self {
            store,
            config,
            buffer: Vec::new(),
        }
    }

    pub fn buffered(&self) -> &[PendingUpdateRecord] {
        &self.buffer
    }

    /// Process one notification. Returns the number of records written when
    /// the notification caused a successful flush.
    pub fn handle(&mut self, notification: UpdateNotification) -> Result<Option<usize>> {
        let record = match notification {
            UpdateNotification::Flush => return self.flush().map(Some),
            UpdateNotification::Completed {
                symbol,
                frequency,
                to_date_time,
            } => PendingUpdateRecord {
                field: frequency.label(),
                symbol,
                timestamp: to_date_time,
            },
        };

        match self.config.overflow_check {
            OverflowCheck::AfterAppend => {
                self.buffer.push(record);
                if self.overflowing() {
                    return self.flush().map(Some);
                }
                Ok(None)
            }
            OverflowCheck::BeforeAppend => {
                let flushed = if self.overflowing() {
                    Some(self.flush())
                } else {
                    None
                };
                // Appended even when the flush failed; the buffer is retained either way.
                self.buffer.push(record);
                flushed.transpose()
            }
        }
    }

    fn overflowing(&self) -> bool {
        self.buffer.len() > self.config.flush_threshold
    }

    /// Resolve symbol ids and submit the buffer as a single bulk write.
    /// On failure the buffer is kept for the next attempt.
    pub fn flush(&mut self) -> Result<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let mut updates = Vec::with_capacity(self.buffer.len());
        for record in &self.buffer {
            match self.store.get_symbol_id(&record.symbol)? {
                Some(symbol_id) => updates.push(SymbolUpdate {
                    symbol_id,
                    field: record.field.to_string(),
                    timestamp: record.timestamp,
                }),
                None => warn!(
                    "Skipping {} update for {}: symbol no longer stored",
                    record.field, record.symbol
                ),
            }
        }

        if !updates.is_empty() {
            self.store.bulk_set_symbol_updated(&updates)?;
        }

        let flushed = self.buffer.len();
        self.buffer.clear();
        debug!("Flushed {flushed} symbol update records");
        Ok(flushed)
    }

    /// Move the aggregator onto a blocking worker fed by a bounded channel.
    pub fn spawn(mut self) -> AggregatorHandle {
        let (sender, mut receiver) = mpsc::channel(self.config.channel_capacity.max(1));

        let worker = tokio::task::spawn_blocking(move || {
            while let Some(notification) = receiver.blocking_recv() {
                if let Err(err) = self.handle(notification) {
                    warn!(
                        "Flush failed, retaining {} update records: {err}",
                        self.buffer.len()
                    );
                    if self.buffer.len() > self.config.max_retained {
                        error!("Store is not accepting symbol updates, stopping aggregator");
                        return Err(AppError::StoreUnavailable {
                            retained: self.buffer.len(),
                        });
                    }
                }
            }
            self.flush().map(|_| ())
        });

        AggregatorHandle { sender, worker }
    }
}

/// Sender side plus the worker running an [`UpdateEventAggregator`].
pub struct AggregatorHandle {
    sender: UpdateSender,
    worker: JoinHandle<Result<()>>,
}

impl AggregatorHandle {
    pub fn sender(&self) -> UpdateSender {
        self.sender.clone()
    }

    /// True once the worker has exited. While this handle lives that only
    /// happens on a fatal error, which `shutdown` then returns.
    pub fn is_stopped(&self) -> bool {
        self.worker.is_finished()
    }

    /// Close this handle's sender and wait for the final flush. Clones handed
    /// out through [`AggregatorHandle::sender`] must be dropped first.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.sender);
        self.worker.await?
    }
}
