use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use log::{debug, error, info, warn};
use tokio::task::JoinSet;

use crate::error::{AppError, Context, Result};
use crate::fetch::{HistoricalUpdater, IndexProvider, QuoteSource};
use crate::index::{IndexReconciler, SymbolIndexDelta};
use crate::records::{Frequency, KeyStats, Store};
use crate::schedule::{self, is_market_open, Category, ScheduleRegistry, ScheduleRule};
use crate::updates::AggregatorHandle;
use crate::utils::{format_timestamp, local_now};

/// External collaborators the manager drives.
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub index_provider: Arc<dyn IndexProvider>,
    pub quotes: Arc<dyn QuoteSource>,
    pub history: Arc<dyn HistoricalUpdater>,
}

/// Decides which categories are stale and dispatches their refreshes. At most
/// one refresh per category is in flight at any time.
pub struct Manager {
    registry: ScheduleRegistry,
    store: Arc<dyn Store>,
    reconciler: IndexReconciler,
    index_provider: Arc<dyn IndexProvider>,
    quotes: Arc<dyn QuoteSource>,
    history: Arc<dyn HistoricalUpdater>,
    aggregator: AggregatorHandle,
    in_progress: [AtomicBool; 4],
}

#[derive(Debug, Clone)]
pub struct CategoryStatus {
    pub category: Category,
    pub rule: ScheduleRule,
    pub last_updated: Option<NaiveDateTime>,
    pub due: bool,
    pub in_progress: bool,
}

impl fmt::Display for CategoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.in_progress {
            "refreshing"
        } else if self.due {
            "due"
        } else {
            "fresh"
        };
        write!(
            f,
            "{:<13} {:<10} last {:<19}  ({})",
            self.category.label(),
            state,
            format_timestamp(self.last_updated),
            self.rule
        )
    }
}

/// Clears the category's in-progress flag when the refresh task ends,
/// including when it panics.
struct RefreshGuard {
    manager: Arc<Manager>,
    category: Category,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.manager
            .flag(self.category)
            .store(false, Ordering::Release);
    }
}

impl Manager {
    pub fn new(
        registry: ScheduleRegistry,
        collaborators: Collaborators,
        aggregator: AggregatorHandle,
    ) -> Self {
        let Collaborators {
            store,
            index_provider,
            quotes,
            history,
        } = collaborators;

        Self {
            registry,
            reconciler: IndexReconciler::new(Arc::clone(&store)),
            store,
            index_provider,
            quotes,
            history,
            aggregator,
            in_progress: Default::default(),
        }
    }

    fn flag(&self, category: Category) -> &AtomicBool {
        let slot = match category {
            Category::SymbolIndex => 0,
            Category::KeyStats => 1,
            Category::Intraday => 2,
            Category::Historical => 3,
        };
        &self.in_progress[slot]
    }

    pub fn is_in_progress(&self, category: Category) -> bool {
        self.flag(category).load(Ordering::Acquire)
    }

    fn try_claim(self: &Arc<Self>, category: Category) -> Option<RefreshGuard> {
        self.flag(category)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshGuard {
                manager: Arc::clone(self),
                category,
            })
    }

    /// Whether `category` should be refreshed at `now`. Intraday snapshots
    /// are only taken while the market is open, and history waits for the
    /// first symbol index.
    pub fn is_due(&self, category: Category, now: NaiveDateTime) -> Result<bool> {
        let last_updated = self.store.get_updated(category)?;
        let due = schedule::is_due(last_updated, &self.registry.rule(category), now);

        Ok(match category {
            Category::Intraday => due && is_market_open(now),
            Category::Historical => due && self.reconciler.index_initialized()?,
            Category::SymbolIndex | Category::KeyStats => due,
        })
    }

    /// Spawn a refresh for every due category that is not already running.
    pub fn tick(self: &Arc<Self>, now: NaiveDateTime) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        self.spawn_due(now, &mut tasks);
        tasks
    }

    fn spawn_due(self: &Arc<Self>, now: NaiveDateTime, tasks: &mut JoinSet<()>) -> usize {
        let mut spawned = 0;

        for category in Category::ALL {
            match self.is_due(category, now) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    warn!("Could not evaluate schedule for {category}: {err}");
                    continue;
                }
            }

            let Some(guard) = self.try_claim(category) else {
                debug!("{category} refresh still running, skipping");
                continue;
            };

            tasks.spawn(async move {
                match guard.manager.refresh(category, now).await {
                    Ok(()) => info!("{category} refresh finished"),
                    Err(err) => error!("{category} refresh failed: {err}"),
                }
                drop(guard);
            });
            spawned += 1;
        }

        spawned
    }

    /// Run one refresh immediately, regardless of schedule. Fails when the
    /// category is already being refreshed.
    pub async fn refresh_now(self: &Arc<Self>, category: Category, now: NaiveDateTime) -> Result<()> {
        let Some(guard) = self.try_claim(category) else {
            return Err(AppError::message(format!(
                "{category} refresh already in progress"
            )));
        };
        let result = self.refresh(category, now).await;
        drop(guard);
        result
    }

    async fn refresh(&self, category: Category, now: NaiveDateTime) -> Result<()> {
        info!("Refreshing {category}");
        match category {
            Category::SymbolIndex => self.refresh_symbol_index(now).await.map(|_| ()),
            Category::KeyStats => self.refresh_key_stats(now).await,
            Category::Intraday => self.refresh_intraday(now).await,
            Category::Historical => self.refresh_historical(now).await,
        }
    }

    async fn refresh_symbol_index(&self, now: NaiveDateTime) -> Result<SymbolIndexDelta> {
        let index = self
            .index_provider
            .fetch_symbol_index()
            .await
            .context("Failed to fetch symbol index")?;
        self.reconciler.reconcile(&index, now)
    }

    fn stored_symbols(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_symbols()
            .context("Failed to read stored symbols")?
            .into_iter()
            .collect())
    }

    async fn refresh_key_stats(&self, now: NaiveDateTime) -> Result<()> {
        let symbols = self.stored_symbols()?;
        if symbols.is_empty() {
            debug!("No stored symbols yet, key stats skipped");
            return Ok(());
        }

        let quotes = self.quotes.fetch_quotes(&symbols).await?;
        let stats: Vec<KeyStats> = quotes.iter().map(KeyStats::from_quote).collect();
        self.store.insert_or_update_key_stats(&stats)?;
        self.store.set_updated(Category::KeyStats, now)?;
        info!("Stored key stats for {} symbols", stats.len());
        Ok(())
    }

    async fn refresh_intraday(&self, now: NaiveDateTime) -> Result<()> {
        let symbols = self.stored_symbols()?;
        if symbols.is_empty() {
            debug!("No stored symbols yet, intraday snapshot skipped");
            return Ok(());
        }

        let quotes = self.quotes.fetch_quotes(&symbols).await?;
        self.store.insert_or_update_quotes(&quotes)?;
        self.store.set_updated(Category::Intraday, now)?;
        debug!("Stored {} intraday quotes", quotes.len());
        Ok(())
    }

    async fn refresh_historical(&self, now: NaiveDateTime) -> Result<()> {
        let frequency = Frequency::Day;
        let mut fresh = Vec::new();
        let mut stale = Vec::new();
        for symbol in self.stored_symbols()? {
            match self.store.get_symbol_updated(&symbol, frequency.label())? {
                Some(_) => stale.push(symbol),
                None => fresh.push(symbol),
            }
        }

        // Both batches run; the first failure is reported after the second.
        let initialized = if fresh.is_empty() {
            Ok(())
        } else {
            self.history.initialize_symbols(&fresh, frequency).await
        };
        let updated = if stale.is_empty() {
            Ok(())
        } else {
            self.history.update_symbols(&stale, frequency).await
        };
        initialized?;
        updated?;

        self.store.set_updated(Category::Historical, now)?;
        info!(
            "Historical refresh done: {} initialized, {} updated",
            fresh.len(),
            stale.len()
        );
        Ok(())
    }

    /// Reconcile the symbol index immediately, returning the applied delta.
    pub async fn reconcile_now(&self, now: NaiveDateTime) -> Result<SymbolIndexDelta> {
        self.refresh_symbol_index(now).await
    }

    pub fn status(&self, now: NaiveDateTime) -> Result<Vec<CategoryStatus>> {
        Category::ALL
            .into_iter()
            .map(|category| {
                Ok(CategoryStatus {
                    category,
                    rule: self.registry.rule(category),
                    last_updated: self.store.get_updated(category)?,
                    due: self.is_due(category, now)?,
                    in_progress: self.is_in_progress(category),
                })
            })
            .collect()
    }

    /// Tick every `period` until `shutdown` resolves, then wait for running
    /// refreshes and drain the aggregator. Returns early with the aggregator's
    /// error if its worker stops while the loop is running.
    pub async fn run<F>(self: Arc<Self>, period: Duration, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        info!("Updater started, ticking every {}s", period.as_secs());
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if self.aggregator.is_stopped() {
                        error!("Update aggregator stopped, shutting down");
                        break;
                    }
                    let spawned = self.spawn_due(local_now(), &mut tasks);
                    if spawned > 0 {
                        debug!("Spawned {spawned} refreshes");
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined {
                        error!("Refresh task aborted: {err}");
                    }
                }
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} running refreshes", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!("Refresh task aborted: {err}");
            }
        }

        match Arc::try_unwrap(self) {
            Ok(manager) => manager.shutdown().await,
            Err(manager) if manager.aggregator.is_stopped() => {
                Err(AppError::message("update aggregator stopped"))
            }
            Err(_) => {
                warn!("Manager still shared at shutdown, aggregator left running");
                Ok(())
            }
        }
    }

    /// Drop the updater's notification sender and wait for the aggregator's
    /// final flush.
    pub async fn shutdown(self) -> Result<()> {
        let Manager {
            history,
            aggregator,
            ..
        } = self;
        drop(history);
        aggregator.shutdown().await
    }
}
