/// Scheduler: drives recurring backfill on a cron-like cadence, using a
/// `tokio::select!` + `CancellationToken` cooperative-shutdown loop.
use crate::domain::{BackfillStatus, SchedulerExecutionLog, Timeframe};
use crate::store::Store;
use crate::worker::BackfillWorker;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_CONCURRENT_SYMBOLS: usize = 3;
pub const DEFAULT_INTRA_GROUP_STAGGER: Duration = Duration::from_secs(5);
pub const DEFAULT_INTER_GROUP_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_LOOKBACK: ChronoDuration = ChronoDuration::days(7);
/// Leaves a buffer before the next hourly tick so a tick that overruns still
/// yields a "deadline" log entry instead of running indefinitely.
pub const DEFAULT_TICK_DEADLINE: Duration = Duration::from_secs(3300);

pub struct Scheduler {
    store: Store,
    worker: Arc<BackfillWorker>,
    interval: Duration,
    schedule_minute: u32,
    max_concurrent_symbols: usize,
    tick_deadline: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    /// `schedule_minute` (0-59) is the minute-of-hour the first tick aligns
    /// to; `interval` is the cadence between ticks thereafter (e.g. hourly).
    pub fn new(store: Store, worker: BackfillWorker, interval: Duration, schedule_minute: u32) -> Self {
        Self {
            store,
            worker: Arc::new(worker),
            interval,
            schedule_minute: schedule_minute.min(59),
            max_concurrent_symbols: DEFAULT_MAX_CONCURRENT_SYMBOLS,
            tick_deadline: DEFAULT_TICK_DEADLINE,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_max_concurrent_symbols(mut self, n: usize) -> Self {
        self.max_concurrent_symbols = n.max(1);
        self
    }

    pub fn with_tick_deadline(mut self, deadline: Duration) -> Self {
        self.tick_deadline = deadline;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs ticks until cancelled. A tick never overlaps the next: the loop
    /// blocks on the current tick's completion before sleeping toward the
    /// following one. The first tick is delayed until wall-clock time
    /// reaches `schedule_minute` past the hour, so the cron contract ("fire
    /// every hour at minute M") holds regardless of when the process started.
    pub async fn run(&self) {
        info!(schedule_minute = self.schedule_minute, "scheduler starting");

        let initial_delay = time_until_next_minute_mark(Utc::now(), self.schedule_minute);
        tokio::select! {
            _ = self.cancel.cancelled() => {
                info!("scheduler cancelled before first tick");
                return;
            }
            _ = tokio::time::sleep(initial_delay) => {}
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("scheduler cancelled, stopping");
                    break;
                }
                _ = self.run_tick() => {}
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("scheduler stopped");
    }

    /// Runs exactly one tick, independent of the sleep/cancel loop in `run`.
    /// Exposed separately so callers (and tests) can trigger a tick on
    /// demand without waiting for the interval.
    pub async fn run_tick(&self) {
        let execution_id = Uuid::new_v4();
        if let Err(e) = self.store.jobs.log_execution_start(execution_id).await {
            error!(%execution_id, error = %e, "failed to record scheduler tick start");
            return;
        }

        let mut log = SchedulerExecutionLog::started(execution_id);
        let started = std::time::Instant::now();

        let symbols = match self.store.symbols.list(true, None).await {
            Ok(s) => s,
            Err(e) => {
                error!(%execution_id, error = %e, "failed to load active symbols");
                log.status = "failed".to_string();
                log.error_message = Some(e.to_string());
                log.completed_at = Some(Utc::now());
                let _ = self.store.jobs.log_execution_complete(log).await;
                return;
            }
        };

        let mut deadline_exceeded = false;

        for group in symbols.chunks(self.max_concurrent_symbols) {
            if started.elapsed() >= self.tick_deadline {
                deadline_exceeded = true;
                warn!(%execution_id, elapsed_secs = started.elapsed().as_secs_f64(), "scheduler tick deadline exceeded, not issuing further units");
                break;
            }

            let mut handles = Vec::with_capacity(group.len());

            for (i, symbol) in group.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(DEFAULT_INTRA_GROUP_STAGGER).await;
                }

                let symbol_name = symbol.symbol.clone();
                let timeframes: Vec<Timeframe> = symbol.timeframes.clone();
                let store = self.store.clone();
                let worker = self.worker.clone();

                let end = Utc::now();
                let mut start = end - DEFAULT_LOOKBACK;
                for tf in &timeframes {
                    if let Ok(Some(latest)) = store.candles.latest(&symbol_name, *tf).await {
                        if latest.time > start {
                            start = latest.time;
                        }
                    }
                }

                handles.push(run_symbol_backfill(worker, store, symbol_name, timeframes, start, end));
            }

            // Already-dispatched units always run to completion or their own
            // timeout; only the next group is gated on the deadline check.
            let results: Vec<Result<u64, String>> = futures_join_all(handles).await;
            for outcome in results {
                match outcome {
                    Ok(inserted) => {
                        log.symbols_succeeded += 1;
                        log.total_records_processed += inserted;
                    }
                    Err(e) => {
                        log.symbols_failed += 1;
                        warn!(%execution_id, error = %e, "symbol backfill failed during scheduler tick");
                    }
                }
            }

            if group.len() == self.max_concurrent_symbols {
                tokio::time::sleep(DEFAULT_INTER_GROUP_DELAY).await;
            }
        }

        log.completed_at = Some(Utc::now());
        log.duration_seconds = Some(started.elapsed().as_secs_f64());
        log.status = if deadline_exceeded {
            "deadline".to_string()
        } else if log.symbols_failed == 0 {
            "completed".to_string()
        } else {
            "completed_with_errors".to_string()
        };

        if let Err(e) = self.store.jobs.log_execution_complete(log).await {
            error!(%execution_id, error = %e, "failed to record scheduler tick completion");
        }
    }
}

/// Seconds until wall-clock time next reaches `minute` past the hour, so the
/// first tick fires on the configured cron offset rather than whenever the
/// process happened to start.
fn time_until_next_minute_mark(now: DateTime<Utc>, minute: u32) -> Duration {
    let current_minute = now.minute() as i64;
    let current_second = now.second() as i64;
    let mut minutes_ahead = minute as i64 - current_minute;
    if minutes_ahead < 0 || (minutes_ahead == 0 && current_second > 0) {
        minutes_ahead += 60;
    }
    let seconds_ahead = minutes_ahead * 60 - current_second;
    Duration::from_secs(seconds_ahead.max(0) as u64)
}

async fn run_symbol_backfill(
    worker: Arc<BackfillWorker>,
    store: Store,
    symbol: String,
    timeframes: Vec<Timeframe>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<u64, String> {
    let job_id = store
        .jobs
        .create_job(vec![symbol.clone()], timeframes, start, end)
        .await
        .map_err(|e| e.to_string())?;

    let job = worker.run_job(job_id).await.map_err(|e| e.to_string())?;

    let status = if job.status == crate::domain::JobStatus::Completed {
        BackfillStatus::Completed
    } else {
        BackfillStatus::Failed
    };
    let _ = store.symbols.update_backfill_status(&symbol, status, Some(Utc::now()), job.error_message.clone()).await;

    if job.status == crate::domain::JobStatus::Completed {
        Ok(job.total_records_inserted)
    } else {
        Err(job.error_message.unwrap_or_else(|| "backfill job failed".to_string()))
    }
}

/// Runs a group's per-symbol backfills concurrently via `JoinSet`, awaiting
/// all of them before returning.
async fn futures_join_all<F>(futures: Vec<F>) -> Vec<Result<u64, String>>
where
    F: std::future::Future<Output = Result<u64, String>> + Send + 'static,
{
    let mut set = tokio::task::JoinSet::new();
    for fut in futures {
        set.spawn(fut);
    }
    let mut results = Vec::with_capacity(set.len());
    while let Some(res) = set.join_next().await {
        results.push(res.unwrap_or_else(|e| Err(format!("task join error: {e}"))));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AssetClass, Candle};
    use crate::validator::Validator;
    use crate::vendor::router::MultiSourceRouter;
    use crate::vendor::{VendorClient, VendorError, VendorMetrics};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct AlwaysOkClient;

    #[async_trait]
    impl VendorClient for AlwaysOkClient {
        fn source_id(&self) -> &str {
            "test"
        }
        async fn fetch_range(
            &self,
            symbol: &str,
            timeframe: Timeframe,
            start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _is_crypto: bool,
        ) -> Result<Vec<Candle>, VendorError> {
            Ok(vec![Candle::unvalidated(symbol, timeframe, start, 100.0, 101.0, 99.0, 100.5, 1000.0, "test")])
        }
        fn metrics(&self) -> VendorMetrics {
            VendorMetrics::default()
        }
    }

    #[tokio::test]
    async fn tick_processes_active_symbols_and_logs_completion() {
        let store = Store::open(":memory:").unwrap();
        store.symbols.add("AAPL", AssetClass::Stock, vec![Timeframe::D1]).await.unwrap();
        store.symbols.add("MSFT", AssetClass::Stock, vec![Timeframe::D1]).await.unwrap();

        let router = MultiSourceRouter::new(Arc::new(AlwaysOkClient), None, 0.0);
        let worker = BackfillWorker::new(store.clone(), router, Validator::default());
        let scheduler = Scheduler::new(store.clone(), worker, Duration::from_secs(3600), 0);

        scheduler.run_tick().await;

        let jobs = store.jobs.recent(10).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.status == crate::domain::JobStatus::Completed));
    }

    #[tokio::test]
    async fn tick_stops_issuing_units_past_its_deadline() {
        let store = Store::open(":memory:").unwrap();
        store.symbols.add("AAPL", AssetClass::Stock, vec![Timeframe::D1]).await.unwrap();
        store.symbols.add("MSFT", AssetClass::Stock, vec![Timeframe::D1]).await.unwrap();
        store.symbols.add("GOOGL", AssetClass::Stock, vec![Timeframe::D1]).await.unwrap();

        let router = MultiSourceRouter::new(Arc::new(AlwaysOkClient), None, 0.0);
        let worker = BackfillWorker::new(store.clone(), router, Validator::default());
        // A zero deadline is already exceeded before the first group is even
        // dispatched, so no unit should be issued at all.
        let scheduler = Scheduler::new(store.clone(), worker, Duration::from_secs(3600), 0)
            .with_max_concurrent_symbols(1)
            .with_tick_deadline(Duration::from_secs(0));

        scheduler.run_tick().await;

        let jobs = store.jobs.recent(10).await.unwrap();
        assert!(jobs.is_empty(), "deadline exceedance must stop new units from being issued");

        let executions = store.jobs.recent_executions(1).await.unwrap();
        assert_eq!(executions[0].status, "deadline");
    }

    #[test]
    fn minute_mark_computes_seconds_to_next_occurrence() {
        use chrono::TimeZone;

        let now = Utc.with_ymd_and_hms(2025, 1, 6, 14, 12, 30).unwrap();
        assert_eq!(time_until_next_minute_mark(now, 0), Duration::from_secs(47 * 60 + 30));
        assert_eq!(time_until_next_minute_mark(now, 12), Duration::from_secs(59 * 60 + 30));
        assert_eq!(time_until_next_minute_mark(now, 15), Duration::from_secs(2 * 60 + 30));
    }
}
