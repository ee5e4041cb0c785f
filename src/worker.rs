/// Backfill Worker: consumes a job, iterating symbol × timeframe in a fixed
/// timeframe order. A unit failure never aborts the job — only that unit is
/// marked failed and the worker moves on to the next one.
use crate::domain::{AssetClass, BackfillJob, Timeframe};
use crate::gap::GapDetector;
use crate::store::Store;
use crate::validator::Validator;
use crate::vendor::router::MultiSourceRouter;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct BackfillWorker {
    store: Store,
    router: MultiSourceRouter,
    validator: Validator,
    unit_timeout: Duration,
}

impl BackfillWorker {
    pub fn new(store: Store, router: MultiSourceRouter, validator: Validator) -> Self {
        Self { store, router, validator, unit_timeout: DEFAULT_UNIT_TIMEOUT }
    }

    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = timeout;
        self
    }

    /// Runs a previously created job to completion (or to all-units-failed).
    /// Returns the final job snapshot.
    pub async fn run_job(&self, job_id: Uuid) -> Result<BackfillJob, WorkerError> {
        self.store.jobs.start_job(job_id).await.map_err(WorkerError::Store)?;

        let (job, _) = self
            .store
            .jobs
            .get_status(job_id)
            .await
            .map_err(WorkerError::Store)?
            .ok_or(WorkerError::JobNotFound(job_id))?;

        let mut any_succeeded = false;
        let mut any_failed = false;
        let mut touched_units: Vec<(String, Timeframe, AssetClass, bool)> = Vec::new();

        for symbol in &job.symbols {
            let registered = self.store.symbols.get(symbol).await.map_err(WorkerError::Store)?;
            let Some(registered) = registered else {
                warn!(symbol, %job_id, "symbol not in registry, skipping all units for it");
                any_failed = true;
                continue;
            };

            for timeframe in ordered_timeframes(&job.timeframes) {
                let outcome = self.run_unit(&job, symbol, timeframe, registered.is_crypto(), registered.asset_class).await;

                match outcome {
                    Ok((fetched, inserted)) => {
                        any_succeeded = true;
                        touched_units.push((symbol.clone(), timeframe, registered.asset_class, registered.is_crypto()));
                        if let Err(e) = self.store.jobs.update_progress(job_id, symbol, timeframe, fetched, inserted, None).await {
                            error!(symbol, %timeframe, %job_id, error = %e, "failed to persist unit progress");
                        }
                    }
                    Err(e) => {
                        any_failed = true;
                        warn!(symbol, %timeframe, %job_id, error = %e, "unit failed, continuing job");
                        if let Err(store_err) = self
                            .store
                            .jobs
                            .update_progress(job_id, symbol, timeframe, 0, 0, Some(e.to_string()))
                            .await
                        {
                            error!(symbol, %timeframe, %job_id, error = %store_err, "failed to persist unit failure");
                        }
                    }
                }
            }
        }

        if any_succeeded {
            self.run_gap_pass(&job, &touched_units).await;
        }

        if any_succeeded {
            self.store.jobs.complete_job(job_id).await.map_err(WorkerError::Store)?;
            info!(%job_id, any_failed, "backfill job completed");
        } else {
            self.store
                .jobs
                .fail_job(job_id, "all units failed")
                .await
                .map_err(WorkerError::Store)?;
            error!(%job_id, "backfill job failed: no unit succeeded");
        }

        self.store.jobs.get_status(job_id).await.map_err(WorkerError::Store)?.map(|(job, _)| job).ok_or(WorkerError::JobNotFound(job_id))
    }

    /// Post-ingest gap pass: for each `(symbol, timeframe)` a unit actually
    /// wrote candles for, diff the stored dates against the expected
    /// calendar and trigger a bounded-retry re-fetch for anything missing.
    /// Failures here are logged, never surfaced — a gap pass that can't
    /// complete must not turn a completed job into a failed one.
    async fn run_gap_pass(&self, job: &BackfillJob, touched_units: &[(String, Timeframe, AssetClass, bool)]) {
        let detector = GapDetector::new(self.store.clone(), self.router.clone(), self.validator.clone());

        for (symbol, timeframe, asset_class, is_crypto) in touched_units {
            match detector
                .detect_and_repair(symbol, *timeframe, *asset_class, *is_crypto, job.start_date, job.end_date)
                .await
            {
                Ok(outcomes) => {
                    let unresolved = outcomes.iter().filter(|o| !o.repaired).count();
                    if !outcomes.is_empty() {
                        info!(symbol, %timeframe, gaps = outcomes.len(), unresolved, "gap pass complete");
                    }
                }
                Err(e) => {
                    warn!(symbol, %timeframe, job_id = %job.id, error = %e, "gap detection failed, leaving range as-is");
                }
            }
        }
    }

    async fn run_unit(
        &self,
        job: &BackfillJob,
        symbol: &str,
        timeframe: Timeframe,
        is_crypto: bool,
        asset_class: crate::domain::AssetClass,
    ) -> Result<(u64, u64), UnitError> {
        let fetch = self.router.fetch_range(symbol, timeframe, job.start_date, job.end_date, is_crypto, asset_class);

        let (candles, _source) = tokio::time::timeout(self.unit_timeout, fetch)
            .await
            .map_err(|_| UnitError::Timeout)?
            .map_err(|e| UnitError::Vendor(e.to_string()))?;

        let fetched = candles.len() as u64;
        if candles.is_empty() {
            return Ok((0, 0));
        }

        let scored = self.validator.score_range(candles, asset_class);
        let inserted = self
            .store
            .candles
            .upsert_range(scored, true)
            .await
            .map_err(|e| UnitError::Store(e.to_string()))?;

        Ok((fetched, inserted as u64))
    }
}

/// Finer timeframes first so intermittent vendor slowdowns degrade the
/// coarser ones last, regardless of the order the caller passed.
fn ordered_timeframes(requested: &[Timeframe]) -> Vec<Timeframe> {
    Timeframe::worker_order().into_iter().filter(|t| requested.contains(t)).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("job not found: {0}")]
    JobNotFound(Uuid),
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

#[derive(Debug, thiserror::Error)]
enum UnitError {
    #[error("unit fetch timed out")]
    Timeout,
    #[error("vendor error: {0}")]
    Vendor(String),
    #[error("store error: {0}")]
    Store(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AssetClass, Candle};
    use crate::vendor::{VendorClient, VendorError, VendorMetrics};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
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
            start: chrono::DateTime<Utc>,
            _end: chrono::DateTime<Utc>,
            _is_crypto: bool,
        ) -> Result<Vec<Candle>, VendorError> {
            Ok(vec![Candle::unvalidated(symbol, timeframe, start, 100.0, 101.0, 99.0, 100.5, 1000.0, "test")])
        }
        fn metrics(&self) -> VendorMetrics {
            VendorMetrics::default()
        }
    }

    #[tokio::test]
    async fn successful_job_completes_and_inserts_candles() {
        let store = Store::open(":memory:").unwrap();
        store.symbols.add("AAPL", AssetClass::Stock, vec![Timeframe::D1]).await.unwrap();

        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();
        let job_id = store.jobs.create_job(vec!["AAPL".into()], vec![Timeframe::D1], start, end).await.unwrap();

        let router = MultiSourceRouter::new(Arc::new(AlwaysOkClient), None, 0.0);
        let worker = BackfillWorker::new(store, router, Validator::default());

        let job = worker.run_job(job_id).await.unwrap();
        assert_eq!(job.status, crate::domain::JobStatus::Completed);
        assert_eq!(job.total_records_inserted, 1);
    }

    #[tokio::test]
    async fn unregistered_symbol_does_not_crash_worker() {
        let store = Store::open(":memory:").unwrap();
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();
        let job_id = store.jobs.create_job(vec!["GHOST".into()], vec![Timeframe::D1], start, end).await.unwrap();

        let router = MultiSourceRouter::new(Arc::new(AlwaysOkClient), None, 0.0);
        let worker = BackfillWorker::new(store, router, Validator::default());

        let job = worker.run_job(job_id).await.unwrap();
        assert_eq!(job.status, crate::domain::JobStatus::Failed);
    }

    /// Returns exactly one candle at the requested range's start, regardless
    /// of how wide the range is — simulates a vendor that under-delivers a
    /// job's full range, so the post-ingest gap pass has something to find.
    struct SparseClient;

    #[async_trait]
    impl VendorClient for SparseClient {
        fn source_id(&self) -> &str {
            "sparse"
        }
        async fn fetch_range(
            &self,
            symbol: &str,
            timeframe: Timeframe,
            start: chrono::DateTime<Utc>,
            _end: chrono::DateTime<Utc>,
            _is_crypto: bool,
        ) -> Result<Vec<Candle>, VendorError> {
            Ok(vec![Candle::unvalidated(symbol, timeframe, start, 100.0, 101.0, 99.0, 100.5, 1000.0, "sparse")])
        }
        fn metrics(&self) -> VendorMetrics {
            VendorMetrics::default()
        }
    }

    #[tokio::test]
    async fn completed_job_triggers_a_gap_pass_that_fills_in_missing_dates() {
        let store = Store::open(":memory:").unwrap();
        store.symbols.add("AAPL", AssetClass::Stock, vec![Timeframe::D1]).await.unwrap();

        // Monday through Friday: 5 expected trading days, the vendor only ever
        // hands back the first one per call.
        let start = Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        let job_id = store.jobs.create_job(vec!["AAPL".into()], vec![Timeframe::D1], start, end).await.unwrap();

        let router = MultiSourceRouter::new(Arc::new(SparseClient), None, 0.0);
        let worker = BackfillWorker::new(store.clone(), router, Validator::default());

        let job = worker.run_job(job_id).await.unwrap();
        assert_eq!(job.status, crate::domain::JobStatus::Completed);
        assert_eq!(job.total_records_inserted, 1, "the job's own counters only reflect the main fetch, not the gap pass");

        let dates = store.candles.distinct_dates("AAPL", Timeframe::D1, start, end).await.unwrap();
        assert!(dates.len() >= 2, "gap pass should have re-fetched at least one of the missing trading days, got {dates:?}");
    }
}
