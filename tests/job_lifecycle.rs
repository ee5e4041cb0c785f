//! Backfill Job Store + Worker integration: exercises the queued ->
//! running -> completed lifecycle end to end through the public
//! `Store`/`BackfillWorker` API, including several boundary behaviors
//! around partial failure and progress monotonicity.
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use market_data_warehouse::domain::{AssetClass, Candle, JobStatus, Timeframe, UnitStatus};
use market_data_warehouse::store::Store;
use market_data_warehouse::validator::Validator;
use market_data_warehouse::vendor::router::MultiSourceRouter;
use market_data_warehouse::vendor::{VendorClient, VendorError, VendorMetrics};
use market_data_warehouse::worker::BackfillWorker;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct FlakyVendor {
    source: &'static str,
    fail_for: &'static str,
    calls: AtomicUsize,
}

#[async_trait]
impl VendorClient for FlakyVendor {
    fn source_id(&self) -> &str {
        self.source
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _is_crypto: bool,
    ) -> Result<Vec<Candle>, VendorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if symbol == self.fail_for {
            return Err(VendorError::Unavailable("simulated outage".into()));
        }
        Ok(vec![Candle::unvalidated(symbol, timeframe, start, 50.0, 51.0, 49.0, 50.5, 2_000.0, self.source)])
    }

    fn metrics(&self) -> VendorMetrics {
        VendorMetrics { total_requests: self.calls.load(Ordering::Relaxed) as u64, rate_limited_count: 0 }
    }
}

async fn store() -> Store {
    Store::open(":memory:").unwrap()
}

#[tokio::test]
async fn job_reaches_completed_when_every_unit_succeeds() {
    let store = store().await;
    store.symbols.add("AAPL", AssetClass::Stock, vec![Timeframe::H1, Timeframe::D1]).await.unwrap();

    let start = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2025, 4, 10, 0, 0, 0).unwrap();
    let job_id = store.jobs.create_job(vec!["AAPL".into()], vec![Timeframe::H1, Timeframe::D1], start, end).await.unwrap();

    let vendor = Arc::new(FlakyVendor { source: "primary", fail_for: "__never__", calls: AtomicUsize::new(0) });
    let router = MultiSourceRouter::new(vendor, None, 0.0);
    let worker = BackfillWorker::new(store.clone(), router, Validator::default());

    let job = worker.run_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_pct, 100);
    assert!(job.started_at.is_some() && job.completed_at.is_some());
    assert!(job.completed_at.unwrap() >= job.started_at.unwrap());

    let (_, units) = store.jobs.get_status(job_id).await.unwrap().unwrap();
    assert_eq!(units.len(), 2, "one unit per (symbol, timeframe) pair");
    assert!(units.iter().all(|u| u.status == UnitStatus::Completed));
}

#[tokio::test]
async fn a_single_unit_failure_does_not_fail_the_whole_job() {
    let store = store().await;
    store.symbols.add("AAPL", AssetClass::Stock, vec![Timeframe::H1]).await.unwrap();
    store.symbols.add("DOOMED", AssetClass::Stock, vec![Timeframe::H1]).await.unwrap();

    let start = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2025, 4, 2, 0, 0, 0).unwrap();
    let job_id = store
        .jobs
        .create_job(vec!["AAPL".into(), "DOOMED".into()], vec![Timeframe::H1], start, end)
        .await
        .unwrap();

    let vendor = Arc::new(FlakyVendor { source: "primary", fail_for: "DOOMED", calls: AtomicUsize::new(0) });
    let router = MultiSourceRouter::new(vendor, None, 0.0);
    let worker = BackfillWorker::new(store.clone(), router, Validator::default());

    let job = worker.run_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed, "at least one unit succeeded, so the job as a whole succeeds");

    let (_, units) = store.jobs.get_status(job_id).await.unwrap().unwrap();
    let doomed = units.iter().find(|u| u.symbol == "DOOMED").unwrap();
    assert_eq!(doomed.status, UnitStatus::Failed);
    assert!(doomed.error_message.is_some());
}

#[tokio::test]
async fn job_fails_only_when_every_unit_fails() {
    let store = store().await;
    store.symbols.add("DOOMED", AssetClass::Stock, vec![Timeframe::H1]).await.unwrap();

    let start = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2025, 4, 2, 0, 0, 0).unwrap();
    let job_id = store.jobs.create_job(vec!["DOOMED".into()], vec![Timeframe::H1], start, end).await.unwrap();

    let vendor = Arc::new(FlakyVendor { source: "primary", fail_for: "DOOMED", calls: AtomicUsize::new(0) });
    let router = MultiSourceRouter::new(vendor, None, 0.0);
    let worker = BackfillWorker::new(store.clone(), router, Validator::default());

    let job = worker.run_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
async fn creating_a_job_with_equal_start_and_end_is_rejected() {
    let store = store().await;
    let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let result = store.jobs.create_job(vec!["AAPL".into()], vec![Timeframe::D1], t, t).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn polling_status_never_sees_progress_regress() {
    let store = store().await;
    store.symbols.add("AAPL", AssetClass::Stock, vec![Timeframe::M5, Timeframe::H1, Timeframe::D1]).await.unwrap();

    let start = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2025, 4, 2, 0, 0, 0).unwrap();
    let job_id = store
        .jobs
        .create_job(vec!["AAPL".into()], vec![Timeframe::M5, Timeframe::H1, Timeframe::D1], start, end)
        .await
        .unwrap();
    store.jobs.start_job(job_id).await.unwrap();

    let mut last_pct = 0u8;
    for (tf, fetched) in [(Timeframe::M5, 3u64), (Timeframe::H1, 2u64), (Timeframe::D1, 1u64)] {
        store.jobs.update_progress(job_id, "AAPL", tf, fetched, fetched, None).await.unwrap();
        let (job, _) = store.jobs.get_status(job_id).await.unwrap().unwrap();
        assert!(job.progress_pct >= last_pct);
        last_pct = job.progress_pct;
    }
    assert_eq!(last_pct, 100);
}
