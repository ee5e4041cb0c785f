/// Gap Detector & Repair Driver: post-ingest gap detection against an
/// asset-class-aware calendar, plus a separate revalidation repair path for
/// rows written without scoring. Detects missing calendar dates by diffing
/// against the stored rows and re-fetches through the Router to fill them,
/// rather than synthesizing candles.
use crate::domain::{AssetClass, CandleKey, Timeframe};
use crate::store::{CandleValidationUpdate, Store};
use crate::validator::Validator;
use crate::vendor::router::MultiSourceRouter;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc, Weekday};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

const MAX_REPAIR_RETRIES: u32 = 2;
const REPAIR_RETRY_DELAYS: [Duration; MAX_REPAIR_RETRIES as usize] = [Duration::from_secs(2), Duration::from_secs(4)];

/// One missing span within a requested range, expressed as calendar dates
/// (midnight UTC) rather than exact candle timestamps — the detector works
/// at day granularity regardless of the timeframe being checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GapRepairOutcome {
    pub gap: (DateTime<Utc>, DateTime<Utc>),
    pub repaired: bool,
    pub attempts: u32,
    pub candles_inserted: usize,
    pub error: Option<String>,
}

pub struct GapDetector {
    store: Store,
    router: MultiSourceRouter,
    validator: Validator,
}

impl GapDetector {
    pub fn new(store: Store, router: MultiSourceRouter, validator: Validator) -> Self {
        Self { store, router, validator }
    }

    /// Queries distinct dates actually present for `(symbol, timeframe)`
    /// within `[start, end]`, diffs against the expected calendar for
    /// `asset_class`, and returns the resulting gap ranges in ascending order.
    pub async fn detect(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        asset_class: AssetClass,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GapRange>, crate::store::StoreError> {
        let present = self.store.candles.distinct_dates(symbol, timeframe, start, end).await?;
        let present_dates: std::collections::HashSet<chrono::NaiveDate> = present.iter().map(|t| t.date_naive()).collect();

        let expected = expected_calendar(asset_class, start, end);
        let missing: Vec<chrono::NaiveDate> = expected.into_iter().filter(|d| !present_dates.contains(d)).collect();

        Ok(collapse_into_ranges(missing))
    }

    /// Post-ingest repair: for each gap, re-fetch just that range through
    /// the Router, up to `MAX_REPAIR_RETRIES` additional attempts with
    /// fixed delays {2s, 4s} between them.
    pub async fn detect_and_repair(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        asset_class: AssetClass,
        is_crypto: bool,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GapRepairOutcome>, crate::store::StoreError> {
        let gaps = self.detect(symbol, timeframe, asset_class, start, end).await?;
        let mut outcomes = Vec::with_capacity(gaps.len());

        for gap in gaps {
            outcomes.push(self.repair_one(symbol, timeframe, asset_class, is_crypto, &gap).await);
        }

        Ok(outcomes)
    }

    async fn repair_one(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        asset_class: AssetClass,
        is_crypto: bool,
        gap: &GapRange,
    ) -> GapRepairOutcome {
        let mut last_error = None;

        for attempt in 0..=MAX_REPAIR_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(REPAIR_RETRY_DELAYS[attempt as usize - 1]).await;
            }

            match self.router.fetch_range(symbol, timeframe, gap.start, gap.end, is_crypto, asset_class).await {
                Ok((candles, _source)) if !candles.is_empty() => {
                    let scored = self.validator.score_range(candles, asset_class);
                    return match self.store.candles.upsert_range(scored, true).await {
                        Ok(inserted) => {
                            info!(symbol, %timeframe, attempt, inserted, "gap repaired");
                            GapRepairOutcome {
                                gap: (gap.start, gap.end),
                                repaired: true,
                                attempts: attempt + 1,
                                candles_inserted: inserted,
                                error: None,
                            }
                        }
                        Err(e) => GapRepairOutcome {
                            gap: (gap.start, gap.end),
                            repaired: false,
                            attempts: attempt + 1,
                            candles_inserted: 0,
                            error: Some(e.to_string()),
                        },
                    };
                }
                Ok(_empty) => {
                    last_error = Some("vendor returned no candles for gap range".to_string());
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }
        }

        warn!(symbol, %timeframe, gap_start = %gap.start, gap_end = %gap.end, "gap repair exhausted retries");
        GapRepairOutcome {
            gap: (gap.start, gap.end),
            repaired: false,
            attempts: MAX_REPAIR_RETRIES + 1,
            candles_inserted: 0,
            error: last_error,
        }
    }
}

/// 24/7 for crypto; Mon-Fri for stocks and ETFs. Exchange holiday calendars
/// are out of scope.
fn expected_calendar(asset_class: AssetClass, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<chrono::NaiveDate> {
    let mut dates = Vec::new();
    let mut cursor = start.date_naive();
    let last = end.date_naive();

    while cursor <= last {
        let include = asset_class.is_24_7() || !matches!(cursor.weekday(), Weekday::Sat | Weekday::Sun);
        if include {
            dates.push(cursor);
        }
        cursor += ChronoDuration::days(1);
    }

    dates
}

/// Groups consecutive missing dates into closed `[start, end]` ranges at
/// midnight UTC, so a 3-day hole becomes one `GapRange` instead of three.
fn collapse_into_ranges(missing: Vec<chrono::NaiveDate>) -> Vec<GapRange> {
    let mut ranges = Vec::new();
    let mut iter = missing.into_iter().peekable();

    while let Some(start) = iter.next() {
        let mut end = start;
        while let Some(&next) = iter.peek() {
            if next == end.succ_opt().unwrap_or(next) {
                end = next;
                iter.next();
            } else {
                break;
            }
        }
        ranges.push(GapRange {
            start: start.and_hms_opt(0, 0, 0).unwrap().and_utc(),
            end: end.and_hms_opt(23, 59, 59).unwrap().and_utc(),
        });
    }

    ranges
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct RevalidationSummary {
    pub scanned: usize,
    pub validated: usize,
    pub rejected: usize,
    pub score_min: f64,
    pub score_max: f64,
    pub score_avg: f64,
    pub errors: Vec<String>,
}

/// Revalidation repair: rescans rows with
/// `validated=false`, recomputes `quality_score`, and either commits the
/// updates or — in dry-run mode — reports what it would have done.
pub struct Revalidator {
    store: Store,
    validator: Validator,
}

impl Revalidator {
    pub fn new(store: Store, validator: Validator) -> Self {
        Self { store, validator }
    }

    /// `default_asset_class` is used only as a fallback for symbols that
    /// have since been removed from the registry; every other row is scored
    /// with its own registered asset class, since a scan with no `--symbol`
    /// filter routinely mixes crypto and equities in one run.
    pub async fn run(
        &self,
        symbol: Option<String>,
        timeframe: Option<Timeframe>,
        limit: u32,
        default_asset_class: AssetClass,
        dry_run: bool,
    ) -> Result<RevalidationSummary, crate::store::StoreError> {
        let candles = self.store.candles.unvalidated(symbol, timeframe, limit).await?;
        if candles.is_empty() {
            return Ok(RevalidationSummary::default());
        }

        let mut sorted = candles;
        sorted.sort_by_key(|c| (c.symbol.clone(), c.timeframe.code().to_string(), c.time));

        let mut updates = Vec::with_capacity(sorted.len());
        let mut scores = Vec::with_capacity(sorted.len());
        let mut validated = 0usize;
        let mut rejected = 0usize;
        let mut asset_classes: std::collections::HashMap<String, AssetClass> = std::collections::HashMap::new();

        // Each (symbol, timeframe) series gets its own median volume baseline
        // and its own `prev` chain — a scan spanning multiple series must
        // never let one series's last candle act as the predecessor of the
        // next series's first.
        let mut group_start = 0;
        while group_start < sorted.len() {
            let group_symbol = sorted[group_start].symbol.clone();
            let group_timeframe = sorted[group_start].timeframe;

            let mut group_end = group_start + 1;
            while group_end < sorted.len() && sorted[group_end].symbol == group_symbol && sorted[group_end].timeframe == group_timeframe {
                group_end += 1;
            }

            let group = &sorted[group_start..group_end];
            let median_volume = median(&group.iter().map(|c| c.volume).collect::<Vec<_>>());

            let asset_class = match asset_classes.get(&group_symbol) {
                Some(ac) => *ac,
                None => {
                    let resolved = self.store.symbols.get(group_symbol.clone()).await?.map(|s| s.asset_class).unwrap_or(default_asset_class);
                    asset_classes.insert(group_symbol.clone(), resolved);
                    resolved
                }
            };

            let mut prev: Option<&crate::domain::Candle> = None;
            for candle in group {
                let scored = self.validator.score_candle(prev, candle, asset_class, median_volume);
                scores.push(scored.quality_score);
                if scored.validated {
                    validated += 1;
                } else {
                    rejected += 1;
                }

                updates.push(CandleValidationUpdate {
                    key: CandleKey { symbol: scored.symbol.clone(), timeframe: scored.timeframe, time: scored.time },
                    quality_score: scored.quality_score,
                    validated: scored.validated,
                    notes: scored.validation_notes.clone(),
                    gap_detected: scored.gap_detected,
                    volume_anomaly: scored.volume_anomaly,
                });
                prev = Some(candle);
            }

            group_start = group_end;
        }

        let score_min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
        let score_max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let score_avg = scores.iter().sum::<f64>() / scores.len() as f64;

        let mut errors = Vec::new();
        if !dry_run {
            if let Err(e) = self.store.candles.update_validation(updates, None).await {
                errors.push(e.to_string());
            }
        }

        Ok(RevalidationSummary { scanned: sorted.len(), validated, rejected, score_min, score_max, score_avg, errors })
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 { (sorted[mid - 1] + sorted[mid]) / 2.0 } else { sorted[mid] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn crypto_calendar_includes_weekends() {
        let start = Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap(); // Friday
        let end = Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap(); // Monday
        let dates = expected_calendar(AssetClass::Crypto, start, end);
        assert_eq!(dates.len(), 4);
    }

    #[test]
    fn stock_calendar_excludes_weekends() {
        let start = Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap(); // Friday
        let end = Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap(); // Monday
        let dates = expected_calendar(AssetClass::Stock, start, end);
        assert_eq!(dates.len(), 2); // Friday + Monday
    }

    #[test]
    fn collapse_groups_consecutive_dates() {
        let d = |y, m, day| Utc.with_ymd_and_hms(y, m, day, 0, 0, 0).unwrap().date_naive();
        let missing = vec![d(2025, 1, 3), d(2025, 1, 4), d(2025, 1, 6)];
        let ranges = collapse_into_ranges(missing);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].start.date_naive(), d(2025, 1, 3));
        assert_eq!(ranges[0].end.date_naive(), d(2025, 1, 4));
        assert_eq!(ranges[1].start.date_naive(), d(2025, 1, 6));
    }

    #[tokio::test]
    async fn detect_finds_missing_trading_day() {
        use crate::store::Store;

        let store = Store::open(":memory:").unwrap();
        let present = Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap();
        let c = crate::domain::Candle::unvalidated("AAPL", Timeframe::D1, present, 1.0, 2.0, 0.5, 1.5, 100.0, "test");
        store.candles.upsert_range(vec![c], true).await.unwrap();

        let primary = std::sync::Arc::new(NeverClient);
        let router = MultiSourceRouter::new(primary, None, 0.85);
        let detector = GapDetector::new(store, router, Validator::default());

        let start = Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 7, 0, 0, 0).unwrap();
        let gaps = detector.detect("AAPL", Timeframe::D1, AssetClass::Stock, start, end).await.unwrap();

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].start.date_naive(), Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap().date_naive());
    }

    struct NeverClient;

    #[async_trait::async_trait]
    impl crate::vendor::VendorClient for NeverClient {
        fn source_id(&self) -> &str {
            "never"
        }
        async fn fetch_range(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _is_crypto: bool,
        ) -> Result<Vec<crate::domain::Candle>, crate::vendor::VendorError> {
            Ok(vec![])
        }
        fn metrics(&self) -> crate::vendor::VendorMetrics {
            crate::vendor::VendorMetrics::default()
        }
    }

    #[tokio::test]
    async fn revalidation_dry_run_does_not_persist() {
        use crate::store::Store;

        let store = Store::open(":memory:").unwrap();
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut c = crate::domain::Candle::unvalidated("AAPL", Timeframe::D1, t, 100.0, 101.0, 99.0, 100.5, 1000.0, "bulk_import");
        c.validated = false;
        store.candles.upsert_range(vec![c], true).await.unwrap();

        let revalidator = Revalidator::new(store.clone(), Validator::default());
        let summary = revalidator.run(None, None, 100, AssetClass::Stock, true).await.unwrap();
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.validated, 1);

        let still_unvalidated = store.candles.unvalidated(None, None, 100).await.unwrap();
        assert_eq!(still_unvalidated.len(), 1);
        assert!(!still_unvalidated[0].validated);
    }

    #[tokio::test]
    async fn revalidation_commit_persists_updates() {
        use crate::store::Store;

        let store = Store::open(":memory:").unwrap();
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut c = crate::domain::Candle::unvalidated("AAPL", Timeframe::D1, t, 100.0, 101.0, 99.0, 100.5, 1000.0, "bulk_import");
        c.validated = false;
        store.candles.upsert_range(vec![c], true).await.unwrap();

        let revalidator = Revalidator::new(store.clone(), Validator::default());
        revalidator.run(None, None, 100, AssetClass::Stock, false).await.unwrap();

        let still_unvalidated = store.candles.unvalidated(None, None, 100).await.unwrap();
        assert!(still_unvalidated.is_empty());
    }

    /// A scan with no `--symbol` filter mixes an equity's ordinary volume
    /// with a crypto pair's much larger volume, and the crypto pair's last
    /// candle sorts immediately before an unrelated series. Both the median
    /// baseline and the `prev` chain must stay scoped to their own
    /// `(symbol, timeframe)` series.
    #[tokio::test]
    async fn revalidation_scopes_median_and_prev_chain_per_series() {
        use crate::store::Store;

        let store = Store::open(":memory:").unwrap();
        store.symbols.add("AAPL", AssetClass::Stock, vec![Timeframe::D1]).await.unwrap();
        store.symbols.add("BTC", AssetClass::Crypto, vec![Timeframe::D1]).await.unwrap();

        let aapl_t1 = Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap();
        let aapl_t2 = Utc.with_ymd_and_hms(2025, 1, 7, 0, 0, 0).unwrap();
        let btc_t1 = Utc.with_ymd_and_hms(2025, 1, 8, 0, 0, 0).unwrap();
        let btc_t2 = Utc.with_ymd_and_hms(2025, 1, 9, 0, 0, 0).unwrap();

        let candles = vec![
            crate::domain::Candle::unvalidated("AAPL", Timeframe::D1, aapl_t1, 100.0, 101.0, 99.0, 100.3, 1000.0, "bulk_import"),
            crate::domain::Candle::unvalidated("AAPL", Timeframe::D1, aapl_t2, 100.3, 101.0, 99.5, 100.5, 1000.0, "bulk_import"),
            crate::domain::Candle::unvalidated("BTC", Timeframe::D1, btc_t1, 50000.0, 50500.0, 49500.0, 50100.0, 2_000_000.0, "bulk_import"),
            crate::domain::Candle::unvalidated("BTC", Timeframe::D1, btc_t2, 50100.0, 50600.0, 49600.0, 50200.0, 2_000_000.0, "bulk_import"),
        ];
        store.candles.upsert_range(candles, true).await.unwrap();

        let revalidator = Revalidator::new(store.clone(), Validator::default());
        let summary = revalidator.run(None, None, 100, AssetClass::Stock, false).await.unwrap();
        assert_eq!(summary.scanned, 4);

        // A global median over {1000, 1000, 2_000_000, 2_000_000} would flag
        // AAPL's ordinary volume as anomalously low; per-series medians must not.
        let aapl_row = store.candles.fetch_range("AAPL", Timeframe::D1, aapl_t1, aapl_t1, false, 0.0, None).await.unwrap();
        assert!(!aapl_row[0].volume_anomaly, "AAPL volume must be judged against its own series, not BTC's");
        assert_eq!(aapl_row[0].quality_score, 1.0);

        // If `prev` leaked across the symbol boundary, BTC's first candle
        // would see AAPL's ~100.5 close as its predecessor and flag a huge
        // spurious gap; it must instead be scored with no predecessor.
        let btc_row = store.candles.fetch_range("BTC", Timeframe::D1, btc_t1, btc_t1, false, 0.0, None).await.unwrap();
        assert!(!btc_row[0].gap_detected, "BTC's first candle must not inherit AAPL's last candle as its predecessor");
        assert_eq!(btc_row[0].quality_score, 1.0);
    }
}
