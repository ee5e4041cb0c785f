/// Candle Store: the sole owner of the `candles` table.
use super::{SharedConn, StoreError, run_blocking};
use crate::domain::{Candle, CandleKey, Timeframe};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use std::str::FromStr;

pub const DEFAULT_FETCH_LIMIT: u32 = 1000;
pub const MAX_FETCH_LIMIT: u32 = 10_000;
pub const DEFAULT_MIN_QUALITY: f64 = 0.85;
pub const DEFAULT_VALIDATION_BATCH: usize = 100;
pub const MAX_VALIDATION_BATCH: usize = 5_000;

#[derive(Debug, Clone)]
pub struct CandleValidationUpdate {
    pub key: CandleKey,
    pub quality_score: f64,
    pub validated: bool,
    pub notes: String,
    pub gap_detected: bool,
    pub volume_anomaly: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SymbolStats {
    pub symbol: String,
    pub record_count: u64,
    pub validation_rate: f64,
    pub latest_timestamp: Option<DateTime<Utc>>,
    pub configured_timeframes: Vec<Timeframe>,
    pub data_age_seconds: Option<i64>,
}

#[derive(Clone)]
pub struct CandleStore {
    conn: SharedConn,
}

impl CandleStore {
    pub(crate) fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// Idempotent on `(symbol, timeframe, time)`. When `overwrite_source` is
    /// false, a re-written row keeps its previously recorded `source` rather
    /// than the caller's. Atomic: the whole batch commits or none of it does.
    pub async fn upsert_range(&self, candles: Vec<Candle>, overwrite_source: bool) -> Result<usize, StoreError> {
        run_blocking(self.conn.clone(), move |conn| {
            let mut count = 0usize;
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO candles
                        (symbol, timeframe, time, open, high, low, close, volume, vwap, trade_count,
                         source, quality_score, validated, validation_notes, gap_detected, volume_anomaly, created_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)
                     ON CONFLICT(symbol, timeframe, time) DO UPDATE SET
                        open = excluded.open,
                        high = excluded.high,
                        low = excluded.low,
                        close = excluded.close,
                        volume = excluded.volume,
                        vwap = excluded.vwap,
                        trade_count = excluded.trade_count,
                        source = CASE WHEN ?18 THEN excluded.source ELSE candles.source END,
                        quality_score = excluded.quality_score,
                        validated = excluded.validated,
                        validation_notes = excluded.validation_notes,
                        gap_detected = excluded.gap_detected,
                        volume_anomaly = excluded.volume_anomaly",
                )?;

                for candle in &candles {
                    stmt.execute(params![
                        candle.symbol,
                        candle.timeframe.code(),
                        candle.time,
                        candle.open,
                        candle.high,
                        candle.low,
                        candle.close,
                        candle.volume,
                        candle.vwap,
                        candle.trade_count,
                        candle.source,
                        candle.quality_score,
                        candle.validated,
                        candle.validation_notes,
                        candle.gap_detected,
                        candle.volume_anomaly,
                        candle.created_at,
                        overwrite_source,
                    ])?;
                    count += 1;
                }
            }
            tx.commit()?;
            Ok(count)
        })
        .await
    }

    /// Ascending by `time`. `limit` defaults to 1000 and is clamped to 10000.
    pub async fn fetch_range(
        &self,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        validated_only: bool,
        min_quality: f64,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>, StoreError> {
        let symbol = symbol.into();
        let limit = limit.unwrap_or(DEFAULT_FETCH_LIMIT).min(MAX_FETCH_LIMIT);

        run_blocking(self.conn.clone(), move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT symbol, timeframe, time, open, high, low, close, volume, vwap, trade_count,
                        source, quality_score, validated, validation_notes, gap_detected, volume_anomaly, created_at
                 FROM candles
                 WHERE symbol = ?1 AND timeframe = ?2 AND time >= ?3 AND time <= ?4
                   AND (?5 = 0 OR validated = 1)
                   AND quality_score >= ?6
                 ORDER BY time ASC
                 LIMIT ?7",
            )?;

            let rows = stmt
                .query_map(
                    params![symbol, timeframe.code(), start, end, validated_only, min_quality, limit],
                    row_to_candle,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn latest(&self, symbol: impl Into<String>, timeframe: Timeframe) -> Result<Option<Candle>, StoreError> {
        let symbol = symbol.into();
        run_blocking(self.conn.clone(), move |conn| {
            conn.query_row(
                "SELECT symbol, timeframe, time, open, high, low, close, volume, vwap, trade_count,
                        source, quality_score, validated, validation_notes, gap_detected, volume_anomaly, created_at
                 FROM candles
                 WHERE symbol = ?1 AND timeframe = ?2
                 ORDER BY time DESC
                 LIMIT 1",
                params![symbol, timeframe.code()],
                row_to_candle,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    /// Per-symbol aggregate, joined with the Registry's configured timeframes.
    pub async fn symbol_stats(&self) -> Result<Vec<SymbolStats>, StoreError> {
        run_blocking(self.conn.clone(), |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT s.symbol, s.timeframes,
                        COUNT(c.time) as record_count,
                        COALESCE(SUM(CASE WHEN c.validated THEN 1 ELSE 0 END), 0) as validated_count,
                        MAX(c.time) as latest_timestamp
                 FROM symbols s
                 LEFT JOIN candles c ON c.symbol = s.symbol
                 GROUP BY s.symbol",
            )?;

            let now = Utc::now();
            let rows = stmt
                .query_map([], |row| {
                    let symbol: String = row.get(0)?;
                    let timeframes_raw: String = row.get(1)?;
                    let record_count: u64 = row.get::<_, i64>(2)? as u64;
                    let validated_count: u64 = row.get::<_, i64>(3)? as u64;
                    let latest_timestamp: Option<DateTime<Utc>> = row.get(4)?;

                    let validation_rate = if record_count > 0 {
                        validated_count as f64 / record_count as f64
                    } else {
                        0.0
                    };
                    let configured_timeframes = timeframes_raw
                        .split(',')
                        .filter(|s| !s.is_empty())
                        .filter_map(|s| Timeframe::from_str(s).ok())
                        .collect();
                    let data_age_seconds = latest_timestamp.map(|t| (now - t).num_seconds());

                    Ok(SymbolStats {
                        symbol,
                        record_count,
                        validation_rate,
                        latest_timestamp,
                        configured_timeframes,
                        data_age_seconds,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Batch variant; chunked at `DEFAULT_VALIDATION_BATCH` rows per
    /// round-trip unless the caller raises it (capped at
    /// `MAX_VALIDATION_BATCH`).
    pub async fn update_validation(
        &self,
        updates: Vec<CandleValidationUpdate>,
        batch_size: Option<usize>,
    ) -> Result<usize, StoreError> {
        let batch_size = batch_size.unwrap_or(DEFAULT_VALIDATION_BATCH).min(MAX_VALIDATION_BATCH).max(1);

        run_blocking(self.conn.clone(), move |conn| {
            let mut total = 0usize;
            for chunk in updates.chunks(batch_size) {
                let tx = conn.unchecked_transaction()?;
                {
                    let mut stmt = tx.prepare_cached(
                        "UPDATE candles SET quality_score = ?1, validated = ?2, validation_notes = ?3,
                            gap_detected = ?4, volume_anomaly = ?5
                         WHERE symbol = ?6 AND timeframe = ?7 AND time = ?8",
                    )?;
                    for update in chunk {
                        let n = stmt.execute(params![
                            update.quality_score,
                            update.validated,
                            update.notes,
                            update.gap_detected,
                            update.volume_anomaly,
                            update.key.symbol,
                            update.key.timeframe.code(),
                            update.key.time,
                        ])?;
                        total += n;
                    }
                }
                tx.commit()?;
            }
            Ok(total)
        })
        .await
    }

    /// Distinct calendar dates with at least one row, used by the gap
    /// detector to diff against the expected trading calendar.
    pub async fn distinct_dates(
        &self,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let symbol = symbol.into();
        run_blocking(self.conn.clone(), move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT time FROM candles
                 WHERE symbol = ?1 AND timeframe = ?2 AND time >= ?3 AND time <= ?4
                 ORDER BY time ASC",
            )?;
            let rows = stmt
                .query_map(params![symbol, timeframe.code(), start, end], |row| row.get::<_, DateTime<Utc>>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn unvalidated(&self, symbol: Option<String>, timeframe: Option<Timeframe>, limit: u32) -> Result<Vec<Candle>, StoreError> {
        run_blocking(self.conn.clone(), move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT symbol, timeframe, time, open, high, low, close, volume, vwap, trade_count,
                        source, quality_score, validated, validation_notes, gap_detected, volume_anomaly, created_at
                 FROM candles
                 WHERE validated = 0
                   AND (?1 IS NULL OR symbol = ?1)
                   AND (?2 IS NULL OR timeframe = ?2)
                 ORDER BY symbol, timeframe, time ASC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![symbol, timeframe.map(|t| t.code()), limit], row_to_candle)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

fn row_to_candle(row: &Row) -> rusqlite::Result<Candle> {
    let timeframe_code: String = row.get(1)?;
    let timeframe = Timeframe::from_str(&timeframe_code)
        .map_err(|_| rusqlite::Error::InvalidColumnType(1, "timeframe".into(), rusqlite::types::Type::Text))?;

    Ok(Candle {
        symbol: row.get(0)?,
        timeframe,
        time: row.get(2)?,
        open: row.get(3)?,
        high: row.get(4)?,
        low: row.get(5)?,
        close: row.get(6)?,
        volume: row.get(7)?,
        vwap: row.get(8)?,
        trade_count: row.get(9)?,
        source: row.get(10)?,
        quality_score: row.get(11)?,
        validated: row.get(12)?,
        validation_notes: row.get(13)?,
        gap_detected: row.get(14)?,
        volume_anomaly: row.get(15)?,
        created_at: row.get(16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use chrono::TimeZone;

    fn candle(symbol: &str, tf: Timeframe, t: DateTime<Utc>, close: f64) -> Candle {
        Candle::unvalidated(symbol, tf, t, close - 0.5, close + 1.0, close - 1.0, close, 1000.0, "test")
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_primary_key() {
        let store = Store::open(":memory:").unwrap();
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let c = candle("AAPL", Timeframe::D1, t, 100.0);

        let first = store.candles.upsert_range(vec![c.clone()], true).await.unwrap();
        let second = store.candles.upsert_range(vec![c], true).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 1);

        let rows = store
            .candles
            .fetch_range("AAPL", Timeframe::D1, t, t, false, 0.0, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn upsert_preserves_source_when_not_overwriting() {
        let store = Store::open(":memory:").unwrap();
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut original = candle("AAPL", Timeframe::D1, t, 100.0);
        original.source = "primary".to_string();
        store.candles.upsert_range(vec![original], true).await.unwrap();

        let mut repeat = candle("AAPL", Timeframe::D1, t, 101.0);
        repeat.source = "secondary".to_string();
        store.candles.upsert_range(vec![repeat], false).await.unwrap();

        let rows = store
            .candles
            .fetch_range("AAPL", Timeframe::D1, t, t, false, 0.0, None)
            .await
            .unwrap();
        assert_eq!(rows[0].source, "primary");
        assert_eq!(rows[0].close, 101.0);
    }

    #[tokio::test]
    async fn fetch_range_filters_on_validated_and_quality() {
        let store = Store::open(":memory:").unwrap();
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut low_quality = candle("AAPL", Timeframe::D1, t, 100.0);
        low_quality.validated = false;
        low_quality.quality_score = 0.5;
        store.candles.upsert_range(vec![low_quality], true).await.unwrap();

        let validated_only = store
            .candles
            .fetch_range("AAPL", Timeframe::D1, t, t, true, 0.0, None)
            .await
            .unwrap();
        assert!(validated_only.is_empty());

        let all = store
            .candles
            .fetch_range("AAPL", Timeframe::D1, t, t, false, 0.0, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn latest_returns_none_when_empty() {
        let store = Store::open(":memory:").unwrap();
        let latest = store.candles.latest("AAPL", Timeframe::D1).await.unwrap();
        assert!(latest.is_none());
    }
}
