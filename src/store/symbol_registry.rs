/// Symbol Registry: owns the `symbols` table. Symbols are always
/// canonicalized to uppercase on write; lookups canonicalize their input so
/// callers never have to remember to do it themselves.
use super::{SharedConn, StoreError, run_blocking};
use crate::domain::{AssetClass, BackfillStatus, Symbol, Timeframe};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use std::str::FromStr;

#[derive(Clone)]
pub struct SymbolRegistry {
    conn: SharedConn,
}

impl SymbolRegistry {
    pub(crate) fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// Fails with `StoreError::Duplicate` if the symbol exists and is
    /// active; if it exists but is inactive, re-activates it in place
    /// without touching its historical candles.
    pub async fn add(&self, symbol: impl Into<String>, asset_class: AssetClass, timeframes: Vec<Timeframe>) -> Result<(), StoreError> {
        let symbol = symbol.into().to_uppercase();
        run_blocking(self.conn.clone(), move |conn| {
            let existing: Option<bool> = conn
                .query_row("SELECT active FROM symbols WHERE symbol = ?1", params![symbol], |row| row.get(0))
                .optional()?;

            match existing {
                Some(true) => Err(StoreError::Duplicate(symbol)),
                Some(false) => {
                    conn.execute(
                        "UPDATE symbols SET active = 1, asset_class = ?2, timeframes = ?3 WHERE symbol = ?1",
                        params![symbol, asset_class.to_string(), join_timeframes(&timeframes)],
                    )?;
                    Ok(())
                }
                None => {
                    let now = Utc::now();
                    conn.execute(
                        "INSERT INTO symbols (symbol, asset_class, active, timeframes, date_added, last_backfill, backfill_status, backfill_error)
                         VALUES (?1, ?2, 1, ?3, ?4, NULL, ?5, NULL)",
                        params![
                            symbol,
                            asset_class.to_string(),
                            join_timeframes(&timeframes),
                            now,
                            backfill_status_code(BackfillStatus::Pending),
                        ],
                    )?;
                    Ok(())
                }
            }
        })
        .await
    }

    pub async fn set_active(&self, symbol: impl Into<String>, active: bool) -> Result<(), StoreError> {
        let symbol = symbol.into().to_uppercase();
        run_blocking(self.conn.clone(), move |conn| {
            let n = conn.execute("UPDATE symbols SET active = ?2 WHERE symbol = ?1", params![symbol, active])?;
            if n == 0 {
                return Err(StoreError::NotFound(symbol));
            }
            Ok(())
        })
        .await
    }

    pub async fn update_timeframes(&self, symbol: impl Into<String>, timeframes: Vec<Timeframe>) -> Result<(), StoreError> {
        let symbol = symbol.into().to_uppercase();
        run_blocking(self.conn.clone(), move |conn| {
            let n = conn.execute(
                "UPDATE symbols SET timeframes = ?2 WHERE symbol = ?1",
                params![symbol, join_timeframes(&timeframes)],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(symbol));
            }
            Ok(())
        })
        .await
    }

    pub async fn update_backfill_status(
        &self,
        symbol: impl Into<String>,
        status: BackfillStatus,
        last_backfill: Option<DateTime<Utc>>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let symbol = symbol.into().to_uppercase();
        run_blocking(self.conn.clone(), move |conn| {
            let n = conn.execute(
                "UPDATE symbols SET backfill_status = ?2, last_backfill = ?3, backfill_error = ?4 WHERE symbol = ?1",
                params![symbol, backfill_status_code(status), last_backfill, error],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(symbol));
            }
            Ok(())
        })
        .await
    }

    pub async fn list(&self, active_only: bool, asset_class_filter: Option<AssetClass>) -> Result<Vec<Symbol>, StoreError> {
        run_blocking(self.conn.clone(), move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT symbol, asset_class, active, timeframes, date_added, last_backfill, backfill_status, backfill_error
                 FROM symbols
                 WHERE (?1 = 0 OR active = 1) AND (?2 IS NULL OR asset_class = ?2)
                 ORDER BY symbol ASC",
            )?;
            let rows = stmt
                .query_map(params![active_only, asset_class_filter.map(|a| a.to_string())], row_to_symbol)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn get(&self, symbol: impl Into<String>) -> Result<Option<Symbol>, StoreError> {
        let symbol = symbol.into().to_uppercase();
        run_blocking(self.conn.clone(), move |conn| {
            conn.query_row(
                "SELECT symbol, asset_class, active, timeframes, date_added, last_backfill, backfill_status, backfill_error
                 FROM symbols WHERE symbol = ?1",
                params![symbol],
                row_to_symbol,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }
}

fn join_timeframes(timeframes: &[Timeframe]) -> String {
    timeframes.iter().map(|t| t.code()).collect::<Vec<_>>().join(",")
}

fn backfill_status_code(status: BackfillStatus) -> &'static str {
    match status {
        BackfillStatus::Pending => "pending",
        BackfillStatus::InProgress => "in_progress",
        BackfillStatus::Completed => "completed",
        BackfillStatus::Failed => "failed",
    }
}

fn parse_backfill_status(s: &str) -> BackfillStatus {
    match s {
        "in_progress" => BackfillStatus::InProgress,
        "completed" => BackfillStatus::Completed,
        "failed" => BackfillStatus::Failed,
        _ => BackfillStatus::Pending,
    }
}

fn row_to_symbol(row: &Row) -> rusqlite::Result<Symbol> {
    let asset_class_raw: String = row.get(1)?;
    let asset_class = AssetClass::from_str(&asset_class_raw)
        .map_err(|_| rusqlite::Error::InvalidColumnType(1, "asset_class".into(), rusqlite::types::Type::Text))?;
    let timeframes_raw: String = row.get(3)?;
    let timeframes = timeframes_raw.split(',').filter(|s| !s.is_empty()).filter_map(|s| Timeframe::from_str(s).ok()).collect();
    let backfill_status_raw: String = row.get(6)?;

    Ok(Symbol {
        symbol: row.get(0)?,
        asset_class,
        active: row.get(2)?,
        timeframes,
        date_added: row.get(4)?,
        last_backfill: row.get(5)?,
        backfill_status: parse_backfill_status(&backfill_status_raw),
        backfill_error: row.get(7)?,
    })
}
