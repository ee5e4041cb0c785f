/// Wire-level request/response shapes for the HTTP API. Kept separate from
/// the domain types so a vendor or storage format change never ripples into
/// the JSON contract.
use crate::domain::{AssetClass, BackfillJob, BackfillJobProgress, Candle, JobStatus, Symbol, Timeframe, UnitStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub scheduler_running: bool,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub symbol_count: usize,
    pub total_records: u64,
    pub validated_count: u64,
    pub validation_rate: f64,
    pub latest_data_timestamp: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct SymbolDto {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub active: bool,
    pub timeframes: Vec<Timeframe>,
    pub backfill_status: crate::domain::BackfillStatus,
}

impl From<Symbol> for SymbolDto {
    fn from(s: Symbol) -> Self {
        Self { symbol: s.symbol, asset_class: s.asset_class, active: s.active, timeframes: s.timeframes, backfill_status: s.backfill_status }
    }
}

#[derive(Serialize)]
pub struct SymbolDetailedDto {
    #[serde(flatten)]
    pub symbol: SymbolDto,
    pub record_count: u64,
    pub validation_rate: f64,
    pub latest_timestamp: Option<DateTime<Utc>>,
    pub data_age_seconds: Option<i64>,
}

#[derive(Deserialize)]
pub struct HistoricalQuery {
    pub timeframe: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub validated_only: Option<bool>,
    pub min_quality: Option<f64>,
    pub limit: Option<u32>,
}

#[derive(Serialize)]
pub struct CandleDto {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: Option<f64>,
    pub trade_count: Option<i64>,
    pub source: String,
    pub quality_score: f64,
    pub validated: bool,
}

impl From<Candle> for CandleDto {
    fn from(c: Candle) -> Self {
        Self {
            time: c.time,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            vwap: c.vwap,
            trade_count: c.trade_count,
            source: c.source,
            quality_score: c.quality_score,
            validated: c.validated,
        }
    }
}

pub const MAX_BACKFILL_SYMBOLS: usize = 100;

#[derive(Deserialize)]
pub struct BackfillRequest {
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timeframes: Vec<String>,
}

#[derive(Serialize)]
pub struct BackfillAcceptedResponse {
    pub job_id: Uuid,
    pub status: &'static str,
    pub symbols_count: usize,
    pub date_range: (NaiveDate, NaiveDate),
    pub timeframes: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct BackfillJobDto {
    pub id: Uuid,
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: JobStatus,
    pub progress_pct: u8,
    pub symbols_completed: u32,
    pub symbols_total: u32,
    pub current_symbol: Option<String>,
    pub current_timeframe: Option<Timeframe>,
    pub total_records_fetched: u64,
    pub total_records_inserted: u64,
    pub error_message: Option<String>,
}

impl From<BackfillJob> for BackfillJobDto {
    fn from(j: BackfillJob) -> Self {
        Self {
            id: j.id,
            symbols: j.symbols,
            timeframes: j.timeframes,
            start_date: j.start_date,
            end_date: j.end_date,
            status: j.status,
            progress_pct: j.progress_pct,
            symbols_completed: j.symbols_completed,
            symbols_total: j.symbols_total,
            current_symbol: j.current_symbol,
            current_timeframe: j.current_timeframe,
            total_records_fetched: j.total_records_fetched,
            total_records_inserted: j.total_records_inserted,
            error_message: j.error_message,
        }
    }
}

#[derive(Serialize)]
pub struct BackfillUnitDto {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub status: UnitStatus,
    pub records_fetched: u64,
    pub records_inserted: u64,
    pub error_message: Option<String>,
}

impl From<BackfillJobProgress> for BackfillUnitDto {
    fn from(p: BackfillJobProgress) -> Self {
        Self { symbol: p.symbol, timeframe: p.timeframe, status: p.status, records_fetched: p.records_fetched, records_inserted: p.records_inserted, error_message: p.error_message }
    }
}

#[derive(Serialize)]
pub struct BackfillStatusResponse {
    #[serde(flatten)]
    pub job: BackfillJobDto,
    pub units: Vec<BackfillUnitDto>,
}

#[derive(Deserialize)]
pub struct RecentQuery {
    pub limit: Option<u32>,
}

pub const MAX_RECENT_LIMIT: u32 = 100;

#[derive(Deserialize)]
pub struct AddSymbolRequest {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub timeframes: Option<Vec<String>>,
}

#[derive(Deserialize)]
pub struct UpdateSymbolRequest {
    pub active: Option<bool>,
    pub timeframes: Option<Vec<String>>,
}
