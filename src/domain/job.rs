use super::candle::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job-level lifecycle. A job never re-enters `Queued` once it leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Per-unit lifecycle, independent of the owning job's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One user- or scheduler-initiated ingestion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillJob {
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
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BackfillJob {
    pub fn total_units(&self) -> u32 {
        self.symbols.len() as u32 * self.timeframes.len() as u32
    }
}

/// Per-`(job, symbol, timeframe)` unit of work. Uniqueness on
/// `(job_id, symbol, timeframe)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillJobProgress {
    pub job_id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub status: UnitStatus,
    pub records_fetched: u64,
    pub records_inserted: u64,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}
