/// Backfill Job Store plus the Scheduler's execution log: both are
/// job-lifecycle bookkeeping over the same connection, so they share one
/// store rather than each owning a separate handle.
use super::{SharedConn, StoreError, run_blocking};
use crate::domain::{BackfillJob, BackfillJobProgress, JobStatus, SchedulerExecutionLog, Timeframe, UnitStatus};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobStore {
    conn: SharedConn,
}

impl JobStore {
    pub(crate) fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// Creates the job row plus one `pending` progress row per
    /// (symbol, timeframe) pair, so `total_units = |symbols| * |timeframes|`
    /// from the start. Transactional.
    pub async fn create_job(
        &self,
        symbols: Vec<String>,
        timeframes: Vec<Timeframe>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        if symbols.is_empty() {
            return Err(StoreError::Invalid("symbols must be non-empty".into()));
        }
        if start_date >= end_date {
            return Err(StoreError::Invalid("start_date must be strictly before end_date".into()));
        }

        run_blocking(self.conn.clone(), move |conn| {
            let job_id = Uuid::new_v4();
            let now = Utc::now();
            let symbols_total = symbols.len() as u32;

            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO backfill_jobs
                    (id, symbols, timeframes, start_date, end_date, status, progress_pct,
                     symbols_completed, symbols_total, current_symbol, current_timeframe,
                     total_records_fetched, total_records_inserted, error_message, created_at, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'queued', 0, 0, ?6, NULL, NULL, 0, 0, NULL, ?7, NULL, NULL)",
                params![
                    job_id,
                    serde_json::to_string(&symbols).unwrap(),
                    serde_json::to_string(&timeframes.iter().map(|t| t.code()).collect::<Vec<_>>()).unwrap(),
                    start_date,
                    end_date,
                    symbols_total,
                    now,
                ],
            )?;

            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO backfill_job_progress (job_id, symbol, timeframe, status, records_fetched, records_inserted)
                     VALUES (?1, ?2, ?3, 'pending', 0, 0)",
                )?;
                for symbol in &symbols {
                    for timeframe in &timeframes {
                        stmt.execute(params![job_id, symbol, timeframe.code()])?;
                    }
                }
            }
            tx.commit()?;
            Ok(job_id)
        })
        .await
    }

    pub async fn start_job(&self, job_id: Uuid) -> Result<(), StoreError> {
        run_blocking(self.conn.clone(), move |conn| {
            let now = Utc::now();
            let n = conn.execute(
                "UPDATE backfill_jobs SET status = 'running', started_at = ?2 WHERE id = ?1 AND status = 'queued'",
                params![job_id, now],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(job_id.to_string()));
            }
            Ok(())
        })
        .await
    }

    /// Transitions the matching unit to completed or failed, recomputes
    /// `progress_pct`, and bumps the job's aggregate counters and
    /// `current_symbol`/`current_timeframe` atomically.
    pub async fn update_progress(
        &self,
        job_id: Uuid,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        fetched: u64,
        inserted: u64,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let symbol = symbol.into();
        run_blocking(self.conn.clone(), move |conn| {
            let now = Utc::now();
            let status = if error.is_some() { "failed" } else { "completed" };

            let tx = conn.unchecked_transaction()?;
            let n = tx.execute(
                "UPDATE backfill_job_progress
                 SET status = ?4, records_fetched = ?5, records_inserted = ?6, error_message = ?7,
                     started_at = COALESCE(started_at, ?8), completed_at = ?8,
                     duration_seconds = CASE WHEN started_at IS NOT NULL
                        THEN (julianday(?8) - julianday(started_at)) * 86400.0 ELSE 0.0 END
                 WHERE job_id = ?1 AND symbol = ?2 AND timeframe = ?3",
                params![job_id, symbol, timeframe.code(), status, fetched, inserted, error, now],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(format!("{job_id}/{symbol}/{}", timeframe.code())));
            }

            let total_units: u32 = tx.query_row(
                "SELECT COUNT(*) FROM backfill_job_progress WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )?;
            let completed_units: u32 = tx.query_row(
                "SELECT COUNT(*) FROM backfill_job_progress WHERE job_id = ?1 AND status IN ('completed', 'failed')",
                params![job_id],
                |row| row.get(0),
            )?;
            let symbols_completed: u32 = tx.query_row(
                "SELECT COUNT(DISTINCT symbol) FROM backfill_job_progress
                 WHERE job_id = ?1 AND symbol NOT IN (
                    SELECT DISTINCT symbol FROM backfill_job_progress WHERE job_id = ?1 AND status NOT IN ('completed', 'failed')
                 )",
                params![job_id],
                |row| row.get(0),
            )?;
            let progress_pct = if total_units > 0 {
                ((completed_units as f64 / total_units as f64) * 100.0).round() as u32
            } else {
                0
            };

            tx.execute(
                "UPDATE backfill_jobs SET
                    progress_pct = ?2,
                    symbols_completed = ?3,
                    current_symbol = ?4,
                    current_timeframe = ?5,
                    total_records_fetched = total_records_fetched + ?6,
                    total_records_inserted = total_records_inserted + ?7
                 WHERE id = ?1",
                params![job_id, progress_pct, symbols_completed, symbol, timeframe.code(), fetched, inserted],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn complete_job(&self, job_id: Uuid) -> Result<(), StoreError> {
        run_blocking(self.conn.clone(), move |conn| {
            let now = Utc::now();
            let n = conn.execute(
                "UPDATE backfill_jobs SET status = 'completed', progress_pct = 100, completed_at = ?2
                 WHERE id = ?1 AND status = 'running'",
                params![job_id, now],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(job_id.to_string()));
            }
            Ok(())
        })
        .await
    }

    pub async fn fail_job(&self, job_id: Uuid, error_message: impl Into<String>) -> Result<(), StoreError> {
        let error_message = error_message.into();
        run_blocking(self.conn.clone(), move |conn| {
            let now = Utc::now();
            let n = conn.execute(
                "UPDATE backfill_jobs SET status = 'failed', completed_at = ?2, error_message = ?3
                 WHERE id = ?1 AND status IN ('queued', 'running')",
                params![job_id, now, error_message],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(job_id.to_string()));
            }
            Ok(())
        })
        .await
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<Option<(BackfillJob, Vec<BackfillJobProgress>)>, StoreError> {
        run_blocking(self.conn.clone(), move |conn| {
            let job = conn
                .query_row(
                    "SELECT id, symbols, timeframes, start_date, end_date, status, progress_pct,
                            symbols_completed, symbols_total, current_symbol, current_timeframe,
                            total_records_fetched, total_records_inserted, error_message, created_at, started_at, completed_at
                     FROM backfill_jobs WHERE id = ?1",
                    params![job_id],
                    row_to_job,
                )
                .optional()?;

            let Some(job) = job else { return Ok(None) };

            let mut stmt = conn.prepare_cached(
                "SELECT job_id, symbol, timeframe, status, records_fetched, records_inserted,
                        error_message, started_at, completed_at, duration_seconds
                 FROM backfill_job_progress WHERE job_id = ?1 ORDER BY symbol, timeframe",
            )?;
            let progress = stmt
                .query_map(params![job_id], row_to_progress)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Some((job, progress)))
        })
        .await
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<BackfillJob>, StoreError> {
        run_blocking(self.conn.clone(), move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, symbols, timeframes, start_date, end_date, status, progress_pct,
                        symbols_completed, symbols_total, current_symbol, current_timeframe,
                        total_records_fetched, total_records_inserted, error_message, created_at, started_at, completed_at
                 FROM backfill_jobs ORDER BY created_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], row_to_job)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn log_execution_start(&self, execution_id: Uuid) -> Result<(), StoreError> {
        run_blocking(self.conn.clone(), move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO scheduler_execution_log
                    (execution_id, started_at, completed_at, symbols_succeeded, symbols_failed,
                     total_records_processed, duration_seconds, status, error_message)
                 VALUES (?1, ?2, NULL, 0, 0, 0, NULL, 'running', NULL)",
                params![execution_id, now],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn log_execution_complete(&self, log: SchedulerExecutionLog) -> Result<(), StoreError> {
        run_blocking(self.conn.clone(), move |conn| {
            conn.execute(
                "UPDATE scheduler_execution_log SET
                    completed_at = ?2, symbols_succeeded = ?3, symbols_failed = ?4,
                    total_records_processed = ?5, duration_seconds = ?6, status = ?7, error_message = ?8
                 WHERE execution_id = ?1",
                params![
                    log.execution_id,
                    log.completed_at,
                    log.symbols_succeeded,
                    log.symbols_failed,
                    log.total_records_processed,
                    log.duration_seconds,
                    log.status,
                    log.error_message,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn recent_executions(&self, limit: u32) -> Result<Vec<SchedulerExecutionLog>, StoreError> {
        run_blocking(self.conn.clone(), move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT execution_id, started_at, completed_at, symbols_succeeded, symbols_failed,
                        total_records_processed, duration_seconds, status, error_message
                 FROM scheduler_execution_log ORDER BY started_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], row_to_execution_log)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

fn row_to_execution_log(row: &Row) -> rusqlite::Result<SchedulerExecutionLog> {
    Ok(SchedulerExecutionLog {
        execution_id: row.get(0)?,
        started_at: row.get(1)?,
        completed_at: row.get(2)?,
        symbols_succeeded: row.get(3)?,
        symbols_failed: row.get(4)?,
        total_records_processed: row.get(5)?,
        duration_seconds: row.get(6)?,
        status: row.get(7)?,
        error_message: row.get(8)?,
    })
}

fn row_to_job(row: &Row) -> rusqlite::Result<BackfillJob> {
    let symbols_raw: String = row.get(1)?;
    let timeframes_raw: String = row.get(2)?;
    let status_raw: String = row.get(5)?;
    let current_timeframe_raw: Option<String> = row.get(10)?;

    let symbols: Vec<String> = serde_json::from_str(&symbols_raw).unwrap_or_default();
    let timeframe_codes: Vec<String> = serde_json::from_str(&timeframes_raw).unwrap_or_default();
    let timeframes = timeframe_codes.iter().filter_map(|c| Timeframe::from_str(c).ok()).collect();

    Ok(BackfillJob {
        id: row.get(0)?,
        symbols,
        timeframes,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        status: parse_job_status(&status_raw),
        progress_pct: row.get::<_, i64>(6)? as u8,
        symbols_completed: row.get::<_, i64>(7)? as u32,
        symbols_total: row.get::<_, i64>(8)? as u32,
        current_symbol: row.get(9)?,
        current_timeframe: current_timeframe_raw.and_then(|c| Timeframe::from_str(&c).ok()),
        total_records_fetched: row.get::<_, i64>(11)? as u64,
        total_records_inserted: row.get::<_, i64>(12)? as u64,
        error_message: row.get(13)?,
        created_at: row.get(14)?,
        started_at: row.get(15)?,
        completed_at: row.get(16)?,
    })
}

fn row_to_progress(row: &Row) -> rusqlite::Result<BackfillJobProgress> {
    let timeframe_raw: String = row.get(2)?;
    let status_raw: String = row.get(3)?;
    let timeframe = Timeframe::from_str(&timeframe_raw)
        .map_err(|_| rusqlite::Error::InvalidColumnType(2, "timeframe".into(), rusqlite::types::Type::Text))?;

    Ok(BackfillJobProgress {
        job_id: row.get(0)?,
        symbol: row.get(1)?,
        timeframe,
        status: parse_unit_status(&status_raw),
        records_fetched: row.get::<_, i64>(4)? as u64,
        records_inserted: row.get::<_, i64>(5)? as u64,
        error_message: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
        duration_seconds: row.get(9)?,
    })
}

fn parse_job_status(s: &str) -> JobStatus {
    match s {
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        _ => JobStatus::Queued,
    }
}

fn parse_unit_status(s: &str) -> UnitStatus {
    match s {
        "running" => UnitStatus::Running,
        "completed" => UnitStatus::Completed,
        "failed" => UnitStatus::Failed,
        _ => UnitStatus::Pending,
    }
}
