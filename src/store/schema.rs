/// Schema migrations, applied in lexical order at startup. Each statement is
/// `IF NOT EXISTS` so re-running against an already-migrated database is a
/// no-op.
use rusqlite::Connection;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_candles",
        "CREATE TABLE IF NOT EXISTS candles (
            symbol TEXT NOT NULL,
            timeframe TEXT NOT NULL,
            time TEXT NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume REAL NOT NULL,
            vwap REAL,
            trade_count INTEGER,
            source TEXT NOT NULL,
            quality_score REAL NOT NULL,
            validated INTEGER NOT NULL,
            validation_notes TEXT NOT NULL DEFAULT '',
            gap_detected INTEGER NOT NULL DEFAULT 0,
            volume_anomaly INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (symbol, timeframe, time)
        )",
    ),
    (
        "0002_candles_indexes",
        "CREATE INDEX IF NOT EXISTS idx_candles_symbol_timeframe_time
            ON candles (symbol, timeframe, time DESC);
         CREATE INDEX IF NOT EXISTS idx_candles_validated ON candles (validated)",
    ),
    (
        "0003_symbols",
        "CREATE TABLE IF NOT EXISTS symbols (
            symbol TEXT PRIMARY KEY,
            asset_class TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            timeframes TEXT NOT NULL,
            date_added TEXT NOT NULL,
            last_backfill TEXT,
            backfill_status TEXT NOT NULL,
            backfill_error TEXT
        )",
    ),
    (
        "0004_backfill_jobs",
        "CREATE TABLE IF NOT EXISTS backfill_jobs (
            id TEXT PRIMARY KEY,
            symbols TEXT NOT NULL,
            timeframes TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            status TEXT NOT NULL,
            progress_pct INTEGER NOT NULL DEFAULT 0,
            symbols_completed INTEGER NOT NULL DEFAULT 0,
            symbols_total INTEGER NOT NULL,
            current_symbol TEXT,
            current_timeframe TEXT,
            total_records_fetched INTEGER NOT NULL DEFAULT 0,
            total_records_inserted INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )",
    ),
    (
        "0005_backfill_job_progress",
        "CREATE TABLE IF NOT EXISTS backfill_job_progress (
            job_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            timeframe TEXT NOT NULL,
            status TEXT NOT NULL,
            records_fetched INTEGER NOT NULL DEFAULT 0,
            records_inserted INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            started_at TEXT,
            completed_at TEXT,
            duration_seconds REAL,
            PRIMARY KEY (job_id, symbol, timeframe)
        );
         CREATE INDEX IF NOT EXISTS idx_progress_job ON backfill_job_progress (job_id)",
    ),
    (
        "0006_scheduler_execution_log",
        "CREATE TABLE IF NOT EXISTS scheduler_execution_log (
            execution_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            symbols_succeeded INTEGER NOT NULL DEFAULT 0,
            symbols_failed INTEGER NOT NULL DEFAULT 0,
            total_records_processed INTEGER NOT NULL DEFAULT 0,
            duration_seconds REAL,
            status TEXT NOT NULL,
            error_message TEXT
        )",
    ),
];

pub fn apply(conn: &Connection) -> rusqlite::Result<()> {
    let mut ids: Vec<&str> = MIGRATIONS.iter().map(|(id, _)| *id).collect();
    ids.sort_unstable();
    debug_assert_eq!(ids, MIGRATIONS.iter().map(|(id, _)| *id).collect::<Vec<_>>(), "migrations must be listed in lexical order");

    for (_, sql) in MIGRATIONS {
        conn.execute_batch(sql)?;
    }
    Ok(())
}
