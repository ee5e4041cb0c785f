/// Data access layer: a thin layer over `rusqlite` that returns plain structs
/// and accepts parameterized queries. One physical connection behind a mutex
/// stands in for a connection pool — SQLite serializes writers internally
/// regardless, so this keeps the same short-lived-transaction discipline
/// without a pooling crate.
pub mod candle_store;
pub mod job_store;
pub mod schema;
pub mod symbol_registry;

pub use candle_store::{CandleStore, CandleValidationUpdate, SymbolStats};
pub use job_store::JobStore;
pub use symbol_registry::SymbolRegistry;

use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("background task join error: {0}")]
    Join(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("invalid input: {0}")]
    Invalid(String),
}

pub(crate) type SharedConn = Arc<Mutex<Connection>>;

/// Runs a blocking `rusqlite` closure on the blocking thread pool, the same
/// `spawn_blocking` boundary `vendor::binance` uses for the synchronous
/// `binance` crate — here because `rusqlite::Connection` is `!Send` across
/// `.await` points without it.
pub(crate) async fn run_blocking<F, T>(conn: SharedConn, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    })
    .await
    .map_err(|e| StoreError::Join(e.to_string()))?
}

/// Owns the single connection and hands out cheap, clonable handles onto it.
#[derive(Clone)]
pub struct Store {
    pub candles: CandleStore,
    pub symbols: SymbolRegistry,
    pub jobs: JobStore,
}

impl Store {
    pub fn open(database_url: &str) -> Result<Self, StoreError> {
        let conn = if database_url == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(database_url)?
        };
        schema::apply(&conn)?;

        let conn = Arc::new(Mutex::new(conn));
        Ok(Self {
            candles: CandleStore::new(conn.clone()),
            symbols: SymbolRegistry::new(conn.clone()),
            jobs: JobStore::new(conn),
        })
    }
}
