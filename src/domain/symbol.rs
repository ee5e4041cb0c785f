use super::candle::{AssetClass, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a symbol's most recent backfill attempt, tracked by
/// the Registry but driven by the Worker/Scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A tracked instrument. Soft-deleted via `active`; historical candles stay
/// in place after deactivation rather than being purged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub active: bool,
    pub timeframes: Vec<Timeframe>,
    pub date_added: DateTime<Utc>,
    pub last_backfill: Option<DateTime<Utc>>,
    pub backfill_status: BackfillStatus,
    pub backfill_error: Option<String>,
}

impl Symbol {
    pub fn new(symbol: impl Into<String>, asset_class: AssetClass) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            asset_class,
            active: true,
            timeframes: Timeframe::DEFAULT_SET.to_vec(),
            date_added: Utc::now(),
            last_backfill: None,
            backfill_status: BackfillStatus::Pending,
            backfill_error: None,
        }
    }

    pub fn is_crypto(&self) -> bool {
        self.asset_class == AssetClass::Crypto
    }
}
