use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of bucket sizes this warehouse tracks.
///
/// Each variant maps to a `(multiplier, unit)` pair used when building a
/// vendor request. Kept as a type instead of a bare `&str` so callers can't
/// pass a timeframe outside the closed set past the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
    ];

    /// Default configured set for a newly registered symbol: {1h, 1d}.
    pub const DEFAULT_SET: [Timeframe; 2] = [Timeframe::H1, Timeframe::D1];

    pub fn code(&self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    /// `(multiplier, unit)` pair, e.g. `(5, "m")`, `(1, "w")`.
    pub fn multiplier_unit(&self) -> (u32, &'static str) {
        match self {
            Timeframe::M5 => (5, "m"),
            Timeframe::M15 => (15, "m"),
            Timeframe::M30 => (30, "m"),
            Timeframe::H1 => (1, "h"),
            Timeframe::H4 => (4, "h"),
            Timeframe::D1 => (1, "d"),
            Timeframe::W1 => (1, "w"),
        }
    }

    /// Interval in milliseconds, used by the gap detector and interpolation math.
    pub fn interval_ms(&self) -> i64 {
        match self {
            Timeframe::M5 => 300_000,
            Timeframe::M15 => 900_000,
            Timeframe::M30 => 1_800_000,
            Timeframe::H1 => 3_600_000,
            Timeframe::H4 => 14_400_000,
            Timeframe::D1 => 86_400_000,
            Timeframe::W1 => 604_800_000,
        }
    }

    /// Fixed processing order within a symbol: finer (typically slower)
    /// requests first, so intermittent vendor slowdowns degrade the coarser
    /// timeframes last.
    pub fn worker_order() -> [Timeframe; 7] {
        Self::ALL
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown timeframe code: {0}")]
pub struct UnknownTimeframe(pub String);

impl FromStr for Timeframe {
    type Err = UnknownTimeframe;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            "1w" => Ok(Timeframe::W1),
            other => Err(UnknownTimeframe(other.to_string())),
        }
    }
}

/// Asset class of a tracked symbol. Drives validator thresholds and the
/// expected trading calendar used by the gap detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Stock,
    Crypto,
    Etf,
}

impl AssetClass {
    pub fn is_24_7(&self) -> bool {
        matches!(self, AssetClass::Crypto)
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Stock => write!(f, "stock"),
            AssetClass::Crypto => write!(f, "crypto"),
            AssetClass::Etf => write!(f, "etf"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown asset class: {0}")]
pub struct UnknownAssetClass(pub String);

impl FromStr for AssetClass {
    type Err = UnknownAssetClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stock" => Ok(AssetClass::Stock),
            "crypto" => Ok(AssetClass::Crypto),
            "etf" => Ok(AssetClass::Etf),
            other => Err(UnknownAssetClass(other.to_string())),
        }
    }
}

/// One OHLCV observation for a `(symbol, timeframe, time)`.
///
/// Absence of an optional vendor field (`vwap`, `trade_count`) is
/// represented by `None`, never a sentinel value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
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
    pub validation_notes: String,
    pub gap_detected: bool,
    pub volume_anomaly: bool,
    pub created_at: DateTime<Utc>,
}

impl Candle {
    /// A freshly fetched, not-yet-scored candle. `quality_score` starts at
    /// 1.0 and `validated` at false until the Validator runs.
    pub fn unvalidated(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            time,
            open,
            high,
            low,
            close,
            volume,
            vwap: None,
            trade_count: None,
            source: source.into(),
            quality_score: 1.0,
            validated: false,
            validation_notes: String::new(),
            gap_detected: false,
            volume_anomaly: false,
            created_at: Utc::now(),
        }
    }

    /// `high >= max(open, close)`, `low <= min(open, close)`, `high >= low`,
    /// all prices positive, volume non-negative. Checked independently of
    /// `validated` so callers can probe before trusting it.
    pub fn satisfies_ohlcv_constraints(&self) -> bool {
        self.open > 0.0
            && self.high > 0.0
            && self.low > 0.0
            && self.close > 0.0
            && self.volume >= 0.0
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.high >= self.low
    }
}

/// Unique key for a candle row: `(symbol, timeframe, time)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub time: DateTime<Utc>,
}
