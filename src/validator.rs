/// Validator: a pure per-candle scoring function plus a
/// sequence-aware scorer that derives a median volume baseline from its
/// input window. Asset-class awareness exists because a one-size rule
/// mis-flags thousands of legitimate 24/7 low-volume crypto intervals as
/// "possible delisting", contaminating the validation rate.
use crate::domain::{AssetClass, Candle};
use chrono::Weekday;
use chrono::Datelike;

/// Fraction-of-price move considered "extreme" (500%).
const EXTREME_MOVE_RATIO: f64 = 5.0;
const EXTREME_MOVE_PENALTY: f64 = 0.3;
const CONSTRAINT_VIOLATION_PENALTY: f64 = 0.5;
const GAP_PENALTY: f64 = 0.2;
const VOLUME_HIGH_PENALTY: f64 = 0.15;
const VOLUME_LOW_PENALTY: f64 = 0.10;
const VOLUME_HIGH_MULTIPLE: f64 = 10.0;

pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.85;
pub const MIN_QUALITY_THRESHOLD: f64 = 0.80;

fn gap_threshold(asset_class: AssetClass) -> f64 {
    match asset_class {
        AssetClass::Crypto => 0.30,
        AssetClass::Stock => 0.15,
        AssetClass::Etf => 0.12,
    }
}

fn volume_low_ratio(asset_class: AssetClass) -> f64 {
    match asset_class {
        AssetClass::Crypto => 0.001,
        AssetClass::Stock => 0.20,
        AssetClass::Etf => 0.15,
    }
}

#[derive(Clone)]
pub struct Validator {
    pub quality_threshold: f64,
}

impl Default for Validator {
    fn default() -> Self {
        Self { quality_threshold: DEFAULT_QUALITY_THRESHOLD }
    }
}

impl Validator {
    pub fn with_threshold(threshold: f64) -> Self {
        Self { quality_threshold: threshold.clamp(MIN_QUALITY_THRESHOLD, 1.0) }
    }

    /// Scores one candle against its predecessor and a median volume
    /// baseline, returning an updated clone (never mutates in place, so the
    /// caller's copy stays the "as fetched" record until it chooses to
    /// replace it).
    pub fn score_candle(
        &self,
        prev_candle: Option<&Candle>,
        candle: &Candle,
        asset_class: AssetClass,
        median_volume: f64,
    ) -> Candle {
        let mut scored = candle.clone();
        let mut quality_score = 1.0_f64;
        let mut notes: Vec<&'static str> = Vec::new();
        let mut gap_detected = false;
        let mut volume_anomaly = false;

        if !candle.satisfies_ohlcv_constraints() {
            quality_score -= CONSTRAINT_VIOLATION_PENALTY;
            notes.push("constraint_violation");
        }

        if candle.open > 0.0 {
            let move_ratio = (candle.close - candle.open).abs() / candle.open;
            if move_ratio >= EXTREME_MOVE_RATIO {
                quality_score -= EXTREME_MOVE_PENALTY;
                notes.push("extreme_move");
            }
        }

        if let Some(prev) = prev_candle {
            if prev.close > 0.0 {
                let gap_ratio = (candle.open - prev.close).abs() / prev.close;
                let mut threshold = gap_threshold(asset_class);

                // Monday-open exception: a post-weekend equity gap is
                // tolerated up to the (looser) stock threshold even for ETFs.
                if asset_class != AssetClass::Crypto && candle.time.weekday() == Weekday::Mon {
                    threshold = threshold.max(gap_threshold(AssetClass::Stock));
                }

                if gap_ratio > threshold {
                    quality_score -= GAP_PENALTY;
                    gap_detected = true;
                    notes.push("gap_detected");
                }
            }
        }

        if median_volume > 0.0 {
            if candle.volume > VOLUME_HIGH_MULTIPLE * median_volume {
                quality_score -= VOLUME_HIGH_PENALTY;
                volume_anomaly = true;
                notes.push("volume_high");
            } else if candle.volume < volume_low_ratio(asset_class) * median_volume {
                quality_score -= VOLUME_LOW_PENALTY;
                volume_anomaly = true;
                notes.push("volume_low");
            }
        }

        quality_score = quality_score.clamp(0.0, 1.0);

        scored.quality_score = quality_score;
        scored.validated = quality_score >= self.quality_threshold;
        scored.validation_notes = notes.join(",");
        scored.gap_detected = gap_detected;
        scored.volume_anomaly = volume_anomaly;
        scored
    }

    /// Scores a whole sequence, deriving `median_volume` from the window
    /// itself and carrying `prev_candle` forward in time order.
    pub fn score_range(&self, mut candles: Vec<Candle>, asset_class: AssetClass) -> Vec<Candle> {
        candles.sort_by_key(|c| c.time);
        let median_volume = median(candles.iter().map(|c| c.volume).collect());

        let mut out = Vec::with_capacity(candles.len());
        let mut prev: Option<Candle> = None;
        for candle in candles {
            let scored = self.score_candle(prev.as_ref(), &candle, asset_class, median_volume);
            prev = Some(scored.clone());
            out.push(scored);
        }
        out
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
