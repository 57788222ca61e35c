//! Time-weighted exposure aggregation
//!
//! Turns an ordered sequence of readings into an [`ExposureSummary`]:
//! energy-weighted average (TWA), exposure dose against a safe-exposure
//! budget, percentile statistics, compliance flags, and trend direction.
//!
//! dB is a log scale, so the TWA is computed from linear power
//! (`10^(dB/10)`), never from an arithmetic mean of dB values. Degenerate
//! inputs (fewer than two readings, zero elapsed time) report insufficient
//! data explicitly rather than a spurious number.

use crate::audio::meter::Reading;
use crate::exposure::classifier::{classify, RiskLevel};
use serde::{Deserialize, Serialize};

/// Safe exposure allowance as (level dB, hours) breakpoints
///
/// Halving rule anchored at OSHA-style reference points. Between
/// breakpoints the allowance of the highest breakpoint at or below the
/// level applies; the function is monotone non-increasing.
const SAFE_EXPOSURE_BREAKPOINTS: [(f64, f64); 6] = [
    (85.0, 8.0),
    (90.0, 4.0),
    (95.0, 2.0),
    (97.0, 1.0),
    (100.0, 0.25),
    (105.0, 1.0 / 60.0),
];

/// Above this level no exposure duration is considered safe
const NO_SAFE_EXPOSURE_DB: f64 = 110.0;

/// OSHA permissible exposure limit for the 8-hour TWA (dB)
const OSHA_TWA_LIMIT_DB: f64 = 90.0;

/// NIOSH recommended exposure limit for the 8-hour TWA (dB)
const NIOSH_TWA_LIMIT_DB: f64 = 85.0;

/// WHO residential guideline against the simple average level (dB)
const WHO_AVERAGE_LIMIT_DB: f64 = 55.0;

/// Minimum samples per window for a trend verdict
const TREND_MIN_WINDOW: usize = 5;

/// Percent change below which the trend reads as stable
const TREND_DEADBAND_PCT: f64 = 5.0;

/// Trend direction across two windows of readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    /// Too few samples for a meaningful verdict; not a forced classification
    InsufficientData,
}

/// Percentile statistics over the session's levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
}

/// Compliance against the three independent regulatory thresholds
///
/// OSHA and NIOSH evaluate the TWA; WHO evaluates the simple average. The
/// asymmetry is intentional and must not be unified into one statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFlags {
    pub osha: bool,
    pub niosh: bool,
    pub who: bool,
}

/// Aggregate over a closed set of readings; immutable after creation
///
/// `None` fields signal insufficient data, an expected and common condition
/// (e.g. the first reading of a session), not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureSummary {
    /// Energy-weighted time-weighted average in dB
    pub twa_db: Option<f64>,
    /// Arithmetic mean of the reading levels in dB
    pub average_db: Option<f64>,
    /// Fraction of the safe-exposure budget consumed, clamped to [0, 1]
    pub dose: Option<f64>,
    pub percentiles: Option<Percentiles>,
    /// True maximum across the reading sequence
    pub peak_db: Option<f64>,
    /// True minimum across the reading sequence
    pub min_db: Option<f64>,
    /// Present only when the TWA is defined
    pub compliance: Option<ComplianceFlags>,
    /// Risk tier of the TWA (falls back to the average, then minimal)
    pub risk: RiskLevel,
    /// Trend across the older and recent halves of the session
    pub trend: Trend,
    /// Elapsed time covered by the readings in milliseconds
    pub duration_ms: i64,
    /// Readings included in the aggregation
    pub sample_count: usize,
    /// Readings excluded as malformed or out of order
    pub excluded_count: u64,
}

/// Accumulates readings for one session and produces the summary
///
/// Malformed readings (non-finite values) and timestamp regressions are
/// excluded from aggregation but counted, never silently dropped.
#[derive(Debug, Default)]
pub struct ExposureAggregator {
    readings: Vec<Reading>,
    excluded_nonfinite: u64,
    excluded_order: u64,
}

impl ExposureAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an aggregator from an existing reading sequence
    pub fn from_readings<I: IntoIterator<Item = Reading>>(readings: I) -> Self {
        let mut aggregator = Self::new();
        for reading in readings {
            aggregator.record(reading);
        }
        aggregator
    }

    /// Record one reading
    ///
    /// Returns false when the reading was excluded (non-finite value or
    /// timestamp regression); the exclusion is counted either way.
    pub fn record(&mut self, reading: Reading) -> bool {
        if !reading.value_db.is_finite() {
            self.excluded_nonfinite += 1;
            tracing::debug!(
                value = reading.value_db,
                excluded = self.excluded_nonfinite,
                "non-finite reading excluded"
            );
            return false;
        }
        if let Some(last) = self.readings.last() {
            if reading.timestamp_ms < last.timestamp_ms {
                self.excluded_order += 1;
                tracing::debug!(
                    timestamp_ms = reading.timestamp_ms,
                    last_ms = last.timestamp_ms,
                    "out-of-order reading excluded"
                );
                return false;
            }
        }
        self.readings.push(reading);
        true
    }

    /// Readings included so far
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Total readings excluded as malformed or out of order
    pub fn excluded_count(&self) -> u64 {
        self.excluded_nonfinite + self.excluded_order
    }

    /// Level values in record order
    pub fn values(&self) -> Vec<f64> {
        self.readings.iter().map(|r| r.value_db).collect()
    }

    /// Consume the aggregator and produce the session summary
    pub fn finalize(self) -> ExposureSummary {
        let values = self.values();
        let twa_db = time_weighted_average(&self.readings);
        let average_db = mean(&values);
        let duration_ms = elapsed_ms(&self.readings);

        let dose = twa_db.map(|twa| dose_fraction(twa, duration_ms as f64 / 3_600_000.0));
        let percentiles = percentile_set(&values);
        let peak_db = values.iter().copied().fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        });
        let min_db = values.iter().copied().fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        });

        let compliance = twa_db.map(|twa| ComplianceFlags {
            osha: twa <= OSHA_TWA_LIMIT_DB,
            niosh: twa <= NIOSH_TWA_LIMIT_DB,
            // WHO evaluates the simple average, not the TWA
            who: average_db.map(|avg| avg <= WHO_AVERAGE_LIMIT_DB).unwrap_or(false),
        });

        let risk = twa_db
            .or(average_db)
            .map(|db| classify(db).risk)
            .unwrap_or(RiskLevel::Minimal);

        let trend = trend_of(&values);

        ExposureSummary {
            twa_db,
            average_db,
            dose,
            percentiles,
            peak_db,
            min_db,
            compliance,
            risk,
            trend,
            duration_ms,
            sample_count: values.len(),
            excluded_count: self.excluded_nonfinite + self.excluded_order,
        }
    }
}

/// Energy-weighted time-weighted average over ordered readings
///
/// For consecutive readings the gap `dt` is weighted by the linear power of
/// the earlier level: `energy += 10^(dB/10) * dt`. Returns `None` when the
/// covered time is zero (fewer than two readings, or all at one timestamp).
pub fn time_weighted_average(readings: &[Reading]) -> Option<f64> {
    let mut energy = 0.0f64;
    let mut total_ms = 0.0f64;

    for pair in readings.windows(2) {
        let dt = (pair[1].timestamp_ms - pair[0].timestamp_ms) as f64;
        energy += 10f64.powf(pair[0].value_db / 10.0) * dt;
        total_ms += dt;
    }

    if total_ms <= 0.0 {
        return None;
    }
    Some(10.0 * (energy / total_ms).log10())
}

/// Safe exposure allowance in hours for a given TWA
///
/// 8 hours at or below 85dB, halving through the breakpoint table, zero
/// above the hard ceiling.
pub fn safe_exposure_hours(twa_db: f64) -> f64 {
    if twa_db >= NO_SAFE_EXPOSURE_DB {
        return 0.0;
    }
    let mut hours = SAFE_EXPOSURE_BREAKPOINTS[0].1;
    for &(level, allowance) in &SAFE_EXPOSURE_BREAKPOINTS {
        if twa_db >= level {
            hours = allowance;
        }
    }
    hours
}

/// Fraction of the safe-exposure budget consumed, clamped to [0, 1]
///
/// Zero safe hours (above the hard ceiling) saturates at the maximum
/// instead of dividing by zero.
pub fn dose_fraction(twa_db: f64, duration_hours: f64) -> f64 {
    let safe = safe_exposure_hours(twa_db);
    if safe <= 0.0 {
        return 1.0;
    }
    (duration_hours / safe).clamp(0.0, 1.0)
}

/// Percentile by linear interpolation between order statistics
///
/// `values` must be sorted ascending. A single-element set returns that
/// value for every percentile.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }
    let p = p.clamp(0.0, 100.0);
    let index = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    let weight = index - lower as f64;
    Some(sorted[lower] * (1.0 - weight) + sorted[upper] * weight)
}

/// Trend over a value sequence: recent half against older half
///
/// Requires at least [`TREND_MIN_WINDOW`] samples per window; percent
/// change within the deadband reads as stable so noise is not flagged as a
/// trend.
pub fn trend_of(values: &[f64]) -> Trend {
    let mid = values.len() / 2;
    trend_between(&values[..mid], &values[mid..])
}

/// Trend between an older and a recent window of values
pub fn trend_between(older: &[f64], recent: &[f64]) -> Trend {
    if older.len() < TREND_MIN_WINDOW || recent.len() < TREND_MIN_WINDOW {
        return Trend::InsufficientData;
    }
    let older_mean = match mean(older) {
        Some(m) if m.abs() > f64::EPSILON => m,
        _ => return Trend::InsufficientData,
    };
    let recent_mean = match mean(recent) {
        Some(m) => m,
        None => return Trend::InsufficientData,
    };

    let change_pct = (recent_mean - older_mean) / older_mean * 100.0;
    if change_pct.abs() < TREND_DEADBAND_PCT {
        Trend::Stable
    } else if change_pct > 0.0 {
        Trend::Increasing
    } else {
        Trend::Decreasing
    }
}

fn percentile_set(values: &[f64]) -> Option<Percentiles> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(Percentiles {
        p10: percentile(&sorted, 10.0)?,
        p50: percentile(&sorted, 50.0)?,
        p90: percentile(&sorted, 90.0)?,
        p95: percentile(&sorted, 95.0)?,
    })
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn elapsed_ms(readings: &[Reading]) -> i64 {
    match (readings.first(), readings.last()) {
        (Some(first), Some(last)) => last.timestamp_ms - first.timestamp_ms,
        _ => 0,
    }
}
