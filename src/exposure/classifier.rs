//! Zone classification of instantaneous sound levels
//!
//! Deterministic, pure mapping from a dB value to a health/risk
//! classification. The zone table is a fixed, closed enumeration with
//! half-open bands `[min, max)` that partition the full range; contiguity is
//! validated by [`validate_bands`] and enforced by tests.

use serde::{Deserialize, Serialize};

/// Fixed classification band a dB value falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Quiet,
    Comfortable,
    Moderate,
    Loud,
    Dangerous,
    Emergency,
}

/// Risk tier associated with a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    Low,
    Moderate,
    High,
    Critical,
}

/// Classification derived from a single dB value
///
/// Stateless and recomputed on demand; thresholds are fixed constants, so
/// nothing here is worth caching beyond a reading's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub zone: Zone,
    pub category: &'static str,
    pub risk: RiskLevel,
    pub recommendation: &'static str,
    pub protection_required: bool,
}

/// One band of the zone table
struct ZoneBand {
    zone: Zone,
    /// Inclusive lower bound in dB
    min_db: f64,
    /// Exclusive upper bound in dB; infinity for the top band
    max_db: f64,
    category: &'static str,
    risk: RiskLevel,
    recommendation: &'static str,
    protection_required: bool,
}

/// The canonical six-tier zone table
///
/// Bands are half-open `[min, max)` and contiguous; the top band clamps
/// rather than erroring for arbitrarily large values.
const ZONE_BANDS: [ZoneBand; 6] = [
    ZoneBand {
        zone: Zone::Quiet,
        min_db: 0.0,
        max_db: 40.0,
        category: "Quiet",
        risk: RiskLevel::Minimal,
        recommendation: "No action needed",
        protection_required: false,
    },
    ZoneBand {
        zone: Zone::Comfortable,
        min_db: 40.0,
        max_db: 55.0,
        category: "Comfortable",
        risk: RiskLevel::Minimal,
        recommendation: "No action needed",
        protection_required: false,
    },
    ZoneBand {
        zone: Zone::Moderate,
        min_db: 55.0,
        max_db: 70.0,
        category: "Moderate",
        risk: RiskLevel::Low,
        recommendation: "Comfortable for most activities",
        protection_required: false,
    },
    ZoneBand {
        zone: Zone::Loud,
        min_db: 70.0,
        max_db: 85.0,
        category: "Loud",
        risk: RiskLevel::Moderate,
        recommendation: "Hearing protection recommended for extended exposure",
        protection_required: false,
    },
    ZoneBand {
        zone: Zone::Dangerous,
        min_db: 85.0,
        max_db: 100.0,
        category: "Dangerous",
        risk: RiskLevel::High,
        recommendation: "Hearing protection required",
        protection_required: true,
    },
    ZoneBand {
        zone: Zone::Emergency,
        min_db: 100.0,
        max_db: f64::INFINITY,
        category: "Emergency",
        risk: RiskLevel::Critical,
        recommendation: "Maximum hearing protection required, limit exposure immediately",
        protection_required: true,
    },
];

/// Classify a dB value into exactly one zone
///
/// Total over the real line: negatives clamp to the quiet zone, +inf clamps
/// to the emergency zone, and NaN (only producible from an already-degraded
/// reading) degrades to the quiet floor.
pub fn classify(value_db: f64) -> Classification {
    let value = if value_db.is_nan() { 0.0 } else { value_db.max(0.0) };

    let band = ZONE_BANDS
        .iter()
        .find(|band| value >= band.min_db && value < band.max_db)
        .unwrap_or(&ZONE_BANDS[ZONE_BANDS.len() - 1]);

    Classification {
        zone: band.zone,
        category: band.category,
        risk: band.risk,
        recommendation: band.recommendation,
        protection_required: band.protection_required,
    }
}

/// Check the zone table partitions the range with no gaps or overlaps
///
/// Returns the boundary that breaks contiguity, if any.
pub fn validate_bands() -> Result<(), (f64, f64)> {
    for pair in ZONE_BANDS.windows(2) {
        if pair[0].max_db != pair[1].min_db {
            return Err((pair[0].max_db, pair[1].min_db));
        }
    }
    if ZONE_BANDS[0].min_db != 0.0 || ZONE_BANDS[ZONE_BANDS.len() - 1].max_db != f64::INFINITY {
        return Err((ZONE_BANDS[0].min_db, ZONE_BANDS[ZONE_BANDS.len() - 1].max_db));
    }
    Ok(())
}
