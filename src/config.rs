//! Persistent meter configuration
//!
//! Stores the tunable measurement parameters and the persisted baseline
//! calibration offset. Loading falls back to defaults on any error; saving
//! goes through the [`Storage`](crate::storage::Storage) contract and
//! degrades silently when the backend fails.

use crate::storage::Storage;
use serde::{Deserialize, Serialize};

/// Storage key for the meter configuration document
pub const CONFIG_KEY: &str = "meter_config";

fn default_sample_rate() -> u32 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_frame_len() -> usize {
    crate::FRAME_LEN
}

fn default_spl_reference_db() -> f64 {
    crate::SPL_REFERENCE_DB
}

fn default_floor_db() -> f64 {
    crate::FLOOR_DB
}

fn default_ceiling_db() -> f64 {
    crate::CEILING_DB
}

fn default_min_update_interval_ms() -> u64 {
    crate::MIN_UPDATE_INTERVAL_MS
}

/// Persistent meter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Capture sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Analysis frame length in samples; fixed for the meter lifetime
    #[serde(default = "default_frame_len")]
    pub frame_len: usize,
    /// SPL approximation constant added to 20*log10(rms)
    ///
    /// Empirical placeholder, not a traceable sensitivity model.
    #[serde(default = "default_spl_reference_db")]
    pub spl_reference_db: f64,
    /// Lowest reportable level; silence and degraded readings clamp here
    #[serde(default = "default_floor_db")]
    pub floor_db: f64,
    /// Highest reportable level
    #[serde(default = "default_ceiling_db")]
    pub ceiling_db: f64,
    /// Minimum interval between level recomputations in milliseconds
    #[serde(default = "default_min_update_interval_ms")]
    pub min_update_interval_ms: u64,
    /// Persisted baseline calibration offset in dB
    #[serde(default)]
    pub calibration_offset_db: f64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_len: default_frame_len(),
            spl_reference_db: default_spl_reference_db(),
            floor_db: default_floor_db(),
            ceiling_db: default_ceiling_db(),
            min_update_interval_ms: default_min_update_interval_ms(),
            calibration_offset_db: 0.0,
        }
    }
}

impl MeterConfig {
    /// Load from storage, falling back to defaults on any error
    pub fn load(storage: &dyn Storage) -> Self {
        match storage.load(CONFIG_KEY) {
            Some(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("loaded meter config");
                    config
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse meter config, using defaults");
                    Self::default()
                }
            },
            None => {
                tracing::info!("no stored meter config, using defaults");
                Self::default()
            }
        }
    }

    /// Save to storage; failures degrade to "not persisted"
    pub fn save(&self, storage: &mut dyn Storage) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => storage.save(CONFIG_KEY, &json),
            Err(e) => tracing::warn!(error = %e, "failed to serialize meter config"),
        }
    }
}
