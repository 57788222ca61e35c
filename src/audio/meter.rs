//! RMS-based decibel metering with calibration and rate gating
//!
//! Converts a sample frame into an instantaneous calibrated decibel value:
//! RMS over the frame, `20*log10(rms)` plus an SPL approximation constant,
//! plus the calibration offset, clamped to a realistic meter range. A time
//! gate caches the last value so repeated reads cost nothing between
//! updates, bounding CPU at the target 60Hz refresh rate.

use crate::audio::capture::{CaptureError, FrameSource};
use crate::config::MeterConfig;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from meter operations that require particular meter state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeterError {
    #[error("no measurement in progress")]
    NotMeasuring,
}

/// One instantaneous calibrated measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Calibrated level in dB
    pub value_db: f64,
    /// Milliseconds since session start
    pub timestamp_ms: i64,
}

/// Calibrated, rate-bounded sound level meter over a frame source
///
/// Owns the calibration offsets: a persisted baseline loaded from config at
/// construction, composed with a session-level delta that [`Self::calibrate`]
/// replaces. The applied offset is their sum, added exactly once per
/// raw-to-calibrated conversion.
pub struct LevelMeter<S: FrameSource> {
    source: S,
    /// Persistent sampling buffer; length fixed at construction
    frame: Vec<f32>,
    spl_reference_db: f64,
    floor_db: f64,
    ceiling_db: f64,
    min_update_interval: Duration,
    /// Persisted baseline offset loaded at startup
    baseline_offset_db: f64,
    /// Session-level delta, replaced by each calibrate() call
    session_offset_db: f64,
    initialized: bool,
    measuring: bool,
    cached_db: f64,
    last_update: Option<Instant>,
    /// Readings recovered by clamping to the floor (never surfaced as errors)
    degraded_count: u64,
}

impl<S: FrameSource> LevelMeter<S> {
    /// Create a meter over `source` configured by `config`
    pub fn new(source: S, config: &MeterConfig) -> Self {
        Self {
            source,
            frame: vec![0.0; config.frame_len],
            spl_reference_db: config.spl_reference_db,
            floor_db: config.floor_db,
            ceiling_db: config.ceiling_db,
            min_update_interval: Duration::from_millis(config.min_update_interval_ms),
            baseline_offset_db: config.calibration_offset_db,
            session_offset_db: 0.0,
            initialized: false,
            measuring: false,
            cached_db: config.floor_db,
            last_update: None,
            degraded_count: 0,
        }
    }

    /// Acquire the audio input resource
    ///
    /// Fails with a distinct [`CaptureError`] kind when the platform denies
    /// access or no compatible input exists.
    pub fn initialize(&mut self) -> Result<(), CaptureError> {
        self.source.open()?;
        self.initialized = true;
        tracing::info!(
            frame_len = self.frame.len(),
            sample_rate = self.source.sample_rate(),
            "level meter initialized"
        );
        Ok(())
    }

    /// Begin servicing reads
    ///
    /// Starting while already measuring restarts the measurement (the prior
    /// one is stopped first); this is documented behavior, not an error.
    pub fn start_measuring(&mut self) {
        if self.measuring {
            tracing::debug!("restarting measurement");
            self.stop_measuring();
        }
        self.measuring = true;
        self.session_offset_db = 0.0;
        self.last_update = None;
        self.cached_db = self.floor_db;
    }

    /// Stop servicing reads; idempotent
    pub fn stop_measuring(&mut self) {
        self.measuring = false;
    }

    /// Whether reads are currently being serviced
    pub fn is_measuring(&self) -> bool {
        self.measuring
    }

    /// Current calibrated level in dB
    ///
    /// Returns the cached value when called again before the minimum update
    /// interval has elapsed; only after the gate does it re-sample and
    /// recompute. Silence maps deterministically to the floor. Any
    /// non-finite intermediate degrades to the floor and is counted, never
    /// propagated.
    pub fn current_level(&mut self) -> f64 {
        if !self.measuring {
            return self.cached_db;
        }

        if let Some(last) = self.last_update {
            if last.elapsed() < self.min_update_interval {
                return self.cached_db;
            }
        }

        let raw = self.raw_level_db();
        let calibrated = raw + self.baseline_offset_db + self.session_offset_db;

        self.cached_db = if calibrated.is_nan() {
            self.degraded_count += 1;
            tracing::debug!(degraded = self.degraded_count, "degraded reading clamped to floor");
            self.floor_db
        } else {
            // -inf from silence clamps to the floor here
            calibrated.clamp(self.floor_db, self.ceiling_db)
        };
        self.last_update = Some(Instant::now());
        self.cached_db
    }

    /// Calibrate against a known reference level actively playing
    ///
    /// Takes one fresh uncalibrated reading and stores the session delta so
    /// the next reading of the same signal equals `reference_db`. Replaces
    /// any prior session delta; composes with the persisted baseline.
    ///
    /// Returns the total applied offset (baseline + session delta).
    pub fn calibrate(&mut self, reference_db: f64) -> Result<f64, MeterError> {
        if !self.measuring {
            return Err(MeterError::NotMeasuring);
        }

        let raw = self.raw_level_db();
        if !raw.is_finite() {
            // Calibrating against silence would produce an unbounded offset
            self.degraded_count += 1;
            tracing::warn!("calibration skipped: reference signal not measurable");
            return Ok(self.offset_db());
        }

        self.session_offset_db = reference_db - raw - self.baseline_offset_db;
        // Invalidate the gate so the next read reflects the new offset
        self.last_update = None;

        tracing::info!(
            reference_db,
            raw_db = raw,
            offset_db = self.offset_db(),
            "meter calibrated"
        );
        Ok(self.offset_db())
    }

    /// Release the audio resource; safe to call multiple times, including on
    /// a never-initialized meter
    pub fn teardown(&mut self) {
        self.stop_measuring();
        self.source.close();
        if self.initialized {
            tracing::info!("level meter torn down");
        }
        self.initialized = false;
    }

    /// Total calibration offset currently applied (baseline + session delta)
    pub fn offset_db(&self) -> f64 {
        self.baseline_offset_db + self.session_offset_db
    }

    /// Number of readings recovered by clamping to the floor
    pub fn degraded_count(&self) -> u64 {
        self.degraded_count
    }

    /// Drain the underlying source's non-fatal stream events, if any
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Uncalibrated dB from a fresh frame: `20*log10(rms) + SPL reference`
    ///
    /// Silence (RMS 0) yields -inf, which the caller clamps to the floor.
    fn raw_level_db(&mut self) -> f64 {
        self.source.fill_frame(&mut self.frame);
        let rms = rms(&self.frame);
        20.0 * (rms as f64).log10() + self.spl_reference_db
    }
}

impl<S: FrameSource> Drop for LevelMeter<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Root-mean-square amplitude of a sample frame
pub(crate) fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let energy: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (energy / frame.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::{SilenceSource, ToneSource};
    use approx::assert_relative_eq;

    fn test_config() -> MeterConfig {
        MeterConfig {
            // No gate delay in unit tests; gating has its own coverage
            min_update_interval_ms: 0,
            ..MeterConfig::default()
        }
    }

    /// Amplitude that produces `target_db` with a zero offset:
    /// a = 10^((target - SPL_REF) / 20) for a flat frame (RMS == amplitude)
    fn amplitude_for_db(target_db: f64) -> f32 {
        10f64.powf((target_db - crate::SPL_REFERENCE_DB) / 20.0) as f32
    }

    #[test]
    fn test_rms_of_flat_frame_is_amplitude() {
        let frame = [0.25f32; 512];
        assert_relative_eq!(rms(&frame), 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_rms_of_empty_frame_is_zero() {
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_silence_clamps_to_floor() {
        let config = test_config();
        let mut meter = LevelMeter::new(SilenceSource::new(48000), &config);
        meter.initialize().unwrap();
        meter.start_measuring();

        let level = meter.current_level();
        assert_eq!(level, config.floor_db);
        // Silence is deterministic, not a degraded reading
        assert_eq!(meter.degraded_count(), 0);
    }

    #[test]
    fn test_known_amplitude_maps_to_db() {
        let config = test_config();
        let amplitude = amplitude_for_db(90.0);
        let mut meter = LevelMeter::new(ToneSource::new(48000, amplitude), &config);
        meter.initialize().unwrap();
        meter.start_measuring();

        let level = meter.current_level();
        assert_relative_eq!(level, 90.0, epsilon = 0.01);
    }

    #[test]
    fn test_level_clamps_to_ceiling() {
        let config = test_config();
        // Full-scale amplitude: 20*log10(1) + 94 = 94, within range; push the
        // reference up via baseline offset to exceed the ceiling instead.
        let config = MeterConfig {
            calibration_offset_db: 60.0,
            ..config
        };
        let mut meter = LevelMeter::new(ToneSource::new(48000, 1.0), &config);
        meter.initialize().unwrap();
        meter.start_measuring();

        assert_eq!(meter.current_level(), config.ceiling_db);
    }

    #[test]
    fn test_calibrate_requires_measuring() {
        let config = test_config();
        let mut meter = LevelMeter::new(ToneSource::new(48000, 0.5), &config);
        meter.initialize().unwrap();

        assert_eq!(meter.calibrate(94.0), Err(MeterError::NotMeasuring));
    }

    #[test]
    fn test_calibration_round_trip() {
        let config = test_config();
        let amplitude = amplitude_for_db(80.0);
        let mut meter = LevelMeter::new(ToneSource::new(48000, amplitude), &config);
        meter.initialize().unwrap();
        meter.start_measuring();

        let uncalibrated = meter.current_level();
        assert_relative_eq!(uncalibrated, 80.0, epsilon = 0.01);

        let offset = meter.calibrate(94.0).unwrap();
        assert_relative_eq!(offset, 14.0, epsilon = 0.01);

        // Next reading of the same underlying signal equals the reference
        let calibrated = meter.current_level();
        assert_relative_eq!(calibrated, 94.0, epsilon = 0.01);
    }

    #[test]
    fn test_calibrate_replaces_session_delta() {
        let config = test_config();
        let amplitude = amplitude_for_db(80.0);
        let mut meter = LevelMeter::new(ToneSource::new(48000, amplitude), &config);
        meter.initialize().unwrap();
        meter.start_measuring();

        meter.calibrate(100.0).unwrap();
        let offset = meter.calibrate(90.0).unwrap();

        // Deltas replace rather than stack
        assert_relative_eq!(offset, 10.0, epsilon = 0.01);
        assert_relative_eq!(meter.current_level(), 90.0, epsilon = 0.01);
    }

    #[test]
    fn test_calibrate_composes_with_baseline() {
        let config = MeterConfig {
            calibration_offset_db: 5.0,
            ..test_config()
        };
        let amplitude = amplitude_for_db(80.0);
        let mut meter = LevelMeter::new(ToneSource::new(48000, amplitude), &config);
        meter.initialize().unwrap();
        meter.start_measuring();

        // Baseline shifts the reading before calibration
        assert_relative_eq!(meter.current_level(), 85.0, epsilon = 0.01);

        meter.calibrate(94.0).unwrap();
        assert_relative_eq!(meter.current_level(), 94.0, epsilon = 0.01);
        assert_relative_eq!(meter.offset_db(), 14.0, epsilon = 0.01);
    }

    #[test]
    fn test_calibrate_against_silence_is_skipped() {
        let config = test_config();
        let mut meter = LevelMeter::new(SilenceSource::new(48000), &config);
        meter.initialize().unwrap();
        meter.start_measuring();

        let offset = meter.calibrate(94.0).unwrap();
        assert_eq!(offset, 0.0);
        assert_eq!(meter.degraded_count(), 1);
    }

    #[test]
    fn test_teardown_idempotent() {
        let config = test_config();
        let mut meter = LevelMeter::new(ToneSource::new(48000, 0.5), &config);

        // Never initialized: must not panic
        meter.teardown();
        meter.teardown();
        meter.stop_measuring();
        assert!(!meter.is_measuring());
    }

    #[test]
    fn test_restart_resets_session_offset() {
        let config = test_config();
        let amplitude = amplitude_for_db(80.0);
        let mut meter = LevelMeter::new(ToneSource::new(48000, amplitude), &config);
        meter.initialize().unwrap();
        meter.start_measuring();
        meter.calibrate(100.0).unwrap();

        // Idempotent restart drops the session delta, keeps the baseline
        meter.start_measuring();
        assert_relative_eq!(meter.current_level(), 80.0, epsilon = 0.01);
    }

    #[test]
    fn test_source_changes_reflect_in_readings() {
        let config = test_config();
        let mut meter = LevelMeter::new(ToneSource::new(48000, amplitude_for_db(70.0)), &config);
        meter.initialize().unwrap();
        meter.start_measuring();
        assert_relative_eq!(meter.current_level(), 70.0, epsilon = 0.01);

        meter.source_mut().set_amplitude(amplitude_for_db(80.0));
        assert_relative_eq!(meter.current_level(), 80.0, epsilon = 0.01);
    }

    #[test]
    fn test_not_measuring_returns_cached() {
        let config = test_config();
        let mut meter = LevelMeter::new(ToneSource::new(48000, 0.5), &config);
        meter.initialize().unwrap();

        // Reads are not serviced before start_measuring
        assert_eq!(meter.current_level(), config.floor_db);
    }
}
