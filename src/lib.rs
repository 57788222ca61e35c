//! Noisemeter - ambient sound level meter core
//!
//! This library turns raw microphone input into calibrated decibel readings
//! at a bounded rate, classifies them against health/safety thresholds, and
//! aggregates a session of readings into time-weighted exposure metrics
//! (TWA, dose, compliance flags, risk tier, trend).
//!
//! Rendering, storage backends, and export formatting are external
//! collaborators consuming the types exposed here.

pub mod audio;
pub mod config;
pub mod export;
pub mod exposure;
pub mod session;
pub mod stats;
pub mod storage;

pub use audio::capture::{CaptureError, FrameSource, MicSource, SilenceSource, ToneSource};
pub use audio::meter::{LevelMeter, MeterError, Reading};
pub use config::MeterConfig;
pub use exposure::aggregator::{ExposureAggregator, ExposureSummary, Trend};
pub use exposure::classifier::{classify, Classification, RiskLevel, Zone};
pub use session::{SessionConfig, SessionController, SessionState};
pub use stats::store::HistoryStore;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default sample rate for microphone capture (48kHz, the common device rate)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Analysis frame length in samples (~43ms at 48kHz)
///
/// Sized like an FFT window: fixed at construction, not reconfigurable
/// mid-session.
pub const FRAME_LEN: usize = 2048;

/// SPL approximation constant added to `20*log10(rms)`
///
/// Empirical placeholder aligning full-scale digital RMS with a plausible
/// sound pressure level. Tunable via [`MeterConfig`]; does not yield
/// traceable SPL accuracy.
pub const SPL_REFERENCE_DB: f64 = 94.0;

/// Lowest reportable level in dB; silence and degraded readings clamp here
pub const FLOOR_DB: f64 = 20.0;

/// Highest reportable level in dB
pub const CEILING_DB: f64 = 140.0;

/// Minimum interval between level recomputations (~60 updates/second)
pub const MIN_UPDATE_INTERVAL_MS: u64 = 16;
