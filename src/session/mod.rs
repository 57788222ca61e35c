//! Measurement session orchestration
//!
//! Drives a bounded-duration or manually-stopped session end-to-end: pulls
//! calibrated levels from the meter at a fixed cadence, classifies each
//! reading, accumulates them in a session-scoped bounded buffer, and hands
//! the full sequence to the aggregator exactly once at finalize time.
//!
//! The cadence is supplied by [`ticker::IntervalTicker`] (or any caller
//! driving [`SessionController::step`] directly), and the extended-duration
//! entitlement is an injected policy, so the controller runs identically
//! under a headless test harness.

pub mod ticker;

use crate::audio::capture::{CaptureError, FrameSource};
use crate::audio::meter::{LevelMeter, Reading};
use crate::exposure::aggregator::{ExposureAggregator, ExposureSummary};
use crate::exposure::classifier::{classify, Classification};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default session length for the basic tier (30 seconds)
pub const BASIC_DURATION_MS: i64 = 30_000;

/// Default session length for the extended tier (5 minutes)
pub const EXTENDED_DURATION_MS: i64 = 300_000;

/// Reading buffer cap: extended duration at 60Hz with 2x headroom
pub const MAX_SESSION_READINGS: usize = 36_000;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session in progress
    Idle,
    /// Awaiting audio resource acquisition
    Acquiring,
    /// Accumulating readings on the cadence
    Running,
    /// Producing the summary and releasing resources
    Finalizing,
}

/// Outcome of one cadence step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Session continues; a reading may have been recorded
    Continue,
    /// An exit condition fired; the caller should finalize
    Finished,
}

/// Entitlement check for extended session durations
///
/// Injected so the measurement core stays testable without simulating any
/// monetization flow.
pub trait DurationPolicy {
    fn allow_extended_duration(&self) -> bool;
}

/// Basic tier: short sessions only
pub struct BasicTier;

impl DurationPolicy for BasicTier {
    fn allow_extended_duration(&self) -> bool {
        false
    }
}

/// Extended tier: long sessions permitted
pub struct ExtendedTier;

impl DurationPolicy for ExtendedTier {
    fn allow_extended_duration(&self) -> bool {
        true
    }
}

/// Downstream consumer of per-tick readings and the final summary
///
/// Gauge widgets and dashboards are pure readers of this interface.
pub trait RenderSink {
    fn on_reading(&mut self, _reading: &Reading, _classification: &Classification) {}
    fn on_summary(&mut self, _summary: &ExposureSummary) {}
}

/// Sink that discards everything
pub struct NullSink;

impl RenderSink for NullSink {}

/// Session parameters
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Target duration in milliseconds
    pub target_duration_ms: i64,
    /// Cadence between readings
    pub cadence: Duration,
    /// Reading buffer cap
    pub max_readings: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_duration_ms: BASIC_DURATION_MS,
            cadence: Duration::from_millis(crate::MIN_UPDATE_INTERVAL_MS),
            max_readings: MAX_SESSION_READINGS,
        }
    }
}

impl SessionConfig {
    /// Session parameters for the entitlement granted by `policy`
    pub fn for_policy(policy: &dyn DurationPolicy) -> Self {
        let target_duration_ms = if policy.allow_extended_duration() {
            EXTENDED_DURATION_MS
        } else {
            BASIC_DURATION_MS
        };
        Self {
            target_duration_ms,
            ..Self::default()
        }
    }
}

/// Orchestrates one measurement session over a level meter
///
/// Owns exclusive access to the meter; only one session may be running at a
/// time, and starting while one is active stops the prior one first.
pub struct SessionController<S: FrameSource> {
    meter: LevelMeter<S>,
    config: SessionConfig,
    state: SessionState,
    readings: Vec<Reading>,
    /// Readings dropped because the session buffer was full
    overflow_dropped: u64,
    stop_flag: Arc<AtomicBool>,
}

impl<S: FrameSource> SessionController<S> {
    pub fn new(meter: LevelMeter<S>, config: SessionConfig) -> Self {
        Self {
            meter,
            config,
            state: SessionState::Idle,
            readings: Vec::new(),
            overflow_dropped: 0,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle for requesting a stop from another context (e.g. Ctrl+C)
    ///
    /// Stopping is immediate at the next step and idempotent; stopping an
    /// idle session is a no-op.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_flag)
    }

    /// Request the running session to stop at the next step
    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    /// Acquire the audio resource and begin accumulating readings
    ///
    /// Acquisition failure surfaces the distinct [`CaptureError`] kind and
    /// leaves the controller idle; it is not retried here.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.state == SessionState::Running {
            // Documented idempotent restart: the prior session is stopped
            // and its partial summary discarded
            tracing::info!("restarting: stopping the active session first");
            let _ = self.finalize(&mut NullSink);
        }

        self.state = SessionState::Acquiring;
        if let Err(e) = self.meter.initialize() {
            tracing::error!(error = %e, "audio acquisition failed");
            self.state = SessionState::Idle;
            return Err(e);
        }

        self.meter.start_measuring();
        self.readings.clear();
        self.overflow_dropped = 0;
        self.stop_flag.store(false, Ordering::Relaxed);
        self.state = SessionState::Running;

        tracing::info!(
            target_ms = self.config.target_duration_ms,
            cadence_ms = self.config.cadence.as_millis() as u64,
            "session started"
        );
        Ok(())
    }

    /// Service one cadence tick at `timestamp_ms` (ms since session start)
    ///
    /// Pulls the current level, classifies it, appends the reading, and
    /// emits both to `sink`. Returns [`StepOutcome::Finished`] once the
    /// target duration has elapsed or a stop was requested.
    pub fn step(&mut self, timestamp_ms: i64, sink: &mut dyn RenderSink) -> StepOutcome {
        if self.state != SessionState::Running {
            return StepOutcome::Finished;
        }

        if self.stop_flag.load(Ordering::Relaxed) {
            tracing::info!(timestamp_ms, "stop requested");
            return StepOutcome::Finished;
        }
        if timestamp_ms >= self.config.target_duration_ms {
            tracing::info!(timestamp_ms, "target duration reached");
            return StepOutcome::Finished;
        }

        let value_db = self.meter.current_level();
        let reading = Reading {
            value_db,
            timestamp_ms,
        };
        let classification = classify(value_db);

        // Single producer on the cadence: timestamps arrive in order
        if self.readings.len() < self.config.max_readings {
            self.readings.push(reading);
        } else {
            self.overflow_dropped += 1;
            if self.overflow_dropped == 1 {
                tracing::warn!(cap = self.config.max_readings, "session buffer full");
            }
        }

        sink.on_reading(&reading, &classification);
        StepOutcome::Continue
    }

    /// Stop measuring, release the audio resource, and produce the summary
    ///
    /// The meter is torn down before aggregation so the microphone is
    /// released even if summarization misbehaves. Partial data still yields
    /// a summary; degenerate sessions come back flagged as insufficient
    /// rather than silently discarded.
    pub fn finalize(&mut self, sink: &mut dyn RenderSink) -> ExposureSummary {
        self.state = SessionState::Finalizing;

        self.meter.stop_measuring();
        self.meter.teardown();

        let readings = std::mem::take(&mut self.readings);
        let sample_count = readings.len();
        let aggregator = ExposureAggregator::from_readings(readings);
        let summary = aggregator.finalize();

        tracing::info!(
            samples = sample_count,
            twa_db = ?summary.twa_db,
            risk = ?summary.risk,
            dropped = self.overflow_dropped,
            degraded = self.meter.degraded_count(),
            "session finalized"
        );

        sink.on_summary(&summary);
        self.state = SessionState::Idle;
        self.stop_flag.store(false, Ordering::Relaxed);
        summary
    }

    /// Run a full session: start, tick until an exit condition, finalize
    pub fn run(
        &mut self,
        ticker: &mut ticker::IntervalTicker,
        sink: &mut dyn RenderSink,
    ) -> Result<ExposureSummary, CaptureError> {
        self.start()?;
        loop {
            let timestamp_ms = ticker.wait();
            if self.step(timestamp_ms, sink) == StepOutcome::Finished {
                break;
            }
        }
        Ok(self.finalize(sink))
    }

    /// Calibrate the underlying meter against a known reference level
    ///
    /// Requires a running session, mirroring the meter's own contract.
    pub fn calibrate(&mut self, reference_db: f64) -> Result<f64, crate::MeterError> {
        self.meter.calibrate(reference_db)
    }

    /// Readings dropped due to the session buffer cap
    pub fn overflow_dropped(&self) -> u64 {
        self.overflow_dropped
    }
}
