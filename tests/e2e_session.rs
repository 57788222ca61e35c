//! E2E tests for session orchestration
//!
//! Runs complete measurement sessions over synthetic sources: cadence
//! loop, exit conditions, cancellation, and the reading/summary emission
//! contract toward render sinks.

use noisemeter::audio::capture::ToneSource;
use noisemeter::audio::meter::{LevelMeter, Reading};
use noisemeter::config::MeterConfig;
use noisemeter::exposure::aggregator::ExposureSummary;
use noisemeter::exposure::classifier::{Classification, Zone};
use noisemeter::session::ticker::IntervalTicker;
use noisemeter::session::{
    NullSink, RenderSink, SessionConfig, SessionController, SessionState, StepOutcome,
};
use std::time::Duration;

/// Amplitude producing `target_db` with a zero offset for a flat frame
fn amplitude_for_db(target_db: f64) -> f32 {
    10f64.powf((target_db - noisemeter::SPL_REFERENCE_DB) / 20.0) as f32
}

fn controller_at(
    level_db: f64,
    session_config: SessionConfig,
) -> SessionController<ToneSource> {
    let meter_config = MeterConfig {
        min_update_interval_ms: 0,
        ..MeterConfig::default()
    };
    let source = ToneSource::new(48000, amplitude_for_db(level_db));
    SessionController::new(LevelMeter::new(source, &meter_config), session_config)
}

/// Sink that records every emission for inspection
#[derive(Default)]
struct CollectingSink {
    readings: Vec<(Reading, Classification)>,
    summaries: Vec<ExposureSummary>,
}

impl RenderSink for CollectingSink {
    fn on_reading(&mut self, reading: &Reading, classification: &Classification) {
        self.readings.push((*reading, *classification));
    }

    fn on_summary(&mut self, summary: &ExposureSummary) {
        self.summaries.push(summary.clone());
    }
}

/// A ticker-driven session runs to its duration and yields one summary
#[test]
fn test_full_session_run() {
    let session_config = SessionConfig {
        target_duration_ms: 200,
        cadence: Duration::from_millis(10),
        ..SessionConfig::default()
    };
    let mut controller = controller_at(65.0, session_config.clone());
    let mut ticker = IntervalTicker::new(session_config.cadence);
    let mut sink = CollectingSink::default();

    let summary = controller.run(&mut ticker, &mut sink).expect("synthetic source");

    assert_eq!(controller.state(), SessionState::Idle);
    assert!(
        summary.sample_count >= 5,
        "a 200ms session at 10ms cadence collects several readings, got {}",
        summary.sample_count
    );
    assert_eq!(sink.summaries.len(), 1, "exactly one summary per session");
    assert_eq!(
        sink.readings.len(),
        summary.sample_count,
        "every recorded reading was emitted"
    );

    let twa = summary.twa_db.expect("multiple spaced readings");
    assert!((twa - 65.0).abs() < 0.5, "constant source TWA near 65, got {}", twa);
}

/// Per-tick emissions pair each reading with its classification
#[test]
fn test_emission_contract() {
    let session_config = SessionConfig {
        target_duration_ms: 10_000,
        ..SessionConfig::default()
    };
    let mut controller = controller_at(92.0, session_config);
    controller.start().unwrap();

    let mut sink = CollectingSink::default();
    for i in 0..10 {
        assert_eq!(controller.step(i * 16, &mut sink), StepOutcome::Continue);
    }

    assert_eq!(sink.readings.len(), 10);
    for (reading, classification) in &sink.readings {
        assert!((reading.value_db - 92.0).abs() < 0.1);
        assert_eq!(classification.zone, Zone::Dangerous);
        assert!(classification.protection_required);
    }

    // Timestamps arrive in non-decreasing order
    for pair in sink.readings.windows(2) {
        assert!(pair[0].0.timestamp_ms <= pair[1].0.timestamp_ms);
    }

    controller.finalize(&mut sink);
}

/// Cancellation mid-session still produces a summary from partial data
#[test]
fn test_cancellation_keeps_partial_data() {
    let mut controller = controller_at(70.0, SessionConfig::default());
    controller.start().unwrap();

    let mut sink = CollectingSink::default();
    for i in 0..3 {
        controller.step(i * 16, &mut sink);
    }

    controller.request_stop();
    assert_eq!(controller.step(48, &mut sink), StepOutcome::Finished);

    let summary = controller.finalize(&mut sink);
    assert_eq!(summary.sample_count, 3, "partial data is not discarded");
    assert_eq!(controller.state(), SessionState::Idle);
}

/// Stopping repeatedly, or stopping an idle controller, is a no-op
#[test]
fn test_stop_is_idempotent() {
    let mut controller = controller_at(70.0, SessionConfig::default());

    controller.request_stop();
    controller.request_stop();
    assert_eq!(controller.state(), SessionState::Idle);

    controller.start().unwrap();
    controller.request_stop();
    controller.request_stop();

    let mut sink = NullSink;
    assert_eq!(controller.step(0, &mut sink), StepOutcome::Finished);
    controller.finalize(&mut sink);

    // Finalizing cleared the stop request; a new session runs normally
    controller.start().unwrap();
    assert_eq!(controller.step(0, &mut sink), StepOutcome::Continue);
    controller.finalize(&mut sink);
}

/// The stop handle works across threads (Ctrl+C path)
#[test]
fn test_stop_handle_from_another_thread() {
    let session_config = SessionConfig {
        target_duration_ms: 60_000,
        cadence: Duration::from_millis(5),
        ..SessionConfig::default()
    };
    let mut controller = controller_at(65.0, session_config.clone());
    let stop = controller.stop_handle();

    let signaller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
    });

    let mut ticker = IntervalTicker::new(session_config.cadence);
    let mut sink = NullSink;
    let summary = controller.run(&mut ticker, &mut sink).unwrap();

    signaller.join().unwrap();
    assert!(
        summary.duration_ms < 60_000,
        "stop must cut the session well short of the target"
    );
    assert_eq!(controller.state(), SessionState::Idle);
}

/// A session calibration shifts subsequent readings within the same run
#[test]
fn test_mid_session_calibration() {
    let session_config = SessionConfig {
        target_duration_ms: 10_000,
        ..SessionConfig::default()
    };
    let mut controller = controller_at(80.0, session_config);
    controller.start().unwrap();

    let mut sink = CollectingSink::default();
    controller.step(0, &mut sink);
    assert!((sink.readings[0].0.value_db - 80.0).abs() < 0.1);

    controller.calibrate(94.0).expect("session running");
    controller.step(16, &mut sink);
    assert!(
        (sink.readings[1].0.value_db - 94.0).abs() < 0.1,
        "readings after calibration equal the reference"
    );

    controller.finalize(&mut sink);
}
