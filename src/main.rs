//! Noisemeter - headless ambient sound level monitor
//!
//! Entry point for running a measurement session from the terminal.

use anyhow::Result;
use noisemeter::audio::capture::MicSource;
use noisemeter::audio::meter::{LevelMeter, Reading};
use noisemeter::config::MeterConfig;
use noisemeter::exposure::aggregator::ExposureSummary;
use noisemeter::exposure::classifier::Classification;
use noisemeter::session::ticker::IntervalTicker;
use noisemeter::session::{
    BasicTier, DurationPolicy, ExtendedTier, RenderSink, SessionConfig, SessionController,
};
use noisemeter::stats::store::HistoryStore;
use noisemeter::storage::JsonFileStorage;
use std::path::PathBuf;
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("noisemeter=info".parse().unwrap()),
        )
        .init();

    // The zone table is a compile-time constant; fail fast if an edit ever
    // breaks its contiguity
    if let Err((upper, lower)) = noisemeter::exposure::classifier::validate_bands() {
        anyhow::bail!("zone table is not contiguous at {} / {}", upper, lower);
    }

    println!("Noisemeter v{} - ambient sound level monitor", noisemeter::VERSION);
    println!();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    let mut duration_secs: Option<u64> = None;
    let mut extended = false;
    let mut data_dir = PathBuf::from("noisemeter-data");
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("noisemeter {}", noisemeter::VERSION);
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--extended" | "-e" => {
                extended = true;
            }
            "--duration" | "-d" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --duration requires seconds");
                    return Ok(());
                }
                duration_secs = args[i + 1].parse().ok();
                if duration_secs.is_none() {
                    eprintln!("Error: invalid duration: {}", args[i + 1]);
                    return Ok(());
                }
                i += 2;
                continue;
            }
            "--data-dir" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --data-dir requires a path");
                    return Ok(());
                }
                data_dir = PathBuf::from(&args[i + 1]);
                i += 2;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
        }
        i += 1;
    }

    let mut storage = JsonFileStorage::new(data_dir);
    let config = MeterConfig::load(&storage);
    let mut history = HistoryStore::load(&storage);

    let policy: &dyn DurationPolicy = if extended { &ExtendedTier } else { &BasicTier };
    let mut session_config = SessionConfig::for_policy(policy);
    if let Some(secs) = duration_secs {
        session_config.target_duration_ms = (secs * 1000) as i64;
    }

    let source = MicSource::new(config.sample_rate, config.frame_len);
    let meter = LevelMeter::new(source, &config);
    let mut controller = SessionController::new(meter, session_config.clone());

    // Ctrl+C requests an immediate, idempotent stop
    let stop = controller.stop_handle();
    ctrlc::set_handler(move || {
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
    })
    .ok();

    println!(
        "Measuring for up to {}s. Press Ctrl+C to stop early.",
        session_config.target_duration_ms / 1000
    );
    println!();

    let mut ticker = IntervalTicker::new(session_config.cadence);
    let mut sink = StatusSink::default();

    let summary = match controller.run(&mut ticker, &mut sink) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("Check that a microphone is connected and that this");
            eprintln!("application has permission to use it.");
            return Ok(());
        }
    };

    println!();
    print_summary(&summary);

    history.record(summary);
    history.save(&mut storage);
    info!(sessions = history.len(), "session history updated");

    Ok(())
}

fn print_help() {
    println!("Usage: noisemeter [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -d, --duration SECS   Session length in seconds (default: 30)");
    println!("  -e, --extended        Use the extended session length (300s)");
    println!("      --data-dir PATH   Directory for config and history (default: noisemeter-data)");
    println!("  -v, --version         Show version");
    println!("  -h, --help            Show this help");
}

fn print_summary(summary: &ExposureSummary) {
    println!("Session summary");
    println!("────────────────────────────────────────");
    match summary.twa_db {
        Some(twa) => println!("TWA:        {:.1} dB", twa),
        None => println!("TWA:        insufficient data"),
    }
    if let Some(avg) = summary.average_db {
        println!("Average:    {:.1} dB", avg);
    }
    if let (Some(min), Some(peak)) = (summary.min_db, summary.peak_db) {
        println!("Range:      {:.1} - {:.1} dB", min, peak);
    }
    if let Some(dose) = summary.dose {
        println!("Dose:       {:.0}%", dose * 100.0);
    }
    if let Some(flags) = summary.compliance {
        println!(
            "Compliance: OSHA {} | NIOSH {} | WHO {}",
            pass_fail(flags.osha),
            pass_fail(flags.niosh),
            pass_fail(flags.who)
        );
    }
    println!("Risk:       {:?}", summary.risk);
    println!("Trend:      {:?}", summary.trend);
    println!(
        "Samples:    {} ({} excluded)",
        summary.sample_count, summary.excluded_count
    );
}

fn pass_fail(ok: bool) -> &'static str {
    if ok {
        "pass"
    } else {
        "FAIL"
    }
}

/// Prints a status line whenever the classification changes
#[derive(Default)]
struct StatusSink {
    last_category: Option<&'static str>,
}

impl RenderSink for StatusSink {
    fn on_reading(&mut self, reading: &Reading, classification: &Classification) {
        if self.last_category != Some(classification.category) {
            println!(
                "[{:>6.1}s] {:>6.1} dB  {:<12} {}",
                reading.timestamp_ms as f64 / 1000.0,
                reading.value_db,
                classification.category,
                classification.recommendation
            );
            self.last_category = Some(classification.category);
        }
    }

    fn on_summary(&mut self, _summary: &ExposureSummary) {
        // Printed by main after the run completes
    }
}
