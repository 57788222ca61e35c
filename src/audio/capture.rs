//! Microphone frame capture
//!
//! Wraps a continuous audio input stream and serves fixed-size sample frames
//! on demand. The cpal input callback pushes mono samples into a lock-free
//! ring buffer; [`MicSource::fill_frame`] drains it into a persistent window
//! holding the most recent samples, so reads are synchronous, non-blocking
//! polls of the latest buffer state.
//!
//! Synthetic sources ([`ToneSource`], [`SilenceSource`]) implement the same
//! trait for headless operation and tests.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Ring buffer size in samples (~1.3 seconds at 48kHz)
const RING_BUFFER_SIZE: usize = 65536;

/// Errors that can occur while acquiring or servicing the audio input
///
/// Permission denial and device absence are distinct kinds so callers can
/// show actionable guidance instead of a generic failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("microphone access denied by the platform")]
    PermissionDenied,

    #[error("no compatible audio input device found")]
    NoInputDevice,

    #[error("audio stream failure: {0}")]
    Stream(String),
}

/// A non-fatal event reported by the running input stream
#[derive(Debug, Clone)]
pub struct StreamEvent {
    /// Human-readable description from the audio backend
    pub message: String,
}

/// Source of fixed-size amplitude frames
///
/// `fill_frame` copies the most recent samples into `frame` and returns how
/// many were genuine captured samples (the rest are zero-filled). It must
/// never block waiting for new audio.
pub trait FrameSource {
    /// Acquire the underlying input resource
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Release the input resource; safe to call repeatedly or when never opened
    fn close(&mut self);

    /// Fill `frame` with the most recent samples, newest last
    fn fill_frame(&mut self, frame: &mut [f32]) -> usize;

    /// Configured sample rate in Hz
    fn sample_rate(&self) -> u32;
}

/// Microphone-backed frame source using the platform default input device
///
/// Requests a mono-equivalent stream (multi-channel input is averaged down
/// to one channel in the callback) at a fixed target rate. Echo cancellation
/// and gain processing are whatever the platform provides; no additional
/// processing is applied here since it would distort the measurement.
pub struct MicSource {
    sample_rate: u32,
    stream: Option<Stream>,
    consumer: Option<ringbuf::HeapCons<f32>>,
    /// Persistent window of the most recent samples, newest last
    window: Vec<f32>,
    /// Count of genuine samples present in `window`
    window_filled: usize,
    running: Option<Arc<AtomicBool>>,
    /// Receiver for stream-error events from the cpal error callback
    event_rx: Option<crossbeam_channel::Receiver<StreamEvent>>,
}

impl MicSource {
    /// Create an unopened microphone source
    ///
    /// # Arguments
    /// * `sample_rate` - Target sample rate in Hz
    /// * `frame_len` - Window size in samples; fixed for the source lifetime
    pub fn new(sample_rate: u32, frame_len: usize) -> Self {
        Self {
            sample_rate,
            stream: None,
            consumer: None,
            window: vec![0.0; frame_len],
            window_filled: 0,
            running: None,
            event_rx: None,
        }
    }

    /// Drain any pending stream-error events
    ///
    /// Stream errors are data-quality signals, not crashes; a running
    /// measurement keeps going on the last window contents.
    pub fn drain_events(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(ref rx) = self.event_rx {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        events
    }

    /// Map a cpal failure to a distinct capture error kind
    fn map_stream_error(message: String) -> CaptureError {
        let lower = message.to_ascii_lowercase();
        if lower.contains("permission") || lower.contains("denied") || lower.contains("access") {
            CaptureError::PermissionDenied
        } else {
            CaptureError::Stream(message)
        }
    }
}

impl FrameSource for MicSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            tracing::debug!("mic source already open");
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?;

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let default_config = device
            .default_input_config()
            .map_err(|e| Self::map_stream_error(e.to_string()))?;
        let channels = default_config.channels().max(1);

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring = HeapRb::<f32>::new(RING_BUFFER_SIZE);
        let (mut producer, consumer) = ring.split();

        let (event_tx, event_rx) = crossbeam_channel::bounded::<StreamEvent>(16);

        let running = Arc::new(AtomicBool::new(true));
        let callback_running = Arc::clone(&running);
        let num_channels = channels as usize;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !callback_running.load(Ordering::Relaxed) {
                        return;
                    }
                    // Downmix to mono: one averaged sample per frame
                    for frame in data.chunks(num_channels) {
                        let sum: f32 = frame.iter().sum();
                        let mono = sum / num_channels as f32;
                        let _ = producer.try_push(mono);
                    }
                },
                move |err| {
                    tracing::error!("input stream error: {}", err);
                    let _ = event_tx.try_send(StreamEvent {
                        message: err.to_string(),
                    });
                },
                None,
            )
            .map_err(|e| Self::map_stream_error(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Self::map_stream_error(e.to_string()))?;

        tracing::info!(
            device = %device_name,
            sample_rate = self.sample_rate,
            channels,
            "microphone capture started"
        );

        self.stream = Some(stream);
        self.consumer = Some(consumer);
        self.running = Some(running);
        self.event_rx = Some(event_rx);
        self.window_filled = 0;
        self.window.fill(0.0);

        Ok(())
    }

    fn close(&mut self) {
        if let Some(ref running) = self.running {
            running.store(false, Ordering::Relaxed);
        }
        if self.stream.take().is_some() {
            tracing::info!("microphone capture stopped");
        }
        self.consumer = None;
        self.running = None;
        self.event_rx = None;
        self.window_filled = 0;
    }

    fn fill_frame(&mut self, frame: &mut [f32]) -> usize {
        // Drain everything the callback produced since the last poll,
        // keeping only the newest window-length samples.
        if let Some(ref mut consumer) = self.consumer {
            let available = consumer.occupied_len();
            if available > 0 {
                let window_len = self.window.len();
                if available >= window_len {
                    // Skip samples that would immediately be shifted out
                    let skip = available - window_len;
                    for _ in 0..skip {
                        let _ = consumer.try_pop();
                    }
                    let read = consumer.pop_slice(&mut self.window);
                    self.window_filled = read;
                } else {
                    // Shift older samples left, append the new tail
                    self.window.copy_within(available.., 0);
                    let start = window_len - available;
                    let read = consumer.pop_slice(&mut self.window[start..]);
                    self.window_filled = (self.window_filled + read).min(window_len);
                }
            }
        }

        let n = frame.len().min(self.window.len());
        frame[..n].copy_from_slice(&self.window[self.window.len() - n..]);
        for sample in frame[n..].iter_mut() {
            *sample = 0.0;
        }
        self.window_filled.min(n)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Synthetic source producing a constant-amplitude signal
///
/// A frame of constant amplitude `a` has RMS exactly `a`, which makes the
/// amplitude-to-dB mapping of the meter directly testable.
pub struct ToneSource {
    sample_rate: u32,
    amplitude: f32,
    open: bool,
}

impl ToneSource {
    /// Create a tone source with the given flat amplitude (clamped to [0, 1])
    pub fn new(sample_rate: u32, amplitude: f32) -> Self {
        Self {
            sample_rate,
            amplitude: amplitude.clamp(0.0, 1.0),
            open: false,
        }
    }

    /// Change the amplitude of subsequent frames
    pub fn set_amplitude(&mut self, amplitude: f32) {
        self.amplitude = amplitude.clamp(0.0, 1.0);
    }
}

impl FrameSource for ToneSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn fill_frame(&mut self, frame: &mut [f32]) -> usize {
        frame.fill(self.amplitude);
        frame.len()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Synthetic source producing pure silence (all samples at zero amplitude)
pub struct SilenceSource {
    sample_rate: u32,
}

impl SilenceSource {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl FrameSource for SilenceSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn close(&mut self) {}

    fn fill_frame(&mut self, frame: &mut [f32]) -> usize {
        frame.fill(0.0);
        frame.len()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
