//! Audio capture engine
//!
//! Owns the device/backend lifecycle as an explicit tagged state machine
//! (`NoStream` / `DirectActive` / `LoopbackActive` / `Retrying`) rather than
//! nested fallbacks. `poll()` never blocks beyond a bounded probe and never
//! fails: any trouble produces a zero feature frame and a rate-limited
//! retry. The capture stream itself lives on whichever thread constructed
//! the engine; samples arrive through the stream callback into a ring
//! buffer and `poll()` analyzes the most recent block.

use super::devices;
use super::dsp::{self, EnergyPipeline, SpectrumAnalyzer};
use super::AudioFeatureFrame;
use crate::config::AudioConfig;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Audio capture errors. These never escape `poll()`; they become status
/// strings and retry state.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Failed to build audio stream: {0}")]
    StreamError(String),

    #[error("Failed to start stream: {0}")]
    PlayError(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("No direct device could be opened")]
    NoDirectDevice,

    #[error("No loopback endpoint could be opened")]
    NoLoopbackEndpoint,
}

/// Which backend currently feeds the engine. Exactly one is current;
/// transitions are the sole authority for whether features are computable.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureBackendState {
    NoStream,
    DirectActive { device_id: String, sample_rate: u32 },
    LoopbackActive { endpoint_id: String, sample_rate: u32 },
    Retrying { since: Instant, attempts: u32 },
}

/// What the state machine should do next. Pure decision output; see
/// [`plan_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineAction {
    Hold,
    Acquire,
    Reacquire,
}

/// Pure transition decision: a function of the current state and the
/// health-check timers only.
fn plan_transition(
    state: &CaptureBackendState,
    now: Instant,
    last_sample_at: Option<Instant>,
    silent_since: Option<Instant>,
    last_loopback_select: Option<Instant>,
    cfg: &AudioConfig,
) -> EngineAction {
    match state {
        CaptureBackendState::NoStream => EngineAction::Acquire,

        CaptureBackendState::Retrying { since, .. } => {
            if now.duration_since(*since).as_secs_f32() >= cfg.retry_min_s {
                EngineAction::Acquire
            } else {
                EngineAction::Hold
            }
        }

        CaptureBackendState::DirectActive { .. } => {
            let stalled = match last_sample_at {
                Some(at) => now.duration_since(at).as_secs_f32() > cfg.stall_s,
                None => true,
            };
            if stalled {
                EngineAction::Reacquire
            } else {
                EngineAction::Hold
            }
        }

        CaptureBackendState::LoopbackActive { .. } => {
            let silent_long_enough = silent_since
                .map(|since| now.duration_since(since).as_secs_f32() >= cfg.silence_reprobe_s)
                .unwrap_or(false);
            let reselect_allowed = last_loopback_select
                .map(|at| {
                    now.duration_since(at).as_secs_f32() >= cfg.loopback_reselect_min_s
                })
                .unwrap_or(true);
            if silent_long_enough && reselect_allowed {
                EngineAction::Reacquire
            } else {
                EngineAction::Hold
            }
        }
    }
}

/// Circular mono sample buffer fed by the stream callback.
struct SampleRing {
    samples: Vec<f32>,
    write_pos: usize,
    capacity: usize,
    filled: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            write_pos: 0,
            capacity,
            filled: 0,
        }
    }

    fn push(&mut self, data: &[f32]) {
        for &sample in data {
            self.samples[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.capacity;
        }
        self.filled = (self.filled + data.len()).min(self.capacity);
    }

    /// The most recent `count` samples in time order, or None until the
    /// ring has seen that many.
    fn latest(&self, count: usize) -> Option<Vec<f32>> {
        let count = count.min(self.capacity);
        if self.filled < count {
            return None;
        }

        let start = (self.write_pos + self.capacity - count) % self.capacity;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            out.push(self.samples[(start + i) % self.capacity]);
        }
        Some(out)
    }
}

/// State shared between the stream callback and the engine.
struct StreamShared {
    ring: Mutex<SampleRing>,
    last_sample_at: Mutex<Option<Instant>>,
}

/// A live cpal stream plus its bookkeeping.
struct OpenStream {
    // Held only to keep the stream alive; dropped on teardown.
    _stream: cpal::Stream,
    shared: Arc<StreamShared>,
    sample_rate: u32,
}

/// The capture engine. One instance owns all long-lived estimator state
/// (noise floor, auto-gain peak, gate, smoother), reset together on every
/// full device re-acquisition.
pub struct AudioCaptureEngine {
    cfg: AudioConfig,
    requested_device: Option<String>,
    state: CaptureBackendState,
    open: Option<OpenStream>,
    analyzer: Option<SpectrumAnalyzer>,
    pipeline: EnergyPipeline,
    silent_since: Option<Instant>,
    last_loopback_select: Option<Instant>,
    last_rms: f32,
    last_error: Option<String>,
}

impl AudioCaptureEngine {
    pub fn new(cfg: AudioConfig) -> Self {
        let pipeline = EnergyPipeline::new(
            cfg.target_level,
            cfg.hard_cap,
            cfg.noise_gate,
            cfg.noise_gate_hold_s,
            cfg.attack_ms,
            cfg.release_ms,
        );
        let requested_device = cfg.device.clone();
        Self {
            cfg,
            requested_device,
            state: CaptureBackendState::NoStream,
            open: None,
            analyzer: None,
            pipeline,
            silent_since: None,
            last_loopback_select: None,
            last_rms: 0.0,
            last_error: None,
        }
    }

    pub fn state(&self) -> &CaptureBackendState {
        &self.state
    }

    /// Human-readable source label for the status surface.
    pub fn backend_label(&self) -> String {
        match &self.state {
            CaptureBackendState::NoStream => "no stream".to_string(),
            CaptureBackendState::DirectActive { device_id, .. } => {
                format!("direct: {device_id}")
            }
            CaptureBackendState::LoopbackActive { endpoint_id, .. } => {
                format!("loopback: {endpoint_id}")
            }
            CaptureBackendState::Retrying { attempts, .. } => {
                format!("retrying (attempt {attempts})")
            }
        }
    }

    /// Measured RMS of the latest analyzed block.
    pub fn last_rms(&self) -> f32 {
        self.last_rms
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Switch the requested device. Tears the current stream down; the next
    /// poll re-acquires from scratch.
    pub fn set_device(&mut self, device: Option<String>) {
        if device == self.requested_device {
            return;
        }
        log::info!("Audio device request changed to {device:?}");
        self.requested_device = device;
        self.teardown();
        self.state = CaptureBackendState::NoStream;
    }

    /// Produce the next feature frame. Never fails; any capture trouble
    /// yields a zero frame and retry state.
    pub fn poll(&mut self) -> AudioFeatureFrame {
        let now = Instant::now();
        self.step(now);

        let Some(open) = &self.open else {
            self.last_rms = 0.0;
            return AudioFeatureFrame::default();
        };

        let block_size = self.cfg.block_size;
        let Some(block) = open.shared.ring.lock().latest(block_size) else {
            // Ring not filled yet; report silence until the first full block.
            return AudioFeatureFrame::default();
        };

        self.last_rms = dsp::rms(&block);
        if matches!(self.state, CaptureBackendState::LoopbackActive { .. }) {
            if self.last_rms < self.cfg.silence_rms_epsilon {
                self.silent_since.get_or_insert(now);
            } else {
                self.silent_since = None;
            }
        }

        let sample_rate = open.sample_rate;
        let analyzer = self
            .analyzer
            .get_or_insert_with(|| SpectrumAnalyzer::new(sample_rate, block_size));
        let features = analyzer.analyze(&block);

        let dt = block_size as f32 / sample_rate as f32;
        let energy = self.pipeline.process(features.bass, features.mid, dt);

        AudioFeatureFrame {
            energy,
            bass: features.bass,
            mid: features.mid,
            centroid_hz: features.centroid_hz,
        }
    }

    /// Run one state-machine step: plan from health timers, then execute.
    fn step(&mut self, now: Instant) {
        let last_sample_at = self
            .open
            .as_ref()
            .and_then(|open| *open.shared.last_sample_at.lock());

        let action = plan_transition(
            &self.state,
            now,
            last_sample_at,
            self.silent_since,
            self.last_loopback_select,
            &self.cfg,
        );

        match action {
            EngineAction::Hold => {}
            EngineAction::Acquire => self.try_acquire(now),
            EngineAction::Reacquire => {
                log::warn!("Audio stream unhealthy ({}), re-acquiring", self.backend_label());
                self.teardown();
                self.try_acquire(now);
            }
        }
    }

    fn try_acquire(&mut self, now: Instant) {
        let prior_attempts = match self.state {
            CaptureBackendState::Retrying { attempts, .. } => attempts,
            _ => 0,
        };

        match self.acquire(now) {
            Ok(()) => {
                self.last_error = None;
                // Full re-acquisition: estimator, gain, gate, and smoother
                // restart together.
                self.pipeline.reset();
                log::info!("Audio capture active ({})", self.backend_label());
            }
            Err(e) => {
                log::warn!("Audio acquisition failed: {e}");
                self.last_error = Some(e.to_string());
                self.state = CaptureBackendState::Retrying {
                    since: now,
                    attempts: prior_attempts + 1,
                };
            }
        }
    }

    /// Try the ranked direct candidates, then the probed loopback path.
    fn acquire(&mut self, now: Instant) -> Result<(), CaptureError> {
        let devices = devices::list_devices();

        let requested_info = self.requested_device.as_deref().and_then(|requested| {
            devices
                .iter()
                .find(|d| d.id == requested || d.name == requested)
        });

        // A known-unreliable signature skips the direct path entirely.
        let skip_direct = requested_info
            .map(devices::is_unreliable_signature)
            .unwrap_or(false);
        if skip_direct {
            log::info!(
                "Requested device {:?} has an unreliable signature, going straight to loopback",
                self.requested_device
            );
        }

        if !skip_direct {
            let default_input = devices::default_input_id();
            let candidates = devices::rank_candidates(
                &devices,
                self.requested_device.as_deref(),
                default_input.as_deref(),
                &self.cfg.host_reliability_order,
            );

            for candidate in &candidates {
                match self.open_direct(candidate) {
                    Ok(open) => {
                        self.state = CaptureBackendState::DirectActive {
                            device_id: candidate.clone(),
                            sample_rate: open.sample_rate,
                        };
                        self.install(open);
                        return Ok(());
                    }
                    Err(e) => {
                        log::debug!("Direct open of {candidate} failed: {e}");
                    }
                }
            }
        }

        let (endpoint_id, open) = self.probe_and_open_loopback()?;
        self.state = CaptureBackendState::LoopbackActive {
            endpoint_id,
            sample_rate: open.sample_rate,
        };
        self.last_loopback_select = Some(now);
        self.install(open);
        Ok(())
    }

    fn install(&mut self, open: OpenStream) {
        self.analyzer = None;
        self.silent_since = None;
        self.open = Some(open);
    }

    fn teardown(&mut self) {
        self.open = None;
        self.analyzer = None;
        self.silent_since = None;
        self.last_rms = 0.0;
    }

    fn open_direct(&self, id: &str) -> Result<OpenStream, CaptureError> {
        let device = devices::device_by_id(id)
            .ok_or_else(|| CaptureError::DeviceNotFound(id.to_string()))?;
        open_input_stream(&device, id.to_string(), false, &self.cfg)
    }

    /// Enumerate loopback-capable endpoints (output devices opened as input
    /// streams), probe each for a fixed window, and open the loudest.
    fn probe_and_open_loopback(&self) -> Result<(String, OpenStream), CaptureError> {
        let window = Duration::from_millis(self.cfg.probe_window_ms);
        let mut best: Option<(f32, String)> = None;

        for info in devices::list_devices() {
            if info.max_output_channels == 0 {
                continue;
            }
            let Some(device) = devices::device_by_id(&info.id) else { continue };
            match probe_endpoint_rms(&device, window) {
                Ok(rms) => {
                    log::debug!("Loopback probe {}: rms {:.6}", info.id, rms);
                    if best.as_ref().map(|(b, _)| rms > *b).unwrap_or(true) {
                        best = Some((rms, info.id.clone()));
                    }
                }
                Err(e) => log::debug!("Loopback probe of {} failed: {e}", info.id),
            }
        }

        let (rms, endpoint_id) = best.ok_or(CaptureError::NoLoopbackEndpoint)?;
        log::info!("Selected loopback endpoint {endpoint_id} (probe rms {rms:.6})");

        let device = devices::device_by_id(&endpoint_id)
            .ok_or_else(|| CaptureError::DeviceNotFound(endpoint_id.clone()))?;
        let open = open_input_stream(&device, endpoint_id.clone(), true, &self.cfg)?;
        Ok((endpoint_id, open))
    }
}

/// Open an input stream, trying several (sample-rate, block-size)
/// combinations until one opens. Loopback streams follow the endpoint's own
/// output rate.
fn open_input_stream(
    device: &cpal::Device,
    label: String,
    is_loopback: bool,
    cfg: &AudioConfig,
) -> Result<OpenStream, CaptureError> {
    let default_config = if is_loopback {
        device.default_output_config()
    } else {
        device.default_input_config()
    }
    .map_err(|e| CaptureError::ConfigError(e.to_string()))?;

    let sample_format = default_config.sample_format();
    let channels = default_config.channels();

    let mut rates = if is_loopback {
        vec![default_config.sample_rate().0]
    } else {
        vec![cfg.sample_rate, default_config.sample_rate().0, 48000, 44100]
    };
    rates.dedup();

    let mut last_err = CaptureError::NoDirectDevice;

    for &rate in &rates {
        for buffer_size in [BufferSize::Fixed(cfg.block_size as u32), BufferSize::Default] {
            let stream_config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(rate),
                buffer_size,
            };

            let shared = Arc::new(StreamShared {
                // Two seconds of history, same as the capture clients this
                // engine is modeled on.
                ring: Mutex::new(SampleRing::new(rate as usize * 2)),
                last_sample_at: Mutex::new(Some(Instant::now())),
            });

            let built = match sample_format {
                SampleFormat::F32 => build_stream::<f32>(device, &stream_config, shared.clone()),
                SampleFormat::I16 => build_stream::<i16>(device, &stream_config, shared.clone()),
                SampleFormat::U16 => build_stream::<u16>(device, &stream_config, shared.clone()),
                other => {
                    return Err(CaptureError::UnsupportedFormat(format!("{other:?}")));
                }
            };

            match built {
                Ok(stream) => {
                    stream
                        .play()
                        .map_err(|e| CaptureError::PlayError(e.to_string()))?;
                    log::info!(
                        "Audio stream open: {label} at {rate} Hz, {channels} channels{}",
                        if is_loopback { " (loopback)" } else { "" }
                    );
                    return Ok(OpenStream {
                        _stream: stream,
                        shared,
                        sample_rate: rate,
                    });
                }
                Err(e) => last_err = CaptureError::StreamError(e.to_string()),
            }
        }
    }

    Err(last_err)
}

/// Build the input stream for one sample type; the callback downmixes to
/// mono and stamps the delivery time for the stall check.
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: Arc<StreamShared>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::Sample + cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels as usize;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let f32_data: Vec<f32> = data
                .iter()
                .map(|s| <f32 as cpal::Sample>::from_sample(*s))
                .collect();
            let mono = dsp::mix_to_mono(&f32_data, channels);

            shared.ring.lock().push(&mono);
            *shared.last_sample_at.lock() = Some(Instant::now());
        },
        |err| {
            log::error!("Audio stream error: {err}");
        },
        None,
    )
}

/// Open an endpoint briefly and measure its RMS. Bounded by the probe
/// window; used to rank loopback candidates.
fn probe_endpoint_rms(device: &cpal::Device, window: Duration) -> Result<f32, CaptureError> {
    let config = device
        .default_output_config()
        .map_err(|e| CaptureError::ConfigError(e.to_string()))?;

    let accum: Arc<Mutex<(f64, u64)>> = Arc::new(Mutex::new((0.0, 0)));
    let channels = config.channels() as usize;
    let stream_config: StreamConfig = config.clone().into();

    fn build_probe<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        channels: usize,
        accum: Arc<Mutex<(f64, u64)>>,
    ) -> Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: cpal::Sample + cpal::SizedSample,
        f32: cpal::FromSample<T>,
    {
        device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut sum_sq = 0.0f64;
                for frame in data.chunks(channels.max(1)) {
                    let mixed: f32 = frame
                        .iter()
                        .map(|s| <f32 as cpal::Sample>::from_sample(*s))
                        .sum::<f32>()
                        / frame.len() as f32;
                    sum_sq += (mixed as f64) * (mixed as f64);
                }
                let mut acc = accum.lock();
                acc.0 += sum_sq;
                acc.1 += (data.len() / channels.max(1)) as u64;
            },
            |err| log::debug!("Probe stream error: {err}"),
            None,
        )
    }

    let stream = match config.sample_format() {
        SampleFormat::F32 => build_probe::<f32>(device, &stream_config, channels, accum.clone()),
        SampleFormat::I16 => build_probe::<i16>(device, &stream_config, channels, accum.clone()),
        SampleFormat::U16 => build_probe::<u16>(device, &stream_config, channels, accum.clone()),
        other => return Err(CaptureError::UnsupportedFormat(format!("{other:?}"))),
    }
    .map_err(|e| CaptureError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::PlayError(e.to_string()))?;
    std::thread::sleep(window);
    drop(stream);

    let (sum_sq, count) = *accum.lock();
    if count == 0 {
        Ok(0.0)
    } else {
        Ok((sum_sq / count as f64).sqrt() as f32)
    }
}
