//! Periodic workers and the dispatch cycle
//!
//! Two producer threads (one per capture source, ~25 Hz) publish feature
//! snapshots into the shared state; a tokio interval at the same cadence
//! (decoupled in phase) reads the latest snapshots, runs the arbiter and
//! codec, and fires exactly one datagram. The dispatcher never blocks on a
//! slow or failed producer; it reuses whatever snapshot is current. Device
//! (re)acquisition stays on the audio thread, never the dispatch path.

use crate::arbiter::{ArbiterInputs, ModeArbiter};
use crate::audio::AudioCaptureEngine;
use crate::color::ColorSample;
use crate::config::Config;
use crate::protocol::{PacketCodec, PacketSender, SendError};
use crate::screen::{FrameSource, ScreenColorSampler};
use crate::state::{AudioSnapshot, ScreenSnapshot, SharedState, StatusSnapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Cadence of the mode-refresh loop that feeds the arbiter fail-safe.
const MODE_REFRESH_PERIOD: Duration = Duration::from_millis(100);

/// Dispatch setup errors. Once running, no cycle error is fatal.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] SendError),
}

/// Screen motion: sum of absolute color deltas between consecutive
/// smoothed colors, scaled and clamped to the 0-180 energy range, then
/// smoothed by its own short EMA.
struct MotionTracker {
    alpha: f32,
    value: f32,
    last_color: ColorSample,
}

impl MotionTracker {
    fn new(ema_ms: f32, frame_ms: f32) -> Self {
        Self {
            alpha: 1.0 - (-frame_ms / ema_ms.max(1e-3)).exp(),
            value: 0.0,
            last_color: ColorSample::default(),
        }
    }

    fn update(&mut self, color: ColorSample) -> f32 {
        let delta = color.abs_diff_sum(self.last_color);
        let raw = (delta * 0.8).clamp(0.0, 180.0);
        self.value = self.alpha * raw + (1.0 - self.alpha) * self.value;
        self.last_color = color;
        self.value
    }
}

/// Spawn the screen producer: sample, derive motion, publish.
pub fn spawn_screen_worker(
    cfg: Arc<Config>,
    shared: Arc<SharedState>,
    mut source: Box<dyn FrameSource>,
) -> Result<thread::JoinHandle<()>, DispatchError> {
    let handle = thread::Builder::new()
        .name("screen-capture".to_string())
        .spawn(move || {
            let period = cfg.cycle_period();
            let frame_ms = period.as_secs_f32() * 1000.0;
            let mut sampler = ScreenColorSampler::new(cfg.screen.clone());
            let mut motion = MotionTracker::new(cfg.screen.motion_ema_ms, frame_ms);

            log::info!("Screen worker started ({} Hz)", cfg.network.rate_hz);
            loop {
                let frame = source.next_frame();
                let (color, direction_hint) = if cfg.screen.enable_spatial_bias {
                    let sample =
                        sampler.sample_regions(frame.as_ref(), cfg.screen.spatial_regions);
                    (sample.color, sample.direction_hint)
                } else {
                    (sampler.sample(frame.as_ref()), 128)
                };

                let motion_energy = motion.update(color);
                shared.screen.publish(ScreenSnapshot {
                    color,
                    motion_energy,
                    direction_hint,
                });

                thread::sleep(period);
            }
        })?;
    Ok(handle)
}

/// Spawn the audio producer: poll the capture engine, publish features and
/// telemetry. All blocking device I/O happens here.
pub fn spawn_audio_worker(
    cfg: Arc<Config>,
    shared: Arc<SharedState>,
) -> Result<thread::JoinHandle<()>, DispatchError> {
    let handle = thread::Builder::new()
        .name("audio-capture".to_string())
        .spawn(move || {
            let period = cfg.cycle_period();
            let mut engine = AudioCaptureEngine::new(cfg.audio.clone());

            log::info!("Audio worker started ({} Hz)", cfg.network.rate_hz);
            loop {
                engine.set_device(shared.requested_audio_device());
                let features = engine.poll();

                shared.audio.publish(AudioSnapshot {
                    features,
                    backend_label: engine.backend_label(),
                    rms: engine.last_rms(),
                    error: engine.last_error().map(String::from),
                });

                thread::sleep(period);
            }
        })?;
    Ok(handle)
}

/// Read the latest snapshots and resolve one cycle through the arbiter.
fn build_cycle(
    arbiter: &mut ModeArbiter,
    shared: &SharedState,
    now: Instant,
) -> (crate::protocol::ControlState, Arc<AudioSnapshot>) {
    let audio = shared.audio.load();
    let screen = shared.screen.load();

    let inputs = ArbiterInputs {
        base_color: screen.color,
        screen_motion: screen.motion_energy,
        direction_hint: screen.direction_hint,
        audio: audio.features,
    };
    (arbiter.build(&inputs, now), audio)
}

/// Run the controller: spawn both producers, then dispatch forever. A bad
/// cycle never halts the loop; the next one fires on schedule.
pub async fn run(
    cfg: Arc<Config>,
    shared: Arc<SharedState>,
    frame_source: Box<dyn FrameSource>,
) -> Result<(), DispatchError> {
    // Producers run detached for the life of the process.
    let _screen = spawn_screen_worker(cfg.clone(), shared.clone(), frame_source)?;
    let _audio = spawn_audio_worker(cfg.clone(), shared.clone())?;

    let sender = PacketSender::new(&cfg.network.udp_ip, cfg.network.udp_port).await?;
    log::info!("Dispatching to {}", sender.target());

    let codec = PacketCodec::new(cfg.modes.led_brightness_cap);
    let arbiter = Arc::new(Mutex::new(ModeArbiter::new(cfg.clone(), Instant::now())));

    // Mode refresh runs on its own cadence so the arbiter fail-safe can
    // tell a stalled dispatcher from a quiet one.
    {
        let arbiter = arbiter.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MODE_REFRESH_PERIOD);
            loop {
                ticker.tick().await;
                arbiter.lock().update_mode(shared.requested_mode(), Instant::now());
            }
        });
    }

    let mut ticker = tokio::time::interval(cfg.cycle_period());
    loop {
        ticker.tick().await;
        let now = Instant::now();

        let (state, audio) = build_cycle(&mut arbiter.lock(), &shared, now);
        let packet = codec.encode(&state);
        sender.send(&packet).await;

        shared.set_status(StatusSnapshot {
            mode: state.mode,
            color: state.base_color.to_bytes(),
            motion_energy: state.motion_energy,
            brightness: packet[5],
            backend: audio.backend_label.clone(),
            rms: audio.rms,
            last_error: audio.error.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::Mode;
    use crate::audio::AudioFeatureFrame;

    #[test]
    fn motion_tracker_rises_with_color_change_and_decays_on_stillness() {
        let mut tracker = MotionTracker::new(180.0, 40.0);

        // Big color swing produces energy
        tracker.update(ColorSample::new(0.0, 0.0, 0.0));
        let rising = tracker.update(ColorSample::new(120.0, 120.0, 120.0));
        assert!(rising > 10.0, "got {rising}");

        // Held color decays back toward zero
        let mut value = rising;
        for _ in 0..100 {
            value = tracker.update(ColorSample::new(120.0, 120.0, 120.0));
        }
        assert!(value < 1.0, "got {value}");
    }

    #[test]
    fn motion_tracker_clamps_to_energy_range() {
        let mut tracker = MotionTracker::new(1.0, 40.0); // alpha ~ 1
        tracker.update(ColorSample::new(0.0, 0.0, 0.0));
        let spike = tracker.update(ColorSample::new(255.0, 255.0, 255.0));
        assert!(spike <= 180.0);
    }

    #[test]
    fn build_cycle_resolves_from_latest_snapshots() {
        let cfg = Arc::new(Config::default());
        let shared = SharedState::new(Mode::Hybrid, None);
        let t0 = Instant::now();
        let mut arbiter = ModeArbiter::new(cfg, t0);
        arbiter.update_mode(Mode::Hybrid, t0);

        shared.screen.publish(ScreenSnapshot {
            color: ColorSample::new(200.0, 10.0, 30.0),
            motion_energy: 50.0,
            direction_hint: 224,
        });
        shared.audio.publish(AudioSnapshot {
            features: AudioFeatureFrame { energy: 90.0, ..Default::default() },
            backend_label: "loopback: WASAPI:Speakers".to_string(),
            rms: 0.2,
            error: None,
        });

        let (state, audio) = build_cycle(&mut arbiter, &shared, t0 + Duration::from_millis(40));
        assert_eq!(state.mode, 3);
        assert_eq!(state.base_color.to_bytes(), [200, 10, 30]);
        assert_eq!(state.motion_energy, 90);
        assert_eq!(state.direction, 224);
        assert_eq!(audio.backend_label, "loopback: WASAPI:Speakers");
    }
}
