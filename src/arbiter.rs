//! Mode arbitration
//!
//! Consumes the screen and audio feature streams plus the externally
//! requested mode and produces a fully-resolved [`ControlState`] each
//! dispatch cycle: rate-limited perceptually-curved speed, per-mode
//! brightness, the music color policy, and the mod-256 frame counter.
//! Every time-dependent rule takes the cycle timestamp as a parameter, so
//! the whole arbiter runs under simulated time in tests.

use crate::audio::AudioFeatureFrame;
use crate::color::{hsv_to_rgb, rgb_to_hsv, ColorSample};
use crate::config::Config;
use crate::protocol::{ControlState, MOTION_SPEED_MAX};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Speed mapping floor: the slowest visible motion.
const SPEED_FLOOR: f32 = 0.15;

/// Below this raw audio energy the music color freezes instead of snapping
/// to the warm end of the hue range.
const MUSIC_COLOR_FREEZE_ENERGY: f32 = 2.0;

/// Neutral direction byte.
const DIRECTION_NEUTRAL: u8 = 128;

/// Operating modes, numbered as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Movie = 1,
    Music = 2,
    Hybrid = 3,
    StaticAmber = 4,
    Off = 5,
}

impl Mode {
    pub fn from_number(n: u8) -> Option<Mode> {
        match n {
            1 => Some(Mode::Movie),
            2 => Some(Mode::Music),
            3 => Some(Mode::Hybrid),
            4 => Some(Mode::StaticAmber),
            5 => Some(Mode::Off),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        self as u8
    }

    /// Music and Hybrid animate from audio; Movie from the screen.
    fn is_audio_driven(self) -> bool {
        matches!(self, Mode::Music | Mode::Hybrid)
    }
}

/// Latest feature values read from the shared snapshots.
#[derive(Debug, Clone, Copy)]
pub struct ArbiterInputs {
    /// Smoothed screen color (already spatially biased)
    pub base_color: ColorSample,

    /// Screen motion energy, 0-180
    pub screen_motion: f32,

    /// Direction hint derived from the dominant screen region
    pub direction_hint: u8,

    /// Latest audio feature frame
    pub audio: AudioFeatureFrame,
}

impl Default for ArbiterInputs {
    fn default() -> Self {
        Self {
            base_color: ColorSample::default(),
            screen_motion: 0.0,
            direction_hint: DIRECTION_NEUTRAL,
            audio: AudioFeatureFrame::default(),
        }
    }
}

/// The arbiter. Owns the requested-mode fail-safe, the speed ramp state,
/// the brightness cadence, and the per-mode color memory.
pub struct ModeArbiter {
    cfg: Arc<Config>,
    requested_mode: Mode,
    last_request_at: Instant,
    start: Instant,
    frame_id: u8,
    last_build_at: Option<Instant>,
    last_motion_energy: f32,
    last_speed: f32,
    bump_until: Option<Instant>,
    last_brightness: Option<f32>,
    brightness_float_state: Option<f32>,
    last_audio_color: ColorSample,
    drift_offset: u8,
    drift_last_at: Instant,
}

impl ModeArbiter {
    pub fn new(cfg: Arc<Config>, now: Instant) -> Self {
        Self {
            cfg,
            requested_mode: Mode::Movie,
            last_request_at: now,
            start: now,
            frame_id: 0,
            last_build_at: None,
            last_motion_energy: 0.0,
            last_speed: SPEED_FLOOR,
            bump_until: None,
            last_brightness: None,
            brightness_float_state: None,
            // Warm neutral so near-silence never flashes the hue-range end
            last_audio_color: ColorSample::new(180.0, 160.0, 140.0),
            drift_offset: 0,
            drift_last_at: now,
        }
    }

    /// Record the externally requested mode. Must be called periodically;
    /// the fail-safe below watches for its absence.
    pub fn update_mode(&mut self, mode: Mode, now: Instant) {
        self.requested_mode = mode;
        self.last_request_at = now;
    }

    /// The mode this cycle actually runs. A stalled control path (no
    /// `update_mode` for longer than the fail-safe window) forces
    /// StaticAmber so the room never holds a stale motion pattern.
    pub fn effective_mode(&self, now: Instant) -> Mode {
        let stale = now.duration_since(self.last_request_at).as_secs_f32()
            > self.cfg.modes.failsafe_s;
        if stale {
            Mode::StaticAmber
        } else {
            self.requested_mode
        }
    }

    /// Assemble the control state for one dispatch cycle.
    pub fn build(&mut self, inputs: &ArbiterInputs, now: Instant) -> ControlState {
        let cfg = Arc::clone(&self.cfg);
        let modes = &cfg.modes;
        let mode = self.effective_mode(now);

        let frame_id = self.frame_id;
        self.frame_id = self.frame_id.wrapping_add(1);

        // Motion source by mode, with the audio silence gate
        let mut motion = match mode {
            Mode::Movie => inputs.screen_motion,
            Mode::Music | Mode::Hybrid => inputs.audio.energy,
            Mode::StaticAmber | Mode::Off => 0.0,
        };
        if mode.is_audio_driven() && motion < modes.audio_motion_gate {
            motion = 0.0;
        }

        // Soft beat accent: a jump well above the previous sample grants a
        // brief speed bump
        if modes.enable_soft_beat_accent
            && mode == Mode::Movie
            && self.last_motion_energy > 0.0
            && motion > (1.0 + modes.motion_jump_threshold) * self.last_motion_energy
        {
            self.bump_until = Some(now + Duration::from_millis(modes.motion_bump_ms));
        }
        let in_bump = modes.enable_soft_beat_accent
            && self.bump_until.map(|until| now < until).unwrap_or(false);
        self.last_motion_energy = motion;

        let motion_energy = motion.round().clamp(0.0, 180.0) as u8;

        // Color policy
        let mut color = inputs.base_color;
        if mode == Mode::StaticAmber {
            color = modes.mode4_static_color.into();
        }
        if mode == Mode::Music {
            color = self.music_color(&inputs.audio);
            if modes.enable_audio_hue_bias {
                color = self.hue_biased(color, inputs.audio.centroid_hz);
            }
        }

        let motion_speed = self.ramped_speed(mode, motion_energy, in_bump, now);
        let brightness = self.brightness(mode, frame_id, motion, now);
        let direction = self.direction(mode, motion_energy, inputs.direction_hint, now);

        ControlState {
            mode: mode.number(),
            base_color: color,
            brightness,
            motion_energy,
            motion_speed,
            direction,
            frame_id,
        }
    }

    /// Square-root speed curve into [0.15, 1.2], ramp-limited per cycle.
    /// Exactly zero energy bypasses the ramp and snaps speed to zero.
    fn ramped_speed(&mut self, mode: Mode, energy: u8, in_bump: bool, now: Instant) -> f32 {
        let cfg = Arc::clone(&self.cfg);
        let modes = &cfg.modes;

        let dt = self
            .last_build_at
            .map(|at| now.duration_since(at).as_secs_f32())
            .unwrap_or(0.04)
            .max(1e-3);
        self.last_build_at = Some(now);

        if energy == 0 {
            self.last_speed = 0.0;
            return 0.0;
        }

        let norm = (energy as f32 / 180.0).clamp(0.0, 1.0);
        let mut speed = SPEED_FLOOR + (MOTION_SPEED_MAX - SPEED_FLOOR) * norm.sqrt();

        if mode.is_audio_driven() {
            speed = speed.min(modes.audio_speed_cap);
        }
        if in_bump {
            speed = (speed + modes.motion_bump_speed_cap).min(MOTION_SPEED_MAX);
        }

        let ramp_per_s = if mode.is_audio_driven() {
            modes.audio_speed_ramp_per_s
        } else {
            modes.speed_ramp_per_s
        };
        let max_delta = ramp_per_s * dt;

        speed = speed
            .clamp(0.0, MOTION_SPEED_MAX)
            .clamp(self.last_speed - max_delta, self.last_speed + max_delta)
            .clamp(0.0, MOTION_SPEED_MAX);
        self.last_speed = speed;
        speed
    }

    /// Midpoint of the per-mode range, recomputed only every third cycle to
    /// avoid visible shimmer, with the optional night cap, StaticAmber
    /// drift, and music brightness float applied on top.
    fn brightness(&mut self, mode: Mode, frame_id: u8, motion: f32, now: Instant) -> u8 {
        let cfg = Arc::clone(&self.cfg);
        let modes = &cfg.modes;
        let cap = modes.led_brightness_cap as f32;

        if frame_id % 3 == 0 || self.last_brightness.is_none() {
            self.last_brightness = Some(self.midpoint_for_mode(mode));
        }
        let mut brightness = self.last_brightness.unwrap_or(0.0);

        if modes.enable_night_cap {
            brightness = brightness.min(modes.night_cap_value as f32);
        }

        if modes.enable_mode4_drift && mode == Mode::StaticAmber {
            let period = modes.mode4_drift_period_s.max(1.0);
            let t = now.duration_since(self.start).as_secs_f32();
            let drift =
                modes.mode4_drift_amplitude * (2.0 * std::f32::consts::PI * t / period).sin();
            brightness = (brightness + drift).clamp(0.0, cap);
        }

        if modes.enable_audio_brightness_float && mode == Mode::Music {
            let range = modes.audio_brightness_float_range;
            let midpoint = brightness;
            if motion <= 0.0 {
                brightness = (midpoint - range / 2.0).clamp(0.0, cap);
                self.brightness_float_state = Some(brightness);
            } else {
                let norm = (motion / 200.0).clamp(0.0, 1.0);
                let target = midpoint - range / 2.0 + norm * range;
                let alpha = modes.audio_brightness_float_alpha;
                let state = self.brightness_float_state.unwrap_or(midpoint);
                let next = alpha * target + (1.0 - alpha) * state;
                self.brightness_float_state = Some(next);
                brightness = next.clamp(0.0, cap);
            }
        }

        brightness.clamp(0.0, cap).round() as u8
    }

    fn midpoint_for_mode(&self, mode: Mode) -> f32 {
        if mode == Mode::Off {
            return 0.0;
        }
        let (low, high) = self.cfg.modes.brightness_ranges[mode.number() as usize - 1];
        (low as f32 + high as f32) / 2.0
    }

    /// Direction: the screen hint by default, the optional idle drift, and
    /// the music-mode square-wave oscillation on top.
    fn direction(&mut self, mode: Mode, energy: u8, hint: u8, now: Instant) -> u8 {
        let cfg = Arc::clone(&self.cfg);
        let modes = &cfg.modes;
        let mut direction = hint;

        if modes.enable_direction_drift {
            if (energy as f32) < modes.direction_drift_motion_threshold {
                let interval = Duration::from_secs_f32(modes.direction_drift_interval_s);
                if now.duration_since(self.drift_last_at) >= interval {
                    self.drift_offset = self.drift_offset.wrapping_add(modes.direction_drift_step);
                    self.drift_last_at = now;
                }
                direction = direction.wrapping_add(self.drift_offset);
            } else {
                self.drift_last_at = now;
            }
        }

        if mode == Mode::Music && modes.enable_audio_direction_oscillation {
            if energy as f32 >= modes.audio_direction_motion_threshold {
                let period = modes.audio_direction_period_s.max(0.5);
                let t = now.duration_since(self.start).as_secs_f32();
                let phase = (t % period) / period;
                direction = if phase < 0.5 {
                    modes.audio_direction_left
                } else {
                    modes.audio_direction_right
                };
            } else {
                direction = DIRECTION_NEUTRAL;
            }
        }

        direction
    }

    /// Music color policy: hue from the spectral centroid between the
    /// configured bounds (warm 20 deg to cool 220 deg), saturation and
    /// value from energy with floor/ceiling clamps. Near-silence freezes
    /// the color instead of snapping to the warm end.
    fn music_color(&mut self, audio: &AudioFeatureFrame) -> ColorSample {
        let energy = audio.energy.max(0.0);
        if energy < MUSIC_COLOR_FREEZE_ENERGY {
            return self.last_audio_color;
        }

        let norm_c = self.centroid_norm(audio.centroid_hz);
        let hue = (20.0 + norm_c * 200.0) / 360.0;
        let sat = (energy / 160.0).clamp(0.08, 0.9);
        let val = 0.55 + 0.35 * (energy / 140.0).min(1.0);

        let (r, g, b) = hsv_to_rgb(hue, sat, val);
        let color = ColorSample::new(r * 255.0, g * 255.0, b * 255.0);
        self.last_audio_color = color;
        color
    }

    /// Nudge hue warm/cool by a small configured angle from the centroid.
    fn hue_biased(&self, color: ColorSample, centroid_hz: f32) -> ColorSample {
        let norm_c = self.centroid_norm(centroid_hz);
        let shift = (norm_c - 0.5) * 2.0 * (self.cfg.modes.audio_hue_bias_degrees / 360.0);

        let (h, s, v) = rgb_to_hsv(color.r / 255.0, color.g / 255.0, color.b / 255.0);
        let (r, g, b) = hsv_to_rgb(h + shift, s, v);
        ColorSample::new(r * 255.0, g * 255.0, b * 255.0)
    }

    fn centroid_norm(&self, centroid_hz: f32) -> f32 {
        let low = self.cfg.audio.centroid_low_hz;
        let high = self.cfg.audio.centroid_high_hz;
        ((centroid_hz.max(0.0) - low) / (high - low).max(1.0)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketCodec;

    fn cfg() -> Arc<Config> {
        Arc::new(Config::default())
    }

    fn at(t0: Instant, secs: f64) -> Instant {
        t0 + Duration::from_secs_f64(secs)
    }

    fn audio_inputs(energy: f32, centroid_hz: f32) -> ArbiterInputs {
        ArbiterInputs {
            audio: AudioFeatureFrame { energy, centroid_hz, ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn effective_mode_follows_requests_until_stale() {
        let t0 = Instant::now();
        let mut arbiter = ModeArbiter::new(cfg(), t0);

        arbiter.update_mode(Mode::Music, t0);
        assert_eq!(arbiter.effective_mode(at(t0, 1.0)), Mode::Music);

        // Past the 1.8s fail-safe window the mode forces StaticAmber
        assert_eq!(arbiter.effective_mode(at(t0, 2.0)), Mode::StaticAmber);
        let state = arbiter.build(&ArbiterInputs::default(), at(t0, 2.0));
        assert_eq!(state.mode, 4);

        // A fresh request restores it
        arbiter.update_mode(Mode::Music, at(t0, 2.5));
        assert_eq!(arbiter.effective_mode(at(t0, 2.6)), Mode::Music);
    }

    #[test]
    fn frame_id_increments_by_one_mod_256() {
        let t0 = Instant::now();
        let mut arbiter = ModeArbiter::new(cfg(), t0);
        arbiter.frame_id = 254;

        arbiter.update_mode(Mode::Movie, t0);
        let a = arbiter.build(&ArbiterInputs::default(), at(t0, 0.04));
        let b = arbiter.build(&ArbiterInputs::default(), at(t0, 0.08));
        let c = arbiter.build(&ArbiterInputs::default(), at(t0, 0.12));

        assert_eq!(a.frame_id, 254);
        assert_eq!(b.frame_id, 255);
        assert_eq!(c.frame_id, 0);
    }

    #[test]
    fn consecutive_packets_differ_only_in_frame_id_and_checksum() {
        let t0 = Instant::now();
        let mut arbiter = ModeArbiter::new(cfg(), t0);
        arbiter.update_mode(Mode::Movie, t0);

        let inputs = ArbiterInputs {
            base_color: ColorSample::new(40.0, 60.0, 80.0),
            ..Default::default()
        };
        let codec = PacketCodec::new(255);

        let p1 = codec.encode(&arbiter.build(&inputs, at(t0, 0.04)));
        arbiter.update_mode(Mode::Movie, at(t0, 0.05));
        let p2 = codec.encode(&arbiter.build(&inputs, at(t0, 0.08)));

        for i in 0..12 {
            if i == 9 || i == 10 {
                continue;
            }
            assert_eq!(p1[i], p2[i], "byte {i} should not change");
        }
        assert_eq!(p2[9], p1[9].wrapping_add(1));
    }

    #[test]
    fn zero_motion_forces_zero_speed_regardless_of_ramp_state() {
        let t0 = Instant::now();
        let mut arbiter = ModeArbiter::new(cfg(), t0);
        arbiter.update_mode(Mode::Movie, t0);

        // Ramp the speed up first
        let moving = ArbiterInputs { screen_motion: 170.0, ..Default::default() };
        let mut t = 0.04;
        for _ in 0..30 {
            arbiter.update_mode(Mode::Movie, at(t0, t));
            arbiter.build(&moving, at(t0, t));
            t += 0.04;
        }
        assert!(arbiter.last_speed > 0.5);

        let state = arbiter.build(&ArbiterInputs::default(), at(t0, t));
        assert_eq!(state.motion_speed, 0.0);
        assert_eq!(state.motion_energy, 0);
    }

    #[test]
    fn speed_is_ramp_limited_per_cycle() {
        let t0 = Instant::now();
        let mut arbiter = ModeArbiter::new(cfg(), t0);
        arbiter.update_mode(Mode::Movie, t0);

        let moving = ArbiterInputs { screen_motion: 180.0, ..Default::default() };
        let s1 = arbiter.build(&moving, at(t0, 0.04));
        // 2.5/s ramp over 40ms allows at most 0.1 of change from 0.15
        assert!(s1.motion_speed <= 0.15 + 0.1 + 1e-5, "got {}", s1.motion_speed);

        arbiter.update_mode(Mode::Movie, at(t0, 0.05));
        let s2 = arbiter.build(&moving, at(t0, 0.08));
        assert!(s2.motion_speed > s1.motion_speed);
        assert!(s2.motion_speed <= s1.motion_speed + 0.1 + 1e-5);
    }

    #[test]
    fn audio_modes_cap_speed() {
        let t0 = Instant::now();
        let mut arbiter = ModeArbiter::new(cfg(), t0);

        let loud = audio_inputs(180.0, 1000.0);
        let mut t = 0.04;
        let mut last = 0.0;
        for _ in 0..200 {
            arbiter.update_mode(Mode::Music, at(t0, t));
            last = arbiter.build(&loud, at(t0, t)).motion_speed;
            t += 0.04;
        }
        assert!((last - 0.65).abs() < 1e-4, "speed should settle at the cap, got {last}");
    }

    #[test]
    fn audio_motion_below_gate_is_silenced() {
        let t0 = Instant::now();
        let mut arbiter = ModeArbiter::new(cfg(), t0);
        arbiter.update_mode(Mode::Hybrid, t0);

        let quiet = audio_inputs(3.0, 500.0);
        let state = arbiter.build(&quiet, at(t0, 0.04));
        assert_eq!(state.motion_energy, 0);
        assert_eq!(state.motion_speed, 0.0);
    }

    #[test]
    fn static_amber_mode_forces_configured_color() {
        let t0 = Instant::now();
        let mut arbiter = ModeArbiter::new(cfg(), t0);
        arbiter.update_mode(Mode::StaticAmber, t0);

        let inputs = ArbiterInputs {
            base_color: ColorSample::new(1.0, 2.0, 3.0),
            ..Default::default()
        };
        let state = arbiter.build(&inputs, at(t0, 0.04));
        assert_eq!(state.base_color.to_bytes(), [255, 180, 80]);
        assert_eq!(state.motion_energy, 0);
    }

    #[test]
    fn hybrid_keeps_screen_color_with_audio_motion() {
        let t0 = Instant::now();
        let mut arbiter = ModeArbiter::new(cfg(), t0);
        arbiter.update_mode(Mode::Hybrid, t0);

        let inputs = ArbiterInputs {
            base_color: ColorSample::new(200.0, 10.0, 30.0),
            audio: AudioFeatureFrame { energy: 77.0, ..Default::default() },
            ..Default::default()
        };
        let state = arbiter.build(&inputs, at(t0, 0.04));
        assert_eq!(state.base_color.to_bytes(), [200, 10, 30]);
        assert_eq!(state.motion_energy, 77);
    }

    #[test]
    fn music_color_tracks_centroid_and_freezes_on_silence() {
        let t0 = Instant::now();
        let mut arbiter = ModeArbiter::new(cfg(), t0);
        arbiter.update_mode(Mode::Music, t0);

        let loud = audio_inputs(80.0, 1000.0);
        let s1 = arbiter.build(&loud, at(t0, 0.04));
        // Audio policy replaces the (default black) screen color
        assert_ne!(s1.base_color.to_bytes(), [0, 0, 0]);

        // Near-silence: color frozen at the last computed value (the hue
        // bias still sees the same centroid, so the output is identical)
        arbiter.update_mode(Mode::Music, at(t0, 0.05));
        let quiet = audio_inputs(1.0, 1000.0);
        let s2 = arbiter.build(&quiet, at(t0, 0.08));
        assert_eq!(s2.base_color, s1.base_color);
    }

    #[test]
    fn music_hue_moves_cooler_with_higher_centroid() {
        let t0 = Instant::now();
        let cfg = cfg();

        let mut warm_arbiter = ModeArbiter::new(cfg.clone(), t0);
        warm_arbiter.update_mode(Mode::Music, t0);
        let warm = warm_arbiter.build(&audio_inputs(100.0, 300.0), at(t0, 0.04));

        let mut cool_arbiter = ModeArbiter::new(cfg, t0);
        cool_arbiter.update_mode(Mode::Music, t0);
        let cool = cool_arbiter.build(&audio_inputs(100.0, 3800.0), at(t0, 0.04));

        // Low centroid sits at the warm end (red-ish), high at the cool end
        assert!(warm.base_color.r > warm.base_color.b, "warm: {:?}", warm.base_color);
        assert!(cool.base_color.b > cool.base_color.r, "cool: {:?}", cool.base_color);
    }

    #[test]
    fn music_direction_oscillates_on_the_configured_period() {
        let t0 = Instant::now();
        let mut arbiter = ModeArbiter::new(cfg(), t0);

        let loud = audio_inputs(40.0, 1200.0);

        arbiter.update_mode(Mode::Music, at(t0, 1.0));
        let first = arbiter.build(&loud, at(t0, 1.0));
        assert_eq!(first.direction, 32);

        arbiter.update_mode(Mode::Music, at(t0, 4.5));
        let second = arbiter.build(&loud, at(t0, 4.5));
        assert_eq!(second.direction, 224);

        // Below the oscillation threshold the direction holds neutral
        arbiter.update_mode(Mode::Music, at(t0, 4.6));
        let idle = arbiter.build(&audio_inputs(0.0, 1200.0), at(t0, 4.6));
        assert_eq!(idle.direction, 128);
    }

    #[test]
    fn brightness_recomputes_every_third_cycle() {
        let t0 = Instant::now();
        let mut config = Config::default();
        config.modes.brightness_ranges = [(100, 100), (200, 200), (150, 150), (90, 90)];
        let mut arbiter = ModeArbiter::new(Arc::new(config), t0);

        arbiter.update_mode(Mode::Movie, t0);
        let b0 = arbiter.build(&ArbiterInputs::default(), at(t0, 0.04)).brightness;
        assert_eq!(b0, 100);

        // Mode switches but brightness holds until the next 3rd cycle
        arbiter.update_mode(Mode::Music, at(t0, 0.05));
        let b1 = arbiter.build(&ArbiterInputs::default(), at(t0, 0.08)).brightness;
        let b2 = arbiter.build(&ArbiterInputs::default(), at(t0, 0.12)).brightness;
        assert_eq!(b1, 100);
        assert_eq!(b2, 100);

        let b3 = arbiter.build(&ArbiterInputs::default(), at(t0, 0.16)).brightness;
        assert_eq!(b3, 200);
    }

    #[test]
    fn off_mode_drops_brightness_to_zero() {
        let t0 = Instant::now();
        let mut arbiter = ModeArbiter::new(cfg(), t0);
        arbiter.update_mode(Mode::Off, t0);

        let mut t = 0.04;
        let mut brightness = u8::MAX;
        for _ in 0..3 {
            arbiter.update_mode(Mode::Off, at(t0, t));
            brightness = arbiter.build(&ArbiterInputs::default(), at(t0, t)).brightness;
            t += 0.04;
        }
        assert_eq!(brightness, 0);
    }

    #[test]
    fn night_cap_limits_brightness() {
        let t0 = Instant::now();
        let mut config = Config::default();
        config.modes.enable_night_cap = true;
        config.modes.night_cap_value = 90;
        let mut arbiter = ModeArbiter::new(Arc::new(config), t0);

        arbiter.update_mode(Mode::Movie, t0);
        let state = arbiter.build(&ArbiterInputs::default(), at(t0, 0.04));
        assert_eq!(state.brightness, 90);
    }

    #[test]
    fn mode4_drift_stays_within_amplitude_of_midpoint() {
        let t0 = Instant::now();
        let mut config = Config::default();
        config.modes.enable_mode4_drift = true;
        config.modes.brightness_ranges = [(255, 255), (255, 255), (255, 255), (100, 100)];
        let mut arbiter = ModeArbiter::new(Arc::new(config), t0);

        let mut t = 0.0;
        for _ in 0..100 {
            arbiter.update_mode(Mode::StaticAmber, at(t0, t));
            let b = arbiter.build(&ArbiterInputs::default(), at(t0, t)).brightness as f32;
            assert!((b - 100.0).abs() <= 5.5, "drift out of bounds: {b}");
            t += 0.3;
        }
    }

    #[test]
    fn soft_beat_accent_bumps_speed_briefly() {
        let t0 = Instant::now();
        let mut config = Config::default();
        config.modes.enable_soft_beat_accent = true;
        let mut arbiter = ModeArbiter::new(Arc::new(config), t0);

        // Establish a baseline motion level
        let mut t = 0.04;
        for _ in 0..40 {
            arbiter.update_mode(Mode::Movie, at(t0, t));
            arbiter.build(
                &ArbiterInputs { screen_motion: 50.0, ..Default::default() },
                at(t0, t),
            );
            t += 0.04;
        }
        let steady = arbiter.last_speed;

        // A >30% jump triggers the bump window
        arbiter.update_mode(Mode::Movie, at(t0, t));
        let bumped = arbiter.build(
            &ArbiterInputs { screen_motion: 90.0, ..Default::default() },
            at(t0, t),
        );
        assert!(bumped.motion_speed > steady, "{} vs {steady}", bumped.motion_speed);
    }
}
