//! Controller configuration
//!
//! A flat table of named numeric/boolean parameters supplied at startup and
//! immutable for the lifetime of the process. `Config::default()` carries the
//! tuned values; an optional JSON file overlays individual fields.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Network / dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Receiver IP (the LED controller)
    pub udp_ip: String,

    /// Receiver UDP port
    pub udp_port: u16,

    /// Dispatch cadence in Hz (producers run at the same rate)
    pub rate_hz: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            udp_ip: "192.168.0.100".to_string(),
            udp_port: 4210,
            rate_hz: 25.0,
        }
    }
}

/// Screen sampling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Downscale grid width
    pub downscale_width: usize,

    /// Downscale grid height
    pub downscale_height: usize,

    /// Fraction cropped from the top (letterbox exclusion)
    pub crop_top: f32,

    /// Fraction cropped from the bottom
    pub crop_bottom: f32,

    /// Color smoothing time constant in ms
    pub ema_ms: f32,

    /// Fixed desaturation applied after weighting (0-1)
    pub desat_amount: f32,

    /// Boost saturation/value when the scene is dark overall
    pub enable_dark_boost: bool,

    /// Mean scene value below which the boost engages
    pub dark_boost_v_thresh: f32,

    /// Saturation/value scale added by the boost
    pub dark_boost_strength: f32,

    /// Bias color/direction toward the dominant screen region
    pub enable_spatial_bias: bool,

    /// Number of vertical strips for the region breakdown
    pub spatial_regions: usize,

    /// Fraction of the dominant region color blended into the base
    pub spatial_bias_blend: f32,

    /// Screen motion smoothing time constant in ms
    pub motion_ema_ms: f32,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            downscale_width: 64,
            downscale_height: 36,
            crop_top: 0.07,
            crop_bottom: 0.13,
            ema_ms: 600.0,
            desat_amount: 0.12,
            enable_dark_boost: true,
            dark_boost_v_thresh: 0.25,
            dark_boost_strength: 0.15,
            enable_spatial_bias: true,
            spatial_regions: 3,
            spatial_bias_blend: 0.35,
            motion_ema_ms: 180.0,
        }
    }
}

/// Audio capture and normalization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Requested device id ("host:name"); None picks the ranked default
    pub device: Option<String>,

    /// Preferred sample rate in Hz
    pub sample_rate: u32,

    /// Capture block size in samples
    pub block_size: usize,

    /// Envelope attack time constant in ms (rising energy)
    pub attack_ms: f32,

    /// Envelope release time constant in ms (falling energy)
    pub release_ms: f32,

    /// Normalization target on the motion-energy scale
    pub target_level: f32,

    /// Hard ceiling for normalized energy
    pub hard_cap: f32,

    /// Noise gate threshold
    pub noise_gate: f32,

    /// Seconds below the gate before energy is forced to exactly zero
    pub noise_gate_hold_s: f32,

    /// Spectral centroid mapping bounds (Hz) for the music color policy
    pub centroid_low_hz: f32,
    pub centroid_high_hz: f32,

    /// Host backends in empirical reliability order for device ranking
    pub host_reliability_order: Vec<String>,

    /// Loopback endpoint probe window in ms
    pub probe_window_ms: u64,

    /// RMS below this counts as a silent loopback endpoint
    pub silence_rms_epsilon: f32,

    /// Seconds of silence before a loopback endpoint is re-probed
    pub silence_reprobe_s: f32,

    /// Minimum interval between loopback re-selections
    pub loopback_reselect_min_s: f32,

    /// Minimum interval between direct open retries
    pub retry_min_s: f32,

    /// A direct stream whose last sample is older than this is stalled
    pub stall_s: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 48000,
            block_size: 2048,
            attack_ms: 100.0,
            release_ms: 700.0,
            target_level: 160.0,
            hard_cap: 190.0,
            noise_gate: 4.0,
            noise_gate_hold_s: 2.0,
            centroid_low_hz: 200.0,
            centroid_high_hz: 4000.0,
            host_reliability_order: vec![
                "wasapi".to_string(),
                "directsound".to_string(),
                "mme".to_string(),
                "alsa".to_string(),
                "coreaudio".to_string(),
            ],
            probe_window_ms: 300,
            silence_rms_epsilon: 1e-4,
            silence_reprobe_s: 3.0,
            loopback_reselect_min_s: 5.0,
            retry_min_s: 1.0,
            stall_s: 0.5,
        }
    }
}

/// Per-mode behavior: brightness ranges, speed mapping, and the optional
/// boolean-gated effects. Each toggle documents its effect at the field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Brightness (low, high) per mode 1-4; the packet carries the midpoint.
    /// Mode 5 (Off) is always zero.
    pub brightness_ranges: [(u8, u8); 4],

    /// Packet brightness is never allowed above this cap
    pub led_brightness_cap: u8,

    /// Seconds without an update_mode call before the StaticAmber fail-safe
    pub failsafe_s: f32,

    /// Max speed change per second in screen-driven modes
    pub speed_ramp_per_s: f32,

    /// Max speed change per second in audio-driven modes
    pub audio_speed_ramp_per_s: f32,

    /// Speed ceiling in audio-driven modes
    pub audio_speed_cap: f32,

    /// Motion below this is treated as silence in audio-driven modes
    pub audio_motion_gate: f32,

    /// Soft beat accent: a large motion jump grants a brief speed bump
    pub enable_soft_beat_accent: bool,
    pub motion_jump_threshold: f32,
    pub motion_bump_ms: u64,
    pub motion_bump_speed_cap: f32,

    /// Clamp brightness to a night-time ceiling
    pub enable_night_cap: bool,
    pub night_cap_value: u8,

    /// StaticAmber brightness drifts on a slow sinusoid so the signal is
    /// never perfectly dead
    pub enable_mode4_drift: bool,
    pub mode4_drift_amplitude: f32,
    pub mode4_drift_period_s: f32,

    /// StaticAmber color override
    pub mode4_static_color: [u8; 3],

    /// Music mode: nudge hue toward warm/cool from the spectral centroid
    pub enable_audio_hue_bias: bool,
    pub audio_hue_bias_degrees: f32,

    /// Music mode: alternate direction between two endpoints while audio
    /// motion is active, so the strip travels instead of flickering in place
    pub enable_audio_direction_oscillation: bool,
    pub audio_direction_period_s: f32,
    pub audio_direction_motion_threshold: f32,
    pub audio_direction_left: u8,
    pub audio_direction_right: u8,

    /// Step direction slowly while motion is low
    pub enable_direction_drift: bool,
    pub direction_drift_step: u8,
    pub direction_drift_interval_s: f32,
    pub direction_drift_motion_threshold: f32,

    /// Music mode: float brightness around the midpoint with energy
    pub enable_audio_brightness_float: bool,
    pub audio_brightness_float_range: f32,
    pub audio_brightness_float_alpha: f32,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            brightness_ranges: [(255, 255), (255, 255), (255, 255), (255, 255)],
            led_brightness_cap: 255,
            failsafe_s: 1.8,
            speed_ramp_per_s: 2.5,
            audio_speed_ramp_per_s: 0.8,
            audio_speed_cap: 0.65,
            audio_motion_gate: 4.0,
            enable_soft_beat_accent: false,
            motion_jump_threshold: 0.30,
            motion_bump_ms: 300,
            motion_bump_speed_cap: 0.15,
            enable_night_cap: false,
            night_cap_value: 90,
            enable_mode4_drift: false,
            mode4_drift_amplitude: 5.0,
            mode4_drift_period_s: 25.0,
            mode4_static_color: [255, 180, 80],
            enable_audio_hue_bias: true,
            audio_hue_bias_degrees: 8.0,
            enable_audio_direction_oscillation: true,
            audio_direction_period_s: 6.0,
            audio_direction_motion_threshold: 6.0,
            audio_direction_left: 32,
            audio_direction_right: 224,
            enable_direction_drift: false,
            direction_drift_step: 1,
            direction_drift_interval_s: 1.5,
            direction_drift_motion_threshold: 8.0,
            enable_audio_brightness_float: false,
            audio_brightness_float_range: 10.0,
            audio_brightness_float_alpha: 0.2,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub screen: ScreenConfig,
    pub audio: AudioConfig,
    pub modes: ModeConfig,
}

impl Config {
    /// Load configuration from a JSON file. Missing fields keep their
    /// defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Seconds per dispatch cycle
    pub fn cycle_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.network.rate_hz.max(1.0))
    }
}
