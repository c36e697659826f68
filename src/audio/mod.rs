//! Audio capture and feature extraction

pub mod devices;
pub mod dsp;
mod engine;

pub use devices::{default_input_id, list_devices, DeviceInfo};
pub use engine::{AudioCaptureEngine, CaptureBackendState, CaptureError};

/// Features derived from one captured audio block. Produced once per poll,
/// overwritten each cycle; the estimator state behind `energy` is the only
/// history kept.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioFeatureFrame {
    /// Normalized, gated, smoothed motion energy in [0, hard_cap]
    pub energy: f32,

    /// Raw bass band magnitude sum (20-150 Hz)
    pub bass: f32,

    /// Raw mid band magnitude sum (150-2000 Hz)
    pub mid: f32,

    /// Magnitude-weighted mean frequency over the full spectrum
    pub centroid_hz: f32,
}
