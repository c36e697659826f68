//! Covelight controller library
//!
//! Samples the screen image and system audio, derives a smoothed mood
//! color and motion energy, arbitrates operating modes, and streams a
//! fixed-format 12-byte control packet (~25 Hz) to an addressable-LED
//! receiver over UDP.
//!
//! The capture engines self-heal: the audio engine survives unreliable
//! host backends, disappearing devices, and playback-route changes by
//! failing over between direct and probed loopback capture; the screen
//! sampler degrades to its last color when frames stop arriving.

pub mod arbiter;
pub mod audio;
pub mod color;
pub mod config;
pub mod dispatcher;
pub mod protocol;
pub mod screen;
pub mod state;

pub use arbiter::{ArbiterInputs, Mode, ModeArbiter};
pub use color::ColorSample;
pub use config::Config;
pub use state::{ControllerHandle, SharedState, StatusSnapshot};
