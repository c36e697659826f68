//! Shared state between workers, the dispatcher, and the control surface
//!
//! Producers publish immutable snapshots with last-value-wins semantics;
//! the dispatcher reads the latest without blocking anyone. Staleness is an
//! explicit, acceptable fallback, never an error.

use crate::arbiter::Mode;
use crate::audio::AudioFeatureFrame;
use crate::color::ColorSample;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// A single-slot snapshot store. `publish` atomically replaces the current
/// snapshot; `load` hands out a cheap reference to the latest one.
pub struct Published<T> {
    slot: Mutex<Arc<T>>,
}

impl<T> Published<T> {
    pub fn new(initial: T) -> Self {
        Self { slot: Mutex::new(Arc::new(initial)) }
    }

    pub fn publish(&self, value: T) {
        *self.slot.lock() = Arc::new(value);
    }

    pub fn load(&self) -> Arc<T> {
        self.slot.lock().clone()
    }
}

impl<T: Default> Default for Published<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// What the audio worker publishes each cycle.
#[derive(Debug, Clone, Default)]
pub struct AudioSnapshot {
    pub features: AudioFeatureFrame,
    pub backend_label: String,
    pub rms: f32,
    pub error: Option<String>,
}

/// What the screen worker publishes each cycle.
#[derive(Debug, Clone)]
pub struct ScreenSnapshot {
    pub color: ColorSample,
    pub motion_energy: f32,
    pub direction_hint: u8,
}

impl Default for ScreenSnapshot {
    fn default() -> Self {
        Self {
            color: ColorSample::default(),
            motion_energy: 0.0,
            direction_hint: 128,
        }
    }
}

/// Read-only status for the GUI/CLI collaborator, polled at ~5 Hz.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub mode: u8,
    pub color: [u8; 3],
    pub motion_energy: u8,
    pub brightness: u8,
    pub backend: String,
    pub rms: f32,
    pub last_error: Option<String>,
}

struct ControlRequests {
    mode: Mode,
    audio_device: Option<String>,
}

/// The shared hub. One instance per controller.
pub struct SharedState {
    pub audio: Published<AudioSnapshot>,
    pub screen: Published<ScreenSnapshot>,
    requests: Mutex<ControlRequests>,
    status: Mutex<StatusSnapshot>,
}

impl SharedState {
    pub fn new(initial_mode: Mode, audio_device: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            audio: Published::default(),
            screen: Published::default(),
            requests: Mutex::new(ControlRequests { mode: initial_mode, audio_device }),
            status: Mutex::new(StatusSnapshot::default()),
        })
    }

    pub fn requested_mode(&self) -> Mode {
        self.requests.lock().mode
    }

    pub fn requested_audio_device(&self) -> Option<String> {
        self.requests.lock().audio_device.clone()
    }

    pub fn set_status(&self, status: StatusSnapshot) {
        *self.status.lock() = status;
    }
}

/// Cloneable handle handed to front-ends: set the desired mode and audio
/// device, poll the status snapshot.
#[derive(Clone)]
pub struct ControllerHandle {
    shared: Arc<SharedState>,
}

impl ControllerHandle {
    pub fn new(shared: Arc<SharedState>) -> Self {
        Self { shared }
    }

    /// Request a mode by wire number. Returns false for numbers outside
    /// 1-5.
    pub fn set_mode(&self, number: u8) -> bool {
        match Mode::from_number(number) {
            Some(mode) => {
                self.shared.requests.lock().mode = mode;
                true
            }
            None => false,
        }
    }

    pub fn set_audio_device(&self, device: Option<String>) {
        self.shared.requests.lock().audio_device = device;
    }

    pub fn status(&self) -> StatusSnapshot {
        self.shared.status.lock().clone()
    }
}
