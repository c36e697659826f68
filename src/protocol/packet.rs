//! Fixed-layout control packet codec
//!
//! The pipeline's sole output contract: a 12-byte datagram with a constant
//! header/footer frame and an XOR checksum. Encoding is pure; every numeric
//! field is clamped to its documented range before it reaches the wire.

use crate::color::ColorSample;

pub const PACKET_LEN: usize = 12;
pub const HEADER: u8 = 0xAA;
pub const FOOTER: u8 = 0x55;

/// Upper bound for the motion energy byte.
pub const MOTION_ENERGY_MAX: u8 = 180;

/// Upper bound for motion speed before the x100 wire quantization.
pub const MOTION_SPEED_MAX: f32 = 1.2;

/// Fully-resolved output of one dispatch cycle, assembled by the arbiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlState {
    /// Operating mode, 1-5
    pub mode: u8,

    /// Base color on the 0-255 float scale
    pub base_color: ColorSample,

    /// Brightness before the configured cap
    pub brightness: u8,

    /// Motion energy, 0-180
    pub motion_energy: u8,

    /// Motion speed, 0.0-1.2; the wire carries round(speed * 100)
    pub motion_speed: f32,

    /// Direction hint byte
    pub direction: u8,

    /// Mod-256 sequence counter for receiver-side loss/reorder detection
    pub frame_id: u8,
}

/// Stateless encoder. The only configuration it carries is the brightness
/// cap applied defensively at encode time.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    brightness_cap: u8,
}

impl PacketCodec {
    pub fn new(brightness_cap: u8) -> Self {
        Self { brightness_cap }
    }

    /// Encode a control state into the 12-byte wire layout:
    ///
    /// | 0 | 1 | 2-4 | 5 | 6 | 7 | 8 | 9 | 10 | 11 |
    /// |0xAA|mode|r,g,b|brightness|energy|speed|dir|frame|xor(1-9)|0x55|
    pub fn encode(&self, state: &ControlState) -> [u8; PACKET_LEN] {
        let mut packet = [0u8; PACKET_LEN];

        packet[0] = HEADER;
        packet[1] = state.mode.clamp(1, 5);

        let [r, g, b] = state.base_color.to_bytes();
        packet[2] = r;
        packet[3] = g;
        packet[4] = b;

        packet[5] = state.brightness.min(self.brightness_cap);
        packet[6] = state.motion_energy.min(MOTION_ENERGY_MAX);

        let speed = (state.motion_speed * 100.0).round();
        packet[7] = if speed.is_finite() { speed.clamp(0.0, 255.0) as u8 } else { 0 };

        packet[8] = state.direction;
        packet[9] = state.frame_id;

        packet[10] = packet[1..10].iter().fold(0, |acc, b| acc ^ b);
        packet[11] = FOOTER;

        packet
    }
}
