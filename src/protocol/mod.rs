//! Wire protocol: the fixed 12-byte packet and its UDP transport

mod packet;
mod sender;

pub use packet::{
    ControlState, PacketCodec, FOOTER, HEADER, MOTION_ENERGY_MAX, MOTION_SPEED_MAX, PACKET_LEN,
};
pub use sender::{PacketSender, SendError};
