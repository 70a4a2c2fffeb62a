//! The wire layer: byte-exact codec (C1) and packet model (C2) for the
//! three DJ Link ports.

pub mod codec;
pub mod packet;

pub use codec::{PacketType, PORT_ANNOUNCE, PORT_BEAT, PORT_UPDATE};
pub use packet::Packet;
