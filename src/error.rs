use thiserror::Error;

/// Errors surfaced by the public API and by the internal receive/send loops.
#[derive(Error, Debug)]
pub enum PdjError {
    #[error("packet too short: got {got} bytes, need at least {need}")]
    PacketTooShort { got: usize, need: usize },

    #[error("packet magic header mismatch")]
    PacketMagicMismatch,

    #[error("unknown packet type 0x{ty:02x} on port {port}")]
    UnknownPacketType { port: u16, ty: u8 },

    #[error("unexpected media slot {0}")]
    UnexpectedSlot(u8),

    #[error("unexpected media type {0}")]
    UnexpectedMediaType(u8),

    #[error("component is not running")]
    NotRunning,

    #[error("no local interface shares a subnet with any observed device")]
    NoMatchingInterface,

    #[error("device number {0} is already in use on the network")]
    DeviceNumberConflict(u8),

    #[error("socket error: {0}")]
    SocketError(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PdjError>;
