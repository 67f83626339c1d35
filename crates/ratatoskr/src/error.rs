//! Result and Error types for the crate.
use strum::IntoStaticStr;
use thiserror::Error;

/// Result containing an error variant from this module.
pub type Result<T> = std::result::Result<T, Error>;

/// Error variants for encoding, registry configuration and transport.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error, this wraps a [std::io::Error]
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// VarInt too large, this occurs when the data being decoded
    /// is too large to fit into the target integer.
    #[error("VarInt too large")]
    VarInt,

    /// Invalid string, this can occur while decoding a string
    #[error(transparent)]
    InvalidString(#[from] std::string::FromUtf8Error),

    /// A component kind with this name has already been registered.
    #[error("component `{0}` is already registered")]
    DuplicateComponent(String),

    /// More component kinds were registered than the presence bitfield has bits.
    #[error("cannot register `{name}`, the presence bitfield only holds {capacity} kinds")]
    RegistryFull { name: String, capacity: usize },

    /// A kind was assigned an id twice.
    #[error("component `{name}` already has id {id}")]
    IdAlreadyAssigned { name: String, id: u8 },

    /// The component kind is not part of the registry.
    #[error("component `{0}` is not registered")]
    UnregisteredComponent(String),

    /// A received packet was dropped.
    #[error("packet rejected: {0}")]
    Rejected(#[from] Rejection),

    /// Configuration file could not be parsed, this wraps a [toml::de::Error]
    #[error(transparent)]
    Config(#[from] toml::de::Error),
}

/// Reason a received packet was dropped before any callback fired.
///
/// Rejections are per packet: the cycle carries on with the next datagram.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Rejection {
    /// The magic/version field does not match ours.
    #[error("foreign or incompatible sender (magic {0:#010x})")]
    BadMagic(u32),

    /// The packet ends before the header, a length prefix or a payload does.
    #[error("packet is truncated")]
    Truncated,

    /// The packet is larger than any message we would send.
    #[error("packet of {len} bytes exceeds the message size")]
    Oversized { len: usize },

    /// A component did not decode to exactly its declared length.
    #[error("component {kind} is corrupt")]
    Corrupt { kind: u8 },
}
