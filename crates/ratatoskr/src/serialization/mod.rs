//! Field-by-field serialization with a fixed byte order.
//!
//! Everything that travels between robots is written and read one field at a time through the
//! [`Encode`] and [`Decode`] traits. Integers and floats are little-endian, lengths and small
//! counters can be packed as protobuf-style [`VarInt`]s.
//!
//! Components implement both traits by hand, encoding their fields in declaration order:
//!
//! ```
//! use std::io::{Read, Write};
//! use ratatoskr::{Result, serialization::{Decode, Encode}};
//!
//! struct Kick {
//!     target: [f32; 2],
//!     strength: u8,
//! }
//!
//! impl Encode for Kick {
//!     fn encode(&self, mut write: impl Write) -> Result<()> {
//!         self.target.encode(&mut write)?;
//!         self.strength.encode(&mut write)
//!     }
//!
//!     fn encode_len(&self) -> usize {
//!         self.target.encode_len() + self.strength.encode_len()
//!     }
//! }
//!
//! impl Decode for Kick {
//!     fn decode(mut read: impl Read) -> Result<Self> {
//!         Ok(Self {
//!             target: Decode::decode(&mut read)?,
//!             strength: Decode::decode(&mut read)?,
//!         })
//!     }
//! }
//! ```
mod codec;

pub use codec::{Decode, Encode, VarInt};
