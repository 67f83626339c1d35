//! The wire format of a team message.
//!
//! | Field             | Size     | Meaning                                          |
//! |-------------------|----------|--------------------------------------------------|
//! | magic             | 4 bytes  | [`MAGIC`], anything else is rejected             |
//! | sender            | 2 bytes  | robot id of the sender                           |
//! | timestamp         | 4 bytes  | sender's send time in milliseconds               |
//! | presence bitfield | 4 bytes  | bit *i* set if the kind with id *i* is present   |
//! | components        | variable | `VarInt(length) ‖ fields` per present kind       |
//!
//! All integers are little-endian. Components follow each other in ascending id order, the same
//! order in which receivers walk the presence bitfield. A message never exceeds
//! [`MAX_MESSAGE_BYTES`].
mod pack;
mod unpack;

pub use pack::{Packer, Packet};

use std::io::{Read, Write};
use std::time::Instant;

use crate::component::{Component, ComponentInstance};
use crate::registry::{KindId, Registry};
use crate::serialization::{Decode, Encode, VarInt};
use crate::{Error, Rejection, Result};

/// Hard limit on the size of one packet.
pub const MAX_MESSAGE_BYTES: usize = 128;

/// Protocol family and version, the first four bytes of every message.
pub const MAGIC: u32 = u32::from_le_bytes(*b"RTK\x01");

/// Encoded size of the [`Header`].
pub const HEADER_SIZE: usize = 10;

/// Encoded size of the [`PresenceBits`].
pub const BITFIELD_SIZE: usize = 4;

/// Header of every team message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Id of the robot that sent the message.
    pub sender: u16,
    /// Monotonic send time of the sender, in milliseconds.
    pub timestamp: u32,
}

impl Header {
    pub fn new(sender: u16, timestamp: u32) -> Self {
        Self { sender, timestamp }
    }
}

impl Encode for Header {
    fn encode(&self, mut write: impl Write) -> Result<()> {
        MAGIC.encode(&mut write)?;
        self.sender.encode(&mut write)?;
        self.timestamp.encode(&mut write)
    }

    fn encode_len(&self) -> usize {
        HEADER_SIZE
    }
}

impl Decode for Header {
    /// Decodes a header, rejecting it if the magic does not match.
    fn decode(mut read: impl Read) -> Result<Self> {
        let magic = u32::decode(&mut read)?;
        if magic != MAGIC {
            return Err(Rejection::BadMagic(magic).into());
        }

        Ok(Self {
            sender: Decode::decode(&mut read)?,
            timestamp: Decode::decode(&mut read)?,
        })
    }
}

/// Presence bitfield, bit *i* is set if the kind with id *i* is part of the message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PresenceBits(u32);

impl PresenceBits {
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn insert(&mut self, id: KindId) {
        self.0 |= id.bit();
    }

    pub fn contains(self, id: KindId) -> bool {
        self.0 & id.bit() != 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set ids in ascending order.
    pub fn iter(self) -> impl Iterator<Item = KindId> {
        (0..32u8)
            .filter_map(KindId::new)
            .filter(move |id| self.contains(*id))
    }
}

impl Encode for PresenceBits {
    fn encode(&self, write: impl Write) -> Result<()> {
        self.0.encode(write)
    }

    fn encode_len(&self) -> usize {
        BITFIELD_SIZE
    }
}

impl Decode for PresenceBits {
    fn decode(read: impl Read) -> Result<Self> {
        Ok(Self(u32::decode(read)?))
    }
}

/// Splits one length prefixed component frame off the front of `read`.
pub(crate) fn read_frame<'a>(read: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len: usize = match VarInt::<usize>::decode(&mut *read) {
        Ok(len) => len.into(),
        Err(Error::VarInt) => return Err(Rejection::Truncated.into()),
        Err(err) => return Err(truncated(err)),
    };

    if len > read.len() {
        return Err(Rejection::Truncated.into());
    }

    let (frame, rest) = read.split_at(len);
    *read = rest;
    Ok(frame)
}

/// Maps running out of bytes to [`Rejection::Truncated`], leaving other errors alone.
fn truncated(err: Error) -> Error {
    match err {
        Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            Rejection::Truncated.into()
        }
        other => other,
    }
}

/// One outgoing or incoming message: a header and the component instances it carries.
///
/// Instances are ordered by id and owned by the envelope; they are dropped together with it.
#[derive(Debug)]
pub struct Envelope {
    pub header: Header,
    components: Vec<ComponentInstance>,
}

impl Envelope {
    /// Creates an empty envelope.
    pub fn new(header: Header) -> Self {
        Self {
            header,
            components: Vec::new(),
        }
    }

    /// Builds an outgoing envelope with one instance of every registered kind, each filled by
    /// the compilers registered for its kind.
    pub fn compile(registry: &Registry, header: Header) -> Self {
        let components = registry
            .iter()
            .filter_map(|descriptor| {
                let mut instance = descriptor.instantiate()?;
                instance.compile();
                Some(instance)
            })
            .collect();

        Self { header, components }
    }

    /// Adds an instance, replacing an earlier instance of the same kind.
    pub fn insert(&mut self, instance: ComponentInstance) {
        match self
            .components
            .binary_search_by_key(&instance.kind_id(), ComponentInstance::kind_id)
        {
            Ok(index) => self.components[index] = instance,
            Err(index) => self.components.insert(index, instance),
        }
    }

    /// Instances in ascending id order.
    pub fn components(&self) -> &[ComponentInstance] {
        &self.components
    }

    /// Ids of the kinds in this envelope.
    pub fn presence(&self) -> PresenceBits {
        let mut bits = PresenceBits::default();
        for instance in &self.components {
            bits.insert(instance.kind_id());
        }
        bits
    }

    /// The value of kind `C`, if present.
    pub fn get<C: Component>(&self) -> Option<&C> {
        self.components.iter().find_map(ComponentInstance::get::<C>)
    }

    /// The value of kind `C` mutably, if present.
    pub fn get_mut<C: Component>(&mut self) -> Option<&mut C> {
        self.components.iter_mut().find_map(ComponentInstance::get_mut::<C>)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Invokes the callbacks of every instance with this envelope's header, in id order.
    pub fn dispatch_callbacks(&self) {
        for instance in &self.components {
            instance.dispatch_callbacks(&self.header);
        }
    }
}

/// Millisecond clock for header timestamps, starting at zero when created.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds since the clock started, wrapping after roughly 49 days.
    pub fn now(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() -> Result<()> {
        let mut buf = Vec::new();
        Header::new(3, 1000).encode(&mut buf)?;

        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[..4], b"RTK\x01");
        assert_eq!(&buf[4..6], &[3, 0]);
        assert_eq!(&buf[6..], &1000_u32.to_le_bytes());

        assert_eq!(Header::decode(buf.as_slice())?, Header::new(3, 1000));
        Ok(())
    }

    #[test]
    fn test_header_bad_magic() {
        let buf = [0xde, 0xad, 0xbe, 0xef, 3, 0, 0, 0, 0, 0];
        assert!(matches!(
            Header::decode(buf.as_slice()),
            Err(Error::Rejected(Rejection::BadMagic(0xefbe_adde)))
        ));
    }

    #[test]
    fn test_presence_iter() {
        let bits = PresenceBits::from_bits(0b1000_0000_0000_0000_0000_0000_0010_0101);
        let ids: Vec<u8> = bits.iter().map(KindId::index).collect();

        assert_eq!(ids, [0, 2, 5, 31]);
        assert_eq!(bits.len(), 4);
    }

    #[test]
    fn test_read_frame() -> Result<()> {
        let buf = [2_u8, 0xaa, 0xbb, 1, 0xcc];
        let mut cursor = buf.as_slice();

        assert_eq!(read_frame(&mut cursor)?, &[0xaa, 0xbb]);
        assert_eq!(read_frame(&mut cursor)?, &[0xcc]);
        assert!(cursor.is_empty());

        let short = [3_u8, 0xaa];
        assert!(matches!(
            read_frame(&mut short.as_slice()),
            Err(Error::Rejected(Rejection::Truncated))
        ));
        assert!(matches!(
            read_frame(&mut [].as_slice()),
            Err(Error::Rejected(Rejection::Truncated))
        ));

        Ok(())
    }
}
