//! Encoding and decoding for primitive types
//! (bool, u8, u16, u32, u64, i8, i16, i32, i64, f32, f64),
//! arrays, options, strings, integer vectors and [`VarInt`]s.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::{Error, Result};

/// The `Encode` trait allows objects to be encoded to raw bytes.
/// See [`Decode`] for decoding objects from raw bytes.
///
/// `encode_len` must report exactly the number of bytes `encode` writes, the packer relies on it
/// to decide what fits into a message before anything is written.
///
/// ```
/// use ratatoskr::serialization::Encode;
///
/// let mut buf = vec![];
/// (-2_i16).encode(&mut buf).unwrap();
/// 1.5_f32.encode(&mut buf).unwrap();
///
/// assert_eq!(buf.len(), (-2_i16).encode_len() + 1.5_f32.encode_len());
/// ```
pub trait Encode {
    /// # Arguments
    ///
    /// * `write` - A [writer](std::io::Write). For example, a buffer or a socket.
    /// # Returns
    ///
    /// * `Result<()>` - A Result type that returns an empty tuple on success or an error on failure.
    fn encode(&self, write: impl Write) -> Result<()>;

    /// # Returns
    ///
    /// * `usize` - The length of the encoded data.
    fn encode_len(&self) -> usize;
}

/// The `Decode` trait allows objects to be decoded from raw bytes.
/// See [`Encode`] for encoding objects into raw bytes.
///
/// ```
/// use ratatoskr::serialization::Decode;
///
/// let buf = [0x39_u8, 0x05, 0x00, 0x00];
/// let value = u32::decode(&mut buf.as_slice()).unwrap();
///
/// assert_eq!(value, 1337);
/// ```
pub trait Decode {
    /// # Arguments
    /// * `read` - A [reader](std::io::Read). For example, a buffer or a socket.
    ///
    /// # Returns
    /// * `Result<Self>` - A Result type that returns the decoded data on success or an error on failure.
    fn decode(read: impl Read) -> Result<Self>
    where
        Self: Sized;
}

/// Implements [`Encode`] and [`Decode`] for a number type using the matching
/// [`byteorder`] read/write functions.
macro_rules! impl_number {
    ($t:ty, $write:ident, $read:ident) => {
        impl Encode for $t {
            fn encode(&self, mut write: impl Write) -> Result<()> {
                write.$write::<LittleEndian>(*self)?;
                Ok(())
            }

            fn encode_len(&self) -> usize {
                std::mem::size_of::<$t>()
            }
        }

        impl Decode for $t {
            fn decode(mut read: impl Read) -> Result<Self> {
                Ok(read.$read::<LittleEndian>()?)
            }
        }
    };
}

impl_number!(u16, write_u16, read_u16);
impl_number!(u32, write_u32, read_u32);
impl_number!(u64, write_u64, read_u64);
impl_number!(i16, write_i16, read_i16);
impl_number!(i32, write_i32, read_i32);
impl_number!(i64, write_i64, read_i64);
impl_number!(f32, write_f32, read_f32);
impl_number!(f64, write_f64, read_f64);

// Single bytes have no byte order.
impl Encode for u8 {
    fn encode(&self, mut write: impl Write) -> Result<()> {
        write.write_u8(*self)?;
        Ok(())
    }

    fn encode_len(&self) -> usize {
        1
    }
}

impl Decode for u8 {
    fn decode(mut read: impl Read) -> Result<Self> {
        Ok(read.read_u8()?)
    }
}

impl Encode for i8 {
    fn encode(&self, mut write: impl Write) -> Result<()> {
        write.write_i8(*self)?;
        Ok(())
    }

    fn encode_len(&self) -> usize {
        1
    }
}

impl Decode for i8 {
    fn decode(mut read: impl Read) -> Result<Self> {
        Ok(read.read_i8()?)
    }
}

impl Encode for bool {
    fn encode(&self, write: impl Write) -> Result<()> {
        u8::from(*self).encode(write)
    }

    fn encode_len(&self) -> usize {
        1
    }
}

impl Decode for bool {
    fn decode(read: impl Read) -> Result<Self> {
        Ok(u8::decode(read)? != 0)
    }
}

impl Encode for String {
    fn encode(&self, mut write: impl Write) -> Result<()> {
        VarInt::from(self.len()).encode(&mut write)?;
        write.write_all(self.as_bytes())?;

        Ok(())
    }

    fn encode_len(&self) -> usize {
        self.len() + VarInt::from(self.len()).encode_len()
    }
}

impl Decode for String {
    fn decode(mut read: impl Read) -> Result<Self> {
        let length: usize = VarInt::<usize>::decode(&mut read)?.into();

        // The length comes off the wire, only allocate what actually arrives.
        let mut buf = Vec::with_capacity(length.min(128));
        read.take(length as u64).read_to_end(&mut buf)?;
        if buf.len() != length {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }

        Ok(String::from_utf8(buf)?)
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode(&self, mut write: impl Write) -> Result<()> {
        for item in self {
            item.encode(&mut write)?;
        }
        Ok(())
    }

    fn encode_len(&self) -> usize {
        self.iter().map(Encode::encode_len).sum()
    }
}

impl<T, const N: usize> Decode for [T; N]
where
    T: Decode + Default + Copy,
{
    fn decode(mut read: impl Read) -> Result<Self> {
        let mut arr = [T::default(); N];
        for item in &mut arr {
            *item = T::decode(&mut read)?;
        }
        Ok(arr)
    }
}

/// Options are prefixed with a presence byte.
impl<T: Encode> Encode for Option<T> {
    fn encode(&self, mut write: impl Write) -> Result<()> {
        self.is_some().encode(&mut write)?;
        if let Some(value) = self {
            value.encode(&mut write)?;
        }
        Ok(())
    }

    fn encode_len(&self) -> usize {
        1 + self.as_ref().map_or(0, Encode::encode_len)
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(mut read: impl Read) -> Result<Self> {
        if bool::decode(&mut read)? {
            Ok(Some(T::decode(&mut read)?))
        } else {
            Ok(None)
        }
    }
}

impl<T> Encode for Vec<T>
where
    T: Encode + num::traits::PrimInt,
{
    fn encode(&self, mut write: impl Write) -> Result<()> {
        VarInt::from(self.len()).encode(&mut write)?;

        for item in self {
            item.encode(&mut write)?;
        }
        Ok(())
    }

    fn encode_len(&self) -> usize {
        VarInt::from(self.len()).encode_len() + std::mem::size_of::<T>() * self.len()
    }
}

impl<T> Decode for Vec<T>
where
    T: Decode + num::traits::PrimInt,
{
    fn decode(mut read: impl Read) -> Result<Self> {
        let length: usize = VarInt::<usize>::decode(&mut read)?.into();

        // The length comes off the wire, don't trust it for the allocation.
        let mut vec = Vec::with_capacity(length.min(128));
        for _ in 0..length {
            vec.push(T::decode(&mut read)?);
        }

        Ok(vec)
    }
}

/// Number of bytes needed to encode `v` with 7 bits per byte.
fn varint_len(mut v: u64) -> usize {
    let mut size = 1;
    while v >= 0x80 {
        size += 1;
        v >>= 7;
    }
    size
}

/// Zigzag encoding maps small negative integers to small unsigned ones.
/// <https://protobuf.dev/programming-guides/encoding/>
fn zigzag_encode(from: i64) -> u64 {
    ((from << 1) ^ (from >> 63)) as u64
}

fn zigzag_decode(from: u64) -> i64 {
    ((from >> 1) as i64) ^ -((from & 1) as i64)
}

fn write_varint(mut n: u64, mut write: impl Write) -> Result<()> {
    while n >= 0x80 {
        write.write_u8(0b1000_0000 | (n as u8))?;
        n >>= 7;
    }
    write.write_u8(n as u8)?;

    Ok(())
}

fn read_varint(max_bytes: usize, mut read: impl Read) -> Result<u64> {
    let mut result: u64 = 0;
    for shift in 0..max_bytes {
        let byte = read.read_u8()?;
        result |= u64::from(byte & 0b0111_1111) << (shift * 7);

        if byte & 0b1000_0000 == 0 {
            return Ok(result);
        }
    }

    Err(Error::VarInt)
}

/// A wrapper around an integer.
///
/// Implements the [`Encode`] and [`Decode`] trait using [protobuf](https://github.com/protocolbuffers/protobuf)
/// variable-length integers, so small values take fewer bytes than the integer type. Signed
/// integers are zigzag encoded first.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct VarInt<T> {
    value: T,
}

impl<T> VarInt<T> {
    /// The maximum number of bytes an encoded value of `T` can take up.
    pub const MAX_BYTES: usize = (std::mem::size_of::<T>() * 8).div_ceil(7);

    /// Returns the wrapped integer.
    pub fn into_inner(self) -> T {
        self.value
    }
}

macro_rules! impl_varint {
    ($t:ty, unsigned) => {
        impl_varint!(@common $t);

        impl Encode for VarInt<$t> {
            fn encode(&self, write: impl Write) -> Result<()> {
                write_varint(self.value as u64, write)
            }

            fn encode_len(&self) -> usize {
                varint_len(self.value as u64)
            }
        }

        impl Decode for VarInt<$t> {
            fn decode(read: impl Read) -> Result<Self> {
                let raw = read_varint(Self::MAX_BYTES, read)?;
                let value = <$t>::try_from(raw).map_err(|_| Error::VarInt)?;
                Ok(VarInt { value })
            }
        }
    };
    ($t:ty, signed) => {
        impl_varint!(@common $t);

        impl Encode for VarInt<$t> {
            fn encode(&self, write: impl Write) -> Result<()> {
                write_varint(zigzag_encode(self.value as i64), write)
            }

            fn encode_len(&self) -> usize {
                varint_len(zigzag_encode(self.value as i64))
            }
        }

        impl Decode for VarInt<$t> {
            fn decode(read: impl Read) -> Result<Self> {
                let raw = zigzag_decode(read_varint(Self::MAX_BYTES, read)?);
                let value = <$t>::try_from(raw).map_err(|_| Error::VarInt)?;
                Ok(VarInt { value })
            }
        }
    };
    (@common $t:ty) => {
        impl From<$t> for VarInt<$t> {
            fn from(value: $t) -> Self {
                VarInt { value }
            }
        }

        impl From<VarInt<$t>> for $t {
            fn from(varint: VarInt<$t>) -> Self {
                varint.value
            }
        }
    };
}

impl_varint!(usize, unsigned);
impl_varint!(u64, unsigned);
impl_varint!(u32, unsigned);
impl_varint!(u16, unsigned);
impl_varint!(u8, unsigned);

impl_varint!(isize, signed);
impl_varint!(i64, signed);
impl_varint!(i32, signed);
impl_varint!(i16, signed);
impl_varint!(i8, signed);
