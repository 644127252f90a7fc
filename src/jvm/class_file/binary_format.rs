use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io::{Error, ErrorKind, Result};

/// Utility trait for serializing data inside class files
///
/// Java class files have some peculiarities that make it useful to define an extra trait (instead
/// of just using `serde`):
///
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually `u16`
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Serialize for u16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(*self)
    }
}

impl Serialize for u32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(*self)
    }
}

impl Serialize for u64 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<BigEndian>(*self)
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i8(*self)
    }
}

impl Serialize for i16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i16::<BigEndian>(*self)
    }
}

impl Serialize for i32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<BigEndian>(*self)
    }
}

impl Serialize for i64 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i64::<BigEndian>(*self)
    }
}

/// Narrow a length to the width of its length field
///
/// Lengths that don't fit are `InvalidData` rather than silently wrapping into a corrupt class.
pub fn length_prefix<T: TryFrom<usize>>(len: usize, what: &str) -> Result<T> {
    T::try_from(len).map_err(|_| {
        let msg = format!("{} of length {} overflows its length field", what, len);
        Error::new(ErrorKind::InvalidData, msg)
    })
}

/// Size in `u16` is the first thing serialized/deserialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        length_prefix::<u16>(self.len(), "list")?.serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

/// Bounds-checked big-endian reader over a byte slice
///
/// Every read returns `None` instead of panicking when the slice runs out, leaving the position
/// untouched. Callers turn that into whichever "truncated" error fits their context.
#[derive(Clone, Debug)]
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

macro_rules! read_fixed {
    ($name:ident, $typ:ty, $size:expr, $read:expr) => {
        pub fn $name(&mut self) -> Option<$typ> {
            let bytes = self.read_bytes($size)?;
            Some($read(bytes))
        }
    };
}

impl<'a> ByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> ByteCursor<'a> {
        ByteCursor { bytes, position: 0 }
    }

    /// Cursor starting part way into the slice
    pub fn at(bytes: &'a [u8], position: usize) -> ByteCursor<'a> {
        ByteCursor { bytes, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.position)
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(len)?;
        let slice = self.bytes.get(self.position..end)?;
        self.position = end;
        Some(slice)
    }

    /// Everything read between `start` and the current position
    pub fn consumed_since(&self, start: usize) -> &'a [u8] {
        self.bytes.get(start..self.position).unwrap_or_default()
    }

    pub fn skip(&mut self, len: usize) -> Option<()> {
        self.read_bytes(len).map(|_| ())
    }

    read_fixed!(u8, u8, 1, |b: &[u8]| b[0]);
    read_fixed!(i8, i8, 1, |b: &[u8]| b[0] as i8);
    read_fixed!(u16, u16, 2, BigEndian::read_u16);
    read_fixed!(i16, i16, 2, BigEndian::read_i16);
    read_fixed!(u32, u32, 4, BigEndian::read_u32);
    read_fixed!(i32, i32, 4, BigEndian::read_i32);
    read_fixed!(u64, u64, 8, BigEndian::read_u64);
    read_fixed!(i64, i64, 8, BigEndian::read_i64);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn big_endian_reads() {
        let bytes = [0xCA, 0xFE, 0xBA, 0xBE, 0xFF, 0xFE, 0x01];
        let mut cursor = ByteCursor::new(&bytes);
        assert_eq!(cursor.u32(), Some(0xCAFEBABE));
        assert_eq!(cursor.i16(), Some(-2));
        assert_eq!(cursor.remaining(), 1);
        assert_eq!(cursor.u16(), None);
        assert_eq!(cursor.position(), 6);
        assert_eq!(cursor.u8(), Some(1));
        assert_eq!(cursor.u8(), None);
    }

    #[test]
    fn vec_is_length_prefixed() {
        let mut out = vec![];
        vec![1u16, 0x0203].serialize(&mut out).unwrap();
        assert_eq!(out, vec![0, 2, 0, 1, 2, 3]);
    }

    #[test]
    fn oversized_vec_is_rejected() {
        let mut out = vec![];
        let err = vec![0u8; u16::MAX as usize + 1]
            .serialize(&mut out)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        assert_eq!(length_prefix::<u16>(65535, "list").unwrap(), 65535);
        assert!(length_prefix::<u8>(256, "list").is_err());
    }
}
