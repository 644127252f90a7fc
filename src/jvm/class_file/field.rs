use super::{Attribute, ByteCursor, ConstantIndex, ConstantPool, Serialize, Utf8ConstantIndex};
use crate::jvm::{Error, FieldAccessFlags};
use byteorder::WriteBytesExt;

/// Field declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.5
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub access_flags: FieldAccessFlags,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Field {
    pub fn parse(cursor: &mut ByteCursor) -> Result<Field, Error> {
        let truncated = || Error::MalformedClass("truncated field".to_owned());
        let access_flags = FieldAccessFlags::from_bits_truncate(cursor.u16().ok_or_else(truncated)?);
        let name_index = Utf8ConstantIndex(ConstantIndex(cursor.u16().ok_or_else(truncated)?));
        let descriptor_index = Utf8ConstantIndex(ConstantIndex(cursor.u16().ok_or_else(truncated)?));
        let attributes = Attribute::parse_list(cursor)?;
        Ok(Field {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }

    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, Error> {
        pool.utf8_str(self.name_index)
    }

    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, Error> {
        pool.utf8_str(self.descriptor_index)
    }
}

impl Serialize for Field {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}
