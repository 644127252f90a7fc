use super::{Attribute, AttributeLike, ByteCursor, Code, ConstantIndex, ConstantPool};
use super::{Serialize, Utf8ConstantIndex};
use crate::jvm::{Error, MethodAccessFlags};
use byteorder::WriteBytesExt;

/// Method declared by a class or interface
///
/// The body of the method stays an opaque `Code` attribute until [`Method::code`] is called.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.6
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Method {
    pub fn parse(cursor: &mut ByteCursor) -> Result<Method, Error> {
        let truncated = || Error::MalformedClass("truncated method".to_owned());
        let flags = cursor.u16().ok_or_else(truncated)?;
        let name_index = Utf8ConstantIndex(ConstantIndex(cursor.u16().ok_or_else(truncated)?));
        let descriptor_index = Utf8ConstantIndex(ConstantIndex(cursor.u16().ok_or_else(truncated)?));
        let attributes = Attribute::parse_list(cursor)?;
        Ok(Method {
            access_flags: MethodAccessFlags::from_bits_truncate(flags),
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

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Decode the method body (abstract and native methods have none)
    pub fn code(&self, pool: &ConstantPool) -> Result<Option<Code>, Error> {
        self.attributes
            .iter()
            .find(|attribute| attribute.is::<Code>(pool))
            .map(|attribute| Code::parse(&attribute.info))
            .transpose()
    }

    /// Replace the method body (or add one if there was none)
    pub fn set_code(&mut self, pool: &mut ConstantPool, code: &Code) -> Result<(), Error> {
        let attribute = pool.attribute(code)?;
        let existing = self
            .attributes
            .iter_mut()
            .find(|existing| existing.name_index == attribute.name_index);
        match existing {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
        Ok(())
    }
}

impl Serialize for Method {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}
