use super::{Attribute, ByteCursor, ClassConstantIndex, ConstantIndex, ConstantPool, Field};
use super::{length_prefix, Method, Serialize, Version, BOOTSTRAP_METHODS};
use crate::jvm::{ClassAccessFlags, Error};
use byteorder::WriteBytesExt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Representation of the [`class` file format of the JVM][0]
///
/// The constant pool is shared behind an `Arc`, so that edits can go into a child pool (see
/// [`ClassFile::edit_constants`]) while the parsed entries stay frozen.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: Arc<ConstantPool>,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,

    /// Only `java/lang/Object` has no superclass
    pub super_class: Option<ClassConstantIndex>,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    pub const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

    /// Parse a class file from its bytes
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, Error> {
        let truncated = || Error::MalformedClass("truncated class file".to_owned());
        let mut cursor = ByteCursor::new(bytes);

        if cursor.read_bytes(4) != Some(&ClassFile::MAGIC[..]) {
            return Err(Error::MalformedClass("bad magic number".to_owned()));
        }
        let version = Version::parse(&mut cursor).ok_or_else(truncated)?;
        let mut constants = ConstantPool::parse(&mut cursor)?;

        let access_flags = ClassAccessFlags::from_bits_truncate(cursor.u16().ok_or_else(truncated)?);
        let this_class = ClassConstantIndex(ConstantIndex(cursor.u16().ok_or_else(truncated)?));
        let super_class = match cursor.u16().ok_or_else(truncated)? {
            0 => None,
            idx => Some(ClassConstantIndex(ConstantIndex(idx))),
        };

        let interface_count = cursor.u16().ok_or_else(truncated)?;
        let interfaces = (0..interface_count)
            .map(|_| cursor.u16().map(|idx| ClassConstantIndex(ConstantIndex(idx))))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(truncated)?;

        let field_count = cursor.u16().ok_or_else(truncated)?;
        let fields = (0..field_count)
            .map(|_| Field::parse(&mut cursor))
            .collect::<Result<Vec<_>, _>>()?;

        let method_count = cursor.u16().ok_or_else(truncated)?;
        let methods = (0..method_count)
            .map(|_| Method::parse(&mut cursor))
            .collect::<Result<Vec<_>, _>>()?;

        let attributes = Attribute::parse_list(&mut cursor)?;
        if cursor.remaining() != 0 {
            let msg = format!("{} trailing bytes after class file", cursor.remaining());
            return Err(Error::MalformedClass(msg));
        }

        if let Some(bootstrap) = attributes
            .iter()
            .find(|attribute| attribute.is_named(&constants, BOOTSTRAP_METHODS))
        {
            constants.load_bootstrap_methods(&bootstrap.info)?;
        }

        let class = ClassFile {
            version,
            constants: Arc::new(constants),
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        log::debug!(
            "parsed class {} ({} methods, {} pool slots)",
            class.name().unwrap_or("<invalid>"),
            class.methods.len(),
            class.constants.size()
        );
        Ok(class)
    }

    /// Internal name of the class
    pub fn name(&self) -> Result<&str, Error> {
        self.constants.class_name(self.this_class)
    }

    pub fn super_name(&self) -> Result<Option<&str>, Error> {
        self.super_class
            .map(|class| self.constants.class_name(class))
            .transpose()
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    /// Start a pool that extends this class' constants
    ///
    /// Once edits are done, install the pool back with [`ClassFile::set_constants`].
    pub fn edit_constants(&self) -> ConstantPool {
        ConstantPool::with_parent(self.constants.clone())
    }

    /// Install a new constant pool
    ///
    /// If the pool has bootstrap methods and the class doesn't yet have a `BootstrapMethods`
    /// attribute, one is added. The contents of that attribute are always taken from the pool.
    pub fn set_constants(&mut self, mut constants: ConstantPool) -> Result<(), Error> {
        let has_attribute = self
            .attributes
            .iter()
            .any(|attribute| attribute.is_named(&constants, BOOTSTRAP_METHODS));
        if !has_attribute && constants.bootstrap_method_count() > 0 {
            let name_index = constants.utf8_entry(BOOTSTRAP_METHODS)?;
            let info = constants.bootstrap_methods_info()?;
            self.attributes.push(Attribute { name_index, info });
        }
        self.constants = Arc::new(constants);
        Ok(())
    }

    pub fn to_bytes(&self) -> std::io::Result<Vec<u8>> {
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        Ok(bytes)
    }

    /// Save the class file to disk
    pub fn save_to_path<P: AsRef<Path>>(
        &self,
        path: P,
        create_missing_directories: bool,
    ) -> std::io::Result<()> {
        let path = path.as_ref();
        if create_missing_directories {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut class_file = fs::File::create(path)?;
        self.serialize(&mut class_file)
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&ClassFile::MAGIC)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class
            .map_or(ConstantIndex(0), |class| class.0)
            .serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;

        length_prefix::<u16>(self.attributes.len(), "attribute list")?.serialize(writer)?;
        for attribute in &self.attributes {
            if attribute.is_named(&self.constants, BOOTSTRAP_METHODS) {
                let refreshed = Attribute {
                    name_index: attribute.name_index,
                    info: self.constants.bootstrap_methods_info()?,
                };
                refreshed.serialize(writer)?;
            } else {
                attribute.serialize(writer)?;
            }
        }
        Ok(())
    }
}
