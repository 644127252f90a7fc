use super::{length_prefix, ByteCursor, Serialize};
use crate::jvm::PoolErrorKind;
use crate::util::Width;
use byteorder::WriteBytesExt;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// Index into the constant pool
///
/// Indices start at 1 and `long`/`double` constants take up two indices, the second of which is
/// never addressable.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ConstantIndex(pub u16);

impl fmt::Display for ConstantIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

macro_rules! typed_index {
    ($($(#[$doc:meta])* $name:ident,)*) => {
        $(
            $(#[$doc])*
            #[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
            pub struct $name(pub ConstantIndex);

            impl From<$name> for ConstantIndex {
                fn from(index: $name) -> ConstantIndex {
                    index.0
                }
            }

            impl Serialize for $name {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }
        )*
    };
}

typed_index! {
    Utf8ConstantIndex,
    StringConstantIndex,
    ClassConstantIndex,
    FieldRefConstantIndex,
    /// Index of a `CONSTANT_Methodref` or a `CONSTANT_InterfaceMethodref`
    MethodRefConstantIndex,
    NameAndTypeConstantIndex,
    MethodHandleConstantIndex,
    MethodTypeConstantIndex,
    DynamicConstantIndex,
    InvokeDynamicConstantIndex,
    ModuleConstantIndex,
    PackageConstantIndex,
}

/// Index into the `BootstrapMethods` attribute (0-based, unlike constant indices)
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct BootstrapMethodIndex(pub u16);

impl Serialize for BootstrapMethodIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// Constants as in the constant pool
///
/// Floating point constants are kept as their raw bits so that constants can be compared and
/// hashed structurally (`NaN` payloads and `-0.0` are preserved as-is).
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Constant modified UTF-8 encoded string value
    Utf8(Utf8Entry),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`, as raw bits
    Float(u32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`, as raw bits
    Double(u64),

    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    FieldRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Method (this combines `Methodref` and `InterfaceMethodref`)
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// Depending on the method kind, this points to different things:
        ///
        ///   - `FieldRef` for `GetField`, `GetStatic`, `PutField`, `PutStatic`
        ///   - `MethodRef` for the rest
        member: ConstantIndex,
    },

    MethodType {
        descriptor: Utf8ConstantIndex,
    },

    /// Dynamically-computed constant
    Dynamic {
        bootstrap_method: BootstrapMethodIndex,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        bootstrap_method: BootstrapMethodIndex,
        name_and_type: NameAndTypeConstantIndex,
    },

    Module(Utf8ConstantIndex),
    Package(Utf8ConstantIndex),
}

pub const TAG_UTF8: u8 = 1;
pub const TAG_INTEGER: u8 = 3;
pub const TAG_FLOAT: u8 = 4;
pub const TAG_LONG: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_CLASS: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_FIELD_REF: u8 = 9;
pub const TAG_METHOD_REF: u8 = 10;
pub const TAG_INTERFACE_METHOD_REF: u8 = 11;
pub const TAG_NAME_AND_TYPE: u8 = 12;
pub const TAG_METHOD_HANDLE: u8 = 15;
pub const TAG_METHOD_TYPE: u8 = 16;
pub const TAG_DYNAMIC: u8 = 17;
pub const TAG_INVOKE_DYNAMIC: u8 = 18;
pub const TAG_MODULE: u8 = 19;
pub const TAG_PACKAGE: u8 = 20;

/// Golden-ratio multiplicative mix used to spread entry hashes
pub(super) const fn phi_mix(x: u32) -> u32 {
    let h = x.wrapping_mul(0x9E37_79B9);
    h ^ (h >> 16)
}

pub(super) const fn hash1(tag: u8, x1: u32) -> u32 {
    phi_mix((tag as u32).wrapping_mul(31).wrapping_add(x1))
}

pub(super) const fn hash2(tag: u8, x1: u32, x2: u32) -> u32 {
    phi_mix(
        (tag as u32)
            .wrapping_mul(31)
            .wrapping_add(x1)
            .wrapping_mul(31)
            .wrapping_add(x2),
    )
}

impl Constant {
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Utf8(_) => TAG_UTF8,
            Constant::Integer(_) => TAG_INTEGER,
            Constant::Float(_) => TAG_FLOAT,
            Constant::Long(_) => TAG_LONG,
            Constant::Double(_) => TAG_DOUBLE,
            Constant::Class(_) => TAG_CLASS,
            Constant::String(_) => TAG_STRING,
            Constant::FieldRef { .. } => TAG_FIELD_REF,
            Constant::MethodRef {
                is_interface: false,
                ..
            } => TAG_METHOD_REF,
            Constant::MethodRef {
                is_interface: true, ..
            } => TAG_INTERFACE_METHOD_REF,
            Constant::NameAndType { .. } => TAG_NAME_AND_TYPE,
            Constant::MethodHandle { .. } => TAG_METHOD_HANDLE,
            Constant::MethodType { .. } => TAG_METHOD_TYPE,
            Constant::Dynamic { .. } => TAG_DYNAMIC,
            Constant::InvokeDynamic { .. } => TAG_INVOKE_DYNAMIC,
            Constant::Module(_) => TAG_MODULE,
            Constant::Package(_) => TAG_PACKAGE,
        }
    }

    pub fn tag_name(&self) -> &'static str {
        match self.tag() {
            TAG_UTF8 => "Utf8",
            TAG_INTEGER => "Integer",
            TAG_FLOAT => "Float",
            TAG_LONG => "Long",
            TAG_DOUBLE => "Double",
            TAG_CLASS => "Class",
            TAG_STRING => "String",
            TAG_FIELD_REF => "Fieldref",
            TAG_METHOD_REF => "Methodref",
            TAG_INTERFACE_METHOD_REF => "InterfaceMethodref",
            TAG_NAME_AND_TYPE => "NameAndType",
            TAG_METHOD_HANDLE => "MethodHandle",
            TAG_METHOD_TYPE => "MethodType",
            TAG_DYNAMIC => "Dynamic",
            TAG_INVOKE_DYNAMIC => "InvokeDynamic",
            TAG_MODULE => "Module",
            _ => "Package",
        }
    }

    /// Can the constant be pushed with `ldc`, `ldc_w`, or `ldc2_w`?
    pub fn is_loadable(&self) -> bool {
        matches!(
            self,
            Constant::Integer(_)
                | Constant::Float(_)
                | Constant::Long(_)
                | Constant::Double(_)
                | Constant::Class(_)
                | Constant::String(_)
                | Constant::MethodHandle { .. }
                | Constant::MethodType { .. }
                | Constant::Dynamic { .. }
        )
    }

    /// Structural hash, consistent with `Eq` and stable across pools
    ///
    /// References are hashed by index, which is what makes interning by structure work: two
    /// entries with equal referenced indices in the same pool lineage are the same entry.
    pub fn structural_hash(&self) -> u32 {
        let tag = self.tag();
        match self {
            Constant::Utf8(utf8) => utf8.java_hash(),
            Constant::Integer(value) => hash1(tag, *value as u32),
            Constant::Float(bits) => hash1(tag, *bits),
            Constant::Long(value) => hash1(tag, (*value ^ (*value >> 32)) as u32),
            Constant::Double(bits) => hash1(tag, (*bits ^ (*bits >> 32)) as u32),
            Constant::Class(idx)
            | Constant::String(idx)
            | Constant::Module(idx)
            | Constant::Package(idx)
            | Constant::MethodType { descriptor: idx } => hash1(tag, idx.0 .0 as u32),
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => hash2(tag, class.0 .0 as u32, name_and_type.0 .0 as u32),
            Constant::NameAndType { name, descriptor } => {
                hash2(tag, name.0 .0 as u32, descriptor.0 .0 as u32)
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => hash2(tag, *handle_kind as u32, member.0 as u32),
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            }
            | Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => hash2(tag, bootstrap_method.0 as u32, name_and_type.0 .0 as u32),
        }
    }

    /// Decode one constant (tag included) from the pool section of a class file
    pub fn parse(cursor: &mut ByteCursor, index: u16) -> Result<Constant, PoolErrorKind> {
        use PoolErrorKind::Truncated;

        let tag = cursor.u8().ok_or(Truncated)?;
        let constant = match tag {
            TAG_UTF8 => {
                let len = cursor.u16().ok_or(Truncated)?;
                let bytes = cursor.read_bytes(len as usize).ok_or(Truncated)?;
                let utf8 = Utf8Entry::from_bytes(bytes.into())
                    .ok_or(PoolErrorKind::InvalidUtf8 { index })?;
                Constant::Utf8(utf8)
            }
            TAG_INTEGER => Constant::Integer(cursor.i32().ok_or(Truncated)?),
            TAG_FLOAT => Constant::Float(cursor.u32().ok_or(Truncated)?),
            TAG_LONG => Constant::Long(cursor.i64().ok_or(Truncated)?),
            TAG_DOUBLE => Constant::Double(cursor.u64().ok_or(Truncated)?),
            TAG_CLASS => Constant::Class(Utf8ConstantIndex(read_index(cursor)?)),
            TAG_STRING => Constant::String(Utf8ConstantIndex(read_index(cursor)?)),
            TAG_FIELD_REF => Constant::FieldRef {
                class: ClassConstantIndex(read_index(cursor)?),
                name_and_type: NameAndTypeConstantIndex(read_index(cursor)?),
            },
            TAG_METHOD_REF | TAG_INTERFACE_METHOD_REF => Constant::MethodRef {
                class: ClassConstantIndex(read_index(cursor)?),
                name_and_type: NameAndTypeConstantIndex(read_index(cursor)?),
                is_interface: tag == TAG_INTERFACE_METHOD_REF,
            },
            TAG_NAME_AND_TYPE => Constant::NameAndType {
                name: Utf8ConstantIndex(read_index(cursor)?),
                descriptor: Utf8ConstantIndex(read_index(cursor)?),
            },
            TAG_METHOD_HANDLE => {
                let kind = cursor.u8().ok_or(Truncated)?;
                let handle_kind =
                    HandleKind::from_u8(kind).ok_or(PoolErrorKind::BadMethodHandleKind(kind))?;
                let member = cursor.u16().map(ConstantIndex).ok_or(Truncated)?;
                Constant::MethodHandle {
                    handle_kind,
                    member,
                }
            }
            TAG_METHOD_TYPE => Constant::MethodType {
                descriptor: Utf8ConstantIndex(read_index(cursor)?),
            },
            TAG_DYNAMIC | TAG_INVOKE_DYNAMIC => {
                let bootstrap_method = BootstrapMethodIndex(read_index(cursor)?.0);
                let name_and_type = NameAndTypeConstantIndex(read_index(cursor)?);
                if tag == TAG_DYNAMIC {
                    Constant::Dynamic {
                        bootstrap_method,
                        name_and_type,
                    }
                } else {
                    Constant::InvokeDynamic {
                        bootstrap_method,
                        name_and_type,
                    }
                }
            }
            TAG_MODULE => Constant::Module(Utf8ConstantIndex(read_index(cursor)?)),
            TAG_PACKAGE => Constant::Package(Utf8ConstantIndex(read_index(cursor)?)),
            _ => return Err(PoolErrorKind::BadTag { index, tag }),
        };
        Ok(constant)
    }
}

fn read_index(cursor: &mut ByteCursor) -> Result<ConstantIndex, PoolErrorKind> {
    cursor
        .u16()
        .map(ConstantIndex)
        .ok_or(PoolErrorKind::Truncated)
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.tag().serialize(writer)?;
        match self {
            Constant::Utf8(utf8) => {
                length_prefix::<u16>(utf8.bytes().len(), "Utf8 constant")?.serialize(writer)?;
                writer.write_all(utf8.bytes())?;
            }
            Constant::Integer(integer) => integer.serialize(writer)?,
            Constant::Float(bits) => bits.serialize(writer)?,
            Constant::Long(long) => long.serialize(writer)?,
            Constant::Double(bits) => bits.serialize(writer)?,
            Constant::Class(name)
            | Constant::String(name)
            | Constant::Module(name)
            | Constant::Package(name)
            | Constant::MethodType { descriptor: name } => name.serialize(writer)?,
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => {
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            }
            | Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the JVM specification:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2. The constant_pool
/// > index n+1 must be valid but is considered unusable.
/// >
/// > In retrospect, making 8-byte constants take two constant pool entries was a poor choice.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-5.html#jvms-5.4.3.5-220
#[repr(u8)]
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField = 1,
    GetStatic = 2,
    PutField = 3,
    PutStatic = 4,
    InvokeVirtual = 5,
    InvokeStatic = 6,
    InvokeSpecial = 7,
    NewInvokeSpecial = 8,
    InvokeInterface = 9,
}

impl HandleKind {
    pub fn from_u8(kind: u8) -> Option<HandleKind> {
        Some(match kind {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            _ => return None,
        })
    }

    /// Does the handle refer to a field (as opposed to a method)?
    pub fn is_field(self) -> bool {
        (self as u8) <= 4
    }
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (*self as u8).serialize(writer)
    }
}

/// Contents of a `CONSTANT_Utf8` entry
///
/// The raw modified UTF-8 bytes are what gets compared, hashed, and written back out. Text is
/// produced on demand: pure ASCII entries are viewed straight out of the bytes and everything else
/// is decoded once into the `text` cell.
#[derive(Clone)]
pub struct Utf8Entry {
    bytes: Box<[u8]>,
    is_ascii: bool,
    text: OnceLock<Box<str>>,
}

impl Utf8Entry {
    /// Wrap raw modified UTF-8, returning `None` if the bytes are not well-formed
    pub fn from_bytes(bytes: Box<[u8]>) -> Option<Utf8Entry> {
        if !validate_modified_utf8(&bytes) {
            return None;
        }
        let is_ascii = bytes.iter().all(|b| (0x01..0x80).contains(b));
        Some(Utf8Entry {
            bytes,
            is_ascii,
            text: OnceLock::new(),
        })
    }

    pub fn new(text: &str) -> Utf8Entry {
        let bytes: Box<[u8]> = encode_modified_utf8(text).into();
        let is_ascii = bytes.len() == text.len();
        let cell = OnceLock::new();
        if !is_ascii {
            let _ = cell.set(Box::from(text));
        }
        Utf8Entry {
            bytes,
            is_ascii,
            text: cell,
        }
    }

    /// Raw modified UTF-8 bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_str(&self) -> &str {
        if self.is_ascii {
            if let Ok(text) = std::str::from_utf8(&self.bytes) {
                return text;
            }
        }
        self.text
            .get_or_init(|| decode_modified_utf8(&self.bytes).into_boxed_str())
    }

    /// Compare against text without decoding when the entry is ASCII
    pub fn eq_str(&self, text: &str) -> bool {
        if self.is_ascii {
            *self.bytes == *text.as_bytes()
        } else {
            self.as_str() == text
        }
    }

    /// `String.hashCode`-style hash, computed over the raw bytes
    pub fn java_hash(&self) -> u32 {
        self.bytes
            .iter()
            .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(*b as u32))
    }
}

impl PartialEq for Utf8Entry {
    fn eq(&self, other: &Utf8Entry) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Utf8Entry {}

impl Hash for Utf8Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state)
    }
}

impl fmt::Debug for Utf8Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = Vec::with_capacity(string.len());
    for c in string.chars() {
        // Handle the exception for how `\u{0000}` is represented
        let len: usize = if c == '\u{0000}' { 2 } else { c.len_utf8() };
        let code: u32 = c as u32;

        match len {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }

            // Supplementary characters: main divergence from unicode
            _ => {
                buffer.push(0b1110_1101);
                buffer.push(((code >> 16 & 0x0F) as u8).wrapping_sub(1) & 0x0F | 0b1010_0000);
                buffer.push((code >> 10 & 0x3F) as u8 | 0b1000_0000);

                buffer.push(0b1110_1101);
                buffer.push(((code >> 6 & 0x0F) as u8) | 0b1011_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Iterate over the UTF-16 code units encoded by modified UTF-8 bytes
///
/// Yields `None` for a malformed sequence (bad lead byte, missing continuation, or truncation).
fn modified_utf8_units(bytes: &[u8]) -> impl Iterator<Item = Option<u16>> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || {
        let b0 = *bytes.get(pos)? as u16;
        let continuation = |at: usize| -> Option<u16> {
            let b = *bytes.get(at)? as u16;
            if b & 0xC0 == 0x80 {
                Some(b & 0x3F)
            } else {
                None
            }
        };
        let unit = match b0 >> 4 {
            0..=7 => {
                pos += 1;
                Some(b0)
            }
            12 | 13 => continuation(pos + 1).map(|b1| {
                pos += 2;
                (b0 & 0x1F) << 6 | b1
            }),
            14 => continuation(pos + 1)
                .zip(continuation(pos + 2))
                .map(|(b1, b2)| {
                    pos += 3;
                    (b0 & 0x0F) << 12 | b1 << 6 | b2
                }),
            _ => None,
        };
        if unit.is_none() {
            pos = bytes.len();
        }
        Some(unit)
    })
}

pub fn validate_modified_utf8(bytes: &[u8]) -> bool {
    modified_utf8_units(bytes).all(|unit| unit.is_some())
}

/// Decode modified UTF-8, replacing unpaired surrogates with `U+FFFD`
pub fn decode_modified_utf8(bytes: &[u8]) -> String {
    let units = modified_utf8_units(bytes).map(|unit| unit.unwrap_or(0xFFFD));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(test)]
mod encode_modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
        assert_eq!(
            encode_modified_utf8("hel10_World"),
            vec![104, 101, 108, 49, 48, 95, 87, 111, 114, 108, 100]
        );
    }

    #[test]
    fn two_and_three_byte_encodings() {
        assert_eq!(
            encode_modified_utf8("ĄǍǞǠǺȀȂȦȺӐӒ"),
            vec![
                196, 132, 199, 141, 199, 158, 199, 160, 199, 186, 200, 128, 200, 130, 200, 166,
                200, 186, 211, 144, 211, 146
            ]
        );
    }

    #[test]
    fn supplementary_characters() {
        assert_eq!(
            encode_modified_utf8("\u{10000}\u{dffff}\u{10FFFF}"),
            vec![
                237, 160, 128, 237, 176, 128, 237, 172, 191, 237, 191, 191, 237, 175, 191, 237,
                191, 191
            ]
        );
    }
}

#[cfg(test)]
mod decode_modified_utf8_tests {
    use super::*;

    #[test]
    fn decodes_what_is_encoded() {
        for text in ["", "foo", "a\x00a", "ĄǍǞ", "ऄअॲ", "\u{10000}\u{dffff}\u{10FFFF}"] {
            let bytes = encode_modified_utf8(text);
            assert!(validate_modified_utf8(&bytes));
            assert_eq!(decode_modified_utf8(&bytes), text);
        }
    }

    #[test]
    fn lone_surrogate_is_replaced() {
        // High surrogate U+D800 with nothing after it
        assert_eq!(decode_modified_utf8(&[0x61, 0xED, 0xA0, 0x80]), "a\u{FFFD}");
    }

    #[test]
    fn malformed_sequences() {
        assert!(!validate_modified_utf8(&[0xC0]));
        assert!(!validate_modified_utf8(&[0xE0, 0x80]));
        assert!(!validate_modified_utf8(&[0x80]));
        assert!(!validate_modified_utf8(&[0xF0, 0x90, 0x80, 0x80]));
        assert!(!validate_modified_utf8(&[0xC3, 0x28]));
    }

    #[test]
    fn utf8_entry_views() {
        let ascii = Utf8Entry::from_bytes(Box::from(&b"java/lang/Object"[..])).unwrap();
        assert_eq!(ascii.as_str(), "java/lang/Object");
        assert!(ascii.eq_str("java/lang/Object"));

        let wide = Utf8Entry::from_bytes(encode_modified_utf8("na\u{EF}ve\x00").into()).unwrap();
        assert_eq!(wide.as_str(), "na\u{EF}ve\x00");
        assert!(wide.eq_str("na\u{EF}ve\x00"));
        assert_eq!(wide, Utf8Entry::new("na\u{EF}ve\x00"));
        assert_eq!(wide.java_hash(), Utf8Entry::new("na\u{EF}ve\x00").java_hash());
    }
}
