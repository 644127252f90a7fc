use super::{length_prefix, ByteCursor, ClassConstantIndex, ConstantIndex, ConstantPool, Serialize};
use super::Utf8ConstantIndex;
use crate::jvm::Error;
use byteorder::WriteBytesExt;

/// Attributes (used in classes, fields, methods, and even on some attributes)
///
/// Attributes which aren't modelled here are carried around as opaque blobs and written back out
/// exactly as they were read.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: Utf8ConstantIndex,
    pub info: Vec<u8>,
}

impl Attribute {
    pub fn parse(cursor: &mut ByteCursor) -> Result<Attribute, Error> {
        let truncated = || Error::MalformedClass("truncated attribute".to_owned());
        let name_index = Utf8ConstantIndex(ConstantIndex(cursor.u16().ok_or_else(truncated)?));
        let len = cursor.u32().ok_or_else(truncated)?;
        let info = cursor.read_bytes(len as usize).ok_or_else(truncated)?;
        Ok(Attribute {
            name_index,
            info: info.to_vec(),
        })
    }

    /// Parse a `u16` count followed by that many attributes
    pub fn parse_list(cursor: &mut ByteCursor) -> Result<Vec<Attribute>, Error> {
        let count = cursor
            .u16()
            .ok_or_else(|| Error::MalformedClass("truncated attribute count".to_owned()))?;
        (0..count).map(|_| Attribute::parse(cursor)).collect()
    }

    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, Error> {
        pool.utf8_str(self.name_index)
    }

    pub fn is_named(&self, pool: &ConstantPool, name: &str) -> bool {
        pool.utf8(self.name_index)
            .map_or(false, |utf8| utf8.eq_str(name))
    }

    /// Is this attribute called `A::NAME`?
    pub fn is<A: AttributeLike>(&self, pool: &ConstantPool) -> bool {
        self.is_named(pool, A::NAME)
    }
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name_index.serialize(writer)?;

        // Attribute info length is 4 bytes
        length_prefix::<u32>(self.info.len(), "attribute")?.serialize(writer)?;
        writer.write_all(&self.info)?;

        Ok(())
    }
}

/// Attributes are all stored in the same way (see `Attribute`), but internally
/// they represent very different things. This trait is implemented by things
/// which can be turned into attributes.
pub trait AttributeLike: Serialize {
    /// Name of the attribute
    const NAME: &'static str;
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_array: BytecodeArray,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl Code {
    /// Decode the body of a `Code` attribute
    pub fn parse(info: &[u8]) -> Result<Code, Error> {
        let truncated = || Error::MalformedClass("truncated Code attribute".to_owned());
        let mut cursor = ByteCursor::new(info);

        let max_stack = cursor.u16().ok_or_else(truncated)?;
        let max_locals = cursor.u16().ok_or_else(truncated)?;
        let code_len = cursor.u32().ok_or_else(truncated)?;
        let code = cursor.read_bytes(code_len as usize).ok_or_else(truncated)?;

        let handler_count = cursor.u16().ok_or_else(truncated)?;
        let mut exception_table = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            exception_table.push(ExceptionHandler::parse(&mut cursor).ok_or_else(truncated)?);
        }
        let attributes = Attribute::parse_list(&mut cursor)?;
        if cursor.remaining() != 0 {
            return Err(Error::MalformedClass(
                "trailing bytes in Code attribute".to_owned(),
            ));
        }

        Ok(Code {
            max_stack,
            max_locals,
            code_array: BytecodeArray(code.to_vec()),
            exception_table,
            attributes,
        })
    }

    /// Find and decode the `StackMapTable` attribute, if there is one
    pub fn stack_map_table(&self, pool: &ConstantPool) -> Result<Option<StackMapTable>, Error> {
        self.attributes
            .iter()
            .find(|attribute| attribute.is::<StackMapTable>(pool))
            .map(|attribute| StackMapTable::parse(&attribute.info))
            .transpose()
    }
}

impl Serialize for Code {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;
        self.code_array.serialize(writer)?;
        self.exception_table.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl AttributeLike for Code {
    const NAME: &'static str = "Code";
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of exception handler range (inclusive)
    pub start_pc: u16,

    /// End of exception handler range (exclusive)
    pub end_pc: u16,

    /// Start of the exception handler
    pub handler_pc: u16,

    /// Class of exceptions caught, or `None` to catch everything
    pub catch_type: Option<ClassConstantIndex>,
}

impl ExceptionHandler {
    fn parse(cursor: &mut ByteCursor) -> Option<ExceptionHandler> {
        let start_pc = cursor.u16()?;
        let end_pc = cursor.u16()?;
        let handler_pc = cursor.u16()?;
        let catch_type = match cursor.u16()? {
            0 => None,
            idx => Some(ClassConstantIndex(ConstantIndex(idx))),
        };
        Some(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        })
    }
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        match self.catch_type {
            None => 0u16.serialize(writer)?,
            Some(class) => class.serialize(writer)?,
        }
        Ok(())
    }
}

/// Encoded bytecode instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeArray(pub Vec<u8>);

impl Serialize for BytecodeArray {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        length_prefix::<u32>(self.0.len(), "code array")?.serialize(writer)?;
        writer.write_all(&self.0)?;
        Ok(())
    }
}

/// Type of a local or stack slot, as written in a `StackMapTable`
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.4
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(ClassConstantIndex),

    /// Object created by the `new` instruction at this offset, before its constructor runs
    Uninitialized(u16),
}

impl VerificationType {
    fn parse(cursor: &mut ByteCursor) -> Option<VerificationType> {
        Some(match cursor.u8()? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(ClassConstantIndex(ConstantIndex(cursor.u16()?))),
            8 => VerificationType::Uninitialized(cursor.u16()?),
            _ => return None,
        })
    }

    fn parse_list(cursor: &mut ByteCursor, count: u16) -> Option<Vec<VerificationType>> {
        (0..count).map(|_| VerificationType::parse(cursor)).collect()
    }
}

impl Serialize for VerificationType {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(class) => {
                7u8.serialize(writer)?;
                class.serialize(writer)?;
            }
            VerificationType::Uninitialized(offset) => {
                8u8.serialize(writer)?;
                offset.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapTable(pub Vec<StackMapFrame>);

impl AttributeLike for StackMapTable {
    const NAME: &'static str = "StackMapTable";
}

impl Serialize for StackMapTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl StackMapTable {
    /// Decode the body of a `StackMapTable` attribute
    pub fn parse(info: &[u8]) -> Result<StackMapTable, Error> {
        let malformed = || Error::MalformedClass("malformed StackMapTable".to_owned());
        let mut cursor = ByteCursor::new(info);
        let count = cursor.u16().ok_or_else(malformed)?;
        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            frames.push(StackMapFrame::parse(&mut cursor).ok_or_else(malformed)?);
        }
        if cursor.remaining() != 0 {
            return Err(malformed());
        }
        Ok(StackMapTable(frames))
    }

    /// Absolute offsets of the frames in the table
    pub fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.0.len());
        let mut previous: Option<usize> = None;
        for frame in &self.0 {
            let delta = frame.offset_delta() as usize;
            let offset = previous.map_or(delta, |prev| prev + delta + 1);
            offsets.push(offset);
            previous = Some(offset);
        }
        offsets
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    /// Frame has the same locals as the previous frame and number of stack items is zero
    /// Tags: 0-63 or 251
    SameLocalsNoStack { offset_delta: u16 },

    /// Frame has the same locals as the previous frame and number of stack items is one
    /// Tags: 64-127 or 247
    SameLocalsOneStack {
        offset_delta: u16,
        stack: VerificationType,
    },

    /// Frame is like the previous frame, but without the last `chopped_k` locals
    ///
    /// Note: `chopped_k` must be in the range 1 to 3 inclusive
    /// Tags: 248-250
    ChopLocalsNoStack { offset_delta: u16, chopped_k: u8 },

    /// Frame is like the previous frame, but with extra locals
    /// Tags: 252-254
    AppendLocalsNoStack {
        offset_delta: u16,
        locals: Vec<VerificationType>,
    },

    /// Frame has exactly the locals and stack specified
    /// Tag: 255
    Full {
        offset_delta: u16,
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::SameLocalsNoStack { offset_delta }
            | StackMapFrame::SameLocalsOneStack { offset_delta, .. }
            | StackMapFrame::ChopLocalsNoStack { offset_delta, .. }
            | StackMapFrame::AppendLocalsNoStack { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    fn parse(cursor: &mut ByteCursor) -> Option<StackMapFrame> {
        let tag = cursor.u8()?;
        Some(match tag {
            0..=63 => StackMapFrame::SameLocalsNoStack {
                offset_delta: tag as u16,
            },
            64..=127 => StackMapFrame::SameLocalsOneStack {
                offset_delta: tag as u16 - 64,
                stack: VerificationType::parse(cursor)?,
            },
            247 => StackMapFrame::SameLocalsOneStack {
                offset_delta: cursor.u16()?,
                stack: VerificationType::parse(cursor)?,
            },
            248..=250 => StackMapFrame::ChopLocalsNoStack {
                offset_delta: cursor.u16()?,
                chopped_k: 251 - tag,
            },
            251 => StackMapFrame::SameLocalsNoStack {
                offset_delta: cursor.u16()?,
            },
            252..=254 => StackMapFrame::AppendLocalsNoStack {
                offset_delta: cursor.u16()?,
                locals: VerificationType::parse_list(cursor, tag as u16 - 251)?,
            },
            255 => {
                let offset_delta = cursor.u16()?;
                let local_count = cursor.u16()?;
                let locals = VerificationType::parse_list(cursor, local_count)?;
                let stack_count = cursor.u16()?;
                let stack = VerificationType::parse_list(cursor, stack_count)?;
                StackMapFrame::Full {
                    offset_delta,
                    locals,
                    stack,
                }
            }
            _ => return None,
        })
    }
}

impl Serialize for StackMapFrame {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            // `same_frame` and `same_frame_extended`
            StackMapFrame::SameLocalsNoStack { offset_delta } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8).serialize(writer)?;
                } else {
                    251u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
            }

            // `same_locals_1_stack_item_frame` and `same_locals_1_stack_item_frame_extended`
            StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack,
            } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8 + 64).serialize(writer)?;
                } else {
                    247u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
                stack.serialize(writer)?;
            }

            // `chop_frame`
            StackMapFrame::ChopLocalsNoStack {
                offset_delta,
                chopped_k,
            } => {
                if !(1..=3).contains(chopped_k) {
                    return Err(invalid_frame("chop frames remove 1-3 locals"));
                }
                (251 - chopped_k).serialize(writer)?;
                offset_delta.serialize(writer)?;
            }

            // `append_frame`
            StackMapFrame::AppendLocalsNoStack {
                offset_delta,
                locals,
            } => {
                let added_k = locals.len();
                if !(1..=3).contains(&added_k) {
                    return Err(invalid_frame("append frames add 1-3 locals"));
                }
                (251 + added_k as u8).serialize(writer)?;
                offset_delta.serialize(writer)?;
                for local in locals {
                    local.serialize(writer)?;
                }
            }

            // `full_frame`
            StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            } => {
                255u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
                locals.serialize(writer)?;
                stack.serialize(writer)?;
            }
        };
        Ok(())
    }
}

fn invalid_frame(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

/// Name of the attribute holding the bootstrap method table
///
/// The contents live in the constant pool (see [`ConstantPool::bootstrap_method_entry`]).
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.23
pub const BOOTSTRAP_METHODS: &str = "BootstrapMethods";

#[cfg(test)]
mod test {
    use super::*;

    fn object(idx: u16) -> VerificationType {
        VerificationType::Object(ClassConstantIndex(ConstantIndex(idx)))
    }

    #[test]
    fn stack_map_frames_read_back() {
        let table = StackMapTable(vec![
            StackMapFrame::SameLocalsNoStack { offset_delta: 3 },
            StackMapFrame::SameLocalsNoStack { offset_delta: 300 },
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 0,
                stack: object(5),
            },
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 64,
                stack: VerificationType::Uninitialized(12),
            },
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 1,
                chopped_k: 2,
            },
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 7,
                locals: vec![VerificationType::Long, VerificationType::Integer],
            },
            StackMapFrame::Full {
                offset_delta: 2,
                locals: vec![VerificationType::UninitializedThis, VerificationType::Top],
                stack: vec![VerificationType::Null, object(9)],
            },
        ]);
        let mut info = vec![];
        table.serialize(&mut info).unwrap();
        assert_eq!(info[2], 3);
        assert_eq!(&info[3..6], &[251, 1, 44]);
        assert_eq!(StackMapTable::parse(&info).unwrap(), table);
        assert_eq!(table.offsets(), vec![3, 304, 305, 370, 372, 380, 383]);
    }

    #[test]
    fn invalid_chop_is_rejected() {
        let frame = StackMapFrame::ChopLocalsNoStack {
            offset_delta: 0,
            chopped_k: 4,
        };
        assert!(frame.serialize(&mut vec![]).is_err());
    }

    #[test]
    fn code_attribute_reads_back() {
        let code = Code {
            max_stack: 2,
            max_locals: 1,
            code_array: BytecodeArray(vec![0x2a, 0xb0]),
            exception_table: vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 1,
                handler_pc: 1,
                catch_type: None,
            }],
            attributes: vec![Attribute {
                name_index: Utf8ConstantIndex(ConstantIndex(4)),
                info: vec![1, 2, 3],
            }],
        };
        let mut info = vec![];
        code.serialize(&mut info).unwrap();
        assert_eq!(Code::parse(&info).unwrap(), code);
        assert!(Code::parse(&info[..info.len() - 1]).is_err());
    }
}
