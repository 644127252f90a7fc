use super::class_file::ConstantIndex;
use super::code::Label;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// The bytes do not have the overall shape of a class file (bad magic, trailing bytes, ...)
    MalformedClass(String),

    /// Constant pool could not be decoded or an index into it is not valid
    MalformedPool(PoolErrorKind),

    /// Adding the constant would push the pool past 65535 slots
    ConstantPoolOverflow {
        tag: u8,
        offset: u16,
    },

    /// Method body could not be decoded or analyzed
    MalformedBytecode {
        /// Owning method, as `Class.name(descriptor)`
        method: Option<String>,
        offset: Option<usize>,
        kind: BytecodeErrorKind,

        /// Rendering of the instructions surrounding `offset`
        dump: Option<String>,
    },

    /// Labels were bound twice, never bound, or used outside their builder
    LabelMisuse(LabelError),

    /// A 2-byte branch offset does not fit and widening branches is disabled
    BranchOverflow {
        offset: usize,
        jump: isize,
    },

    /// Unreachable code was found and patching dead code is disabled
    DeadCode {
        method: String,
        offset: usize,
    },

    /// Method body exceeds 65535 bytes (or a count derived from it overflows `u16`)
    MethodCodeOverflow(usize),

    BadDescriptor(String),

    /// The class hierarchy resolver has no information about this class
    UnresolvedClass(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolErrorKind {
    BadTag { index: u16, tag: u8 },
    Truncated,
    InvalidUtf8 { index: u16 },

    /// Modified UTF-8 encoding is longer than the 65535 bytes a `Utf8` constant can hold
    Utf8TooLong(usize),
    IndexOutOfRange(u16),

    /// Second slot of a `long` or `double` constant
    UnusableIndex(u16),
    TagMismatch {
        index: u16,
        expected: &'static str,
        found: &'static str,
    },
    BadMethodHandleKind(u8),
    BadBootstrapMethodIndex(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BytecodeErrorKind {
    UnknownOpcode(u8),
    Truncated,
    BadWideOpcode(u8),
    BadSwitch(&'static str),
    BranchOutOfBounds(i64),
    BadHandlerRange,
    StackUnderflow,
    StackSizeMismatch { expected: usize, found: usize },
    StackContentMismatch(usize),
    LocalOutOfRange(u16),
    ExpectingFrame,
    BadFrameOffset(usize),
    FallsOffEnd,
    BadInitReceiver,
    NotLoadable(ConstantIndex),
    BadArrayType(u8),

    /// Instruction can't be encoded with this operand (eg. `iload` of a `void`)
    InvalidOperand(&'static str),

    /// `jsr`, `jsr_w`, and `ret` are not supported in class files with stack maps
    Discontinued(u8),
    MissingCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    Unbound(Label),
    AlreadyBound(Label),
    ForeignContext(Label),
}

impl Error {
    /// Bytecode error without any method context
    pub fn bytecode(offset: usize, kind: BytecodeErrorKind) -> Error {
        Error::MalformedBytecode {
            method: None,
            offset: Some(offset),
            kind,
            dump: None,
        }
    }

    /// Fill in whatever location information is missing from a bytecode error
    pub fn located(self, at_method: &str, at_offset: usize, dump: impl FnOnce() -> String) -> Error {
        match self {
            Error::MalformedBytecode {
                method,
                offset,
                kind,
                dump: existing,
            } => Error::MalformedBytecode {
                method: method.or_else(|| Some(at_method.to_owned())),
                offset: offset.or(Some(at_offset)),
                kind,
                dump: existing.or_else(|| Some(dump())),
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<PoolErrorKind> for Error {
    fn from(kind: PoolErrorKind) -> Error {
        Error::MalformedPool(kind)
    }
}

/// Bytecode error whose location gets filled in later with [`Error::located`]
impl From<BytecodeErrorKind> for Error {
    fn from(kind: BytecodeErrorKind) -> Error {
        Error::MalformedBytecode {
            method: None,
            offset: None,
            kind,
            dump: None,
        }
    }
}

impl From<LabelError> for Error {
    fn from(err: LabelError) -> Error {
        Error::LabelMisuse(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::MalformedClass(msg) => write!(f, "malformed class file: {}", msg),
            Error::MalformedPool(kind) => write!(f, "malformed constant pool: {:?}", kind),
            Error::ConstantPoolOverflow { tag, offset } => write!(
                f,
                "constant pool overflow adding constant with tag {} at {}",
                tag, offset
            ),
            Error::MalformedBytecode {
                method,
                offset,
                kind,
                dump,
            } => {
                write!(f, "malformed bytecode: {:?}", kind)?;
                if let Some(offset) = offset {
                    write!(f, " at offset {}", offset)?;
                }
                if let Some(method) = method {
                    write!(f, " in {}", method)?;
                }
                if let Some(dump) = dump {
                    write!(f, "\n{}", dump)?;
                }
                Ok(())
            }
            Error::LabelMisuse(err) => write!(f, "label misuse: {:?}", err),
            Error::BranchOverflow { offset, jump } => write!(
                f,
                "branch at offset {} jumps {} bytes, which does not fit in 16 bits",
                offset, jump
            ),
            Error::DeadCode { method, offset } => {
                write!(f, "unreachable code at offset {} in {}", offset, method)
            }
            Error::MethodCodeOverflow(size) => write!(f, "method code too large ({})", size),
            Error::BadDescriptor(desc) => write!(f, "bad descriptor: {}", desc),
            Error::UnresolvedClass(class) => write!(f, "cannot resolve class {}", class),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}
