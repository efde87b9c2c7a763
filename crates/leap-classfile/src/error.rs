use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    UnexpectedEof,
    InvalidMagic(u32),
    InvalidConstantPoolIndex(u16),
    InvalidConstantPoolTag(u8),
    ConstantPoolTypeMismatch {
        index: u16,
        expected: &'static str,
        found: &'static str,
    },
    InvalidModifiedUtf8,
    MalformedAttribute(&'static str),
    /// An opcode that is reserved or not defined by the JVM specification.
    InvalidOpcode { offset: u32, opcode: u8 },
    /// A valid opcode the control-flow analysis refuses to model (`jsr`/`ret`).
    UnsupportedOpcode { offset: u32, opcode: u8 },
    /// The code array ends inside an instruction's operands.
    TruncatedInstruction { offset: u32 },
    /// A branch, switch, handler or line-table offset that does not land on an
    /// instruction boundary inside the method body.
    InvalidTarget { offset: u32, target: i64 },
    Other(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnexpectedEof => write!(f, "unexpected end of input"),
            Error::InvalidMagic(magic) => write!(f, "invalid classfile magic: 0x{magic:08x}"),
            Error::InvalidConstantPoolIndex(index) => {
                write!(f, "invalid constant pool index: {index}")
            }
            Error::InvalidConstantPoolTag(tag) => write!(f, "invalid constant pool tag: {tag}"),
            Error::ConstantPoolTypeMismatch {
                index,
                expected,
                found,
            } => write!(
                f,
                "constant pool type mismatch at index {index}: expected {expected}, found {found}"
            ),
            Error::InvalidModifiedUtf8 => write!(f, "invalid modified UTF-8 constant"),
            Error::MalformedAttribute(name) => write!(f, "malformed {name} attribute"),
            Error::InvalidOpcode { offset, opcode } => {
                write!(f, "invalid opcode 0x{opcode:02x} at offset {offset}")
            }
            Error::UnsupportedOpcode { offset, opcode } => {
                write!(f, "unsupported opcode 0x{opcode:02x} at offset {offset}")
            }
            Error::TruncatedInstruction { offset } => {
                write!(f, "truncated instruction at offset {offset}")
            }
            Error::InvalidTarget { offset, target } => {
                write!(f, "instruction at offset {offset} targets invalid offset {target}")
            }
            Error::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {}
