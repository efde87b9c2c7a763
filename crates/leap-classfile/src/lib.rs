#![forbid(unsafe_code)]

mod classfile;
mod code;
mod constant_pool;
mod decode;
mod error;
pub mod opcode;
mod reader;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use crate::classfile::{ClassFile, MethodInfo};
pub use crate::code::{ExceptionHandler, LineNumber, MethodCode};
pub use crate::decode::{decode_method, Insn, InsnKind, Label, MethodEvent};
pub use crate::error::{Error, Result};
