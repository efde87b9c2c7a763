use crate::error::{Error, Result};
use crate::reader::Reader;

/// One row of a method's `exception_table`.
///
/// `catch_type` is `None` for `finally`/catch-all handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    pub catch_type: Option<String>,
}

/// One row of a `LineNumberTable` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineNumber {
    pub start_pc: u32,
    pub line: u32,
}

/// A method body: the input to [`crate::decode_method`].
///
/// Built either from a parsed class file or from the bytecode and line table
/// a debug engine reports for a loaded method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodCode {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    /// Rows in attribute order; a method may carry several tables, which are
    /// concatenated.
    pub line_numbers: Vec<LineNumber>,
}

impl MethodCode {
    pub fn new(code: Vec<u8>, line_numbers: Vec<LineNumber>) -> Self {
        Self {
            code,
            line_numbers,
            ..Self::default()
        }
    }

    /// Source lines that own at least one instruction, sorted and de-duplicated.
    pub fn lines(&self) -> Vec<u32> {
        let mut lines: Vec<u32> = self.line_numbers.iter().map(|row| row.line).collect();
        lines.sort_unstable();
        lines.dedup();
        lines
    }

    pub(crate) fn parse(
        reader: &mut Reader<'_>,
        cp: &crate::constant_pool::ConstantPool,
    ) -> Result<Self> {
        let max_stack = reader.read_u2()?;
        let max_locals = reader.read_u2()?;
        let code_length = reader.read_u4()? as usize;
        if code_length == 0 {
            return Err(Error::MalformedAttribute("Code"));
        }
        let code = reader.read_bytes(code_length)?.to_vec();

        let handlers = reader.read_u2()? as usize;
        let mut exception_table = Vec::with_capacity(handlers);
        for _ in 0..handlers {
            let start_pc = reader.read_u2()? as u32;
            let end_pc = reader.read_u2()? as u32;
            let handler_pc = reader.read_u2()? as u32;
            let catch_index = reader.read_u2()?;
            let catch_type = if catch_index == 0 {
                None
            } else {
                Some(cp.get_class_name(catch_index)?)
            };
            exception_table.push(ExceptionHandler {
                start_pc,
                end_pc,
                handler_pc,
                catch_type,
            });
        }

        let mut line_numbers = Vec::new();
        let attributes_count = reader.read_u2()? as usize;
        for _ in 0..attributes_count {
            let name_index = reader.read_u2()?;
            let length = reader.read_u4()? as usize;
            let info = reader.read_bytes(length)?;
            if cp.get_utf8(name_index)? != "LineNumberTable" {
                continue;
            }

            let mut sub = Reader::new(info);
            let rows = sub.read_u2()? as usize;
            line_numbers.reserve(rows);
            for _ in 0..rows {
                let start_pc = sub.read_u2()? as u32;
                let line = sub.read_u2()? as u32;
                line_numbers.push(LineNumber { start_pc, line });
            }
            sub.ensure_empty()
                .map_err(|_| Error::MalformedAttribute("LineNumberTable"))?;
        }

        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            line_numbers,
        })
    }
}
