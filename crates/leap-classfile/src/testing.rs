//! Minimal bytecode and class-file assembler for tests.
//!
//! Produces well-formed code arrays (branch offsets, switch padding,
//! line tables, exception tables) without a verifier; stack discipline is the
//! caller's problem. Misuse (unbound labels, binding twice) panics.

use crate::code::{ExceptionHandler, LineNumber, MethodCode};
use crate::opcode;

/// Assembler label, bound to an offset with [`CodeBuilder::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeLabel(usize);

struct Fixup {
    insn: u32,
    at: usize,
    label: CodeLabel,
    wide: bool,
}

#[derive(Default)]
pub struct CodeBuilder {
    code: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
    lines: Vec<LineNumber>,
    handlers: Vec<(CodeLabel, CodeLabel, CodeLabel, Option<String>)>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn new_label(&mut self) -> CodeLabel {
        self.labels.push(None);
        CodeLabel(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: CodeLabel) {
        let offset = self.offset();
        let slot = &mut self.labels[label.0];
        assert!(slot.is_none(), "label {label:?} bound twice");
        *slot = Some(offset);
    }

    /// Starts a `LineNumberTable` row at the current offset.
    pub fn line(&mut self, line: u32) {
        self.lines.push(LineNumber {
            start_pc: self.offset(),
            line,
        });
    }

    pub fn op(&mut self, opcode: u8) {
        self.code.push(opcode);
    }

    pub fn iconst(&mut self, value: i32) {
        match value {
            -1..=5 => self.op((opcode::ICONST_0 as i32 + value) as u8),
            -128..=127 => {
                self.op(opcode::BIPUSH);
                self.code.push(value as i8 as u8);
            }
            _ => {
                self.op(opcode::SIPUSH);
                self.code.extend_from_slice(&(value as i16).to_be_bytes());
            }
        }
    }

    pub fn iload(&mut self, index: u8) {
        self.op(opcode::ILOAD);
        self.code.push(index);
    }

    pub fn istore(&mut self, index: u8) {
        self.op(opcode::ISTORE);
        self.code.push(index);
    }

    pub fn iinc(&mut self, index: u8, delta: i8) {
        self.op(opcode::IINC);
        self.code.push(index);
        self.code.push(delta as u8);
    }

    /// `invokestatic` with an arbitrary constant-pool index; the decoder
    /// never resolves it.
    pub fn invokestatic(&mut self, cp_index: u16) {
        self.op(opcode::INVOKESTATIC);
        self.code.extend_from_slice(&cp_index.to_be_bytes());
    }

    /// `goto`, `goto_w`, or any `if*` opcode.
    pub fn jump(&mut self, opcode: u8, target: CodeLabel) {
        let insn = self.offset();
        self.op(opcode);
        let wide = opcode == opcode::GOTO_W;
        self.fixup(insn, target, wide);
    }

    pub fn tableswitch(&mut self, low: i32, default: CodeLabel, cases: &[CodeLabel]) {
        let insn = self.offset();
        self.op(opcode::TABLESWITCH);
        self.pad();
        self.fixup(insn, default, true);
        self.code.extend_from_slice(&low.to_be_bytes());
        let high = low + cases.len() as i32 - 1;
        self.code.extend_from_slice(&high.to_be_bytes());
        for &case in cases {
            self.fixup(insn, case, true);
        }
    }

    pub fn lookupswitch(&mut self, default: CodeLabel, pairs: &[(i32, CodeLabel)]) {
        let insn = self.offset();
        self.op(opcode::LOOKUPSWITCH);
        self.pad();
        self.fixup(insn, default, true);
        self.code
            .extend_from_slice(&(pairs.len() as i32).to_be_bytes());
        for &(key, target) in pairs {
            self.code.extend_from_slice(&key.to_be_bytes());
            self.fixup(insn, target, true);
        }
    }

    /// Catch-all handler for `[start, end)`.
    pub fn try_catch(&mut self, start: CodeLabel, end: CodeLabel, handler: CodeLabel) {
        self.handlers.push((start, end, handler, None));
    }

    pub fn try_catch_typed(
        &mut self,
        start: CodeLabel,
        end: CodeLabel,
        handler: CodeLabel,
        catch_type: &str,
    ) {
        self.handlers
            .push((start, end, handler, Some(catch_type.to_string())));
    }

    pub fn build(mut self) -> MethodCode {
        for fixup in std::mem::take(&mut self.fixups) {
            let target = self.resolve(fixup.label) as i64;
            let delta = target - fixup.insn as i64;
            if fixup.wide {
                self.code[fixup.at..fixup.at + 4].copy_from_slice(&(delta as i32).to_be_bytes());
            } else {
                let delta = i16::try_from(delta).expect("branch offset out of i16 range");
                self.code[fixup.at..fixup.at + 2].copy_from_slice(&delta.to_be_bytes());
            }
        }

        let exception_table = self
            .handlers
            .iter()
            .map(|(start, end, handler, catch_type)| ExceptionHandler {
                start_pc: self.resolve(*start),
                end_pc: self.resolve(*end),
                handler_pc: self.resolve(*handler),
                catch_type: catch_type.clone(),
            })
            .collect();

        MethodCode {
            max_stack: 8,
            max_locals: 8,
            code: self.code,
            exception_table,
            line_numbers: self.lines,
        }
    }

    fn resolve(&self, label: CodeLabel) -> u32 {
        self.labels[label.0].unwrap_or_else(|| panic!("label {label:?} never bound"))
    }

    fn fixup(&mut self, insn: u32, label: CodeLabel, wide: bool) {
        let at = self.code.len();
        self.code
            .extend_from_slice(if wide { &[0; 4][..] } else { &[0; 2][..] });
        self.fixups.push(Fixup {
            insn,
            at,
            label,
            wide,
        });
    }

    fn pad(&mut self) {
        while self.code.len() % 4 != 0 {
            self.code.push(0);
        }
    }
}

struct WrittenMethod {
    name: u16,
    descriptor: u16,
    code: MethodCode,
    catch_types: Vec<u16>,
}

/// Wraps assembled methods into a class file `ClassFile::parse` accepts.
pub struct ClassWriter {
    pool: Vec<(u8, Vec<u8>)>,
    this_class: u16,
    super_class: u16,
    source_file: Option<(u16, u16)>,
    methods: Vec<WrittenMethod>,
}

impl ClassWriter {
    pub fn new(name: &str) -> Self {
        let mut writer = Self {
            pool: Vec::new(),
            this_class: 0,
            super_class: 0,
            source_file: None,
            methods: Vec::new(),
        };
        writer.this_class = writer.class(name);
        writer.super_class = writer.class("java/lang/Object");
        writer
    }

    pub fn source_file(mut self, name: &str) -> Self {
        let attr = self.utf8("SourceFile");
        let value = self.utf8(name);
        self.source_file = Some((attr, value));
        self
    }

    pub fn method(mut self, name: &str, descriptor: &str, code: MethodCode) -> Self {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let catch_types = code
            .exception_table
            .iter()
            .map(|h| h.catch_type.as_deref().map_or(0, |ty| self.class(ty)))
            .collect();
        self.methods.push(WrittenMethod {
            name,
            descriptor,
            code,
            catch_types,
        });
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Attribute names are looked up by value, so interning here keeps
        // `to_bytes` usable on a shared reference.
        let mut writer = Self {
            pool: self.pool.clone(),
            this_class: self.this_class,
            super_class: self.super_class,
            source_file: self.source_file,
            methods: Vec::new(),
        };
        let code_attr = writer.utf8("Code");
        let lines_attr = writer.utf8("LineNumberTable");

        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&52u16.to_be_bytes());
        out.extend_from_slice(&(writer.pool.len() as u16 + 1).to_be_bytes());
        for (tag, body) in &writer.pool {
            out.push(*tag);
            out.extend_from_slice(body);
        }

        put_u2(&mut out, 0x0021);
        put_u2(&mut out, writer.this_class);
        put_u2(&mut out, writer.super_class);
        put_u2(&mut out, 0); // interfaces
        put_u2(&mut out, 0); // fields

        put_u2(&mut out, self.methods.len() as u16);
        for method in &self.methods {
            put_u2(&mut out, 0x0009);
            put_u2(&mut out, method.name);
            put_u2(&mut out, method.descriptor);
            put_u2(&mut out, 1);

            let code = &method.code;
            let mut attr = Vec::new();
            put_u2(&mut attr, code.max_stack);
            put_u2(&mut attr, code.max_locals);
            attr.extend_from_slice(&(code.code.len() as u32).to_be_bytes());
            attr.extend_from_slice(&code.code);
            put_u2(&mut attr, code.exception_table.len() as u16);
            for (handler, catch_type) in code.exception_table.iter().zip(&method.catch_types) {
                put_u2(&mut attr, handler.start_pc as u16);
                put_u2(&mut attr, handler.end_pc as u16);
                put_u2(&mut attr, handler.handler_pc as u16);
                put_u2(&mut attr, *catch_type);
            }
            if code.line_numbers.is_empty() {
                put_u2(&mut attr, 0);
            } else {
                put_u2(&mut attr, 1);
                put_u2(&mut attr, lines_attr);
                let len = 2 + 4 * code.line_numbers.len() as u32;
                attr.extend_from_slice(&len.to_be_bytes());
                put_u2(&mut attr, code.line_numbers.len() as u16);
                for row in &code.line_numbers {
                    put_u2(&mut attr, row.start_pc as u16);
                    put_u2(&mut attr, row.line as u16);
                }
            }

            put_u2(&mut out, code_attr);
            out.extend_from_slice(&(attr.len() as u32).to_be_bytes());
            out.extend_from_slice(&attr);
        }

        match writer.source_file {
            Some((attr, value)) => {
                put_u2(&mut out, 1);
                put_u2(&mut out, attr);
                out.extend_from_slice(&2u32.to_be_bytes());
                put_u2(&mut out, value);
            }
            None => put_u2(&mut out, 0),
        }

        out
    }

    fn utf8(&mut self, value: &str) -> u16 {
        let mut body = Vec::with_capacity(value.len() + 2);
        body.extend_from_slice(&(value.len() as u16).to_be_bytes());
        body.extend_from_slice(value.as_bytes());
        self.intern(1, body)
    }

    fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.intern(7, name_index.to_be_bytes().to_vec())
    }

    fn intern(&mut self, tag: u8, body: Vec<u8>) -> u16 {
        if let Some(pos) = self.pool.iter().position(|(t, b)| *t == tag && *b == body) {
            return pos as u16 + 1;
        }
        self.pool.push((tag, body));
        self.pool.len() as u16
    }
}

fn put_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}
