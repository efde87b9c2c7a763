//! JVM opcode constants and instruction-shape tables.
//!
//! Only the opcodes the decoder or the assembler refer to by name get a
//! constant; everything else is classified through [`shape`].

pub const NOP: u8 = 0x00;
pub const ACONST_NULL: u8 = 0x01;
pub const ICONST_M1: u8 = 0x02;
pub const ICONST_0: u8 = 0x03;
pub const ICONST_1: u8 = 0x04;
pub const ICONST_5: u8 = 0x08;
pub const BIPUSH: u8 = 0x10;
pub const SIPUSH: u8 = 0x11;
pub const LDC: u8 = 0x12;
pub const ILOAD: u8 = 0x15;
pub const ALOAD: u8 = 0x19;
pub const ISTORE: u8 = 0x36;
pub const ASTORE: u8 = 0x3a;
pub const POP: u8 = 0x57;
pub const DUP: u8 = 0x59;
pub const IADD: u8 = 0x60;
pub const ISUB: u8 = 0x64;
pub const IINC: u8 = 0x84;
pub const IFEQ: u8 = 0x99;
pub const IFNE: u8 = 0x9a;
pub const IFLT: u8 = 0x9b;
pub const IFGE: u8 = 0x9c;
pub const IFGT: u8 = 0x9d;
pub const IFLE: u8 = 0x9e;
pub const IF_ICMPEQ: u8 = 0x9f;
pub const IF_ICMPNE: u8 = 0xa0;
pub const IF_ICMPLT: u8 = 0xa1;
pub const IF_ICMPGE: u8 = 0xa2;
pub const IF_ICMPGT: u8 = 0xa3;
pub const IF_ICMPLE: u8 = 0xa4;
pub const IF_ACMPEQ: u8 = 0xa5;
pub const IF_ACMPNE: u8 = 0xa6;
pub const GOTO: u8 = 0xa7;
pub const JSR: u8 = 0xa8;
pub const RET: u8 = 0xa9;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const IRETURN: u8 = 0xac;
pub const LRETURN: u8 = 0xad;
pub const FRETURN: u8 = 0xae;
pub const DRETURN: u8 = 0xaf;
pub const ARETURN: u8 = 0xb0;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const ATHROW: u8 = 0xbf;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const IFNULL: u8 = 0xc6;
pub const IFNONNULL: u8 = 0xc7;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;

/// Control-flow class and encoded size of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    /// Falls through; total size including the opcode byte.
    Plain(usize),
    /// `goto` / `goto_w`; the value is the operand width (2 or 4).
    Goto(usize),
    /// `if*` family, always a 2-byte operand.
    Branch,
    TableSwitch,
    LookupSwitch,
    Return,
    Throw,
    Wide,
    /// Subroutine instructions; valid bytecode the analysis does not model.
    Subroutine,
}

pub(crate) fn shape(opcode: u8) -> Option<Shape> {
    use Shape::*;
    let shape = match opcode {
        0x00..=0x0f => Plain(1),
        BIPUSH => Plain(2),
        SIPUSH => Plain(3),
        LDC => Plain(2),
        0x13 | 0x14 => Plain(3),
        0x15..=0x19 => Plain(2),
        0x1a..=0x35 => Plain(1),
        0x36..=0x3a => Plain(2),
        0x3b..=0x83 => Plain(1),
        IINC => Plain(3),
        0x85..=0x98 => Plain(1),
        IFEQ..=IF_ACMPNE | IFNULL | IFNONNULL => Branch,
        GOTO => Goto(2),
        GOTO_W => Goto(4),
        JSR | RET | JSR_W => Subroutine,
        TABLESWITCH => TableSwitch,
        LOOKUPSWITCH => LookupSwitch,
        IRETURN..=RETURN => Return,
        0xb2..=INVOKESTATIC => Plain(3),
        INVOKEINTERFACE | INVOKEDYNAMIC => Plain(5),
        NEW => Plain(3),
        0xbc => Plain(2),
        0xbd => Plain(3),
        0xbe => Plain(1),
        ATHROW => Throw,
        0xc0 | 0xc1 => Plain(3),
        0xc2 | 0xc3 => Plain(1),
        WIDE => Wide,
        MULTIANEWARRAY => Plain(4),
        _ => return None,
    };
    Some(shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_control_flow() {
        assert_eq!(shape(GOTO), Some(Shape::Goto(2)));
        assert_eq!(shape(IFNONNULL), Some(Shape::Branch));
        assert_eq!(shape(ARETURN), Some(Shape::Return));
        assert_eq!(shape(ATHROW), Some(Shape::Throw));
        assert_eq!(shape(JSR_W), Some(Shape::Subroutine));
        assert_eq!(shape(INVOKEINTERFACE), Some(Shape::Plain(5)));
    }

    #[test]
    fn reserved_opcodes_have_no_shape() {
        for op in [0xca, 0xcb, 0xfe, 0xff] {
            assert_eq!(shape(op), None);
        }
    }
}
