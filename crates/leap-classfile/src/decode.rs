use std::collections::{BTreeMap, BTreeSet};

use crate::code::MethodCode;
use crate::error::{Error, Result};
use crate::opcode::{self, Shape};
use crate::reader::Reader;

/// A position in the method body, identified by its bytecode offset.
///
/// A label may also point one past the last instruction (the exclusive end of
/// a protected range).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsnKind {
    Normal,
    Jump(Label),
    ConditionalJump(Label),
    Switch { default: Label, targets: Vec<Label> },
    Return,
    Throw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insn {
    pub offset: u32,
    pub opcode: u8,
    pub kind: InsnKind,
}

/// One step of a method visit, in the order a bytecode visitor would see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodEvent {
    /// Emitted before any label or instruction.
    TryCatch {
        start: Label,
        end: Label,
        handler: Label,
    },
    Label(Label),
    /// Line marker for the instruction that follows.
    Line(u32),
    Insn(Insn),
}

struct RawInsn {
    offset: u32,
    opcode: u8,
    kind: RawKind,
}

enum RawKind {
    Normal,
    Jump(i64),
    ConditionalJump(i64),
    Switch { default: i64, targets: Vec<i64> },
    Return,
    Throw,
}

/// Decodes a method body into the label/line/instruction event stream.
///
/// Every branch, switch and exception-table offset must land on an instruction
/// boundary; line-table rows must too. Subroutine instructions are rejected.
pub fn decode_method(method: &MethodCode) -> Result<Vec<MethodEvent>> {
    let code_len = u32::try_from(method.code.len()).map_err(|_| Error::Other("code too large"))?;
    let raw = scan(&method.code)?;
    let starts: BTreeSet<u32> = raw.iter().map(|insn| insn.offset).collect();

    let resolve = |offset: u32, target: i64| -> Result<Label> {
        match u32::try_from(target) {
            Ok(t) if starts.contains(&t) => Ok(Label(t)),
            _ => Err(Error::InvalidTarget { offset, target }),
        }
    };

    let mut labels = BTreeSet::new();
    let mut insns = Vec::with_capacity(raw.len());
    for insn in raw {
        let kind = match insn.kind {
            RawKind::Normal => InsnKind::Normal,
            RawKind::Return => InsnKind::Return,
            RawKind::Throw => InsnKind::Throw,
            RawKind::Jump(t) => InsnKind::Jump(resolve(insn.offset, t)?),
            RawKind::ConditionalJump(t) => InsnKind::ConditionalJump(resolve(insn.offset, t)?),
            RawKind::Switch { default, targets } => InsnKind::Switch {
                default: resolve(insn.offset, default)?,
                targets: targets
                    .into_iter()
                    .map(|t| resolve(insn.offset, t))
                    .collect::<Result<_>>()?,
            },
        };
        match &kind {
            InsnKind::Jump(l) | InsnKind::ConditionalJump(l) => {
                labels.insert(*l);
            }
            InsnKind::Switch { default, targets } => {
                labels.insert(*default);
                labels.extend(targets.iter().copied());
            }
            _ => {}
        }
        insns.push(Insn {
            offset: insn.offset,
            opcode: insn.opcode,
            kind,
        });
    }

    let mut events = Vec::with_capacity(insns.len() * 2);
    for handler in &method.exception_table {
        let start = resolve(handler.start_pc, handler.start_pc as i64)?;
        let handler_label = resolve(handler.start_pc, handler.handler_pc as i64)?;
        let end = if handler.end_pc == code_len {
            Label(code_len)
        } else {
            resolve(handler.start_pc, handler.end_pc as i64)?
        };
        if end <= start {
            return Err(Error::MalformedAttribute("exception table"));
        }
        labels.extend([start, end, handler_label]);
        events.push(MethodEvent::TryCatch {
            start,
            end,
            handler: handler_label,
        });
    }

    let mut lines: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for row in &method.line_numbers {
        let label = resolve(row.start_pc, row.start_pc as i64)?;
        labels.insert(label);
        lines.entry(row.start_pc).or_default().push(row.line);
    }

    for insn in insns {
        let at = Label(insn.offset);
        if labels.contains(&at) {
            events.push(MethodEvent::Label(at));
        }
        if let Some(rows) = lines.get(&insn.offset) {
            events.extend(rows.iter().map(|&line| MethodEvent::Line(line)));
        }
        events.push(MethodEvent::Insn(insn));
    }
    if labels.contains(&Label(code_len)) {
        events.push(MethodEvent::Label(Label(code_len)));
    }

    Ok(events)
}

fn scan(code: &[u8]) -> Result<Vec<RawInsn>> {
    let mut reader = Reader::new(code);
    let mut insns = Vec::new();

    while !reader.is_empty() {
        let offset = reader.position() as u32;
        let at = offset as i64;
        let opcode = reader.read_u1()?;
        let truncated = |_: Error| Error::TruncatedInstruction { offset };
        let shape = opcode::shape(opcode).ok_or(Error::InvalidOpcode { offset, opcode })?;

        let kind = match shape {
            Shape::Plain(len) => {
                reader.skip(len - 1).map_err(truncated)?;
                RawKind::Normal
            }
            Shape::Goto(2) => RawKind::Jump(at + reader.read_i2().map_err(truncated)? as i64),
            Shape::Goto(_) => RawKind::Jump(at + reader.read_i4().map_err(truncated)? as i64),
            Shape::Branch => {
                RawKind::ConditionalJump(at + reader.read_i2().map_err(truncated)? as i64)
            }
            Shape::TableSwitch => {
                reader.align4().map_err(truncated)?;
                let default = at + reader.read_i4().map_err(truncated)? as i64;
                let low = reader.read_i4().map_err(truncated)?;
                let high = reader.read_i4().map_err(truncated)?;
                if high < low {
                    return Err(Error::Other("tableswitch with high < low"));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                if count > reader.remaining() / 4 {
                    return Err(truncated(Error::UnexpectedEof));
                }
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(at + reader.read_i4()? as i64);
                }
                RawKind::Switch { default, targets }
            }
            Shape::LookupSwitch => {
                reader.align4().map_err(truncated)?;
                let default = at + reader.read_i4().map_err(truncated)? as i64;
                let pairs = reader.read_i4().map_err(truncated)?;
                if pairs < 0 {
                    return Err(Error::Other("lookupswitch with negative pair count"));
                }
                let pairs = pairs as usize;
                if pairs > reader.remaining() / 8 {
                    return Err(truncated(Error::UnexpectedEof));
                }
                let mut targets = Vec::with_capacity(pairs);
                for _ in 0..pairs {
                    reader.skip(4)?;
                    targets.push(at + reader.read_i4()? as i64);
                }
                RawKind::Switch { default, targets }
            }
            Shape::Return => RawKind::Return,
            Shape::Throw => RawKind::Throw,
            Shape::Wide => {
                let widened = reader.read_u1().map_err(truncated)?;
                match widened {
                    opcode::IINC => reader.skip(4).map_err(truncated)?,
                    opcode::ILOAD..=opcode::ALOAD | opcode::ISTORE..=opcode::ASTORE => {
                        reader.skip(2).map_err(truncated)?
                    }
                    opcode::RET => {
                        return Err(Error::UnsupportedOpcode {
                            offset,
                            opcode: widened,
                        })
                    }
                    other => {
                        return Err(Error::InvalidOpcode {
                            offset,
                            opcode: other,
                        })
                    }
                }
                RawKind::Normal
            }
            Shape::Subroutine => return Err(Error::UnsupportedOpcode { offset, opcode }),
        };

        insns.push(RawInsn {
            offset,
            opcode,
            kind,
        });
    }

    Ok(insns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::*;
    use crate::testing::CodeBuilder;
    use crate::LineNumber;

    fn insns(events: &[MethodEvent]) -> Vec<&Insn> {
        events
            .iter()
            .filter_map(|e| match e {
                MethodEvent::Insn(i) => Some(i),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn emits_label_then_line_then_insn() {
        let mut b = CodeBuilder::new();
        b.line(3);
        b.iconst(0);
        b.istore(1);
        b.line(4);
        b.op(RETURN);
        let events = decode_method(&b.build()).unwrap();

        assert_eq!(
            events,
            vec![
                MethodEvent::Label(Label(0)),
                MethodEvent::Line(3),
                MethodEvent::Insn(Insn { offset: 0, opcode: ICONST_0, kind: InsnKind::Normal }),
                MethodEvent::Insn(Insn { offset: 1, opcode: ISTORE, kind: InsnKind::Normal }),
                MethodEvent::Label(Label(3)),
                MethodEvent::Line(4),
                MethodEvent::Insn(Insn { offset: 3, opcode: RETURN, kind: InsnKind::Return }),
            ]
        );
    }

    #[test]
    fn resolves_branch_targets_to_labels() {
        let mut b = CodeBuilder::new();
        let top = b.new_label();
        let done = b.new_label();
        b.line(1);
        b.bind(top);
        b.iload(0);
        b.jump(IFEQ, done);
        b.iinc(0, -1);
        b.jump(GOTO, top);
        b.bind(done);
        b.op(RETURN);
        let events = decode_method(&b.build()).unwrap();
        let insns = insns(&events);

        assert_eq!(insns[1].kind, InsnKind::ConditionalJump(Label(11)));
        assert_eq!(insns[3].kind, InsnKind::Jump(Label(0)));
        assert!(events.contains(&MethodEvent::Label(Label(11))));
    }

    #[test]
    fn decodes_padded_switches() {
        let mut b = CodeBuilder::new();
        let a = b.new_label();
        let c = b.new_label();
        let d = b.new_label();
        b.line(1);
        b.iload(0);
        b.tableswitch(0, d, &[a, c]);
        b.bind(a);
        b.op(RETURN);
        b.bind(c);
        b.iload(0);
        b.lookupswitch(d, &[(7, a)]);
        b.bind(d);
        b.op(RETURN);
        let code = b.build();
        let events = decode_method(&code).unwrap();
        let insns = insns(&events);

        let InsnKind::Switch { default, targets } = &insns[1].kind else {
            panic!("expected tableswitch, got {:?}", insns[1].kind);
        };
        assert_eq!(targets.len(), 2);
        assert_eq!(*default, Label(insns[5].offset));
        assert_eq!(targets[0], Label(insns[2].offset));

        let InsnKind::Switch { default, targets } = &insns[4].kind else {
            panic!("expected lookupswitch, got {:?}", insns[4].kind);
        };
        assert_eq!(*default, Label(insns[5].offset));
        assert_eq!(targets, &vec![Label(insns[2].offset)]);
    }

    #[test]
    fn try_catch_events_come_first_and_end_label_is_emitted() {
        let mut b = CodeBuilder::new();
        let start = b.new_label();
        let end = b.new_label();
        let handler = b.new_label();
        b.line(1);
        b.bind(start);
        b.op(NOP);
        b.bind(end);
        b.op(RETURN);
        b.bind(handler);
        b.op(ATHROW);
        b.try_catch(start, end, handler);
        let events = decode_method(&b.build()).unwrap();

        assert_eq!(
            events[0],
            MethodEvent::TryCatch { start: Label(0), end: Label(1), handler: Label(2) }
        );
        assert!(events.contains(&MethodEvent::Label(Label(2))));
    }

    #[test]
    fn rejects_subroutines() {
        let code = MethodCode::new(vec![JSR, 0, 3, RETURN], vec![]);
        assert_eq!(
            decode_method(&code),
            Err(Error::UnsupportedOpcode { offset: 0, opcode: JSR })
        );
    }

    #[test]
    fn rejects_reserved_opcode() {
        let code = MethodCode::new(vec![NOP, 0xca], vec![]);
        assert_eq!(
            decode_method(&code),
            Err(Error::InvalidOpcode { offset: 1, opcode: 0xca })
        );
    }

    #[test]
    fn rejects_branch_into_operand() {
        // goto +1 lands inside its own operand bytes.
        let code = MethodCode::new(vec![GOTO, 0, 1, RETURN], vec![]);
        assert_eq!(
            decode_method(&code),
            Err(Error::InvalidTarget { offset: 0, target: 1 })
        );
    }

    #[test]
    fn rejects_truncated_operands() {
        let code = MethodCode::new(vec![SIPUSH, 0], vec![]);
        assert_eq!(
            decode_method(&code),
            Err(Error::TruncatedInstruction { offset: 0 })
        );
    }

    #[test]
    fn rejects_line_row_off_boundary() {
        let code = MethodCode::new(
            vec![BIPUSH, 1, RETURN],
            vec![LineNumber { start_pc: 1, line: 5 }],
        );
        assert!(decode_method(&code).is_err());
    }
}
