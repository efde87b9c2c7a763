use std::collections::HashMap;
use std::fmt;

use leap_classfile::{InsnKind, Label, MethodEvent};

use crate::cfg::FlowError;

/// Logical position of an instruction within one method body.
///
/// Addresses are assigned in decode order and only ever compared or used as
/// keys; [`crate::LineFlowGraph::offset_of`] maps them back to bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u32);

impl Address {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Hands out one address per visited instruction.
#[derive(Debug, Default)]
pub struct InstructionCounter {
    next: u32,
}

impl InstructionCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the next visited instruction will receive.
    #[must_use]
    pub fn peek(&self) -> Address {
        Address(self.next)
    }

    /// Claims the address for the instruction being visited.
    pub fn advance(&mut self) -> Address {
        let address = Address(self.next);
        self.next += 1;
        address
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryRange {
    pub start: Address,
    /// Exclusive.
    pub end: Address,
    pub handler: Address,
}

impl TryRange {
    #[must_use]
    pub fn covers(&self, address: Address) -> bool {
        self.start <= address && address < self.end
    }
}

/// Result of the first pass over a method's events.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    bound: HashMap<Label, Address>,
    /// Labels referenced by jumps and switches, in visit order. A switch
    /// contributes its default first, then its cases.
    jump_sites: Vec<Label>,
    try_ranges: Vec<TryRange>,
    /// Bytecode offset of each address.
    offsets: Vec<u32>,
}

impl LabelTable {
    /// Binds every label to the address of the instruction that follows it
    /// and records the jump-site order.
    pub fn collect(events: &[MethodEvent]) -> Result<Self, FlowError> {
        let mut counter = InstructionCounter::new();
        let mut table = LabelTable::default();
        let mut try_catch = Vec::new();

        for event in events {
            match event {
                MethodEvent::TryCatch {
                    start,
                    end,
                    handler,
                } => try_catch.push((*start, *end, *handler)),
                MethodEvent::Label(label) => {
                    table.bound.insert(*label, counter.peek());
                }
                MethodEvent::Line(_) => {}
                MethodEvent::Insn(insn) => {
                    counter.advance();
                    table.offsets.push(insn.offset);
                    match &insn.kind {
                        InsnKind::Jump(target) | InsnKind::ConditionalJump(target) => {
                            table.jump_sites.push(*target);
                        }
                        InsnKind::Switch { default, targets } => {
                            table.jump_sites.push(*default);
                            table.jump_sites.extend(targets.iter().copied());
                        }
                        InsnKind::Normal | InsnKind::Return | InsnKind::Throw => {}
                    }
                }
            }
        }

        for (start, end, handler) in try_catch {
            let range = TryRange {
                start: table.address_of(start)?,
                end: table.address_of(end)?,
                handler: table.address_of(handler)?,
            };
            table.try_ranges.push(range);
        }

        Ok(table)
    }

    pub fn address_of(&self, label: Label) -> Result<Address, FlowError> {
        self.bound
            .get(&label)
            .copied()
            .ok_or(FlowError::UnboundLabel(label.0))
    }

    #[must_use]
    pub fn jump_cursor(&self) -> JumpCursor<'_> {
        JumpCursor {
            table: self,
            pos: 0,
        }
    }

    #[must_use]
    pub fn try_ranges(&self) -> &[TryRange] {
        &self.try_ranges
    }

    #[must_use]
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Number of instructions; also the address one past the last one.
    #[must_use]
    pub fn end(&self) -> Address {
        Address(self.offsets.len() as u32)
    }
}

/// Positional reader over the recorded jump sites.
///
/// The second pass consumes exactly one entry per jump operand, in the same
/// order the first pass recorded them.
pub struct JumpCursor<'a> {
    table: &'a LabelTable,
    pos: usize,
}

impl JumpCursor<'_> {
    pub fn next_target(&mut self) -> Result<Address, FlowError> {
        let label = *self
            .table
            .jump_sites
            .get(self.pos)
            .ok_or(FlowError::JumpSitesExhausted(self.pos))?;
        self.pos += 1;
        self.table.address_of(label)
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.table.jump_sites.len().saturating_sub(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leap_classfile::Insn;

    fn insn(offset: u32, kind: InsnKind) -> MethodEvent {
        MethodEvent::Insn(Insn {
            offset,
            opcode: 0,
            kind,
        })
    }

    #[test]
    fn labels_bind_to_following_instruction() {
        let events = vec![
            MethodEvent::Label(Label(0)),
            MethodEvent::Line(1),
            insn(0, InsnKind::Normal),
            insn(1, InsnKind::ConditionalJump(Label(7))),
            insn(4, InsnKind::Jump(Label(0))),
            MethodEvent::Label(Label(7)),
            insn(7, InsnKind::Return),
        ];
        let table = LabelTable::collect(&events).unwrap();

        assert_eq!(table.address_of(Label(0)), Ok(Address(0)));
        assert_eq!(table.address_of(Label(7)), Ok(Address(3)));
        assert_eq!(table.offsets(), &[0, 1, 4, 7]);
        assert_eq!(table.end(), Address(4));

        let mut cursor = table.jump_cursor();
        assert_eq!(cursor.next_target(), Ok(Address(3)));
        assert_eq!(cursor.next_target(), Ok(Address(0)));
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(cursor.next_target(), Err(FlowError::JumpSitesExhausted(2)));
    }

    #[test]
    fn unbound_label_is_an_error() {
        let events = vec![insn(0, InsnKind::Jump(Label(9)))];
        let table = LabelTable::collect(&events).unwrap();
        assert_eq!(
            table.jump_cursor().next_target(),
            Err(FlowError::UnboundLabel(9))
        );
    }

    #[test]
    fn try_range_end_may_point_past_last_instruction() {
        let events = vec![
            MethodEvent::TryCatch {
                start: Label(0),
                end: Label(2),
                handler: Label(1),
            },
            MethodEvent::Label(Label(0)),
            insn(0, InsnKind::Normal),
            MethodEvent::Label(Label(1)),
            insn(1, InsnKind::Throw),
            MethodEvent::Label(Label(2)),
        ];
        let table = LabelTable::collect(&events).unwrap();
        let range = table.try_ranges()[0];
        assert_eq!(range.end, Address(2));
        assert!(range.covers(Address(1)));
        assert!(!range.covers(Address(2)));
    }
}
