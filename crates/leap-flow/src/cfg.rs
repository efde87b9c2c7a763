use std::collections::{BTreeMap, BTreeSet};

use leap_classfile::{decode_method, InsnKind, MethodCode, MethodEvent};

use crate::counter::{Address, InstructionCounter, LabelTable};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Decode(#[from] leap_classfile::Error),
    #[error("label at offset {0} is never bound to an instruction")]
    UnboundLabel(u32),
    #[error("jump site list exhausted after {0} entries")]
    JumpSitesExhausted(usize),
    #[error("{0} jump sites left unconsumed")]
    JumpSitesLeftOver(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Control falls through to the next line.
    EndsAtNextLine,
    /// Ends with an unconditional jump or a switch.
    EndsAtJump,
    /// Ends with a return or throw.
    EndsAtReturn,
}

/// One line segment: a maximal run of instructions between two trusted line
/// markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNode {
    pub line: u32,
    pub start: Address,
    /// Exclusive.
    pub end: Address,
    /// Line of the segment control falls through to; only set for
    /// [`NodeKind::EndsAtNextLine`] nodes followed by another segment.
    pub next_line: Option<u32>,
    pub jump_targets: Vec<Address>,
    pub handler_targets: Vec<Address>,
    pub contains_return: bool,
    pub kind: NodeKind,
}

impl LineNode {
    #[must_use]
    pub fn contains(&self, address: Address) -> bool {
        self.start <= address && address < self.end
    }

    /// Every address control may reach when leaving this segment.
    pub fn successors(&self) -> impl Iterator<Item = Address> + '_ {
        let fall_through = (self.kind == NodeKind::EndsAtNextLine).then_some(self.end);
        fall_through
            .into_iter()
            .chain(self.jump_targets.iter().copied())
            .chain(self.handler_targets.iter().copied())
    }
}

/// Which line markers start a new segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LineFilter {
    #[default]
    All,
    /// Only lines that belong to the current source file; markers for other
    /// lines (inlined code, synthetic bridges) stay inside the current segment.
    Only(BTreeSet<u32>),
}

impl LineFilter {
    #[must_use]
    pub fn allows(&self, line: u32) -> bool {
        match self {
            LineFilter::All => true,
            LineFilter::Only(lines) => lines.contains(&line),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Treat exception handlers covering a segment as its successors.
    pub exception_edges: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            exception_edges: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFlowGraph {
    nodes: BTreeMap<Address, LineNode>,
    offsets: Vec<u32>,
}

impl LineFlowGraph {
    /// Decodes `code` and builds its graph.
    pub fn from_code(
        code: &MethodCode,
        filter: &LineFilter,
        options: BuildOptions,
    ) -> Result<Self, FlowError> {
        let events = decode_method(code)?;
        build_line_graph(&events, filter, options)
    }

    /// Nodes in address order.
    pub fn nodes(&self) -> impl Iterator<Item = &LineNode> + '_ {
        self.nodes.values()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn node_at(&self, start: Address) -> Option<&LineNode> {
        self.nodes.get(&start)
    }

    #[must_use]
    pub fn node_containing(&self, address: Address) -> Option<&LineNode> {
        self.nodes
            .range(..=address)
            .next_back()
            .map(|(_, node)| node)
            .filter(|node| node.contains(address))
    }

    /// Segments of `line`, in address order.
    #[must_use]
    pub fn nodes_for_line(&self, line: u32) -> Vec<&LineNode> {
        self.nodes.values().filter(|node| node.line == line).collect()
    }

    #[must_use]
    pub fn offset_of(&self, address: Address) -> Option<u32> {
        self.offsets.get(address.index()).copied()
    }

    /// Address of the instruction covering bytecode `offset`.
    #[must_use]
    pub fn address_at_offset(&self, offset: u64) -> Option<Address> {
        let idx = self
            .offsets
            .partition_point(|&start| u64::from(start) <= offset);
        idx.checked_sub(1).map(|idx| Address(idx as u32))
    }

    /// One past the last instruction.
    #[must_use]
    pub fn end(&self) -> Address {
        Address(self.offsets.len() as u32)
    }
}

struct Segment {
    line: u32,
    start: Address,
    last: Option<Address>,
    last_kind: Option<NodeKind>,
    jump_targets: Vec<Address>,
    handler_targets: Vec<Address>,
    contains_return: bool,
}

impl Segment {
    fn new(line: u32, start: Address) -> Self {
        Self {
            line,
            start,
            last: None,
            last_kind: None,
            jump_targets: Vec::new(),
            handler_targets: Vec::new(),
            contains_return: false,
        }
    }

    fn push_target(&mut self, target: Address) {
        if !self.jump_targets.contains(&target) {
            self.jump_targets.push(target);
        }
    }

    fn finish(self, end: Address, next_line: Option<u32>) -> LineNode {
        let kind = self.last_kind.unwrap_or(NodeKind::EndsAtNextLine);
        LineNode {
            line: self.line,
            start: self.start,
            end,
            next_line: if kind == NodeKind::EndsAtNextLine {
                next_line
            } else {
                None
            },
            jump_targets: self.jump_targets,
            handler_targets: self.handler_targets,
            contains_return: self.contains_return,
            kind,
        }
    }
}

struct GraphBuilder {
    nodes: BTreeMap<Address, LineNode>,
}

impl GraphBuilder {
    fn finalize(&mut self, node: LineNode) {
        let start = node.start;
        if self.nodes.insert(start, node).is_some() {
            panic!("line node at {start} finalized twice");
        }
    }
}

/// Builds the line graph of one method from its decoded events.
///
/// Two passes: [`LabelTable::collect`] binds labels and records jump sites,
/// then this walk cuts segments at trusted line markers and resolves jump
/// operands positionally through a [`crate::JumpCursor`].
///
/// # Panics
///
/// Panics if a segment is finalized twice, which means the event stream broke
/// the one-address-per-instruction invariant.
pub fn build_line_graph(
    events: &[MethodEvent],
    filter: &LineFilter,
    options: BuildOptions,
) -> Result<LineFlowGraph, FlowError> {
    let table = LabelTable::collect(events)?;
    let mut cursor = table.jump_cursor();
    let mut counter = InstructionCounter::new();
    let mut builder = GraphBuilder {
        nodes: BTreeMap::new(),
    };
    let mut pending: Option<Segment> = None;

    for event in events {
        match event {
            MethodEvent::TryCatch { .. } | MethodEvent::Label(_) => {}
            MethodEvent::Line(line) => {
                if !filter.allows(*line) {
                    continue;
                }
                let at = counter.peek();
                match pending.take() {
                    // Two markers before the same instruction: the later one wins.
                    Some(segment) if segment.start == at => {}
                    Some(segment) => builder.finalize(segment.finish(at, Some(*line))),
                    None => {}
                }
                pending = Some(Segment::new(*line, at));
            }
            MethodEvent::Insn(insn) => {
                let address = counter.advance();
                let mut targets = Vec::new();
                let kind = match &insn.kind {
                    InsnKind::Normal => None,
                    InsnKind::ConditionalJump(_) => {
                        targets.push(cursor.next_target()?);
                        None
                    }
                    InsnKind::Jump(_) => {
                        targets.push(cursor.next_target()?);
                        Some(NodeKind::EndsAtJump)
                    }
                    InsnKind::Switch { targets: cases, .. } => {
                        for _ in 0..=cases.len() {
                            targets.push(cursor.next_target()?);
                        }
                        Some(NodeKind::EndsAtJump)
                    }
                    InsnKind::Return | InsnKind::Throw => Some(NodeKind::EndsAtReturn),
                };

                // Instructions ahead of the first trusted marker belong to no
                // line; their jump operands are still consumed above.
                let Some(segment) = pending.as_mut() else {
                    continue;
                };
                segment.last = Some(address);
                segment.last_kind = kind;
                for target in targets {
                    segment.push_target(target);
                }
                if kind == Some(NodeKind::EndsAtReturn) {
                    segment.contains_return = true;
                }
                if options.exception_edges {
                    for range in table.try_ranges() {
                        let handler = range.handler;
                        if range.covers(address) && !segment.handler_targets.contains(&handler) {
                            segment.handler_targets.push(handler);
                        }
                    }
                }
            }
        }
    }

    if let Some(segment) = pending.take() {
        // A trailing marker with no instructions after it describes nothing.
        if segment.last.is_some() {
            builder.finalize(segment.finish(table.end(), None));
        }
    }

    if cursor.remaining() != 0 {
        return Err(FlowError::JumpSitesLeftOver(cursor.remaining()));
    }

    tracing::trace!(
        target: "leap.flow",
        nodes = builder.nodes.len(),
        instructions = table.end().0,
        "built line graph"
    );

    Ok(LineFlowGraph {
        nodes: builder.nodes,
        offsets: table.offsets().to_vec(),
    })
}
