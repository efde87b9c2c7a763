//! Line-level control-flow analysis of a single method body, and resolution
//! of the source lines a "step over" can land on.

mod cfg;
mod counter;
mod reach;

pub use crate::cfg::{
    build_line_graph, BuildOptions, FlowError, LineFilter, LineFlowGraph, LineNode, NodeKind,
};
pub use crate::counter::{Address, InstructionCounter, JumpCursor, LabelTable, TryRange};
pub use crate::reach::{resolve_step_targets, Inconclusive, StepQuery, StepTarget};
