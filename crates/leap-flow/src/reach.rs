use std::collections::{BTreeMap, BTreeSet};

use crate::cfg::{LineFlowGraph, LineNode};
use crate::counter::Address;

/// Where the debuggee is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepQuery {
    pub line: u32,
    /// Engine code index of the current location (a bytecode offset).
    pub code_index: u64,
}

/// A concrete location a step can land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepTarget {
    pub line: u32,
    pub code_index: u64,
}

/// Why the analysis declined to answer. Every variant means "use the native
/// step instead"; none of them is shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Inconclusive {
    #[error("no line graph available: {0}")]
    NoGraph(String),
    #[error("no segment of line {line} covers code index {code_index}")]
    NoStartNode { line: u32, code_index: u64 },
    #[error("line {line} has {nodes} segments but {locations} engine locations")]
    AmbiguousLine {
        line: u32,
        nodes: usize,
        locations: usize,
    },
    #[error("line {line} may return or throw")]
    LineMayReturn { line: u32 },
    #[error("control reaches {0}, outside every line segment")]
    UnknownAddress(Address),
    #[error("no reachable line")]
    NoExit,
    #[error("engine query failed: {0}")]
    Engine(String),
}

/// Resolves the set of locations a step over from `query` can stop at.
///
/// `locations_of_line` reports the engine's code indices for a line; they are
/// paired positionally (both sides sorted) with the line's segments. The
/// result is all-or-nothing: any doubt yields [`Inconclusive`].
pub fn resolve_step_targets<F>(
    graph: &LineFlowGraph,
    query: StepQuery,
    mut locations_of_line: F,
) -> Result<Vec<StepTarget>, Inconclusive>
where
    F: FnMut(u32) -> Result<Vec<u64>, Inconclusive>,
{
    if graph.is_empty() {
        return Err(Inconclusive::NoGraph("method has no line segments".into()));
    }

    let mut pairing = Pairing {
        graph,
        lines: BTreeMap::new(),
    };
    let start = locate(graph, query, &mut pairing, &mut locations_of_line)?;
    if start.contains_return {
        return Err(Inconclusive::LineMayReturn { line: query.line });
    }

    let mut visited = BTreeSet::from([start.start]);
    let mut seen_exits = BTreeSet::new();
    let mut exits = Vec::new();
    let mut stack: Vec<Address> = start.successors().collect();

    while let Some(address) = stack.pop() {
        let node = graph
            .node_containing(address)
            .ok_or(Inconclusive::UnknownAddress(address))?;

        if node.line != query.line {
            if seen_exits.insert(address) {
                exits.push(address);
            }
            continue;
        }

        if !visited.insert(node.start) {
            continue;
        }
        if node.contains_return {
            return Err(Inconclusive::LineMayReturn { line: query.line });
        }
        stack.extend(node.successors());
    }

    if exits.is_empty() {
        return Err(Inconclusive::NoExit);
    }

    let mut targets = Vec::with_capacity(exits.len());
    for address in exits {
        let node = graph
            .node_containing(address)
            .ok_or(Inconclusive::UnknownAddress(address))?;
        let code_index = if address == node.start {
            pairing.code_index_of(node, &mut locations_of_line)?
        } else {
            graph
                .offset_of(address)
                .map(u64::from)
                .ok_or(Inconclusive::UnknownAddress(address))?
        };
        targets.push(StepTarget {
            line: node.line,
            code_index,
        });
    }
    targets.sort_unstable();
    targets.dedup();

    tracing::debug!(
        target: "leap.flow",
        line = query.line,
        targets = targets.len(),
        "resolved step targets"
    );
    Ok(targets)
}

/// Finds the segment the debuggee is suspended in.
fn locate<'g, F>(
    graph: &'g LineFlowGraph,
    query: StepQuery,
    pairing: &mut Pairing<'g>,
    locations_of_line: &mut F,
) -> Result<&'g LineNode, Inconclusive>
where
    F: FnMut(u32) -> Result<Vec<u64>, Inconclusive>,
{
    let no_node = Inconclusive::NoStartNode {
        line: query.line,
        code_index: query.code_index,
    };
    let paired = pairing.pairs(query.line, locations_of_line)?;
    if paired.is_empty() {
        return Err(no_node);
    }

    if let Some((node, _)) = paired
        .iter()
        .find(|(_, code_index)| *code_index == query.code_index)
    {
        return Ok(*node);
    }

    // Suspended mid-line, e.g. after returning from a call on this line.
    let node = graph
        .address_at_offset(query.code_index)
        .and_then(|address| graph.node_containing(address))
        .ok_or_else(|| no_node.clone())?;
    if node.line != query.line {
        return Err(no_node);
    }
    Ok(node)
}

/// Positional correspondence between a line's segments and the engine's
/// locations for it, memoized per line for one query.
struct Pairing<'g> {
    graph: &'g LineFlowGraph,
    lines: BTreeMap<u32, Vec<(&'g LineNode, u64)>>,
}

impl<'g> Pairing<'g> {
    fn pairs<F>(
        &mut self,
        line: u32,
        locations_of_line: &mut F,
    ) -> Result<&[(&'g LineNode, u64)], Inconclusive>
    where
        F: FnMut(u32) -> Result<Vec<u64>, Inconclusive>,
    {
        if !self.lines.contains_key(&line) {
            let nodes = self.graph.nodes_for_line(line);
            let mut locations = locations_of_line(line)?;
            locations.sort_unstable();
            if nodes.len() != locations.len() {
                return Err(Inconclusive::AmbiguousLine {
                    line,
                    nodes: nodes.len(),
                    locations: locations.len(),
                });
            }
            self.lines
                .insert(line, nodes.into_iter().zip(locations).collect());
        }
        Ok(self.lines.get(&line).map(Vec::as_slice).unwrap_or_default())
    }

    fn code_index_of<F>(
        &mut self,
        node: &LineNode,
        locations_of_line: &mut F,
    ) -> Result<u64, Inconclusive>
    where
        F: FnMut(u32) -> Result<Vec<u64>, Inconclusive>,
    {
        self.pairs(node.line, locations_of_line)?
            .iter()
            .find(|(paired, _)| paired.start == node.start)
            .map(|(_, code_index)| *code_index)
            .ok_or(Inconclusive::UnknownAddress(node.start))
    }
}
