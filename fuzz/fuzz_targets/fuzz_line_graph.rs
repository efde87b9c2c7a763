#![no_main]

mod utils;

use std::sync::OnceLock;

use leap_classfile::{LineNumber, MethodCode};
use leap_flow::{resolve_step_targets, BuildOptions, LineFilter, LineFlowGraph, StepQuery};
use libfuzzer_sys::fuzz_target;
use utils::Runner;

static RUNNER: OnceLock<Runner> = OnceLock::new();

const MAX_ROWS: usize = 32;

/// Input layout: a row count byte, then `(start_pc: u16, line: u8)` rows, then
/// raw bytecode.
fn method_code(data: &[u8]) -> MethodCode {
    let Some((&count, rest)) = data.split_first() else {
        return MethodCode::default();
    };
    let rows = (count as usize % MAX_ROWS).min(rest.len() / 3);
    let (table, code) = rest.split_at(rows * 3);
    let line_numbers = table
        .chunks_exact(3)
        .map(|row| LineNumber {
            start_pc: u32::from(u16::from_be_bytes([row[0], row[1]])),
            line: u32::from(row[2]),
        })
        .collect();
    MethodCode::new(code.to_vec(), line_numbers)
}

fn analyze(data: &[u8]) {
    let code = method_code(data);
    for exception_edges in [true, false] {
        let Ok(graph) =
            LineFlowGraph::from_code(&code, &LineFilter::All, BuildOptions { exception_edges })
        else {
            continue;
        };
        for row in &code.line_numbers {
            let query = StepQuery {
                line: row.line,
                code_index: u64::from(row.start_pc),
            };
            let _ = resolve_step_targets(&graph, query, |line| {
                Ok(code
                    .line_numbers
                    .iter()
                    .filter(|row| row.line == line)
                    .map(|row| u64::from(row.start_pc))
                    .collect())
            });
        }
    }
}

fuzz_target!(|data: &[u8]| {
    Runner::get(&RUNNER, "fuzz_line_graph", analyze).run(data);
});
