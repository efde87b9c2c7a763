use leap_classfile::opcode::*;
use leap_classfile::testing::CodeBuilder;
use leap_classfile::MethodCode;
use leap_flow::{
    resolve_step_targets, BuildOptions, Inconclusive, LineFilter, LineFlowGraph, NodeKind,
    StepQuery, StepTarget,
};
use proptest::prelude::*;

/// Code indices an engine would report for `line`: one per line-table row.
fn engine_locations(code: &MethodCode) -> impl FnMut(u32) -> Result<Vec<u64>, Inconclusive> + '_ {
    move |line| {
        Ok(code
            .line_numbers
            .iter()
            .filter(|row| row.line == line)
            .map(|row| u64::from(row.start_pc))
            .collect())
    }
}

fn start_of(code: &MethodCode, line: u32) -> u64 {
    code.line_numbers
        .iter()
        .find(|row| row.line == line)
        .map(|row| u64::from(row.start_pc))
        .unwrap()
}

fn graph(code: &MethodCode) -> LineFlowGraph {
    LineFlowGraph::from_code(code, &LineFilter::All, BuildOptions::default()).unwrap()
}

fn step_from(code: &MethodCode, line: u32) -> Result<Vec<StepTarget>, Inconclusive> {
    let query = StepQuery {
        line,
        code_index: start_of(code, line),
    };
    resolve_step_targets(&graph(code), query, engine_locations(code))
}

fn target(code: &MethodCode, line: u32) -> StepTarget {
    StepTarget {
        line,
        code_index: start_of(code, line),
    }
}

#[test]
fn straight_line_steps_to_next_line() {
    let mut b = CodeBuilder::new();
    b.line(10);
    b.iconst(1);
    b.istore(1);
    b.line(11);
    b.iconst(2);
    b.istore(2);
    b.line(12);
    b.op(RETURN);
    let code = b.build();

    assert_eq!(step_from(&code, 10), Ok(vec![target(&code, 11)]));
    assert_eq!(step_from(&code, 11), Ok(vec![target(&code, 12)]));
}

#[test]
fn unconditional_jump_skips_intermediate_lines() {
    let mut b = CodeBuilder::new();
    let after = b.new_label();
    b.line(1);
    b.jump(GOTO, after);
    b.line(2);
    b.iconst(0);
    b.istore(1);
    b.bind(after);
    b.line(3);
    b.op(RETURN);
    let code = b.build();

    let graph = graph(&code);
    assert_eq!(graph.nodes_for_line(1)[0].kind, NodeKind::EndsAtJump);
    assert_eq!(step_from(&code, 1), Ok(vec![target(&code, 3)]));
}

#[test]
fn conditional_branch_reaches_both_arms() {
    let mut b = CodeBuilder::new();
    let otherwise = b.new_label();
    let join = b.new_label();
    b.line(1);
    b.iload(0);
    b.jump(IFEQ, otherwise);
    b.line(2);
    b.iconst(1);
    b.istore(1);
    b.jump(GOTO, join);
    b.bind(otherwise);
    b.line(3);
    b.iconst(2);
    b.istore(1);
    b.bind(join);
    b.line(4);
    b.op(RETURN);
    let code = b.build();

    assert_eq!(
        step_from(&code, 1),
        Ok(vec![target(&code, 2), target(&code, 3)])
    );
    assert_eq!(step_from(&code, 2), Ok(vec![target(&code, 4)]));
}

#[test]
fn loop_back_edge_returns_to_condition() {
    let mut b = CodeBuilder::new();
    let top = b.new_label();
    let done = b.new_label();
    b.bind(top);
    b.line(5);
    b.iload(0);
    b.jump(IFLE, done);
    b.line(6);
    b.iinc(0, -1);
    b.jump(GOTO, top);
    b.bind(done);
    b.line(8);
    b.op(RETURN);
    let code = b.build();

    assert_eq!(step_from(&code, 6), Ok(vec![target(&code, 5)]));
    assert_eq!(
        step_from(&code, 5),
        Ok(vec![target(&code, 6), target(&code, 8)])
    );
}

#[test]
fn single_line_loop_is_walked_once() {
    // `while (i-- > 0) {}` compiles to a segment that jumps to its own start.
    let mut b = CodeBuilder::new();
    let top = b.new_label();
    b.bind(top);
    b.line(1);
    b.iinc(0, -1);
    b.iload(0);
    b.jump(IFGT, top);
    b.line(2);
    b.op(RETURN);
    let code = b.build();

    assert_eq!(step_from(&code, 1), Ok(vec![target(&code, 2)]));
}

#[test]
fn immediate_return_is_inconclusive() {
    let mut b = CodeBuilder::new();
    b.line(1);
    b.iload(0);
    b.op(IRETURN);
    let code = b.build();

    assert_eq!(
        step_from(&code, 1),
        Err(Inconclusive::LineMayReturn { line: 1 })
    );
}

#[test]
fn early_return_anywhere_on_the_line_is_inconclusive() {
    // `if (x) return; y();` on one line, followed by more code.
    let mut b = CodeBuilder::new();
    let skip = b.new_label();
    b.line(1);
    b.iload(0);
    b.jump(IFEQ, skip);
    b.op(RETURN);
    b.bind(skip);
    b.invokestatic(7);
    b.line(2);
    b.op(RETURN);
    let code = b.build();

    assert_eq!(
        step_from(&code, 1),
        Err(Inconclusive::LineMayReturn { line: 1 })
    );
}

#[test]
fn return_on_the_next_line_is_still_a_target() {
    let mut b = CodeBuilder::new();
    b.line(1);
    b.iconst(3);
    b.line(2);
    b.op(IRETURN);
    let code = b.build();

    assert_eq!(step_from(&code, 1), Ok(vec![target(&code, 2)]));
}

#[test]
fn mismatched_location_count_is_ambiguous() {
    let mut b = CodeBuilder::new();
    b.line(1);
    b.iconst(1);
    b.istore(1);
    b.line(2);
    b.op(RETURN);
    let code = b.build();
    let query = StepQuery {
        line: 1,
        code_index: 0,
    };

    let result = resolve_step_targets(&graph(&code), query, |_| Ok(vec![0, 1]));
    assert_eq!(
        result,
        Err(Inconclusive::AmbiguousLine {
            line: 1,
            nodes: 1,
            locations: 2
        })
    );
}

#[test]
fn ambiguous_exit_line_fails_the_whole_query() {
    let mut b = CodeBuilder::new();
    b.line(1);
    b.iconst(1);
    b.istore(1);
    b.line(2);
    b.op(RETURN);
    let code = b.build();
    let query = StepQuery {
        line: 1,
        code_index: 0,
    };

    let result = resolve_step_targets(&graph(&code), query, |line| match line {
        1 => Ok(vec![0]),
        _ => Ok(vec![]),
    });
    assert!(matches!(
        result,
        Err(Inconclusive::AmbiguousLine { line: 2, .. })
    ));
}

#[test]
fn mid_line_goto_does_not_end_the_line() {
    // `int x = a ? 1 : 2;` keeps its branches inside one segment.
    let mut b = CodeBuilder::new();
    let otherwise = b.new_label();
    let join = b.new_label();
    b.line(1);
    b.iload(0);
    b.jump(IFEQ, otherwise);
    b.iconst(1);
    b.jump(GOTO, join);
    b.bind(otherwise);
    b.iconst(2);
    b.bind(join);
    b.istore(1);
    b.line(2);
    b.op(RETURN);
    let code = b.build();

    let graph = graph(&code);
    let node = graph.nodes_for_line(1)[0];
    assert_eq!(node.kind, NodeKind::EndsAtNextLine);
    assert_eq!(node.next_line, Some(2));
    assert_eq!(node.jump_targets.len(), 2);
    assert_eq!(step_from(&code, 1), Ok(vec![target(&code, 2)]));
}

#[test]
fn jump_into_the_middle_of_a_line_targets_that_instruction() {
    let mut b = CodeBuilder::new();
    let inside = b.new_label();
    b.line(1);
    b.iload(0);
    b.jump(IFNE, inside);
    b.line(2);
    b.iconst(1);
    b.op(POP);
    b.bind(inside);
    b.iconst(2);
    b.istore(2);
    b.line(3);
    b.op(RETURN);
    let mut code = b.build();
    code.max_locals = 3;

    let inside_offset = {
        let graph = graph(&code);
        let node = graph.nodes_for_line(2)[0];
        let address = node.start.0 + 2;
        graph.offset_of(leap_flow::Address(address)).unwrap()
    };

    assert_eq!(
        step_from(&code, 1),
        Ok(vec![
            target(&code, 2),
            StepTarget {
                line: 2,
                code_index: u64::from(inside_offset)
            },
        ])
    );
}

#[test]
fn switch_reaches_default_and_every_case() {
    let mut b = CodeBuilder::new();
    let one = b.new_label();
    let two = b.new_label();
    let other = b.new_label();
    b.line(1);
    b.iload(0);
    b.tableswitch(1, other, &[one, two]);
    b.bind(one);
    b.line(2);
    b.op(RETURN);
    b.bind(two);
    b.line(3);
    b.op(RETURN);
    b.bind(other);
    b.line(4);
    b.op(RETURN);
    let code = b.build();

    let graph = graph(&code);
    assert_eq!(graph.nodes_for_line(1)[0].kind, NodeKind::EndsAtJump);
    assert_eq!(
        step_from(&code, 1),
        Ok(vec![target(&code, 2), target(&code, 3), target(&code, 4)])
    );
}

fn guarded_call() -> MethodCode {
    let mut b = CodeBuilder::new();
    let start = b.new_label();
    let end = b.new_label();
    let handler = b.new_label();
    let after = b.new_label();
    b.bind(start);
    b.line(1);
    b.invokestatic(3);
    b.bind(end);
    b.line(2);
    b.jump(GOTO, after);
    b.bind(handler);
    b.line(3);
    b.istore(1);
    b.bind(after);
    b.line(4);
    b.op(RETURN);
    b.try_catch_typed(start, end, handler, "java/lang/Exception");
    b.build()
}

#[test]
fn exception_handlers_are_step_targets() {
    let code = guarded_call();
    assert_eq!(
        step_from(&code, 1),
        Ok(vec![target(&code, 2), target(&code, 3)])
    );
}

#[test]
fn exception_edges_can_be_disabled() {
    let code = guarded_call();
    let graph =
        LineFlowGraph::from_code(&code, &LineFilter::All, BuildOptions { exception_edges: false })
            .unwrap();
    let query = StepQuery {
        line: 1,
        code_index: 0,
    };
    assert_eq!(
        resolve_step_targets(&graph, query, engine_locations(&code)),
        Ok(vec![target(&code, 2)])
    );
}

#[test]
fn falling_off_the_end_is_inconclusive() {
    let mut b = CodeBuilder::new();
    b.line(1);
    b.op(NOP);
    let code = b.build();

    assert!(matches!(
        step_from(&code, 1),
        Err(Inconclusive::UnknownAddress(_))
    ));
}

#[test]
fn mid_line_suspension_uses_the_covering_segment() {
    let mut b = CodeBuilder::new();
    b.line(1);
    b.invokestatic(4);
    b.istore(1);
    b.line(2);
    b.op(RETURN);
    let code = b.build();

    // Suspended at the `istore` after returning from the call.
    let query = StepQuery {
        line: 1,
        code_index: 3,
    };
    assert_eq!(
        resolve_step_targets(&graph(&code), query, engine_locations(&code)),
        Ok(vec![target(&code, 2)])
    );

    let wrong_line = StepQuery {
        line: 2,
        code_index: 3,
    };
    assert!(matches!(
        resolve_step_targets(&graph(&code), wrong_line, engine_locations(&code)),
        Err(Inconclusive::NoStartNode { line: 2, .. })
    ));
}

#[test]
fn foreign_line_markers_stay_in_the_current_segment() {
    let mut b = CodeBuilder::new();
    b.line(1);
    b.iconst(1);
    b.line(9000);
    b.istore(1);
    b.line(2);
    b.op(RETURN);
    let code = b.build();

    let filter = LineFilter::Only([1, 2].into_iter().collect());
    let graph = LineFlowGraph::from_code(&code, &filter, BuildOptions::default()).unwrap();
    assert!(graph.nodes_for_line(9000).is_empty());

    let query = StepQuery {
        line: 1,
        code_index: 0,
    };
    assert_eq!(
        resolve_step_targets(&graph, query, engine_locations(&code)),
        Ok(vec![target(&code, 2)])
    );
}

#[test]
fn engine_failures_surface_as_inconclusive() {
    let mut b = CodeBuilder::new();
    b.line(1);
    b.op(RETURN);
    let code = b.build();
    let query = StepQuery {
        line: 1,
        code_index: 0,
    };
    let result = resolve_step_targets(&graph(&code), query, |_| {
        Err(Inconclusive::Engine("vm disconnected".into()))
    });
    assert_eq!(result, Err(Inconclusive::Engine("vm disconnected".into())));
}

proptest! {
    #[test]
    fn straight_line_methods_step_line_by_line(widths in prop::collection::vec(1usize..6, 2..12)) {
        let mut b = CodeBuilder::new();
        for (idx, width) in widths.iter().enumerate() {
            b.line(idx as u32 + 1);
            for _ in 0..*width {
                b.op(NOP);
            }
        }
        b.line(widths.len() as u32 + 1);
        b.op(RETURN);
        let code = b.build();

        for line in 1..=widths.len() as u32 {
            prop_assert_eq!(step_from(&code, line), Ok(vec![target(&code, line + 1)]));
        }
    }
}
