use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use leap_classfile::opcode::*;
use leap_classfile::testing::CodeBuilder;
use leap_flow::{resolve_step_targets, BuildOptions, LineFilter, LineFlowGraph, StepQuery};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Resolves a two-line step under `directives` and returns what was logged.
fn logged_under(directives: &str) -> String {
    let mut b = CodeBuilder::new();
    b.line(1);
    b.iconst(1);
    b.istore(1);
    b.line(2);
    b.op(RETURN);
    let code = b.build();
    let graph = LineFlowGraph::from_code(&code, &LineFilter::All, BuildOptions::default()).unwrap();

    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let query = StepQuery {
            line: 1,
            code_index: 0,
        };
        let targets = resolve_step_targets(&graph, query, |line| {
            Ok(code
                .line_numbers
                .iter()
                .filter(|row| row.line == line)
                .map(|row| u64::from(row.start_pc))
                .collect())
        });
        assert_eq!(targets.map(|targets| targets.len()), Ok(1));
    });

    let bytes = captured.0.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}

#[test]
fn dotted_target_directives_select_resolver_events() {
    let selected = logged_under("leap.flow=debug");
    assert!(selected.contains("resolved step targets"), "output: {selected}");
    assert!(selected.contains("leap.flow"), "output: {selected}");

    let other = logged_under("leap.step=debug");
    assert!(!other.contains("resolved step targets"), "output: {other}");
}
