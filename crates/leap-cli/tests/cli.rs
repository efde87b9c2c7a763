use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use leap_classfile::opcode::*;
use leap_classfile::testing::{ClassWriter, CodeBuilder};
use predicates::prelude::*;

fn leap() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("leap"));
    cmd.env_remove("LEAP_CONFIG").env_remove("RUST_LOG");
    cmd
}

/// `Loop.count(I)V`: line 1 initializes, line 2 loops back to itself via
/// line 3, line 4 returns.
fn loop_class(dir: &TempDir) -> std::path::PathBuf {
    let mut b = CodeBuilder::new();
    let head = b.new_label();
    let done = b.new_label();
    b.line(1);
    b.iconst(0); // @0
    b.istore(1); // @1
    b.line(2);
    b.bind(head);
    b.iload(1); // @3
    b.iload(0); // @5
    b.jump(IF_ICMPGE, done); // @7
    b.line(3);
    b.iinc(1, 1); // @10
    b.jump(GOTO, head); // @13
    b.line(4);
    b.bind(done);
    b.op(RETURN); // @16
    let bytes = ClassWriter::new("demo/Loop")
        .source_file("Loop.java")
        .method("count", "(I)V", b.build())
        .to_bytes();

    let file = dir.child("Loop.class");
    file.write_binary(&bytes).unwrap();
    file.path().to_path_buf()
}

/// `Answer.get()I`: one line that returns.
fn answer_class(dir: &TempDir) -> std::path::PathBuf {
    let mut b = CodeBuilder::new();
    b.line(7);
    b.iconst(1);
    b.op(IRETURN);
    let bytes = ClassWriter::new("demo/Answer")
        .method("get", "()I", b.build())
        .to_bytes();

    let file = dir.child("Answer.class");
    file.write_binary(&bytes).unwrap();
    file.path().to_path_buf()
}

#[test]
fn help_mentions_commands() {
    leap().arg("--help").assert().success().stdout(
        predicate::str::contains("graph")
            .and(predicate::str::contains("targets"))
            .and(predicate::str::contains("--config")),
    );
}

#[test]
fn graph_json_lists_line_segments() {
    let temp = TempDir::new().unwrap();
    let class = loop_class(&temp);

    let output = leap()
        .arg("graph")
        .arg(&class)
        .args(["--method", "count:(I)V", "--json"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(v["method"], "demo/Loop.count(I)V");
    let nodes = v["nodes"].as_array().unwrap();
    let lines: Vec<u64> = nodes.iter().map(|n| n["line"].as_u64().unwrap()).collect();
    assert_eq!(lines, vec![1, 2, 3, 4]);
    assert_eq!(nodes[2]["kind"], "jump");
    assert_eq!(nodes[2]["jumps"], serde_json::json!([3]));
    assert_eq!(nodes[3]["contains_return"], true);
}

#[test]
fn graph_text_output_names_the_method() {
    let temp = TempDir::new().unwrap();
    let class = loop_class(&temp);

    leap()
        .arg("graph")
        .arg(&class)
        .args(["--method", "count"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("demo/Loop.count(I)V")
                .and(predicate::str::contains("returns")),
        );
}

#[test]
fn targets_follow_the_loop() {
    let temp = TempDir::new().unwrap();
    let class = loop_class(&temp);

    let output = leap()
        .arg("targets")
        .arg(&class)
        .args(["--method", "count", "--line", "2", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        v["targets"],
        serde_json::json!([
            { "line": 3, "code_index": 10 },
            { "line": 4, "code_index": 16 },
        ])
    );
    assert!(v.get("inconclusive").is_none());
}

#[test]
fn returning_line_is_inconclusive() {
    let temp = TempDir::new().unwrap();
    let class = answer_class(&temp);

    leap()
        .arg("targets")
        .arg(&class)
        .args(["--method", "get", "--line", "7"])
        .assert()
        .code(1)
        .stdout(
            predicate::str::contains("inconclusive")
                .and(predicate::str::contains("line 7 may return")),
        );
}

#[test]
fn unknown_method_is_an_error() {
    let temp = TempDir::new().unwrap();
    let class = loop_class(&temp);

    leap()
        .arg("graph")
        .arg(&class)
        .args(["--method", "missing"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("method `missing` not found"));
}

/// `Guard.run()V`: line 1 calls out under a catch-all handler on line 3.
fn guarded_class(dir: &TempDir) -> std::path::PathBuf {
    let mut b = CodeBuilder::new();
    let start = b.new_label();
    let end = b.new_label();
    let handler = b.new_label();
    b.line(1);
    b.bind(start);
    b.invokestatic(1); // @0
    b.bind(end);
    b.line(2);
    b.op(RETURN); // @3
    b.line(3);
    b.bind(handler);
    b.op(POP); // @4
    b.op(RETURN);
    b.try_catch(start, end, handler);
    let bytes = ClassWriter::new("demo/Guard")
        .method("run", "()V", b.build())
        .to_bytes();

    let file = dir.child("Guard.class");
    file.write_binary(&bytes).unwrap();
    file.path().to_path_buf()
}

fn first_node_handlers(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    v["nodes"][0]["handlers"].clone()
}

#[test]
fn config_can_disable_exception_edges() {
    let temp = TempDir::new().unwrap();
    let class = guarded_class(&temp);
    let config = temp.child("leap.toml");
    config
        .write_str("[stepping]\nexception_edges = false\n")
        .unwrap();

    let with_edges = first_node_handlers(
        leap()
            .arg("graph")
            .arg(&class)
            .args(["--method", "run", "--json"]),
    );
    assert_eq!(with_edges, serde_json::json!([4]));

    let without_edges = first_node_handlers(
        leap()
            .arg("--config")
            .arg(config.path())
            .arg("graph")
            .arg(&class)
            .args(["--method", "run", "--json"]),
    );
    assert_eq!(without_edges, serde_json::json!([]));
}

#[test]
fn broken_explicit_config_fails_but_env_config_falls_back() {
    let temp = TempDir::new().unwrap();
    let class = loop_class(&temp);
    let config = temp.child("leap.toml");
    config.write_str("[stepping]\nturbo = true\n").unwrap();

    leap()
        .arg("--config")
        .arg(config.path())
        .arg("graph")
        .arg(&class)
        .args(["--method", "count"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to load config"));

    leap()
        .env("LEAP_CONFIG", config.path())
        .arg("graph")
        .arg(&class)
        .args(["--method", "count"])
        .assert()
        .success();
}
