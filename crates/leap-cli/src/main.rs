use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use leap_classfile::{ClassFile, MethodCode};
use leap_config::{LeapConfig, CONFIG_ENV_VAR};
use leap_flow::{
    resolve_step_targets, Address, BuildOptions, LineFilter, LineFlowGraph, LineNode, NodeKind,
    StepQuery,
};
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "leap",
    version,
    about = "Leap CLI (line graphs and step-over targets of JVM methods)"
)]
struct Cli {
    /// Path to a `leap.toml` (defaults to `$LEAP_CONFIG`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the line segments of a method and their successors
    Graph(GraphArgs),
    /// Print every location a step over from a line can stop at
    Targets(TargetsArgs),
}

#[derive(Args)]
struct MethodArgs {
    /// Compiled `.class` file
    class: PathBuf,
    /// Method as `NAME` or `NAME:DESCRIPTOR`
    #[arg(long)]
    method: String,
    /// Emit JSON suitable for scripts
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct GraphArgs {
    #[command(flatten)]
    target: MethodArgs,
}

#[derive(Args)]
struct TargetsArgs {
    #[command(flatten)]
    target: MethodArgs,
    /// Source line the step starts from
    #[arg(long)]
    line: u32,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let (config, warning) = load_config(cli.config.as_deref())?;
    leap_step::hardening::init(&config);
    if let Some(warning) = warning {
        tracing::warn!(target: "leap.cli", "{warning}");
    }
    let options = BuildOptions {
        exception_edges: config.stepping.exception_edges,
    };

    match cli.command {
        Command::Graph(args) => {
            let method = LoadedMethod::open(&args.target)?;
            let graph = method.graph(options)?;
            let report = GraphReport::new(&method, &graph);
            if args.target.json {
                print_json(&report)?;
            } else {
                print_graph(&report);
            }
            Ok(0)
        }
        Command::Targets(args) => {
            let method = LoadedMethod::open(&args.target)?;
            let graph = method.graph(options)?;
            let code_index = method.first_index_of(args.line).ok_or_else(|| {
                anyhow!("line {} has no code in `{}`", args.line, method.display_name)
            })?;
            let query = StepQuery {
                line: args.line,
                code_index,
            };
            let result = resolve_step_targets(&graph, query, |line| Ok(method.indices_of(line)));
            let exit = if result.is_ok() { 0 } else { 1 };
            let report = TargetsReport {
                method: method.display_name.clone(),
                line: args.line,
                targets: result.as_ref().ok().map(|targets| {
                    targets
                        .iter()
                        .map(|target| TargetReport {
                            line: target.line,
                            code_index: target.code_index,
                        })
                        .collect()
                }),
                inconclusive: result.err().map(|reason| reason.to_string()),
            };
            if args.target.json {
                print_json(&report)?;
            } else {
                print_targets(&report);
            }
            Ok(exit)
        }
    }
}

/// An explicit `--config` must load; one named by the environment falls back
/// to defaults with a warning.
fn load_config(explicit: Option<&Path>) -> Result<(LeapConfig, Option<String>)> {
    if let Some(path) = explicit {
        let config = LeapConfig::load_from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        return Ok((config, None));
    }

    let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|value| !value.is_empty()) else {
        return Ok((LeapConfig::default(), None));
    };
    match LeapConfig::load_from_path(&path) {
        Ok(config) => Ok((config, None)),
        Err(err) => Ok((
            LeapConfig::default(),
            Some(format!("ignoring ${CONFIG_ENV_VAR}: {err}; using defaults")),
        )),
    }
}

struct LoadedMethod {
    display_name: String,
    code: MethodCode,
}

impl LoadedMethod {
    fn open(args: &MethodArgs) -> Result<Self> {
        let bytes = std::fs::read(&args.class)
            .with_context(|| format!("failed to read {}", args.class.display()))?;
        let class = ClassFile::parse(&bytes)
            .with_context(|| format!("failed to parse {}", args.class.display()))?;

        let (name, descriptor) = match args.method.split_once(':') {
            Some((name, descriptor)) => (name, Some(descriptor)),
            None => (args.method.as_str(), None),
        };
        let method = class.method(name, descriptor).ok_or_else(|| {
            anyhow!("method `{}` not found in {}", args.method, class.this_class)
        })?;
        let display_name = format!("{}.{}{}", class.this_class, method.name, method.descriptor);
        let code = method
            .code
            .clone()
            .ok_or_else(|| anyhow!("`{display_name}` has no code"))?;
        Ok(Self { display_name, code })
    }

    fn graph(&self, options: BuildOptions) -> Result<LineFlowGraph> {
        LineFlowGraph::from_code(&self.code, &LineFilter::All, options)
            .with_context(|| format!("failed to analyze `{}`", self.display_name))
    }

    /// Code indices a debugger reports for `line`: one per line-table row.
    fn indices_of(&self, line: u32) -> Vec<u64> {
        self.code
            .line_numbers
            .iter()
            .filter(|row| row.line == line)
            .map(|row| u64::from(row.start_pc))
            .collect()
    }

    fn first_index_of(&self, line: u32) -> Option<u64> {
        self.indices_of(line).into_iter().min()
    }
}

#[derive(Serialize)]
struct GraphReport {
    method: String,
    nodes: Vec<NodeReport>,
}

#[derive(Serialize)]
struct NodeReport {
    line: u32,
    start: u32,
    end: u32,
    kind: &'static str,
    next_line: Option<u32>,
    jumps: Vec<u32>,
    handlers: Vec<u32>,
    contains_return: bool,
}

impl GraphReport {
    fn new(method: &LoadedMethod, graph: &LineFlowGraph) -> Self {
        let code_len = method.code.code.len() as u32;
        let offset = |address: Address| graph.offset_of(address).unwrap_or(code_len);
        let nodes = graph
            .nodes()
            .map(|node: &LineNode| NodeReport {
                line: node.line,
                start: offset(node.start),
                end: offset(node.end),
                kind: match node.kind {
                    NodeKind::EndsAtNextLine => "next-line",
                    NodeKind::EndsAtJump => "jump",
                    NodeKind::EndsAtReturn => "return",
                },
                next_line: node.next_line,
                jumps: node.jump_targets.iter().copied().map(offset).collect(),
                handlers: node.handler_targets.iter().copied().map(offset).collect(),
                contains_return: node.contains_return,
            })
            .collect();
        Self {
            method: method.display_name.clone(),
            nodes,
        }
    }
}

#[derive(Serialize)]
struct TargetsReport {
    method: String,
    line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    targets: Option<Vec<TargetReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inconclusive: Option<String>,
}

#[derive(Serialize)]
struct TargetReport {
    line: u32,
    code_index: u64,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}

fn print_graph(report: &GraphReport) {
    println!("{}", report.method);
    for node in &report.nodes {
        let mut line = format!(
            "  line {:>5}  @{}..{}  {}",
            node.line, node.start, node.end, node.kind
        );
        if let Some(next) = node.next_line {
            line.push_str(&format!("  next={next}"));
        }
        if !node.jumps.is_empty() {
            line.push_str(&format!("  jumps={}", join(&node.jumps)));
        }
        if !node.handlers.is_empty() {
            line.push_str(&format!("  handlers={}", join(&node.handlers)));
        }
        if node.contains_return {
            line.push_str("  returns");
        }
        println!("{line}");
    }
}

fn print_targets(report: &TargetsReport) {
    match (&report.targets, &report.inconclusive) {
        (Some(targets), _) => {
            println!("{} line {}:", report.method, report.line);
            for target in targets {
                println!("  line {} @{}", target.line, target.code_index);
            }
        }
        (None, Some(reason)) => {
            println!(
                "{} line {}: inconclusive ({reason}); a debugger would use its native step",
                report.method, report.line
            );
        }
        (None, None) => {}
    }
}

fn join(offsets: &[u32]) -> String {
    offsets
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
