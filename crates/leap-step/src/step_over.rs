use leap_config::SteppingConfig;
use leap_flow::{
    resolve_step_targets, BuildOptions, Inconclusive, LineFilter, LineFlowGraph, StepQuery,
    StepTarget,
};
use leap_jdwp::{ClassId, DebugEngine, FrameInfo, JdwpError, LineLocation, MethodId, ThreadId};
use thiserror::Error;

use crate::breakpoints::{BatchId, BreakpointRegistry, Predicate};
use crate::cache::{GraphCache, MethodKey};
use crate::error::Result;

/// What tells the frame a step started in apart from a recursive call of the
/// same method: the stack depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameIdentity {
    pub thread: ThreadId,
    pub depth: usize,
    pub class_id: ClassId,
    pub method_id: MethodId,
}

impl FrameIdentity {
    pub fn of(thread: ThreadId, frame: &FrameInfo) -> Self {
        Self {
            thread,
            depth: frame.depth,
            class_id: frame.location.class_id,
            method_id: frame.location.method_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FallbackReason {
    #[error("emulated step over is disabled")]
    Disabled,
    #[error(transparent)]
    Analysis(#[from] Inconclusive),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Breakpoints were installed at `targets` and the VM resumed.
    Emulated {
        targets: Vec<StepTarget>,
        batch: BatchId,
    },
    /// The engine's native step over was issued instead.
    Fallback { reason: FallbackReason },
}

pub struct StepOverService {
    config: SteppingConfig,
}

impl StepOverService {
    pub fn new(config: SteppingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SteppingConfig {
        &self.config
    }

    /// Steps `thread` over its current line.
    ///
    /// Must run on the manager thread. Analysis problems and engine failures
    /// before the resume never surface as errors; they turn into a native
    /// step. Only a failing native step is reported.
    pub fn step_over(
        &self,
        engine: &mut dyn DebugEngine,
        cache: &mut GraphCache,
        breakpoints: &mut BreakpointRegistry,
        thread: ThreadId,
    ) -> Result<StepOutcome> {
        if !self.config.emulated_step_over {
            return fallback(engine, thread, FallbackReason::Disabled);
        }

        let frame = match engine.top_frame(thread) {
            Ok(frame) => frame,
            Err(err) => return fallback(engine, thread, engine_failure(err).into()),
        };
        let targets = match self.analyze(engine, cache, &frame) {
            Ok(targets) => targets,
            Err(reason) => return fallback(engine, thread, reason.into()),
        };

        let origin = FrameIdentity::of(thread, &frame);
        let batch = breakpoints.new_batch();
        for target in &targets {
            let location = frame.location.with_index(target.code_index);
            let predicate: Predicate =
                Box::new(move |engine: &mut dyn DebugEngine, thread: ThreadId| {
                    is_origin_frame(engine, thread, origin)
                });
            if let Err(err) = breakpoints.install(engine, batch, thread, location, predicate) {
                breakpoints.remove_batch(engine, batch);
                return fallback(engine, thread, engine_failure(err).into());
            }
        }

        if let Err(err) = engine.resume() {
            breakpoints.remove_batch(engine, batch);
            return fallback(engine, thread, engine_failure(err).into());
        }

        tracing::debug!(
            target: "leap.step",
            thread,
            line = frame.line,
            targets = targets.len(),
            batch = batch.0,
            "emulated step over"
        );
        Ok(StepOutcome::Emulated { targets, batch })
    }

    fn analyze(
        &self,
        engine: &mut dyn DebugEngine,
        cache: &mut GraphCache,
        frame: &FrameInfo,
    ) -> Result<Vec<StepTarget>, Inconclusive> {
        let source_name = if self.config.filter_foreign_lines {
            frame.source_name.as_deref()
        } else {
            None
        };
        let locations: Vec<LineLocation> = engine
            .line_locations(&frame.location, source_name)
            .map_err(engine_failure)?
            .into_iter()
            .filter(|line| line.location.same_method(&frame.location))
            .collect();

        let filter = match source_name {
            Some(_) => LineFilter::Only(locations.iter().map(|line| line.line).collect()),
            None => LineFilter::All,
        };
        let options = BuildOptions {
            exception_edges: self.config.exception_edges,
        };
        let graph = cache.get_or_try_insert(MethodKey::of(&frame.location), || {
            let code = engine.method_code(&frame.location).map_err(engine_failure)?;
            LineFlowGraph::from_code(&code, &filter, options)
                .map_err(|err| Inconclusive::NoGraph(err.to_string()))
        })?;

        let query = StepQuery {
            line: frame.line,
            code_index: frame.location.index,
        };
        resolve_step_targets(&graph, query, |line| {
            Ok(locations
                .iter()
                .filter(|location| location.line == line)
                .map(|location| location.location.index)
                .collect())
        })
    }
}

fn fallback(
    engine: &mut dyn DebugEngine,
    thread: ThreadId,
    reason: FallbackReason,
) -> Result<StepOutcome> {
    tracing::debug!(
        target: "leap.step",
        thread,
        reason = %reason,
        "falling back to native step over"
    );
    engine.step_over(thread)?;
    Ok(StepOutcome::Fallback { reason })
}

fn engine_failure(err: JdwpError) -> Inconclusive {
    Inconclusive::Engine(err.to_string())
}

/// A step breakpoint only counts in the frame the step started from. If the
/// frame cannot be read the thread is left stopped.
fn is_origin_frame(
    engine: &mut dyn DebugEngine,
    thread: ThreadId,
    origin: FrameIdentity,
) -> bool {
    match engine.top_frame(thread) {
        Ok(frame) => FrameIdentity::of(thread, &frame) == origin,
        Err(err) => {
            tracing::debug!(
                target: "leap.step",
                thread,
                error = %err,
                "cannot read top frame at step breakpoint; stopping"
            );
            true
        }
    }
}
