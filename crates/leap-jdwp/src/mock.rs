use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use leap_classfile::MethodCode;
use parking_lot::Mutex;

use crate::{
    ClassId, DebugEngine, FrameInfo, JdwpError, LineLocation, Location, MethodId, RequestId,
    ThreadId,
};

/// A mutating call observed by [`MockEngine`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    MethodCode(Location),
    SetBreakpoint {
        request: RequestId,
        thread: ThreadId,
        location: Location,
    },
    ClearBreakpoint(RequestId),
    Resume,
    StepOver(ThreadId),
}

struct MockMethod {
    code: MethodCode,
    source_name: Option<String>,
    /// Lines that belong to another source file (inlined code).
    foreign_lines: BTreeSet<u32>,
    /// Reported instead of the line table when set.
    line_locations: Option<Vec<(u32, u64)>>,
}

#[derive(Default)]
struct MockState {
    methods: HashMap<(ClassId, MethodId), MockMethod>,
    /// Per-thread stacks, top frame last.
    stacks: HashMap<ThreadId, Vec<FrameInfo>>,
    breakpoints: BTreeMap<RequestId, (ThreadId, Location)>,
    next_request: RequestId,
    next_frame: u64,
    calls: Vec<EngineCall>,
    fail_method_code: bool,
    fail_top_frame: bool,
    fail_resume: bool,
}

/// Deterministic, in-memory debug engine.
///
/// Clones share state, so a test can hand one clone to the session's manager
/// thread and keep another to drive the debuggee and inspect what happened.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a loaded method; its line locations come from the code's line
    /// table, one per row.
    pub fn add_method(
        &self,
        class_id: ClassId,
        method_id: MethodId,
        source_name: Option<&str>,
        code: MethodCode,
    ) {
        self.state.lock().methods.insert(
            (class_id, method_id),
            MockMethod {
                code,
                source_name: source_name.map(str::to_string),
                foreign_lines: BTreeSet::new(),
                line_locations: None,
            },
        );
    }

    /// Marks `line` of a registered method as coming from another source file.
    pub fn add_foreign_line(&self, class_id: ClassId, method_id: MethodId, line: u32) {
        if let Some(method) = self.state.lock().methods.get_mut(&(class_id, method_id)) {
            method.foreign_lines.insert(line);
        }
    }

    /// Makes the engine report `(line, code index)` pairs for a registered
    /// method instead of deriving them from its line table.
    pub fn set_line_locations(
        &self,
        class_id: ClassId,
        method_id: MethodId,
        rows: Vec<(u32, u64)>,
    ) {
        if let Some(method) = self.state.lock().methods.get_mut(&(class_id, method_id)) {
            method.line_locations = Some(rows);
        }
    }

    /// Pushes a new top frame (a call) on `thread` and returns it.
    pub fn push_frame(&self, thread: ThreadId, location: Location, line: u32) -> FrameInfo {
        let mut state = self.state.lock();
        state.next_frame += 1;
        let frame_id = state.next_frame;
        let source_name = state
            .methods
            .get(&(location.class_id, location.method_id))
            .and_then(|method| method.source_name.clone());
        let stack = state.stacks.entry(thread).or_default();
        let frame = FrameInfo {
            frame_id,
            location,
            line,
            source_name,
            depth: stack.len() + 1,
        };
        stack.push(frame.clone());
        frame
    }

    /// Pops the top frame (a return).
    pub fn pop_frame(&self, thread: ThreadId) -> Option<FrameInfo> {
        self.state
            .lock()
            .stacks
            .get_mut(&thread)
            .and_then(|stack| stack.pop())
    }

    /// Moves the top frame of `thread` to a new position in the same frame.
    pub fn move_to(&self, thread: ThreadId, location: Location, line: u32) {
        let mut state = self.state.lock();
        if let Some(frame) = state.stacks.get_mut(&thread).and_then(|s| s.last_mut()) {
            frame.location = location;
            frame.line = line;
        }
    }

    /// Installed breakpoints, by request id.
    pub fn breakpoints(&self) -> Vec<(RequestId, ThreadId, Location)> {
        self.state
            .lock()
            .breakpoints
            .iter()
            .map(|(id, (thread, location))| (*id, *thread, *location))
            .collect()
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn method_code_fetches(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| matches!(call, EngineCall::MethodCode(_)))
            .count()
    }

    pub fn set_fail_method_code(&self, fail: bool) {
        self.state.lock().fail_method_code = fail;
    }

    pub fn set_fail_top_frame(&self, fail: bool) {
        self.state.lock().fail_top_frame = fail;
    }

    pub fn set_fail_resume(&self, fail: bool) {
        self.state.lock().fail_resume = fail;
    }
}

impl DebugEngine for MockEngine {
    fn top_frame(&mut self, thread: ThreadId) -> Result<FrameInfo, JdwpError> {
        let state = self.state.lock();
        if state.fail_top_frame {
            return Err(JdwpError::Other("mock frames unavailable".to_string()));
        }
        state
            .stacks
            .get(&thread)
            .and_then(|stack| stack.last().cloned())
            .ok_or(JdwpError::InvalidThread(thread))
    }

    fn method_code(&mut self, location: &Location) -> Result<MethodCode, JdwpError> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::MethodCode(*location));
        if state.fail_method_code {
            return Err(JdwpError::Other("mock method code unavailable".to_string()));
        }
        state
            .methods
            .get(&(location.class_id, location.method_id))
            .map(|method| method.code.clone())
            .ok_or(JdwpError::AbsentInformation {
                class_id: location.class_id,
                method_id: location.method_id,
            })
    }

    fn line_locations(
        &mut self,
        location: &Location,
        source_name: Option<&str>,
    ) -> Result<Vec<LineLocation>, JdwpError> {
        let state = self.state.lock();
        let method = state
            .methods
            .get(&(location.class_id, location.method_id))
            .ok_or(JdwpError::AbsentInformation {
                class_id: location.class_id,
                method_id: location.method_id,
            })?;
        if source_name.is_some() && source_name != method.source_name.as_deref() {
            return Ok(Vec::new());
        }
        let rows: Vec<(u32, u64)> = match &method.line_locations {
            Some(rows) => rows.clone(),
            None => method
                .code
                .line_numbers
                .iter()
                .map(|row| (row.line, u64::from(row.start_pc)))
                .collect(),
        };
        Ok(rows
            .into_iter()
            .filter(|(line, _)| source_name.is_none() || !method.foreign_lines.contains(line))
            .map(|(line, index)| LineLocation {
                location: location.with_index(index),
                line,
            })
            .collect())
    }

    fn set_breakpoint(
        &mut self,
        thread: ThreadId,
        location: Location,
    ) -> Result<RequestId, JdwpError> {
        let mut state = self.state.lock();
        if !state.stacks.contains_key(&thread) {
            return Err(JdwpError::InvalidThread(thread));
        }
        state.next_request += 1;
        let request = state.next_request;
        state.breakpoints.insert(request, (thread, location));
        state.calls.push(EngineCall::SetBreakpoint {
            request,
            thread,
            location,
        });
        tracing::trace!(
            target: "leap.jdwp",
            request,
            thread,
            index = location.index,
            "mock breakpoint set"
        );
        Ok(request)
    }

    fn clear_breakpoint(&mut self, request: RequestId) -> Result<(), JdwpError> {
        let mut state = self.state.lock();
        if state.breakpoints.remove(&request).is_none() {
            return Err(JdwpError::InvalidRequest(request));
        }
        state.calls.push(EngineCall::ClearBreakpoint(request));
        Ok(())
    }

    fn resume(&mut self) -> Result<(), JdwpError> {
        let mut state = self.state.lock();
        if state.fail_resume {
            return Err(JdwpError::Other("mock resume refused".to_string()));
        }
        state.calls.push(EngineCall::Resume);
        Ok(())
    }

    fn step_over(&mut self, thread: ThreadId) -> Result<(), JdwpError> {
        let mut state = self.state.lock();
        if !state.stacks.contains_key(&thread) {
            return Err(JdwpError::InvalidThread(thread));
        }
        state.calls.push(EngineCall::StepOver(thread));
        Ok(())
    }
}
