//! Debug-engine façade for Leap.
//!
//! `leap-step` drives a suspended JVM exclusively through [`DebugEngine`]:
//! reading the top frame and the current method's bytecode, listing line
//! locations, and installing thread-filtered location breakpoints. A real
//! implementation wraps a JDWP connection; [`MockEngine`] is the in-memory
//! stand-in used by tests.

mod mock;

use leap_classfile::MethodCode;
use thiserror::Error;

pub use mock::{EngineCall, MockEngine};

pub type ThreadId = u64;
pub type FrameId = u64;
pub type ClassId = u64;
pub type MethodId = u64;
pub type RequestId = i32;

/// JDWP type tag for classes.
pub const TYPE_TAG_CLASS: u8 = 1;

/// An executable position: a code index inside one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub type_tag: u8,
    pub class_id: ClassId,
    pub method_id: MethodId,
    /// Bytecode offset within the method.
    pub index: u64,
}

impl Location {
    pub fn new(class_id: ClassId, method_id: MethodId, index: u64) -> Self {
        Self {
            type_tag: TYPE_TAG_CLASS,
            class_id,
            method_id,
            index,
        }
    }

    /// Same method, different code index.
    #[must_use]
    pub fn with_index(self, index: u64) -> Self {
        Self { index, ..self }
    }

    pub fn same_method(&self, other: &Location) -> bool {
        self.class_id == other.class_id && self.method_id == other.method_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    pub location: Location,
    pub line: u32,
    /// Source file the frame's line refers to, if the class carries one.
    pub source_name: Option<String>,
    /// Number of frames on the thread's stack, this one included.
    pub depth: usize,
}

/// One entry of a method's line table as the engine reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineLocation {
    pub location: Location,
    pub line: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JdwpError {
    #[error("JDWP client is not connected")]
    NotConnected,
    #[error("thread {0} is not suspended")]
    NotSuspended(ThreadId),
    #[error("invalid thread id {0}")]
    InvalidThread(ThreadId),
    #[error("invalid event request id {0}")]
    InvalidRequest(RequestId),
    #[error("no line number information for method {method_id} of class {class_id}")]
    AbsentInformation {
        class_id: ClassId,
        method_id: MethodId,
    },
    #[error("JDWP command failed with error code {error_code}")]
    CommandFailed { error_code: u16 },
    #[error("{0}")]
    Other(String),
}

/// The subset of a JVM debugger's request subsystem Leap needs.
///
/// All calls are made from a single manager thread, which is why the trait
/// only requires `Send`.
pub trait DebugEngine: Send {
    fn top_frame(&mut self, thread: ThreadId) -> Result<FrameInfo, JdwpError>;

    /// Bytecode, exception table and line table of the method `location`
    /// points into.
    fn method_code(&mut self, location: &Location) -> Result<MethodCode, JdwpError>;

    /// Every line location of the method `location` points into, restricted
    /// to lines of `source_name` when given.
    fn line_locations(
        &mut self,
        location: &Location,
        source_name: Option<&str>,
    ) -> Result<Vec<LineLocation>, JdwpError>;

    /// Installs an enabled breakpoint at `location` that only fires on
    /// `thread` and suspends that thread when it does.
    fn set_breakpoint(
        &mut self,
        thread: ThreadId,
        location: Location,
    ) -> Result<RequestId, JdwpError>;

    fn clear_breakpoint(&mut self, request: RequestId) -> Result<(), JdwpError>;

    /// Resumes the suspended VM.
    fn resume(&mut self) -> Result<(), JdwpError>;

    /// The engine's own line step over.
    fn step_over(&mut self, thread: ThreadId) -> Result<(), JdwpError>;
}

impl<E: DebugEngine + ?Sized> DebugEngine for Box<E> {
    fn top_frame(&mut self, thread: ThreadId) -> Result<FrameInfo, JdwpError> {
        (**self).top_frame(thread)
    }

    fn method_code(&mut self, location: &Location) -> Result<MethodCode, JdwpError> {
        (**self).method_code(location)
    }

    fn line_locations(
        &mut self,
        location: &Location,
        source_name: Option<&str>,
    ) -> Result<Vec<LineLocation>, JdwpError> {
        (**self).line_locations(location, source_name)
    }

    fn set_breakpoint(
        &mut self,
        thread: ThreadId,
        location: Location,
    ) -> Result<RequestId, JdwpError> {
        (**self).set_breakpoint(thread, location)
    }

    fn clear_breakpoint(&mut self, request: RequestId) -> Result<(), JdwpError> {
        (**self).clear_breakpoint(request)
    }

    fn resume(&mut self) -> Result<(), JdwpError> {
        (**self).resume()
    }

    fn step_over(&mut self, thread: ThreadId) -> Result<(), JdwpError> {
        (**self).step_over(thread)
    }
}
