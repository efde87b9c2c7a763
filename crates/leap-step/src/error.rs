use leap_jdwp::JdwpError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Jdwp(#[from] JdwpError),

    #[error("no thread is suspended")]
    NotSuspended,

    #[error("line {line} is the current line")]
    SameLine { line: u32 },

    #[error("editor line {line} has no VM line")]
    InvalidLine { line: u32 },

    #[error("debug session is closed")]
    SessionClosed,

    #[error("cannot wait for a manager command from the manager thread")]
    ReentrantWait,

    #[error("manager command panicked")]
    CommandPanicked,

    #[error("failed to spawn the manager thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T, E = StepError> = std::result::Result<T, E>;
