//! Emulated "step over" and run-to-line for JVM debug sessions.
//!
//! A step over normally makes the engine single-step through the current
//! method, paying one debug-event round trip per instruction. [`DebugSession`]
//! instead asks `leap-flow` for every line the step can land on, installs
//! thread-filtered one-shot breakpoints there and resumes once. Breakpoints
//! only count when they fire in the frame the step started from, so recursive
//! calls of the same method run through. Whenever the analysis is in doubt the
//! engine's native step over is used.
//!
//! All engine traffic goes through a session's [`ManagerThread`]; editor
//! highlights for single-shot breakpoints go through a [`UiQueue`].

mod breakpoints;
mod cache;
mod error;
pub mod hardening;
mod manager;
mod session;
mod single_shot;
mod step_over;
mod ui;

pub use crate::breakpoints::{always_stop, BatchId, BreakpointRegistry, HitOutcome, Predicate};
pub use crate::cache::{GraphCache, MethodKey};
pub use crate::error::{Result, StepError};
pub use crate::manager::ManagerThread;
pub use crate::session::{DebugSession, PauseCause, SessionId, SessionRegistry, ToggleRequest};
pub use crate::single_shot::{SingleShotService, ToggleGuard, ToggleOutcome};
pub use crate::step_over::{FallbackReason, FrameIdentity, StepOutcome, StepOverService};
pub use crate::ui::{ui_channel, DocumentId, HighlightId, LineHighlighter, UiPump, UiQueue};
