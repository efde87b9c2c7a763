use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use leap_config::SteppingConfig;
use leap_jdwp::{ClassId, DebugEngine, RequestId, ThreadId};
use parking_lot::Mutex;

use crate::breakpoints::{BatchId, BreakpointRegistry, HitOutcome};
use crate::cache::GraphCache;
use crate::error::{Result, StepError};
use crate::manager::ManagerThread;
use crate::single_shot::SingleShotService;
use crate::step_over::{StepOutcome, StepOverService};
use crate::ui::{DocumentId, UiQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

/// Why the debuggee stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseCause {
    Breakpoint { request: RequestId, thread: ThreadId },
    Step { thread: ThreadId },
    Other { thread: ThreadId },
}

impl PauseCause {
    pub fn thread(&self) -> ThreadId {
        match *self {
            PauseCause::Breakpoint { thread, .. }
            | PauseCause::Step { thread }
            | PauseCause::Other { thread } => thread,
        }
    }
}

/// Whether a toggle request was queued or dropped because another one is
/// still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleRequest {
    Scheduled,
    Dropped,
}

/// Manager-thread state of a session.
struct SessionState {
    cache: GraphCache,
    breakpoints: BreakpointRegistry,
    /// Step batches installed but not yet hit.
    pending_steps: BTreeSet<BatchId>,
}

/// One debuggee connection: its manager thread, one-shot breakpoints and
/// cached line graphs.
///
/// Public methods are called from UI or event threads; everything touching
/// the engine is forwarded to the manager thread.
pub struct DebugSession {
    id: SessionId,
    manager: ManagerThread,
    state: Arc<Mutex<SessionState>>,
    step_over: Arc<StepOverService>,
    single_shot: Arc<SingleShotService>,
    suspended: Mutex<Option<ThreadId>>,
    closed: AtomicBool,
}

impl DebugSession {
    pub fn new<E>(id: SessionId, engine: E, config: SteppingConfig, ui: UiQueue) -> Result<Self>
    where
        E: DebugEngine + 'static,
    {
        let manager = ManagerThread::spawn(&format!("leap-manager-{}", id.0), engine)?;
        let state = SessionState {
            cache: GraphCache::new(config.graph_cache_entries),
            breakpoints: BreakpointRegistry::new(),
            pending_steps: BTreeSet::new(),
        };
        Ok(Self {
            id,
            manager,
            state: Arc::new(Mutex::new(state)),
            step_over: Arc::new(StepOverService::new(config)),
            single_shot: Arc::new(SingleShotService::new(ui)),
            suspended: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn suspended_thread(&self) -> Option<ThreadId> {
        *self.suspended.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Editor lines that currently carry single-shot breakpoints.
    pub fn toggled_lines(&self) -> Vec<(DocumentId, u32)> {
        self.single_shot.toggled_lines()
    }

    /// Number of graphs currently cached.
    pub fn cached_graphs(&self) -> usize {
        self.state.lock().cache.len()
    }

    fn suspended_for_command(&self) -> Result<ThreadId> {
        if self.is_closed() {
            return Err(StepError::SessionClosed);
        }
        self.suspended_thread().ok_or(StepError::NotSuspended)
    }

    /// Queues a step over of the suspended thread. Completion shows up as the
    /// usual breakpoint/pause notifications.
    pub fn request_step_over(&self) -> Result<()> {
        let thread = self.suspended_for_command()?;
        let state = Arc::clone(&self.state);
        let service = Arc::clone(&self.step_over);
        self.manager.schedule(move |engine| {
            if let Err(err) = step_over_on_manager(engine, &state, &service, thread) {
                tracing::warn!(
                    target: "leap.step",
                    thread,
                    error = %err,
                    "step over failed"
                );
            }
        })
    }

    /// Like [`DebugSession::request_step_over`], but waits for the outcome.
    pub fn step_over_and_wait(&self) -> Result<StepOutcome> {
        let thread = self.suspended_for_command()?;
        let state = Arc::clone(&self.state);
        let service = Arc::clone(&self.step_over);
        self.manager
            .invoke_and_wait(move |engine| step_over_on_manager(engine, &state, &service, thread))?
    }

    /// Toggles single-shot breakpoints on a 0-based editor line.
    ///
    /// Only one toggle is processed at a time; requests arriving meanwhile are
    /// dropped and reported as [`ToggleRequest::Dropped`].
    pub fn toggle_breakpoint_at_line(
        &self,
        document: DocumentId,
        line: u32,
    ) -> Result<ToggleRequest> {
        let thread = self.suspended_for_command()?;
        let Some(guard) = self.single_shot.try_begin() else {
            tracing::debug!(
                target: "leap.step",
                document = document.0,
                line,
                "toggle already in flight; dropping request"
            );
            return Ok(ToggleRequest::Dropped);
        };

        let state = Arc::clone(&self.state);
        let single_shot = Arc::clone(&self.single_shot);
        self.manager.schedule(move |engine| {
            let mut state = state.lock();
            let toggled =
                single_shot.toggle(engine, &mut state.breakpoints, thread, document, line, guard);
            match toggled {
                Ok(outcome) => tracing::debug!(
                    target: "leap.step",
                    document = document.0,
                    line,
                    ?outcome,
                    "single-shot toggle"
                ),
                Err(err) => tracing::warn!(
                    target: "leap.step",
                    document = document.0,
                    line,
                    error = %err,
                    "single-shot toggle failed"
                ),
            }
        })?;
        Ok(ToggleRequest::Scheduled)
    }

    /// Run to a 0-based editor line: toggles it unless it is the line the
    /// thread is stopped on.
    pub fn run_to_line(&self, document: DocumentId, line: u32) -> Result<ToggleRequest> {
        let thread = self.suspended_for_command()?;
        let vm_line = line.checked_add(1).ok_or(StepError::InvalidLine { line })?;
        let frame = self
            .manager
            .invoke_and_wait(move |engine| engine.top_frame(thread))??;
        if frame.line == vm_line {
            return Err(StepError::SameLine { line });
        }
        self.toggle_breakpoint_at_line(document, line)
    }

    /// Routes a breakpoint event from the engine's event pump.
    ///
    /// [`HitOutcome::Resume`] means the VM was already resumed and no pause
    /// should be reported; otherwise the caller follows up with
    /// [`DebugSession::on_session_paused`].
    pub fn on_breakpoint_event(
        &self,
        request: RequestId,
        thread: ThreadId,
    ) -> Result<HitOutcome> {
        if self.is_closed() {
            return Err(StepError::SessionClosed);
        }
        let state = Arc::clone(&self.state);
        let outcome = self.manager.invoke_and_wait(move |engine| {
            let mut state = state.lock();
            let outcome = state.breakpoints.on_hit(engine, request, thread);
            match outcome {
                HitOutcome::Stop { batch } => {
                    state.pending_steps.remove(&batch);
                }
                HitOutcome::Resume { .. } => engine.resume()?,
                HitOutcome::NotOurs => {}
            }
            Ok::<_, StepError>(outcome)
        })??;
        Ok(outcome)
    }

    /// The debuggee stopped. Step batches still pending belong to a step that
    /// was overtaken and are deleted, as are all single-shot toggles.
    pub fn on_session_paused(&self, cause: PauseCause) -> Result<()> {
        if self.is_closed() {
            return Err(StepError::SessionClosed);
        }
        *self.suspended.lock() = Some(cause.thread());

        let state = Arc::clone(&self.state);
        let single_shot = Arc::clone(&self.single_shot);
        self.manager.schedule(move |engine| {
            let mut state = state.lock();
            let state = &mut *state;
            let stale = std::mem::take(&mut state.pending_steps);
            for batch in &stale {
                state.breakpoints.remove_batch(engine, *batch);
            }
            let toggles = single_shot.reset(engine, &mut state.breakpoints);
            if !stale.is_empty() || toggles > 0 {
                tracing::debug!(
                    target: "leap.step",
                    ?cause,
                    stale_steps = stale.len(),
                    toggles,
                    "cleared one-shot breakpoints on pause"
                );
            }
        })
    }

    pub fn on_session_resumed(&self) {
        *self.suspended.lock() = None;
    }

    /// Deletes every breakpoint and cached graph of the session and stops its
    /// manager thread. Idempotent.
    pub fn on_session_stopped(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.suspended.lock() = None;

        let state = Arc::clone(&self.state);
        let single_shot = Arc::clone(&self.single_shot);
        let scheduled = self.manager.schedule(move |engine| {
            let mut state = state.lock();
            single_shot.reset(engine, &mut state.breakpoints);
            let removed = state.breakpoints.remove_all(engine);
            state.pending_steps.clear();
            state.cache.clear();
            tracing::debug!(target: "leap.step", removed, "session stopped");
        });
        if let Err(err) = scheduled {
            tracing::debug!(target: "leap.step", error = %err, "session already shut down");
        }
        self.manager.shutdown();
    }

    /// Forgets cached graphs of a redefined class.
    pub fn invalidate_class(&self, class_id: ClassId) -> Result<()> {
        let state = Arc::clone(&self.state);
        self.manager.schedule(move |_| {
            let removed = state.lock().cache.invalidate_class(class_id);
            tracing::debug!(target: "leap.step", class_id, removed, "graphs invalidated");
        })
    }

    /// Blocks until every command queued so far has run.
    pub fn wait_idle(&self) -> Result<()> {
        self.manager.invoke_and_wait(|_| ())
    }
}

fn step_over_on_manager(
    engine: &mut dyn DebugEngine,
    state: &Mutex<SessionState>,
    service: &StepOverService,
    thread: ThreadId,
) -> Result<StepOutcome> {
    let mut state = state.lock();
    let state = &mut *state;
    let outcome = service.step_over(engine, &mut state.cache, &mut state.breakpoints, thread)?;
    if let StepOutcome::Emulated { batch, .. } = &outcome {
        state.pending_steps.insert(*batch);
    }
    Ok(outcome)
}

/// Live sessions by id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<DebugSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session`. A previous session with the same id is stopped.
    pub fn insert(&self, session: DebugSession) -> Arc<DebugSession> {
        let session = Arc::new(session);
        let previous = self
            .sessions
            .lock()
            .insert(session.id(), Arc::clone(&session));
        if let Some(previous) = previous {
            previous.on_session_stopped();
        }
        session
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<DebugSession>> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Stops and forgets the session.
    pub fn session_stopped(&self, id: SessionId) -> Option<Arc<DebugSession>> {
        let session = self.sessions.lock().remove(&id)?;
        session.on_session_stopped();
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
