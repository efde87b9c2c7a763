use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use leap_jdwp::{DebugEngine, Location, ThreadId};
use parking_lot::Mutex;

use crate::breakpoints::{always_stop, BatchId, BreakpointRegistry};
use crate::error::{Result, StepError};
use crate::ui::{DocumentId, HighlightId, UiQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added { batch: BatchId, locations: usize },
    Removed { batch: BatchId },
    /// The line has no code in the current method.
    NoLocations,
}

/// Holds the single-toggle gate closed until dropped.
///
/// A toggle's guard travels with it to the UI queue and is released there, so
/// a new toggle is only accepted once the editor caught up with the last one.
pub struct ToggleGuard {
    in_flight: Arc<AtomicBool>,
}

impl Drop for ToggleGuard {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

struct LineToggle {
    batch: BatchId,
    highlight: Option<HighlightId>,
}

type ToggleKey = (DocumentId, u32);

/// Single-shot breakpoints toggled on editor lines ("run to line").
pub struct SingleShotService {
    in_flight: Arc<AtomicBool>,
    toggles: Arc<Mutex<BTreeMap<ToggleKey, LineToggle>>>,
    ui: UiQueue,
}

impl SingleShotService {
    pub fn new(ui: UiQueue) -> Self {
        Self {
            in_flight: Arc::new(AtomicBool::new(false)),
            toggles: Arc::new(Mutex::new(BTreeMap::new())),
            ui,
        }
    }

    /// Claims the toggle gate, or `None` if a toggle is still in flight.
    pub fn try_begin(&self) -> Option<ToggleGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ToggleGuard {
                in_flight: Arc::clone(&self.in_flight),
            })
    }

    /// Editor lines (0-based) that currently carry single-shot breakpoints.
    pub fn toggled_lines(&self) -> Vec<(DocumentId, u32)> {
        self.toggles.lock().keys().copied().collect()
    }

    /// Adds single-shot breakpoints on the 0-based editor `line` of the
    /// method `thread` is stopped in, or removes them if already there.
    ///
    /// Must run on the manager thread. `guard` is released on the UI queue.
    pub fn toggle(
        &self,
        engine: &mut dyn DebugEngine,
        breakpoints: &mut BreakpointRegistry,
        thread: ThreadId,
        document: DocumentId,
        line: u32,
        guard: ToggleGuard,
    ) -> Result<ToggleOutcome> {
        let key = (document, line);
        let existing = self.toggles.lock().remove(&key);
        if let Some(LineToggle { batch, highlight }) = existing {
            breakpoints.remove_batch(engine, batch);
            self.ui.post(move |highlighter| {
                if let Some(highlight) = highlight {
                    highlighter.remove_highlight(highlight);
                }
                drop(guard);
            });
            return Ok(ToggleOutcome::Removed { batch });
        }

        let outcome = self.add(engine, breakpoints, thread, key);
        match outcome {
            Ok(ToggleOutcome::Added { batch, .. }) => {
                let toggles = Arc::clone(&self.toggles);
                self.ui.post(move |highlighter| {
                    let mut toggles = toggles.lock();
                    // The toggle may have been reset before the editor got here.
                    if let Some(toggle) = toggles.get_mut(&key).filter(|t| t.batch == batch) {
                        toggle.highlight = Some(highlighter.add_highlight(document, line));
                    }
                    drop(toggles);
                    drop(guard);
                });
            }
            _ => {
                self.ui.post(move |_| drop(guard));
            }
        }
        outcome
    }

    fn add(
        &self,
        engine: &mut dyn DebugEngine,
        breakpoints: &mut BreakpointRegistry,
        thread: ThreadId,
        key: ToggleKey,
    ) -> Result<ToggleOutcome> {
        let (document, line) = key;
        let frame = engine.top_frame(thread)?;
        let vm_line = line.checked_add(1).ok_or(StepError::InvalidLine { line })?;
        let locations: Vec<Location> = engine
            .line_locations(&frame.location, None)?
            .into_iter()
            .filter(|location| location.line == vm_line)
            .map(|location| location.location)
            .collect();
        if locations.is_empty() {
            tracing::debug!(
                target: "leap.step",
                document = document.0,
                line = vm_line,
                "no code on line; nothing to toggle"
            );
            return Ok(ToggleOutcome::NoLocations);
        }

        let batch = breakpoints.new_batch();
        for location in &locations {
            if let Err(err) = breakpoints.install(engine, batch, thread, *location, always_stop()) {
                breakpoints.remove_batch(engine, batch);
                return Err(err.into());
            }
        }
        self.toggles.lock().insert(
            key,
            LineToggle {
                batch,
                highlight: None,
            },
        );
        Ok(ToggleOutcome::Added {
            batch,
            locations: locations.len(),
        })
    }

    /// Removes every toggled line with its breakpoints and highlight.
    pub fn reset(
        &self,
        engine: &mut dyn DebugEngine,
        breakpoints: &mut BreakpointRegistry,
    ) -> usize {
        let toggles = std::mem::take(&mut *self.toggles.lock());
        let mut highlights = Vec::new();
        for toggle in toggles.values() {
            breakpoints.remove_batch(engine, toggle.batch);
            highlights.extend(toggle.highlight);
        }
        if !highlights.is_empty() {
            self.ui.post(move |highlighter| {
                for highlight in highlights {
                    highlighter.remove_highlight(highlight);
                }
            });
        }
        toggles.len()
    }
}
