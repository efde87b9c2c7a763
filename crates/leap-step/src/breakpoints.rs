use std::collections::BTreeMap;

use leap_jdwp::{DebugEngine, JdwpError, Location, RequestId, ThreadId};

/// Breakpoints installed together for one step or one toggled line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchId(pub u64);

/// Decides, when a one-shot breakpoint fires, whether the thread should stay
/// stopped (`true`) or be resumed (`false`).
pub type Predicate = Box<dyn FnMut(&mut dyn DebugEngine, ThreadId) -> bool + Send>;

/// A predicate that accepts every hit.
pub fn always_stop() -> Predicate {
    Box::new(|_: &mut dyn DebugEngine, _: ThreadId| true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOutcome {
    /// The predicate accepted the hit; every breakpoint of `batch` is gone.
    Stop { batch: BatchId },
    /// The predicate rejected the hit; the batch stays armed.
    Resume { batch: BatchId },
    /// Not one of ours.
    NotOurs,
}

struct OneShot {
    batch: BatchId,
    thread: ThreadId,
    location: Location,
    predicate: Predicate,
}

/// Every one-shot breakpoint a session has installed, by engine request id.
#[derive(Default)]
pub struct BreakpointRegistry {
    entries: BTreeMap<RequestId, OneShot>,
    next_batch: u64,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_batch(&mut self) -> BatchId {
        self.next_batch += 1;
        BatchId(self.next_batch)
    }

    pub fn install(
        &mut self,
        engine: &mut dyn DebugEngine,
        batch: BatchId,
        thread: ThreadId,
        location: Location,
        predicate: Predicate,
    ) -> Result<RequestId, JdwpError> {
        let request = engine.set_breakpoint(thread, location)?;
        tracing::trace!(
            target: "leap.step",
            request,
            batch = batch.0,
            index = location.index,
            "one-shot breakpoint installed"
        );
        self.entries.insert(
            request,
            OneShot {
                batch,
                thread,
                location,
                predicate,
            },
        );
        Ok(request)
    }

    #[must_use]
    pub fn batch_of(&self, request: RequestId) -> Option<BatchId> {
        self.entries.get(&request).map(|entry| entry.batch)
    }

    #[must_use]
    pub fn locations(&self, batch: BatchId) -> Vec<Location> {
        self.entries
            .values()
            .filter(|entry| entry.batch == batch)
            .map(|entry| entry.location)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deletes every breakpoint of `batch`. Engine failures are logged; the
    /// entries are forgotten either way.
    pub fn remove_batch(&mut self, engine: &mut dyn DebugEngine, batch: BatchId) -> usize {
        let requests: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.batch == batch)
            .map(|(request, _)| *request)
            .collect();
        for request in &requests {
            self.entries.remove(request);
            clear(engine, *request);
        }
        requests.len()
    }

    pub fn remove_all(&mut self, engine: &mut dyn DebugEngine) -> usize {
        let entries = std::mem::take(&mut self.entries);
        for request in entries.keys() {
            clear(engine, *request);
        }
        entries.len()
    }

    /// Dispatches a breakpoint event reported by the engine.
    pub fn on_hit(
        &mut self,
        engine: &mut dyn DebugEngine,
        request: RequestId,
        thread: ThreadId,
    ) -> HitOutcome {
        let Some(entry) = self.entries.get_mut(&request) else {
            return HitOutcome::NotOurs;
        };
        if entry.thread != thread {
            return HitOutcome::NotOurs;
        }
        let batch = entry.batch;
        if (entry.predicate)(engine, thread) {
            let removed = self.remove_batch(engine, batch);
            tracing::debug!(
                target: "leap.step",
                request,
                batch = batch.0,
                removed,
                "one-shot breakpoint accepted"
            );
            HitOutcome::Stop { batch }
        } else {
            tracing::debug!(
                target: "leap.step",
                request,
                batch = batch.0,
                "one-shot breakpoint hit in another frame; resuming"
            );
            HitOutcome::Resume { batch }
        }
    }
}

fn clear(engine: &mut dyn DebugEngine, request: RequestId) {
    if let Err(err) = engine.clear_breakpoint(request) {
        tracing::debug!(
            target: "leap.step",
            request,
            error = %err,
            "failed to clear breakpoint"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leap_classfile::opcode;
    use leap_classfile::testing::CodeBuilder;
    use leap_jdwp::MockEngine;

    fn never_stop() -> Predicate {
        Box::new(|_: &mut dyn DebugEngine, _: ThreadId| false)
    }

    fn engine_with_thread(thread: ThreadId) -> MockEngine {
        let mut b = CodeBuilder::new();
        b.line(1);
        b.op(opcode::RETURN);
        let engine = MockEngine::new();
        engine.add_method(1, 1, Some("A.java"), b.build());
        engine.push_frame(thread, Location::new(1, 1, 0), 1);
        engine
    }

    #[test]
    fn accepted_hit_removes_the_whole_batch() {
        let mut engine = engine_with_thread(5);
        let mut registry = BreakpointRegistry::new();
        let batch = registry.new_batch();
        let other = registry.new_batch();
        let first = registry
            .install(&mut engine, batch, 5, Location::new(1, 1, 0), always_stop())
            .unwrap();
        registry
            .install(&mut engine, batch, 5, Location::new(1, 1, 4), always_stop())
            .unwrap();
        registry
            .install(&mut engine, other, 5, Location::new(1, 1, 8), always_stop())
            .unwrap();

        assert_eq!(registry.on_hit(&mut engine, first, 5), HitOutcome::Stop { batch });
        assert_eq!(registry.len(), 1);
        assert_eq!(engine.breakpoints().len(), 1);
        assert_eq!(registry.locations(other), vec![Location::new(1, 1, 8)]);
    }

    #[test]
    fn rejected_hit_keeps_the_batch_armed() {
        let mut engine = engine_with_thread(5);
        let mut registry = BreakpointRegistry::new();
        let batch = registry.new_batch();
        let request = registry
            .install(&mut engine, batch, 5, Location::new(1, 1, 0), never_stop())
            .unwrap();

        assert_eq!(registry.on_hit(&mut engine, request, 5), HitOutcome::Resume { batch });
        assert_eq!(registry.batch_of(request), Some(batch));
        assert_eq!(engine.breakpoints().len(), 1);
    }

    #[test]
    fn foreign_requests_and_threads_are_not_ours() {
        let mut engine = engine_with_thread(5);
        let mut registry = BreakpointRegistry::new();
        let batch = registry.new_batch();
        let request = registry
            .install(&mut engine, batch, 5, Location::new(1, 1, 0), always_stop())
            .unwrap();

        assert_eq!(registry.on_hit(&mut engine, request + 100, 5), HitOutcome::NotOurs);
        assert_eq!(registry.on_hit(&mut engine, request, 6), HitOutcome::NotOurs);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_all_clears_the_engine() {
        let mut engine = engine_with_thread(5);
        let mut registry = BreakpointRegistry::new();
        for index in [0, 4] {
            let batch = registry.new_batch();
            registry
                .install(&mut engine, batch, 5, Location::new(1, 1, index), always_stop())
                .unwrap();
        }

        assert_eq!(registry.remove_all(&mut engine), 2);
        assert!(registry.is_empty());
        assert!(engine.breakpoints().is_empty());
    }
}
