use std::collections::HashMap;
use std::sync::Arc;

use leap_flow::LineFlowGraph;
use leap_jdwp::{ClassId, Location, MethodId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub class_id: ClassId,
    pub method_id: MethodId,
}

impl MethodKey {
    pub fn of(location: &Location) -> Self {
        Self {
            class_id: location.class_id,
            method_id: location.method_id,
        }
    }
}

/// Line graphs built during a session, keyed by method.
///
/// A graph only depends on the method's bytecode, so entries stay valid until
/// the class is redefined or the session ends. When the cache is full it is
/// flushed wholesale.
pub struct GraphCache {
    capacity: usize,
    graphs: HashMap<MethodKey, Arc<LineFlowGraph>>,
}

impl GraphCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            graphs: HashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &MethodKey) -> Option<Arc<LineFlowGraph>> {
        self.graphs.get(key).cloned()
    }

    /// Returns the cached graph for `key`, building it with `build` on a miss.
    /// Failed builds are not cached.
    pub fn get_or_try_insert<E>(
        &mut self,
        key: MethodKey,
        build: impl FnOnce() -> Result<LineFlowGraph, E>,
    ) -> Result<Arc<LineFlowGraph>, E> {
        if let Some(graph) = self.graphs.get(&key) {
            return Ok(Arc::clone(graph));
        }
        let graph = Arc::new(build()?);
        if self.graphs.len() >= self.capacity {
            tracing::debug!(
                target: "leap.step",
                entries = self.graphs.len(),
                "graph cache full; flushing"
            );
            self.graphs.clear();
        }
        self.graphs.insert(key, Arc::clone(&graph));
        Ok(graph)
    }

    /// Drops every graph of `class_id`, e.g. after the class was redefined.
    pub fn invalidate_class(&mut self, class_id: ClassId) -> usize {
        let before = self.graphs.len();
        self.graphs.retain(|key, _| key.class_id != class_id);
        before - self.graphs.len()
    }

    pub fn clear(&mut self) {
        self.graphs.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}
