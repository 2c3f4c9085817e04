use crate::engine_trait::{EngineInstance, ResponseGenerator, Synthesizer, Transcriber};
use std::collections::HashMap;
use std::sync::Arc;
use voxturn_core::EngineKind;

/// One initialized engine. Owned by the lifecycle manager; everything else
/// borrows it for the duration of a single call.
#[derive(Clone)]
pub struct EngineHandle {
    pub name: String,
    pub backend: String,
    pub memory_gb: f64,
    pub is_ready: bool,
    pub instance: EngineInstance,
}

impl EngineHandle {
    pub fn kind(&self) -> EngineKind {
        self.instance.kind()
    }
}

/// Immutable set of ready engines published after a successful
/// initialization. Lookups take no locks.
pub struct EngineSet {
    order: Vec<String>,
    handles: HashMap<String, Arc<EngineHandle>>,
}

impl std::fmt::Debug for EngineSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSet")
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl EngineSet {
    pub(crate) fn new(handles: Vec<EngineHandle>) -> Self {
        let order = handles.iter().map(|h| h.name.clone()).collect();
        let handles = handles
            .into_iter()
            .map(|h| (h.name.clone(), Arc::new(h)))
            .collect();
        Self { order, handles }
    }

    pub fn get(&self, name: &str) -> Option<Arc<EngineHandle>> {
        self.handles.get(name).cloned()
    }

    /// Engine names in initialization order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Handles in initialization order.
    pub fn handles(&self) -> impl DoubleEndedIterator<Item = &Arc<EngineHandle>> {
        self.order.iter().filter_map(|n| self.handles.get(n))
    }

    pub fn transcriber(&self) -> Option<Arc<dyn Transcriber>> {
        self.handles().find_map(|h| match &h.instance {
            EngineInstance::Transcriber(t) => Some(Arc::clone(t)),
            _ => None,
        })
    }

    pub fn generator(&self) -> Option<Arc<dyn ResponseGenerator>> {
        self.handles().find_map(|h| match &h.instance {
            EngineInstance::Generator(g) => Some(Arc::clone(g)),
            _ => None,
        })
    }

    pub fn synthesizer(&self) -> Option<Arc<dyn Synthesizer>> {
        self.handles().find_map(|h| match &h.instance {
            EngineInstance::Synthesizer(s) => Some(Arc::clone(s)),
            _ => None,
        })
    }
}
