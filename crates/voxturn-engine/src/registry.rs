use crate::engine_trait::EngineBackend;
use std::collections::HashMap;
use std::sync::Arc;
use voxturn_core::EngineError;

/// Engine backends by the name used in `[[engines]] backend = "..."`.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn EngineBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            backends: HashMap::new(),
        };
        registry.register(Arc::new(crate::null_engine::NullBackend::new()));
        registry
    }

    /// Add a backend under its own name, replacing any previous one.
    pub fn register(&mut self, backend: Arc<dyn EngineBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn EngineBackend>, EngineError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::BackendNotFound(name.to_string()))
    }

    pub fn list_backends(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
