use crate::budget::ResourceBudgetTracker;
use crate::engine_trait::EngineBackend;
use crate::handle::{EngineHandle, EngineSet};
use crate::registry::BackendRegistry;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use voxturn_core::{BudgetError, EngineError, EngineSpec, EngineState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Unregistered,
    Initializing,
    Ready,
}

struct LoadedHandle {
    handle: EngineHandle,
    backend: Arc<dyn EngineBackend>,
}

/// Brings a set of engines up against one memory budget, all or nothing.
///
/// `initialize_all` and `shutdown` serialize on one async lock. Once engines
/// are ready they are published as an immutable [`EngineSet`]; readers only
/// clone an `Arc`.
pub struct EngineLifecycleManager {
    budget: Arc<ResourceBudgetTracker>,
    registry: BackendRegistry,
    init_lock: tokio::sync::Mutex<()>,
    engines: RwLock<Option<Arc<EngineSet>>>,
    state: Mutex<ManagerState>,
}

impl EngineLifecycleManager {
    pub fn new(budget: Arc<ResourceBudgetTracker>, registry: BackendRegistry) -> Self {
        Self {
            budget,
            registry,
            init_lock: tokio::sync::Mutex::new(()),
            engines: RwLock::new(None),
            state: Mutex::new(ManagerState::Unregistered),
        }
    }

    pub fn budget(&self) -> &Arc<ResourceBudgetTracker> {
        &self.budget
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ManagerState::Ready
    }

    fn set_state(&self, state: ManagerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Snapshot of the ready engines, if initialization has completed.
    pub fn engines(&self) -> Option<Arc<EngineSet>> {
        self.engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_engine(&self, name: &str) -> Result<Arc<EngineHandle>, EngineError> {
        self.engines()
            .and_then(|set| set.get(name))
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    /// Initialize `specs` in the given order. On any failure every engine
    /// brought up by this call is unloaded and released in reverse order
    /// before the error is returned.
    pub async fn initialize_all(
        &self,
        specs: &[EngineSpec],
    ) -> Result<Arc<EngineSet>, EngineError> {
        let _lock = self.init_lock.lock().await;
        if self.engines().is_some() {
            return Err(EngineError::AlreadyInitialized);
        }

        validate_specs(specs)?;
        self.check_aggregate(specs)?;

        self.set_state(ManagerState::Initializing);
        tracing::info!(count = specs.len(), "initializing engines");

        let mut pending = PendingInit::new(self, specs);
        for spec in specs {
            match self.bring_up(spec).await {
                Ok(handle) => pending.loaded.push(handle),
                Err(e) => {
                    tracing::error!(engine = %spec.name, "engine initialization failed: {e}");
                    self.roll_back(pending.take_loaded()).await;
                    pending.disarm();
                    self.set_state(ManagerState::Unregistered);
                    return Err(e);
                }
            }
        }

        let mut verify_error = None;
        for entry in &pending.loaded {
            if let Err(e) = entry.backend.verify(&entry.handle).await {
                tracing::error!(engine = %entry.handle.name, "engine verification failed: {e}");
                verify_error = Some(e);
                break;
            }
        }
        if let Some(e) = verify_error {
            self.roll_back(pending.take_loaded()).await;
            pending.disarm();
            self.set_state(ManagerState::Unregistered);
            return Err(e);
        }

        let handles = pending
            .take_loaded()
            .into_iter()
            .map(|mut entry| {
                entry.handle.is_ready = true;
                entry.handle
            })
            .collect();
        pending.disarm();
        let set = Arc::new(EngineSet::new(handles));
        *self.engines.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&set));
        self.set_state(ManagerState::Ready);

        tracing::info!(
            engines = ?set.names(),
            reserved_gb = self.budget.reserved_total(),
            "engines ready"
        );
        Ok(set)
    }

    /// Unload every engine in reverse initialization order. Continues past
    /// individual failures and reports the first one.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let _guard = self.init_lock.lock().await;
        let set = self
            .engines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.set_state(ManagerState::Unregistered);

        let Some(set) = set else {
            return Ok(());
        };

        let mut first_error = None;
        for handle in set.handles().rev() {
            let result = match self.registry.get(&handle.backend) {
                Ok(backend) => backend.unload(handle).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!(engine = %handle.name, "engine unload failed: {e}");
                first_error.get_or_insert(e);
            }
            if let Err(e) = self.budget.release(&handle.name) {
                tracing::warn!(engine = %handle.name, "engine release failed: {e}");
                first_error.get_or_insert(e.into());
            }
        }
        tracing::info!("engines shut down");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn check_aggregate(&self, specs: &[EngineSpec]) -> Result<(), EngineError> {
        let total_gb = self.budget.total_gb();
        if total_gb <= 0.0 {
            return Err(BudgetError::Impossible { total_gb }.into());
        }
        let requested: f64 = specs.iter().map(|s| s.estimated_gb).sum();
        let available = self.budget.headroom_gb();
        if requested > available {
            return Err(BudgetError::Exhausted {
                engine: "all engines".to_string(),
                requested_gb: requested,
                available_gb: available,
            }
            .into());
        }
        Ok(())
    }

    /// Reserve, load and commit one engine. Undoes its own partial work on
    /// failure.
    async fn bring_up(&self, spec: &EngineSpec) -> Result<LoadedHandle, EngineError> {
        let backend = self.registry.get(&spec.backend)?;
        self.budget.reserve(&spec.name, spec.estimated_gb)?;

        let loaded = match backend.load(spec).await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.release_quietly(&spec.name);
                return Err(e);
            }
        };

        let handle = EngineHandle {
            name: spec.name.clone(),
            backend: spec.backend.clone(),
            memory_gb: loaded.memory_used_gb,
            is_ready: false,
            instance: loaded.instance,
        };

        if handle.kind() != spec.kind {
            self.unload_quietly(backend.as_ref(), &handle).await;
            self.release_quietly(&spec.name);
            return Err(EngineError::LoadFailed {
                engine: spec.name.clone(),
                reason: format!(
                    "backend produced a {} engine, expected {}",
                    handle.kind(),
                    spec.kind
                ),
            });
        }

        if let Err(e) = self.budget.commit(&spec.name, loaded.memory_used_gb) {
            self.unload_quietly(backend.as_ref(), &handle).await;
            self.release_quietly(&spec.name);
            return Err(e.into());
        }

        tracing::info!(
            engine = %spec.name,
            kind = %spec.kind,
            backend = %spec.backend,
            memory_gb = handle.memory_gb,
            "engine loaded"
        );
        Ok(LoadedHandle { handle, backend })
    }

    async fn roll_back(&self, loaded: Vec<LoadedHandle>) {
        for entry in loaded.into_iter().rev() {
            if let Err(e) = entry.backend.unload(&entry.handle).await {
                tracing::warn!(engine = %entry.handle.name, "unload during rollback failed: {e}");
            }
            self.release_quietly(&entry.handle.name);
            tracing::debug!(engine = %entry.handle.name, "engine rolled back");
        }
    }

    async fn unload_quietly(&self, backend: &dyn EngineBackend, handle: &EngineHandle) {
        if let Err(e) = backend.unload(handle).await {
            tracing::warn!(engine = %handle.name, "unload of rejected engine failed: {e}");
        }
    }

    fn release_quietly(&self, name: &str) {
        if let Err(e) = self.budget.release(name) {
            tracing::warn!(engine = %name, "release failed: {e}");
        }
    }
}

/// Engines brought up by an `initialize_all` call that has not finished yet.
///
/// If the call's future is dropped mid-flight, `Drop` releases every
/// reservation the call holds, hands loaded engines to a background unload
/// and returns the manager to `Unregistered`.
struct PendingInit<'a> {
    manager: &'a EngineLifecycleManager,
    names: Vec<String>,
    loaded: Vec<LoadedHandle>,
    armed: bool,
}

impl<'a> PendingInit<'a> {
    fn new(manager: &'a EngineLifecycleManager, specs: &[EngineSpec]) -> Self {
        Self {
            manager,
            names: specs.iter().map(|s| s.name.clone()).collect(),
            loaded: Vec::with_capacity(specs.len()),
            armed: true,
        }
    }

    fn take_loaded(&mut self) -> Vec<LoadedHandle> {
        std::mem::take(&mut self.loaded)
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingInit<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!("engine initialization abandoned; releasing reservations");

        let budget = &self.manager.budget;
        for name in self.names.iter().rev() {
            if matches!(budget.state(name), EngineState::Reserving | EngineState::Ready) {
                self.manager.release_quietly(name);
            }
        }

        let loaded = self.take_loaded();
        if !loaded.is_empty() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        for entry in loaded.into_iter().rev() {
                            if let Err(e) = entry.backend.unload(&entry.handle).await {
                                tracing::warn!(
                                    engine = %entry.handle.name,
                                    "unload of abandoned engine failed: {e}"
                                );
                            }
                        }
                    });
                }
                Err(_) => {
                    tracing::warn!(count = loaded.len(), "no runtime to unload abandoned engines");
                }
            }
        }

        self.manager.set_state(ManagerState::Unregistered);
    }
}

fn validate_specs(specs: &[EngineSpec]) -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for spec in specs {
        if spec.name.trim().is_empty() {
            return Err(EngineError::InvalidSpec("engine name is empty".to_string()));
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(EngineError::InvalidSpec(format!(
                "duplicate engine name '{}'",
                spec.name
            )));
        }
        if !spec.estimated_gb.is_finite() || spec.estimated_gb < 0.0 {
            return Err(EngineError::InvalidSpec(format!(
                "engine '{}' has invalid estimated_gb {}",
                spec.name, spec.estimated_gb
            )));
        }
    }
    Ok(())
}
