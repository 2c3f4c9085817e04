//! Top-level assembly of the voice pipeline and the read-only API exposed to
//! operators: readiness, memory, latency, recovery and recommendations.

use crate::coordinator::ConversationCoordinator;
use crate::turn::ConversationTurn;
use std::sync::Arc;
use voxturn_audio::{CodecBackend, SyntheticCodec, VoiceActivityGate};
use voxturn_core::{
    Accelerator, AppConfig, AudioChunk, EngineError, EngineKind, EngineSpec, Failure,
    HostAccelerator, PipelineError,
};
use voxturn_engine::{
    BackendRegistry, EngineLifecycleManager, EngineSet, MemoryStats, ResourceBudgetTracker,
};
use voxturn_monitor::{LatencyMonitor, PerformanceSummary, RecoveryManager, RecoveryStats};

/// Headroom below this share of the total budget triggers a recommendation.
const LOW_HEADROOM_FRACTION: f64 = 0.10;

pub struct VoicePipeline {
    config: AppConfig,
    engines: Arc<EngineLifecycleManager>,
    monitor: Arc<LatencyMonitor>,
    recovery: Arc<RecoveryManager>,
    coordinator: Arc<ConversationCoordinator>,
}

impl VoicePipeline {
    pub fn new(
        config: AppConfig,
        registry: BackendRegistry,
        codec: Arc<dyn CodecBackend>,
        accelerator: Arc<dyn Accelerator>,
    ) -> Self {
        let budget = Arc::new(ResourceBudgetTracker::new(
            config.budget.total_gb,
            Arc::clone(&accelerator),
        ));
        let engines = Arc::new(EngineLifecycleManager::new(budget, registry));
        let monitor = Arc::new(LatencyMonitor::new(config.latency.clone()));
        let recovery = Arc::new(RecoveryManager::with_defaults(
            config.recovery.clone(),
            accelerator,
            Arc::clone(&monitor),
        ));
        let coordinator = Arc::new(ConversationCoordinator::new(
            VoiceActivityGate::new(config.gate.clone()),
            codec,
            Arc::clone(&engines),
            Arc::clone(&monitor),
            Arc::clone(&recovery),
            config.conversation.clone(),
        ));

        Self {
            config,
            engines,
            monitor,
            recovery,
            coordinator,
        }
    }

    /// A pipeline backed by the null engines and the synthetic codec.
    pub fn with_null_backends(config: AppConfig) -> Self {
        Self::new(
            config,
            BackendRegistry::new(),
            Arc::new(SyntheticCodec::new()),
            Arc::new(HostAccelerator::new()),
        )
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<ConversationCoordinator> {
        &self.coordinator
    }

    pub fn engines(&self) -> &Arc<EngineLifecycleManager> {
        &self.engines
    }

    /// Bring up the engines listed in the configuration, or a null engine of
    /// each kind when none are listed.
    pub async fn start(&self) -> Result<Arc<EngineSet>, PipelineError> {
        let specs = if self.config.engines.is_empty() {
            default_engine_specs()
        } else {
            self.config.engines.clone()
        };
        self.start_with(&specs).await
    }

    pub async fn start_with(&self, specs: &[EngineSpec]) -> Result<Arc<EngineSet>, PipelineError> {
        for kind in [
            EngineKind::Transcription,
            EngineKind::Response,
            EngineKind::Synthesis,
        ] {
            if !specs.iter().any(|s| s.kind == kind) {
                return Err(EngineError::InvalidSpec(format!("no {kind} engine configured")).into());
            }
        }

        match self.engines.initialize_all(specs).await {
            Ok(set) => {
                tracing::info!(engines = set.len(), "voice pipeline ready");
                Ok(set)
            }
            Err(e) => {
                let outcome = self.recovery.handle(&Failure::from(&e)).await;
                tracing::error!(
                    category = %outcome.category,
                    recovered = outcome.succeeded,
                    "engine initialization failed: {e}"
                );
                Err(e.into())
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.coordinator.is_ready()
    }

    pub async fn process_turn(&self, chunk: AudioChunk) -> Result<ConversationTurn, PipelineError> {
        self.coordinator.process_turn(chunk).await
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.engines.budget().memory_stats()
    }

    pub fn performance_summary(&self) -> PerformanceSummary {
        self.monitor.summary()
    }

    pub fn recovery_stats(&self) -> RecoveryStats {
        self.recovery.stats()
    }

    pub fn optimization_recommendations(&self) -> Vec<String> {
        let mut out = self.monitor.recommendations();

        let memory = self.memory_stats();
        if memory.total_gb > 0.0
            && memory.reserved_gb > 0.0
            && memory.headroom_gb < memory.total_gb * LOW_HEADROOM_FRACTION
        {
            out.push(format!(
                "memory headroom is {:.1} GB of {:.1} GB; consider smaller engines or a larger budget",
                memory.headroom_gb, memory.total_gb
            ));
        }

        for alert in self.recovery.active_alerts() {
            out.push(format!(
                "{} failures of kind '{}' recurred {} times within {} s; investigate the root cause",
                alert.category, alert.kind, alert.occurrences, alert.window_secs
            ));
        }
        out
    }

    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        self.engines.shutdown().await?;
        tracing::info!("voice pipeline stopped");
        Ok(())
    }
}

/// One null engine of each kind, sized for a small budget.
pub fn default_engine_specs() -> Vec<EngineSpec> {
    vec![
        EngineSpec::new("stt", EngineKind::Transcription, 1.0),
        EngineSpec::new("llm", EngineKind::Response, 2.0),
        EngineSpec::new("tts", EngineKind::Synthesis, 1.0),
    ]
}
