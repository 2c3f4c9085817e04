//! Scripted engines shared by the unit tests in this crate.

use crate::coordinator::ConversationCoordinator;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use voxturn_audio::{SyntheticCodec, VoiceActivityGate};
use voxturn_core::{
    AudioChunk, CollaboratorError, ConversationConfig, EngineError, EngineKind, EngineSpec,
    HostAccelerator, LatencyConfig, RecoveryConfig, Stage, VoiceProfile,
};
use voxturn_engine::{
    text_codes, BackendRegistry, ContextTurn, EngineBackend, EngineHandle, EngineInstance,
    EngineLifecycleManager, LoadedEngine, ResourceBudgetTracker, ResponseGenerator,
    SynthesisOutput, Synthesizer, Transcriber, Transcription,
};
use voxturn_monitor::{LatencyMonitor, RecoveryManager};

pub(crate) fn speech_chunk(id: u64) -> AudioChunk {
    let samples = (0..8000)
        .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 200.0 * i as f32 / 16000.0).sin())
        .collect();
    AudioChunk {
        id,
        samples,
        sample_rate: 16000,
        channels: 1,
    }
}

/// One engine that can play any role. Behavior is switched at runtime.
#[derive(Default)]
pub(crate) struct ScriptedEngine {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay_ms: AtomicU64,
    silence: AtomicBool,
    failure: Mutex<Option<String>>,
    codes: Mutex<Option<Vec<i64>>>,
}

impl ScriptedEngine {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn delay(&self, ms: u64) {
        self.delay_ms.store(ms, Ordering::SeqCst);
    }

    pub(crate) fn report_silence(&self) {
        self.silence.store(true, Ordering::SeqCst);
    }

    pub(crate) fn emit_codes(&self, codes: Vec<i64>) {
        *self.codes.lock().unwrap() = Some(codes);
    }

    async fn enter(&self, stage: Stage) -> Result<(), CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(CollaboratorError::failed(stage, message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transcriber for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn transcribe(
        &self,
        _audio: &AudioChunk,
        _deadline: Instant,
    ) -> Result<Transcription, CollaboratorError> {
        self.enter(Stage::Transcription).await?;
        if self.silence.load(Ordering::SeqCst) {
            return Ok(Transcription::silence());
        }
        Ok(Transcription::speech("hello there"))
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        text: &str,
        _context: &[ContextTurn],
        _deadline: Instant,
    ) -> Result<String, CollaboratorError> {
        self.enter(Stage::Response).await?;
        Ok(format!("echo: {text}"))
    }
}

#[async_trait]
impl Synthesizer for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceProfile,
        _deadline: Instant,
    ) -> Result<SynthesisOutput, CollaboratorError> {
        self.enter(Stage::Synthesis).await?;
        let tokens = self
            .codes
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| text_codes(text));
        Ok(SynthesisOutput {
            tokens,
            sample_rate: 24000,
        })
    }
}

struct ScriptedBackend {
    transcriber: Arc<ScriptedEngine>,
    generator: Arc<ScriptedEngine>,
    synthesizer: Arc<ScriptedEngine>,
}

#[async_trait]
impl EngineBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn load(&self, spec: &EngineSpec) -> Result<LoadedEngine, EngineError> {
        let instance = match spec.kind {
            EngineKind::Transcription => EngineInstance::Transcriber(self.transcriber.clone()),
            EngineKind::Response => EngineInstance::Generator(self.generator.clone()),
            EngineKind::Synthesis => EngineInstance::Synthesizer(self.synthesizer.clone()),
        };
        Ok(LoadedEngine {
            instance,
            memory_used_gb: spec.estimated_gb,
        })
    }

    async fn unload(&self, _handle: &EngineHandle) -> Result<(), EngineError> {
        Ok(())
    }

    async fn verify(&self, _handle: &EngineHandle) -> Result<(), EngineError> {
        Ok(())
    }
}

pub(crate) struct Harness {
    pub(crate) coordinator: Arc<ConversationCoordinator>,
    pub(crate) manager: Arc<EngineLifecycleManager>,
    pub(crate) recovery: Arc<RecoveryManager>,
    pub(crate) transcriber: Arc<ScriptedEngine>,
    pub(crate) generator: Arc<ScriptedEngine>,
    pub(crate) synthesizer: Arc<ScriptedEngine>,
}

impl Harness {
    pub(crate) fn unstarted() -> Self {
        Self::with_config(ConversationConfig::default())
    }

    pub(crate) async fn started() -> Self {
        Self::started_with(ConversationConfig::default()).await
    }

    pub(crate) async fn started_with(config: ConversationConfig) -> Self {
        let harness = Self::with_config(config);
        harness.manager.initialize_all(&specs()).await.unwrap();
        harness
    }

    pub(crate) fn with_config(config: ConversationConfig) -> Self {
        let transcriber = Arc::new(ScriptedEngine::default());
        let generator = Arc::new(ScriptedEngine::default());
        let synthesizer = Arc::new(ScriptedEngine::default());

        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(ScriptedBackend {
            transcriber: transcriber.clone(),
            generator: generator.clone(),
            synthesizer: synthesizer.clone(),
        }));

        let accelerator = Arc::new(HostAccelerator::new());
        let budget = Arc::new(ResourceBudgetTracker::new(16.0, accelerator.clone()));
        let manager = Arc::new(EngineLifecycleManager::new(budget, registry));
        let monitor = Arc::new(LatencyMonitor::new(LatencyConfig::default()));
        let recovery = Arc::new(RecoveryManager::with_defaults(
            RecoveryConfig {
                memory_pause_ms: 1,
                stabilization_ms: 1,
                network_delay_ms: 1,
                ..RecoveryConfig::default()
            },
            accelerator,
            monitor.clone(),
        ));

        let coordinator = Arc::new(ConversationCoordinator::new(
            VoiceActivityGate::default(),
            Arc::new(SyntheticCodec::new()),
            manager.clone(),
            monitor,
            recovery.clone(),
            config,
        ));

        Self {
            coordinator,
            manager,
            recovery,
            transcriber,
            generator,
            synthesizer,
        }
    }
}

fn specs() -> Vec<EngineSpec> {
    vec![
        EngineSpec::new("stt", EngineKind::Transcription, 2.0).with_backend("scripted"),
        EngineSpec::new("llm", EngineKind::Response, 4.0).with_backend("scripted"),
        EngineSpec::new("tts", EngineKind::Synthesis, 1.0).with_backend("scripted"),
    ]
}
