use crate::handle::EngineHandle;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use voxturn_core::{
    AudioChunk, CollaboratorError, EngineError, EngineKind, EngineSpec, VoiceProfile,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub is_silence: bool,
}

impl Transcription {
    pub fn speech(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_silence: false,
        }
    }

    pub fn silence() -> Self {
        Self {
            text: String::new(),
            is_silence: true,
        }
    }
}

/// One finalized exchange handed to the response generator as context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextTurn {
    pub user: String,
    pub assistant: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutput {
    pub tokens: Vec<i64>,
    pub sample_rate: u32,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;
    async fn transcribe(
        &self,
        audio: &AudioChunk,
        deadline: Instant,
    ) -> Result<Transcription, CollaboratorError>;
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(
        &self,
        text: &str,
        context: &[ContextTurn],
        deadline: Instant,
    ) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;
    /// Produce codec tokens for `text`; the caller decodes them to PCM.
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
        deadline: Instant,
    ) -> Result<SynthesisOutput, CollaboratorError>;
}

/// A loaded engine, typed by the capability it provides.
#[derive(Clone)]
pub enum EngineInstance {
    Transcriber(Arc<dyn Transcriber>),
    Generator(Arc<dyn ResponseGenerator>),
    Synthesizer(Arc<dyn Synthesizer>),
}

impl EngineInstance {
    pub fn kind(&self) -> EngineKind {
        match self {
            EngineInstance::Transcriber(_) => EngineKind::Transcription,
            EngineInstance::Generator(_) => EngineKind::Response,
            EngineInstance::Synthesizer(_) => EngineKind::Synthesis,
        }
    }

    /// Cheapest call that proves the engine answers at all.
    pub async fn round_trip(&self, deadline: Instant) -> Result<(), CollaboratorError> {
        match self {
            EngineInstance::Transcriber(t) => {
                let probe = AudioChunk {
                    id: 0,
                    samples: vec![0.0; 160],
                    sample_rate: 16000,
                    channels: 1,
                };
                t.transcribe(&probe, deadline).await.map(|_| ())
            }
            EngineInstance::Generator(g) => g.generate("ping", &[], deadline).await.map(|_| ()),
            EngineInstance::Synthesizer(s) => {
                let voice = VoiceProfile::new("probe", 1.0);
                s.synthesize("ping", &voice, deadline).await.map(|_| ())
            }
        }
    }
}

pub struct LoadedEngine {
    pub instance: EngineInstance,
    /// Memory the engine actually occupies once loaded.
    pub memory_used_gb: f64,
}

#[async_trait]
pub trait EngineBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn load(&self, spec: &EngineSpec) -> Result<LoadedEngine, EngineError>;
    async fn unload(&self, handle: &EngineHandle) -> Result<(), EngineError>;
    async fn verify(&self, handle: &EngineHandle) -> Result<(), EngineError>;
}
