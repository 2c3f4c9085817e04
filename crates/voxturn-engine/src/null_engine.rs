//! Deterministic stand-in engines. They let the whole pipeline run, and be
//! tested, without any model weights.

use crate::engine_trait::{
    ContextTurn, EngineBackend, EngineInstance, LoadedEngine, ResponseGenerator, SynthesisOutput,
    Synthesizer, Transcriber, Transcription,
};
use crate::handle::EngineHandle;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use voxturn_core::{
    AudioChunk, CollaboratorError, EngineError, EngineKind, EngineSpec, VoiceProfile,
    CODES_PER_FRAME, MAX_CODE,
};

const NULL_SAMPLE_RATE: u32 = 24000;

pub struct NullTranscriber {
    calls: AtomicUsize,
}

impl NullTranscriber {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Default for NullTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcriber for NullTranscriber {
    fn name(&self) -> &str {
        "null"
    }

    async fn transcribe(
        &self,
        audio: &AudioChunk,
        _deadline: Instant,
    ) -> Result<Transcription, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if audio.samples.is_empty() {
            return Ok(Transcription::silence());
        }
        Ok(Transcription::speech(format!(
            "[null] {} samples",
            audio.samples.len()
        )))
    }
}

pub struct NullGenerator {
    calls: AtomicUsize,
}

impl NullGenerator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Default for NullGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseGenerator for NullGenerator {
    fn name(&self) -> &str {
        "null"
    }

    async fn generate(
        &self,
        text: &str,
        _context: &[ContextTurn],
        _deadline: Instant,
    ) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(format!("You said: {text}"))
    }
}

pub struct NullSynthesizer {
    calls: AtomicUsize,
}

impl NullSynthesizer {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Default for NullSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Codes derived from the bytes of `text`: always in range, always whole
/// frames, never empty.
pub fn text_codes(text: &str) -> Vec<i64> {
    let mut codes: Vec<i64> = text
        .bytes()
        .enumerate()
        .map(|(i, b)| (b as i64 * 31 + i as i64 * 7) % (MAX_CODE + 1))
        .collect();
    let frames = codes.len().div_ceil(CODES_PER_FRAME).max(1);
    codes.resize(frames * CODES_PER_FRAME, 0);
    codes
}

#[async_trait]
impl Synthesizer for NullSynthesizer {
    fn name(&self) -> &str {
        "null"
    }

    async fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceProfile,
        _deadline: Instant,
    ) -> Result<SynthesisOutput, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(SynthesisOutput {
            tokens: text_codes(text),
            sample_rate: NULL_SAMPLE_RATE,
        })
    }
}

/// Backend that builds null engines. The reported footprint is
/// `options.memory_gb` when present, otherwise the spec's estimate.
pub struct NullBackend {
    loads: AtomicUsize,
    unloads: AtomicUsize,
}

impl NullBackend {
    pub fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn unload_count(&self) -> usize {
        self.unloads.load(Ordering::Relaxed)
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    async fn load(&self, spec: &EngineSpec) -> Result<LoadedEngine, EngineError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let instance = match spec.kind {
            EngineKind::Transcription => {
                EngineInstance::Transcriber(Arc::new(NullTranscriber::new()))
            }
            EngineKind::Response => EngineInstance::Generator(Arc::new(NullGenerator::new())),
            EngineKind::Synthesis => EngineInstance::Synthesizer(Arc::new(NullSynthesizer::new())),
        };
        let memory_used_gb = spec
            .options
            .get("memory_gb")
            .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
            .unwrap_or(spec.estimated_gb);

        tracing::trace!(engine = %spec.name, kind = %spec.kind, "null engine loaded");
        Ok(LoadedEngine {
            instance,
            memory_used_gb,
        })
    }

    async fn unload(&self, _handle: &EngineHandle) -> Result<(), EngineError> {
        self.unloads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn verify(&self, handle: &EngineHandle) -> Result<(), EngineError> {
        let deadline = Instant::now() + std::time::Duration::from_secs(1);
        handle
            .instance
            .round_trip(deadline)
            .await
            .map_err(|e| EngineError::VerifyFailed {
                engine: handle.name.clone(),
                reason: e.to_string(),
            })
    }
}
