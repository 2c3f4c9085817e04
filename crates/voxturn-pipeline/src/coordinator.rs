//! Drives one conversation turn: gate, transcription, response, synthesis.
//!
//! Each external call runs under a per-engine-type semaphore, a deadline and
//! the turn's cancellation token. Turns share nothing mutable except the
//! recent-turn context, so independent turns run concurrently.

use crate::context::RecentContext;
use crate::turn::{ConversationTurn, TurnDraft, TurnOutcome, TurnState};
use crate::voice_profile::VoiceSelector;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use voxturn_audio::{CodecBackend, FrameCodecDecoder, VoiceActivityGate};
use voxturn_core::{
    AudioChunk, CollaboratorError, ConversationConfig, Failure, LatencyBreakdown, PipelineError,
    Stage, SynthesizedAudio, TurnId, VoiceProfile,
};
use voxturn_engine::{EngineLifecycleManager, ResponseGenerator, Synthesizer, Transcriber};
use voxturn_monitor::{LatencyMonitor, RecoveryManager};

struct EnginePermits {
    transcription: Semaphore,
    response: Semaphore,
    synthesis: Semaphore,
}

impl EnginePermits {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            transcription: Semaphore::new(capacity),
            response: Semaphore::new(capacity),
            synthesis: Semaphore::new(capacity),
        }
    }

    fn for_stage(&self, stage: Stage) -> Option<&Semaphore> {
        match stage {
            Stage::Gate => None,
            Stage::Transcription => Some(&self.transcription),
            Stage::Response => Some(&self.response),
            Stage::Synthesis => Some(&self.synthesis),
        }
    }
}

/// Engines borrowed for the duration of one turn.
struct TurnEngines {
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn ResponseGenerator>,
    synthesizer: Arc<dyn Synthesizer>,
}

pub struct ConversationCoordinator {
    gate: VoiceActivityGate,
    decoder: FrameCodecDecoder<Arc<dyn CodecBackend>>,
    engines: Arc<EngineLifecycleManager>,
    monitor: Arc<LatencyMonitor>,
    recovery: Arc<RecoveryManager>,
    voices: VoiceSelector,
    context: RecentContext,
    config: ConversationConfig,
    permits: EnginePermits,
    next_turn: AtomicU64,
}

impl ConversationCoordinator {
    pub fn new(
        gate: VoiceActivityGate,
        codec: Arc<dyn CodecBackend>,
        engines: Arc<EngineLifecycleManager>,
        monitor: Arc<LatencyMonitor>,
        recovery: Arc<RecoveryManager>,
        config: ConversationConfig,
    ) -> Self {
        let voices = VoiceSelector::new(VoiceProfile::new(
            config.default_voice.clone(),
            config.default_speed,
        ));
        Self {
            gate,
            decoder: FrameCodecDecoder::new(codec),
            engines,
            monitor,
            recovery,
            voices,
            context: RecentContext::new(config.context_turns),
            permits: EnginePermits::new(config.engine_capacity),
            config,
            next_turn: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &RecentContext {
        &self.context
    }

    /// Whether new turns are accepted: engines are initialized and every
    /// capability a turn needs is present.
    pub fn is_ready(&self) -> bool {
        self.turn_engines().is_ok()
    }

    fn turn_engines(&self) -> Result<TurnEngines, PipelineError> {
        if !self.engines.is_ready() {
            return Err(PipelineError::NotReady);
        }
        let set = self.engines.engines().ok_or(PipelineError::NotReady)?;
        Ok(TurnEngines {
            transcriber: set.transcriber().ok_or(PipelineError::NotReady)?,
            generator: set.generator().ok_or(PipelineError::NotReady)?,
            synthesizer: set.synthesizer().ok_or(PipelineError::NotReady)?,
        })
    }

    pub async fn process_turn(&self, chunk: AudioChunk) -> Result<ConversationTurn, PipelineError> {
        self.process_turn_with_cancel(chunk, CancellationToken::new())
            .await
    }

    /// Run one turn to a terminal state. Errors only when the turn cannot
    /// start: the chunk is malformed or the pipeline is not ready. Every
    /// other failure is reported inside the returned turn.
    pub async fn process_turn_with_cancel(
        &self,
        chunk: AudioChunk,
        cancel: CancellationToken,
    ) -> Result<ConversationTurn, PipelineError> {
        validate_chunk(&chunk)?;
        let engines = self.turn_engines()?;

        let turn_id = self.next_turn.fetch_add(1, Ordering::Relaxed) + 1;
        let draft = TurnDraft::new(turn_id, chunk.id);
        let turn = self.run_turn(draft, &engines, &chunk, &cancel).await;

        match turn.outcome() {
            TurnOutcome::Silenced => {
                tracing::debug!(turn_id, reason = %turn.reason(), "turn silenced");
            }
            outcome => {
                tracing::info!(
                    turn_id,
                    chunk_id = chunk.id,
                    outcome = %outcome,
                    total_ms = turn.total_ms(),
                    "turn finished"
                );
            }
        }
        Ok(turn)
    }

    async fn run_turn(
        &self,
        mut draft: TurnDraft,
        engines: &TurnEngines,
        chunk: &AudioChunk,
        cancel: &CancellationToken,
    ) -> ConversationTurn {
        let turn_id = draft.turn_id();

        if cancel.is_cancelled() {
            let err = CollaboratorError::Cancelled { stage: Stage::Gate };
            return self.fail(draft, Stage::Gate, err.into()).await;
        }

        // ── Gate ──
        let token = self.monitor.begin_stage(turn_id, Stage::Gate);
        let decision = self.gate.evaluate(chunk);
        draft.record(Stage::Gate, self.monitor.end_stage(token));
        draft.gate = Some(decision);
        draft.advance(TurnState::Gated);
        if !decision.has_speech {
            let reason = format!("no speech detected: {}", decision.reason.as_str());
            return draft.finish(TurnOutcome::Silenced, reason);
        }

        // ── Transcription ──
        let transcriber = Arc::clone(&engines.transcriber);
        let (result, ms) = self
            .call(
                turn_id,
                Stage::Transcription,
                self.config.transcription_deadline_ms,
                cancel,
                move |deadline| async move { transcriber.transcribe(chunk, deadline).await },
            )
            .await;
        draft.record(Stage::Transcription, ms);
        let transcript = match result {
            Ok(t) if t.is_silence || t.text.trim().is_empty() => {
                return draft.finish(TurnOutcome::Silenced, "transcriber reported silence");
            }
            Ok(t) => t.text,
            Err(e) => return self.fail(draft, Stage::Transcription, e.into()).await,
        };
        draft.transcript = Some(transcript.clone());
        draft.advance(TurnState::Transcribed);

        // ── Response ──
        let context = self.context.snapshot();
        let generator = Arc::clone(&engines.generator);
        let (text, ctx) = (transcript.as_str(), context.as_slice());
        let (result, ms) = self
            .call(
                turn_id,
                Stage::Response,
                self.config.response_deadline_ms,
                cancel,
                move |deadline| async move { generator.generate(text, ctx, deadline).await },
            )
            .await;
        draft.record(Stage::Response, ms);
        let response = match result {
            Ok(text) if text.trim().is_empty() => {
                let err = CollaboratorError::failed(Stage::Response, "empty response text");
                return self.fail(draft, Stage::Response, err.into()).await;
            }
            Ok(text) => text,
            Err(e) => return self.fail(draft, Stage::Response, e.into()).await,
        };
        draft.response_text = Some(response.clone());
        draft.advance(TurnState::Responded);

        // ── Synthesis ──
        let voice = self.voices.select(&response);
        draft.voice = Some(voice.clone());
        let synthesizer = Arc::clone(&engines.synthesizer);
        let decoder = &self.decoder;
        let (text, profile) = (response.as_str(), &voice);
        let (result, ms) = self
            .call(
                turn_id,
                Stage::Synthesis,
                self.config.synthesis_deadline_ms,
                cancel,
                move |deadline| async move {
                    let output = synthesizer.synthesize(text, profile, deadline).await?;
                    let samples = decoder.decode(&output.tokens)?;
                    Ok::<_, PipelineError>(SynthesizedAudio {
                        samples,
                        sample_rate: output.sample_rate,
                    })
                },
            )
            .await;
        draft.record(Stage::Synthesis, ms);

        let audio_error = match result {
            Ok(audio) => {
                draft.response_audio = Some(audio);
                draft.advance(TurnState::Synthesized);
                None
            }
            Err(PipelineError::Collaborator(CollaboratorError::Cancelled { stage })) => {
                let err = CollaboratorError::Cancelled { stage };
                return self.fail(draft, Stage::Synthesis, err.into()).await;
            }
            Err(e) => {
                tracing::warn!(turn_id, "synthesis failed, returning text only: {e}");
                draft.recovery = Some(self.recovery.handle(&Failure::from(&e)).await);
                Some(e)
            }
        };

        let breakdown = LatencyBreakdown::from_stages(
            turn_id,
            draft.stage_timings.clone(),
            self.monitor.config().target_ms,
        );
        if let Some(signal) = self.monitor.record_turn(breakdown) {
            let failure = Failure::new(
                "performance.degraded",
                format!(
                    "turn {} took {:.0} ms ({:?})",
                    signal.turn_id, signal.total_ms, signal.reason
                ),
            );
            self.recovery.handle(&failure).await;
        }

        self.context.push(transcript, response);

        match audio_error {
            None => draft.finish(TurnOutcome::Completed { audio_failed: false }, "completed"),
            Some(e) => draft.finish(
                TurnOutcome::Completed { audio_failed: true },
                format!("completed without audio: {e}"),
            ),
        }
    }

    /// Run one external call: wait for the stage's engine permit, then the
    /// call itself, all bounded by the stage deadline and `cancel`. Returns
    /// the result and the stage duration in ms.
    async fn call<T, E, F, Fut>(
        &self,
        turn_id: TurnId,
        stage: Stage,
        deadline_ms: u64,
        cancel: &CancellationToken,
        f: F,
    ) -> (Result<T, E>, f64)
    where
        E: From<CollaboratorError>,
        F: FnOnce(Instant) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let token = self.monitor.begin_stage(turn_id, stage);
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        let permits = self.permits.for_stage(stage);

        let work = async {
            let _permit = match permits {
                Some(semaphore) => Some(
                    semaphore
                        .acquire()
                        .await
                        .map_err(|_| CollaboratorError::Cancelled { stage })?,
                ),
                None => None,
            };
            f(deadline).await
        };

        let result: Result<T, E> = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CollaboratorError::Cancelled { stage }.into()),
            r = tokio::time::timeout_at(deadline, work) => r.unwrap_or_else(|_| {
                Err(CollaboratorError::Timeout { stage, after_ms: deadline_ms }.into())
            }),
        };

        let ms = self.monitor.end_stage(token);
        tracing::debug!(turn_id, stage = %stage, duration_ms = ms, ok = result.is_ok(), "stage finished");
        (result, ms)
    }

    async fn fail(&self, mut draft: TurnDraft, stage: Stage, err: PipelineError) -> ConversationTurn {
        let outcome = self.recovery.handle(&Failure::from(&err)).await;
        let category = outcome.category;
        tracing::error!(
            turn_id = draft.turn_id(),
            stage = %stage,
            category = %category,
            "turn failed: {err}"
        );
        draft.recovery = Some(outcome);
        draft.finish(TurnOutcome::Failed { stage, category }, err.to_string())
    }
}

fn validate_chunk(chunk: &AudioChunk) -> Result<(), PipelineError> {
    if chunk.samples.is_empty() {
        return Err(PipelineError::Validation(format!(
            "audio chunk {} is empty",
            chunk.id
        )));
    }
    if chunk.sample_rate == 0 || chunk.channels == 0 {
        return Err(PipelineError::Validation(format!(
            "audio chunk {} has sample rate {} and {} channels",
            chunk.id, chunk.sample_rate, chunk.channels
        )));
    }
    Ok(())
}
