use chrono::{DateTime, Utc};
use std::fmt;
use voxturn_core::{
    FailureCategory, Stage, StageTiming, SynthesizedAudio, TurnId, VoiceActivityDecision,
    VoiceProfile,
};
use voxturn_monitor::RecoveryOutcome;

/// Progress of a turn. Stages advance strictly in declaration order;
/// `Completed`, `Silenced` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TurnState {
    Started,
    Gated,
    Transcribed,
    Responded,
    Synthesized,
    Completed,
    Silenced,
    Failed,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnState::Completed | TurnState::Silenced | TurnState::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A response was produced. `audio_failed` marks a text-only turn.
    Completed { audio_failed: bool },
    Silenced,
    Failed {
        stage: Stage,
        category: FailureCategory,
    },
}

impl TurnOutcome {
    pub fn state(&self) -> TurnState {
        match self {
            TurnOutcome::Completed { .. } => TurnState::Completed,
            TurnOutcome::Silenced => TurnState::Silenced,
            TurnOutcome::Failed { .. } => TurnState::Failed,
        }
    }
}

impl fmt::Display for TurnOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnOutcome::Completed {
                audio_failed: false,
            } => f.write_str("completed"),
            TurnOutcome::Completed { audio_failed: true } => f.write_str("completed (text only)"),
            TurnOutcome::Silenced => f.write_str("silenced"),
            TurnOutcome::Failed { stage, category } => {
                write!(f, "failed at {stage} ({category})")
            }
        }
    }
}

/// A finished turn. Immutable once built.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    turn_id: TurnId,
    chunk_id: u64,
    started_at: DateTime<Utc>,
    gate: Option<VoiceActivityDecision>,
    transcript: Option<String>,
    response_text: Option<String>,
    voice: Option<VoiceProfile>,
    response_audio: Option<SynthesizedAudio>,
    stage_timings: Vec<StageTiming>,
    outcome: TurnOutcome,
    reason: String,
    recovery: Option<RecoveryOutcome>,
}

impl ConversationTurn {
    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    pub fn chunk_id(&self) -> u64 {
        self.chunk_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn gate_decision(&self) -> Option<&VoiceActivityDecision> {
        self.gate.as_ref()
    }

    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }

    pub fn response_text(&self) -> Option<&str> {
        self.response_text.as_deref()
    }

    pub fn voice(&self) -> Option<&VoiceProfile> {
        self.voice.as_ref()
    }

    pub fn response_audio(&self) -> Option<&SynthesizedAudio> {
        self.response_audio.as_ref()
    }

    pub fn stage_timings(&self) -> &[StageTiming] {
        &self.stage_timings
    }

    pub fn stage_ms(&self, stage: Stage) -> Option<f64> {
        self.stage_timings
            .iter()
            .find(|t| t.stage == stage)
            .map(|t| t.duration_ms)
    }

    pub fn total_ms(&self) -> f64 {
        self.stage_timings.iter().map(|t| t.duration_ms).sum()
    }

    pub fn outcome(&self) -> TurnOutcome {
        self.outcome
    }

    pub fn state(&self) -> TurnState {
        self.outcome.state()
    }

    pub fn audio_failed(&self) -> bool {
        matches!(self.outcome, TurnOutcome::Completed { audio_failed: true })
    }

    /// Human-readable explanation of the outcome.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// What the recovery layer did about this turn's failure, if anything.
    pub fn recovery(&self) -> Option<&RecoveryOutcome> {
        self.recovery.as_ref()
    }
}

/// In-flight turn. Only the coordinator task running the turn touches it.
#[derive(Debug)]
pub(crate) struct TurnDraft {
    turn_id: TurnId,
    chunk_id: u64,
    started_at: DateTime<Utc>,
    state: TurnState,
    pub(crate) gate: Option<VoiceActivityDecision>,
    pub(crate) transcript: Option<String>,
    pub(crate) response_text: Option<String>,
    pub(crate) voice: Option<VoiceProfile>,
    pub(crate) response_audio: Option<SynthesizedAudio>,
    pub(crate) stage_timings: Vec<StageTiming>,
    pub(crate) recovery: Option<RecoveryOutcome>,
}

impl TurnDraft {
    pub(crate) fn new(turn_id: TurnId, chunk_id: u64) -> Self {
        Self {
            turn_id,
            chunk_id,
            started_at: Utc::now(),
            state: TurnState::Started,
            gate: None,
            transcript: None,
            response_text: None,
            voice: None,
            response_audio: None,
            stage_timings: Vec::with_capacity(4),
            recovery: None,
        }
    }

    pub(crate) fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    pub(crate) fn state(&self) -> TurnState {
        self.state
    }

    /// Move forward to `next`. Going backwards or out of a terminal state
    /// is a coordinator bug and is ignored with a warning.
    pub(crate) fn advance(&mut self, next: TurnState) {
        if self.state.is_terminal() || next <= self.state {
            tracing::warn!(
                turn_id = self.turn_id,
                from = ?self.state,
                to = ?next,
                "ignoring out-of-order turn transition"
            );
            return;
        }
        self.state = next;
    }

    pub(crate) fn record(&mut self, stage: Stage, duration_ms: f64) {
        self.stage_timings.push(StageTiming { stage, duration_ms });
    }

    pub(crate) fn finish(self, outcome: TurnOutcome, reason: impl Into<String>) -> ConversationTurn {
        ConversationTurn {
            turn_id: self.turn_id,
            chunk_id: self.chunk_id,
            started_at: self.started_at,
            gate: self.gate,
            transcript: self.transcript,
            response_text: self.response_text,
            voice: self.voice,
            response_audio: self.response_audio,
            stage_timings: self.stage_timings,
            outcome,
            reason: reason.into(),
            recovery: self.recovery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_advances_in_order() {
        let mut draft = TurnDraft::new(1, 10);
        draft.advance(TurnState::Gated);
        draft.advance(TurnState::Transcribed);
        assert_eq!(draft.state(), TurnState::Transcribed);

        draft.advance(TurnState::Gated);
        assert_eq!(draft.state(), TurnState::Transcribed);
    }

    #[test]
    fn test_finish_sets_terminal_state_and_reason() {
        let mut draft = TurnDraft::new(3, 30);
        draft.record(Stage::Gate, 2.0);
        draft.record(Stage::Transcription, 40.0);
        draft.transcript = Some("hi".to_string());
        let turn = draft.finish(
            TurnOutcome::Failed {
                stage: Stage::Response,
                category: FailureCategory::Network,
            },
            "response collaborator timed out after 5000 ms",
        );

        assert_eq!(turn.turn_id(), 3);
        assert_eq!(turn.chunk_id(), 30);
        assert_eq!(turn.state(), TurnState::Failed);
        assert_eq!(turn.transcript(), Some("hi"));
        assert_eq!(turn.response_text(), None);
        assert_eq!(turn.total_ms(), 42.0);
        assert_eq!(turn.stage_ms(Stage::Transcription), Some(40.0));
        assert!(turn.reason().contains("timed out"));
        assert!(!turn.audio_failed());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            TurnOutcome::Completed { audio_failed: true }.to_string(),
            "completed (text only)"
        );
        assert_eq!(
            TurnOutcome::Failed {
                stage: Stage::Synthesis,
                category: FailureCategory::Cancelled,
            }
            .to_string(),
            "failed at synthesis (cancelled)"
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(TurnState::Silenced.is_terminal());
        assert!(!TurnState::Synthesized.is_terminal());
    }
}
