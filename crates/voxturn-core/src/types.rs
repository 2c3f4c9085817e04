use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;

pub type TurnId = u64;

#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub id: u64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioChunk {
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        let frames = self.samples.len() as f64 / self.channels as f64;
        frames * 1000.0 / self.sample_rate as f64
    }
}

/// Why the voice-activity gate reached its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReason {
    Speech,
    BelowSilenceFloor,
    LowEnergy,
    FlatSignal,
    TooShort,
    InsufficientVoicedFrames,
    Error,
}

impl GateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateReason::Speech => "speech",
            GateReason::BelowSilenceFloor => "below silence floor",
            GateReason::LowEnergy => "low energy",
            GateReason::FlatSignal => "flat signal",
            GateReason::TooShort => "too short",
            GateReason::InsufficientVoicedFrames => "insufficient voiced frames",
            GateReason::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceActivityDecision {
    pub has_speech: bool,
    pub confidence: f32,
    pub reason: GateReason,
}

/// One stage of a conversation turn, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Gate,
    Transcription,
    Response,
    Synthesis,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Gate,
        Stage::Transcription,
        Stage::Response,
        Stage::Synthesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Gate => "gate",
            Stage::Transcription => "transcription",
            Stage::Response => "response",
            Stage::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageTiming {
    pub stage: Stage,
    pub duration_ms: f64,
}

#[derive(Debug, Clone)]
pub struct LatencySample {
    pub turn_id: TurnId,
    pub stage: Stage,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate of one turn's stage timings.
#[derive(Debug, Clone)]
pub struct LatencyBreakdown {
    pub turn_id: TurnId,
    pub stages: Vec<StageTiming>,
    pub total_ms: f64,
    pub target_met: bool,
}

impl LatencyBreakdown {
    pub fn new(turn_id: TurnId, stages: Vec<StageTiming>, total_ms: f64, target_ms: f64) -> Self {
        Self {
            turn_id,
            stages,
            total_ms,
            target_met: total_ms <= target_ms,
        }
    }

    /// Build a breakdown whose total is the sum of its stages.
    pub fn from_stages(turn_id: TurnId, stages: Vec<StageTiming>, target_ms: f64) -> Self {
        let total = stages.iter().map(|s| s.duration_ms).sum();
        Self::new(turn_id, stages, total, target_ms)
    }

    pub fn stage_ms(&self, stage: Stage) -> Option<f64> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.duration_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureCategory {
    Memory,
    Initialization,
    Performance,
    Network,
    Validation,
    Runtime,
    Cancelled,
    Unknown,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Memory => "memory",
            FailureCategory::Initialization => "initialization",
            FailureCategory::Performance => "performance",
            FailureCategory::Network => "network",
            FailureCategory::Validation => "validation",
            FailureCategory::Runtime => "runtime",
            FailureCategory::Cancelled => "cancelled",
            FailureCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A failure as seen by the recovery layer: a declared kind plus the
/// human-readable message of the error that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: String,
    pub message: String,
    pub severity: Severity,
}

impl Failure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            severity: Severity::Medium,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub severity: Severity,
    pub category: FailureCategory,
    pub recovery_attempted: bool,
    pub recovery_succeeded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceProfile {
    pub voice: String,
    pub speed: f32,
}

impl VoiceProfile {
    pub fn new(voice: impl Into<String>, speed: f32) -> Self {
        Self {
            voice: voice.into(),
            speed,
        }
    }
}

/// Codes per frame in a synthesis code stream.
pub const CODES_PER_FRAME: usize = 7;
/// Largest valid code; codes run from 0 through this value inclusive.
pub const MAX_CODE: i64 = 4096;

/// PCM audio ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Transcription,
    Response,
    Synthesis,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Transcription => "transcription",
            EngineKind::Response => "response",
            EngineKind::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-engine lifecycle as tracked by the memory budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unregistered,
    Reserving,
    Ready,
    Released,
}
