pub mod accelerator;
pub mod config;
pub mod error;
pub mod history;
pub mod types;

pub use accelerator::{Accelerator, HostAccelerator};
pub use config::{
    AppConfig, AudioConfig, BudgetConfig, ConversationConfig, EngineSpec, GateConfig,
    LatencyConfig, RecoveryConfig,
};
pub use error::{
    AudioError, BudgetError, CodecError, CollaboratorError, ConfigError, EngineError,
    PipelineError, RecoveryError,
};
pub use history::BoundedHistory;
pub use types::{
    AudioChunk, EngineKind, EngineState, Failure, FailureCategory, FailureRecord, GateReason,
    LatencyBreakdown, LatencySample, Severity, Stage, StageTiming, SynthesizedAudio, TurnId,
    VoiceActivityDecision, VoiceProfile, CODES_PER_FRAME, MAX_CODE,
};
