use crate::types::{Failure, Severity, Stage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate devices: {0}")]
    DeviceEnumeration(String),

    #[error("failed to build stream: {0}")]
    StreamBuild(String),

    #[error("failed to start stream: {0}")]
    StreamPlay(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("insufficient codes: got {count}, need at least one frame of 7")]
    InsufficientCodes { count: usize },

    #[error("code {code} at index {index} is outside [0, 4096]")]
    InvalidCodeRange { index: usize, code: i64 },

    #[error("codec waveform too short: got {len} samples, need {required}")]
    ShortWaveform { len: usize, required: usize },

    #[error("codec backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BudgetError {
    #[error("memory budget exhausted for '{engine}': requested {requested_gb:.2} GB, {available_gb:.2} GB available")]
    Exhausted {
        engine: String,
        requested_gb: f64,
        available_gb: f64,
    },

    #[error("invalid memory amount for '{engine}': {amount_gb} GB")]
    InvalidAmount { engine: String, amount_gb: f64 },

    #[error("engine '{0}' already holds a reservation")]
    AlreadyReserved(String),

    #[error("engine '{0}' holds no reservation")]
    NotReserved(String),

    #[error("memory budget of {total_gb} GB cannot host any engine")]
    Impossible { total_gb: f64 },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine '{engine}' failed to load: {reason}")]
    LoadFailed { engine: String, reason: String },

    #[error("engine '{engine}' failed verification: {reason}")]
    VerifyFailed { engine: String, reason: String },

    #[error("engine '{engine}' failed to unload: {reason}")]
    UnloadFailed { engine: String, reason: String },

    #[error("engine backend not found: {0}")]
    BackendNotFound(String),

    #[error("engine not found: {0}")]
    NotFound(String),

    #[error("invalid engine spec: {0}")]
    InvalidSpec(String),

    #[error("engines are already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Budget(#[from] BudgetError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("{stage} collaborator failed: {message}")]
    Failed { stage: Stage, message: String },

    #[error("{stage} collaborator timed out after {after_ms} ms")]
    Timeout { stage: Stage, after_ms: u64 },

    #[error("{stage} call cancelled")]
    Cancelled { stage: Stage },
}

impl CollaboratorError {
    pub fn failed(stage: Stage, message: impl Into<String>) -> Self {
        CollaboratorError::Failed {
            stage,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is not ready to accept turns")]
    NotReady,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecoveryError {
    #[error("recovery strategy '{strategy}' failed: {reason}")]
    StrategyFailed { strategy: String, reason: String },

    #[error("recovery strategy '{0}' panicked")]
    StrategyPanicked(String),
}

impl From<&CodecError> for Failure {
    fn from(err: &CodecError) -> Self {
        let kind = match err {
            CodecError::InsufficientCodes { .. } => "validation.insufficient_codes",
            CodecError::InvalidCodeRange { .. } => "validation.invalid_code_range",
            CodecError::ShortWaveform { .. } => "runtime.short_waveform",
            CodecError::Backend(_) => "runtime.codec_backend",
        };
        Failure::new(kind, err.to_string()).with_severity(Severity::Low)
    }
}

impl From<&BudgetError> for Failure {
    fn from(err: &BudgetError) -> Self {
        let (kind, severity) = match err {
            BudgetError::Exhausted { .. } => ("memory.budget_exhausted", Severity::High),
            BudgetError::Impossible { .. } => ("memory.budget_impossible", Severity::Critical),
            BudgetError::InvalidAmount { .. } => ("validation.invalid_amount", Severity::Medium),
            BudgetError::AlreadyReserved(_) | BudgetError::NotReserved(_) => {
                ("runtime.reservation_state", Severity::Medium)
            }
        };
        Failure::new(kind, err.to_string()).with_severity(severity)
    }
}

impl From<&EngineError> for Failure {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::Budget(budget) => Failure::from(budget),
            EngineError::InvalidSpec(_) => {
                Failure::new("validation.engine_spec", err.to_string())
            }
            EngineError::UnloadFailed { .. } => Failure::new("runtime.unload", err.to_string()),
            EngineError::NotFound(_) | EngineError::BackendNotFound(_) => {
                Failure::new("initialization.missing", err.to_string())
                    .with_severity(Severity::High)
            }
            EngineError::LoadFailed { .. }
            | EngineError::VerifyFailed { .. }
            | EngineError::AlreadyInitialized => {
                Failure::new("initialization.engine", err.to_string())
                    .with_severity(Severity::High)
            }
        }
    }
}

impl From<&CollaboratorError> for Failure {
    fn from(err: &CollaboratorError) -> Self {
        match err {
            CollaboratorError::Timeout { .. } => Failure::new("network.timeout", err.to_string()),
            CollaboratorError::Cancelled { .. } => {
                Failure::new("cancelled", err.to_string()).with_severity(Severity::Low)
            }
            // Collaborators report free-form messages; the recovery layer
            // classifies them by content.
            CollaboratorError::Failed { message, .. } => {
                Failure::new("collaborator", message.clone())
            }
        }
    }
}

impl From<&PipelineError> for Failure {
    fn from(err: &PipelineError) -> Self {
        match err {
            PipelineError::NotReady => {
                Failure::new("initialization.not_ready", err.to_string())
            }
            PipelineError::Validation(_) => Failure::new("validation.input", err.to_string()),
            PipelineError::Engine(e) => Failure::from(e),
            PipelineError::Collaborator(e) => Failure::from(e),
            PipelineError::Codec(e) => Failure::from(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_messages_name_the_problem() {
        let err = CodecError::InvalidCodeRange {
            index: 0,
            code: 5000,
        };
        assert!(err.to_string().contains("5000"));
        let err = CodecError::InsufficientCodes { count: 3 };
        assert!(err.to_string().contains("got 3"));
    }

    #[test]
    fn test_budget_error_converts_to_memory_failure() {
        let err = BudgetError::Exhausted {
            engine: "tts".to_string(),
            requested_gb: 4.0,
            available_gb: 1.0,
        };
        let failure = Failure::from(&err);
        assert_eq!(failure.kind, "memory.budget_exhausted");
        assert_eq!(failure.severity, Severity::High);
    }

    #[test]
    fn test_engine_budget_error_is_transparent() {
        let err = EngineError::from(BudgetError::NotReserved("stt".to_string()));
        assert_eq!(err.to_string(), "engine 'stt' holds no reservation");
    }

    #[test]
    fn test_collaborator_timeout_is_network_kind() {
        let err = CollaboratorError::Timeout {
            stage: Stage::Response,
            after_ms: 250,
        };
        assert_eq!(Failure::from(&err).kind, "network.timeout");
        assert!(err.to_string().starts_with("response collaborator timed out"));
    }

    #[test]
    fn test_collaborator_failure_keeps_raw_message() {
        let err = CollaboratorError::failed(Stage::Transcription, "CUDA out of memory");
        let failure = Failure::from(&err);
        assert_eq!(failure.kind, "collaborator");
        assert_eq!(failure.message, "CUDA out of memory");
    }

    #[test]
    fn test_pipeline_error_wraps_codec_failure() {
        let err = PipelineError::from(CodecError::InsufficientCodes { count: 1 });
        assert_eq!(Failure::from(&err).kind, "validation.insufficient_codes");
    }
}
