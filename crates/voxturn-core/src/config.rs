use crate::error::ConfigError;
use crate::types::{EngineKind, Stage};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub engines: Vec<EngineSpec>,

    #[serde(default)]
    pub latency: LatencyConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_device_name")]
    pub input_device: String,

    #[serde(default = "default_device_name")]
    pub output_device: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,

    /// Length of one captured chunk handed to the pipeline.
    #[serde(default = "default_chunk_ms")]
    pub chunk_ms: u32,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: default_device_name(),
            output_device: default_device_name(),
            sample_rate: default_sample_rate(),
            output_sample_rate: default_output_sample_rate(),
            chunk_ms: default_chunk_ms(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Thresholds for the voice-activity gate. Amplitudes are in normalized
/// sample units ([-1, 1]).
#[derive(Debug, Deserialize, Clone)]
pub struct GateConfig {
    #[serde(default = "default_silence_floor")]
    pub silence_floor: f32,

    #[serde(default = "default_energy_floor")]
    pub energy_floor: f32,

    #[serde(default = "default_flatness_floor")]
    pub flatness_floor: f32,

    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u32,

    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,

    /// Minimum RMS for a sub-frame to count as voiced.
    #[serde(default = "default_frame_energy_floor")]
    pub frame_energy_floor: f32,

    /// Sub-frames crossing zero more often than this read as noise.
    #[serde(default = "default_max_voiced_zcr")]
    pub max_voiced_zcr: f32,

    #[serde(default = "default_voiced_fraction")]
    pub voiced_fraction: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            silence_floor: default_silence_floor(),
            energy_floor: default_energy_floor(),
            flatness_floor: default_flatness_floor(),
            min_speech_ms: default_min_speech_ms(),
            frame_ms: default_frame_ms(),
            frame_energy_floor: default_frame_energy_floor(),
            max_voiced_zcr: default_max_voiced_zcr(),
            voiced_fraction: default_voiced_fraction(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BudgetConfig {
    #[serde(default = "default_total_gb")]
    pub total_gb: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total_gb: default_total_gb(),
        }
    }
}

/// One engine to bring up. Engines are initialized in the order they are
/// listed.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineSpec {
    pub name: String,

    pub kind: EngineKind,

    #[serde(default = "default_backend")]
    pub backend: String,

    pub estimated_gb: f64,

    #[serde(default = "default_options")]
    pub options: toml::Value,
}

impl EngineSpec {
    pub fn new(name: &str, kind: EngineKind, estimated_gb: f64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            backend: default_backend(),
            estimated_gb,
            options: default_options(),
        }
    }

    pub fn with_backend(mut self, backend: &str) -> Self {
        self.backend = backend.to_string();
        self
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LatencyConfig {
    #[serde(default = "default_target_ms")]
    pub target_ms: f64,

    #[serde(default = "default_gate_target_ms")]
    pub gate_target_ms: f64,

    #[serde(default = "default_transcription_target_ms")]
    pub transcription_target_ms: f64,

    #[serde(default = "default_response_target_ms")]
    pub response_target_ms: f64,

    #[serde(default = "default_synthesis_target_ms")]
    pub synthesis_target_ms: f64,

    /// Number of recent turns the rolling statistics cover.
    #[serde(default = "default_window")]
    pub window: usize,

    #[serde(default = "default_consecutive_threshold")]
    pub consecutive_threshold: u32,

    #[serde(default = "default_baseline_turns")]
    pub baseline_turns: usize,

    #[serde(default = "default_degradation_multiplier")]
    pub degradation_multiplier: f64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl LatencyConfig {
    pub fn stage_target(&self, stage: Stage) -> f64 {
        match stage {
            Stage::Gate => self.gate_target_ms,
            Stage::Transcription => self.transcription_target_ms,
            Stage::Response => self.response_target_ms,
            Stage::Synthesis => self.synthesis_target_ms,
        }
    }
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            target_ms: default_target_ms(),
            gate_target_ms: default_gate_target_ms(),
            transcription_target_ms: default_transcription_target_ms(),
            response_target_ms: default_response_target_ms(),
            synthesis_target_ms: default_synthesis_target_ms(),
            window: default_window(),
            consecutive_threshold: default_consecutive_threshold(),
            baseline_turns: default_baseline_turns(),
            degradation_multiplier: default_degradation_multiplier(),
            history_capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecoveryConfig {
    #[serde(default = "default_memory_pause_ms")]
    pub memory_pause_ms: u64,

    #[serde(default = "default_stabilization_ms")]
    pub stabilization_ms: u64,

    #[serde(default = "default_network_delay_ms")]
    pub network_delay_ms: u64,

    /// Occurrences of one category+kind pair within the window that raise
    /// a standing alert.
    #[serde(default = "default_pattern_threshold")]
    pub pattern_threshold: usize,

    #[serde(default = "default_pattern_window_secs")]
    pub pattern_window_secs: u64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            memory_pause_ms: default_memory_pause_ms(),
            stabilization_ms: default_stabilization_ms(),
            network_delay_ms: default_network_delay_ms(),
            pattern_threshold: default_pattern_threshold(),
            pattern_window_secs: default_pattern_window_secs(),
            history_capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    /// Finalized turns passed to the response generator as context.
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,

    #[serde(default = "default_transcription_deadline_ms")]
    pub transcription_deadline_ms: u64,

    #[serde(default = "default_response_deadline_ms")]
    pub response_deadline_ms: u64,

    #[serde(default = "default_synthesis_deadline_ms")]
    pub synthesis_deadline_ms: u64,

    /// Concurrent calls allowed into each engine type.
    #[serde(default = "default_engine_capacity")]
    pub engine_capacity: usize,

    #[serde(default = "default_voice")]
    pub default_voice: String,

    #[serde(default = "default_speed")]
    pub default_speed: f32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            context_turns: default_context_turns(),
            transcription_deadline_ms: default_transcription_deadline_ms(),
            response_deadline_ms: default_response_deadline_ms(),
            synthesis_deadline_ms: default_synthesis_deadline_ms(),
            engine_capacity: default_engine_capacity(),
            default_voice: default_voice(),
            default_speed: default_speed(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_device_name() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_output_sample_rate() -> u32 {
    24000
}

fn default_chunk_ms() -> u32 {
    2000
}

fn default_buffer_size() -> u32 {
    1024
}

fn default_silence_floor() -> f32 {
    0.01
}

fn default_energy_floor() -> f32 {
    0.005
}

fn default_flatness_floor() -> f32 {
    1e-6
}

fn default_min_speech_ms() -> u32 {
    100
}

fn default_frame_ms() -> u32 {
    30
}

fn default_frame_energy_floor() -> f32 {
    0.01
}

fn default_max_voiced_zcr() -> f32 {
    0.3
}

fn default_voiced_fraction() -> f32 {
    0.3
}

fn default_total_gb() -> f64 {
    24.0
}

fn default_backend() -> String {
    "null".to_string()
}

fn default_options() -> toml::Value {
    toml::Value::Table(Default::default())
}

fn default_target_ms() -> f64 {
    300.0
}

fn default_gate_target_ms() -> f64 {
    10.0
}

fn default_transcription_target_ms() -> f64 {
    100.0
}

fn default_response_target_ms() -> f64 {
    100.0
}

fn default_synthesis_target_ms() -> f64 {
    90.0
}

fn default_window() -> usize {
    100
}

fn default_consecutive_threshold() -> u32 {
    5
}

fn default_baseline_turns() -> usize {
    10
}

fn default_degradation_multiplier() -> f64 {
    1.5
}

fn default_history_capacity() -> usize {
    1000
}

fn default_memory_pause_ms() -> u64 {
    100
}

fn default_stabilization_ms() -> u64 {
    1000
}

fn default_network_delay_ms() -> u64 {
    500
}

fn default_pattern_threshold() -> usize {
    10
}

fn default_pattern_window_secs() -> u64 {
    3600
}

fn default_context_turns() -> usize {
    10
}

fn default_transcription_deadline_ms() -> u64 {
    2000
}

fn default_response_deadline_ms() -> u64 {
    5000
}

fn default_synthesis_deadline_ms() -> u64 {
    5000
}

fn default_engine_capacity() -> usize {
    1
}

fn default_voice() -> String {
    "tara".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static pattern"))
}

/// Interpolate `${VAR}` patterns with environment variable values.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = input.to_string();

    for cap in env_var_pattern().captures_iter(input) {
        let var_name = &cap[1];
        let val =
            std::env::var(var_name).map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
        result = result.replace(&cap[0], &val);
    }

    Ok(result)
}

impl AppConfig {
    /// Load configuration from a TOML file, with environment variable interpolation.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(s)?;
        let config: AppConfig = toml::from_str(&interpolated)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.gate.voiced_fraction) {
            return Err(ConfigError::Invalid(format!(
                "gate.voiced_fraction must be within [0, 1], got {}",
                self.gate.voiced_fraction
            )));
        }
        if self.gate.frame_ms == 0 {
            return Err(ConfigError::Invalid("gate.frame_ms must be positive".to_string()));
        }
        if !self.budget.total_gb.is_finite() || self.budget.total_gb < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "budget.total_gb must be a non-negative number, got {}",
                self.budget.total_gb
            )));
        }
        if self.latency.window == 0 {
            return Err(ConfigError::Invalid("latency.window must be positive".to_string()));
        }
        if self.latency.consecutive_threshold == 0 {
            return Err(ConfigError::Invalid(
                "latency.consecutive_threshold must be positive".to_string(),
            ));
        }
        if self.latency.degradation_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "latency.degradation_multiplier must be at least 1.0, got {}",
                self.latency.degradation_multiplier
            )));
        }
        if self.conversation.engine_capacity == 0 {
            return Err(ConfigError::Invalid(
                "conversation.engine_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
