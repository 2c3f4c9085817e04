//! Voice-activity gate.
//!
//! Filters silence and noise out before a chunk reaches the transcription
//! engine. The gate is stateless: every call looks at one chunk only, so a
//! single instance can be shared by concurrent turns.

use voxturn_core::{AudioChunk, GateConfig, GateReason, VoiceActivityDecision};

/// Confidence reported when the gate fails closed.
const ERROR_CONFIDENCE: f32 = 0.5;

#[derive(Debug)]
enum GateFault {
    Empty,
    InvalidFormat { sample_rate: u32, channels: u16 },
    NonFinite { index: usize },
}

pub struct VoiceActivityGate {
    config: GateConfig,
}

impl VoiceActivityGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Classify `chunk` as speech or non-speech.
    ///
    /// Never fails open: a chunk that cannot be analyzed is reported as
    /// non-speech with reason [`GateReason::Error`].
    pub fn evaluate(&self, chunk: &AudioChunk) -> VoiceActivityDecision {
        match self.analyze(chunk) {
            Ok(decision) => decision,
            Err(fault) => {
                tracing::warn!(chunk_id = chunk.id, "gate failed closed: {fault:?}");
                VoiceActivityDecision {
                    has_speech: false,
                    confidence: ERROR_CONFIDENCE,
                    reason: GateReason::Error,
                }
            }
        }
    }

    fn analyze(&self, chunk: &AudioChunk) -> Result<VoiceActivityDecision, GateFault> {
        if chunk.samples.is_empty() {
            return Err(GateFault::Empty);
        }
        if chunk.sample_rate == 0 || chunk.channels == 0 {
            return Err(GateFault::InvalidFormat {
                sample_rate: chunk.sample_rate,
                channels: chunk.channels,
            });
        }
        if let Some(index) = chunk.samples.iter().position(|s| !s.is_finite()) {
            return Err(GateFault::NonFinite { index });
        }

        let mono = downmix(&chunk.samples, chunk.channels);
        let cfg = &self.config;

        let peak = mono.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        if peak < cfg.silence_floor {
            return Ok(reject(GateReason::BelowSilenceFloor, peak, cfg.silence_floor));
        }

        let rms = rms(&mono);
        if rms < cfg.energy_floor {
            return Ok(reject(GateReason::LowEnergy, rms, cfg.energy_floor));
        }

        let variance = variance(&mono);
        if variance < cfg.flatness_floor {
            return Ok(reject(GateReason::FlatSignal, variance, cfg.flatness_floor));
        }

        let duration_ms = chunk.duration_ms() as f32;
        let min_ms = cfg.min_speech_ms as f32;
        if duration_ms < min_ms {
            return Ok(reject(GateReason::TooShort, duration_ms, min_ms));
        }

        let fraction = self.voiced_fraction(&mono, chunk.sample_rate);
        if fraction >= cfg.voiced_fraction {
            Ok(VoiceActivityDecision {
                has_speech: true,
                confidence: (0.5 + 0.5 * fraction).min(1.0),
                reason: GateReason::Speech,
            })
        } else {
            Ok(VoiceActivityDecision {
                has_speech: false,
                confidence: 1.0 - fraction,
                reason: GateReason::InsufficientVoicedFrames,
            })
        }
    }

    /// Fraction of fixed-size sub-frames classified as voiced.
    fn voiced_fraction(&self, mono: &[f32], sample_rate: u32) -> f32 {
        let frame_len = ((sample_rate as u64 * self.config.frame_ms as u64) / 1000).max(1) as usize;

        // A chunk shorter than one sub-frame is judged as a whole.
        let frames: Vec<&[f32]> = if mono.len() < frame_len {
            vec![mono]
        } else {
            mono.chunks(frame_len).collect()
        };

        let voiced = frames.iter().filter(|f| self.is_voiced(f)).count();
        voiced as f32 / frames.len() as f32
    }

    fn is_voiced(&self, frame: &[f32]) -> bool {
        rms(frame) >= self.config.frame_energy_floor
            && zero_crossing_rate(frame) <= self.config.max_voiced_zcr
    }
}

impl Default for VoiceActivityGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}

/// Rejection whose confidence grows as `value` falls further below `floor`.
fn reject(reason: GateReason, value: f32, floor: f32) -> VoiceActivityDecision {
    let ratio = if floor > 0.0 {
        (value / floor).clamp(0.0, 1.0)
    } else {
        0.0
    };
    VoiceActivityDecision {
        has_speech: false,
        confidence: 1.0 - 0.5 * ratio,
        reason,
    }
}

fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

fn variance(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean: f64 = samples.iter().map(|s| *s as f64).sum::<f64>() / n;
    let var: f64 = samples
        .iter()
        .map(|s| {
            let d = *s as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    var as f32
}

fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}
