//! Voice and speed selection from the response text.
//!
//! Keyword matching only. When several registers match, the first in
//! [`Register::PRECEDENCE`] wins; when none do, the configured default
//! profile is used.

use regex::Regex;
use std::sync::OnceLock;
use voxturn_core::VoiceProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Urgent,
    Apologetic,
    Excited,
    Calm,
}

impl Register {
    pub const PRECEDENCE: [Register; 4] = [
        Register::Urgent,
        Register::Apologetic,
        Register::Excited,
        Register::Calm,
    ];

    fn profile(&self) -> VoiceProfile {
        match self {
            Register::Urgent => VoiceProfile::new("leo", 1.15),
            Register::Apologetic => VoiceProfile::new("mia", 0.9),
            Register::Excited => VoiceProfile::new("zoe", 1.1),
            Register::Calm => VoiceProfile::new("jess", 0.85),
        }
    }

    fn pattern(&self) -> &'static Regex {
        static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(|| {
            [
                r"(?i)\b(urgent|emergency|immediately|right now|asap|hurry|danger|warning)\b",
                r"(?i)\b(sorry|apologi[sz]e|apologies|unfortunately|regret|my mistake)\b",
                r"(?i)(!|\b(amazing|awesome|fantastic|wonderful|congratulations|wow|great news)\b)",
                r"(?i)\b(relax|calm|breathe|gently|take your time|no rush|don't worry)\b",
            ]
            .map(|p| Regex::new(p).expect("static pattern"))
        });
        &patterns[*self as usize]
    }
}

#[derive(Debug, Clone)]
pub struct VoiceSelector {
    default: VoiceProfile,
}

impl VoiceSelector {
    pub fn new(default: VoiceProfile) -> Self {
        Self { default }
    }

    pub fn default_profile(&self) -> &VoiceProfile {
        &self.default
    }

    pub fn register(text: &str) -> Option<Register> {
        Register::PRECEDENCE
            .into_iter()
            .find(|r| r.pattern().is_match(text))
    }

    pub fn select(&self, text: &str) -> VoiceProfile {
        Self::register(text)
            .map(|r| r.profile())
            .unwrap_or_else(|| self.default.clone())
    }
}
