pub mod context;
pub mod coordinator;
pub mod host;
pub mod pipeline;
pub mod turn;
pub mod voice_profile;

#[cfg(test)]
mod testing;

pub use context::RecentContext;
pub use coordinator::ConversationCoordinator;
pub use host::TurnHost;
pub use pipeline::{default_engine_specs, VoicePipeline};
pub use turn::{ConversationTurn, TurnOutcome, TurnState};
pub use voice_profile::{Register, VoiceSelector};
