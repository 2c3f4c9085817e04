pub mod budget;
pub mod engine_trait;
pub mod handle;
pub mod lifecycle;
pub mod null_engine;
pub mod registry;

pub use budget::{MemoryStats, ResourceBudgetTracker};
pub use engine_trait::{
    ContextTurn, EngineBackend, EngineInstance, LoadedEngine, ResponseGenerator, SynthesisOutput,
    Synthesizer, Transcriber, Transcription,
};
pub use handle::{EngineHandle, EngineSet};
pub use lifecycle::{EngineLifecycleManager, ManagerState};
pub use null_engine::{text_codes, NullBackend, NullGenerator, NullSynthesizer, NullTranscriber};
pub use registry::BackendRegistry;
