pub mod latency;
pub mod recovery;

pub use latency::{
    DegradationReason, DegradationSignal, LatencyMonitor, PerformanceSummary, StageCompliance,
    StageToken,
};
pub use recovery::{
    classify, CategoryStats, InitializationRecovery, MemoryRecovery, NetworkRecovery,
    PatternAlert, PerformanceRecovery, RecoveryAction, RecoveryManager, RecoveryOutcome,
    RecoveryStats, RecoveryStrategy,
};
