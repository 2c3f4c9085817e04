//! Failure classification and bounded automatic remediation.

use crate::latency::LatencyMonitor;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use voxturn_core::{
    Accelerator, BoundedHistory, Failure, FailureCategory, FailureRecord, RecoveryConfig,
    RecoveryError,
};

/// What a successful strategy tells the caller to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Recovered,
    /// The strategy waited; the caller may retry the failed call.
    RetryEligible,
}

#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;
    async fn recover(&self, failure: &Failure) -> Result<RecoveryAction, RecoveryError>;
}

// ── Default strategies ──

/// Clear the accelerator cache, force a collection, pause briefly.
pub struct MemoryRecovery {
    accelerator: Arc<dyn Accelerator>,
    pause: Duration,
}

impl MemoryRecovery {
    pub fn new(accelerator: Arc<dyn Accelerator>, pause: Duration) -> Self {
        Self { accelerator, pause }
    }
}

#[async_trait]
impl RecoveryStrategy for MemoryRecovery {
    fn name(&self) -> &str {
        "memory"
    }

    async fn recover(&self, _failure: &Failure) -> Result<RecoveryAction, RecoveryError> {
        self.accelerator.clear_cache();
        self.accelerator.collect_garbage();
        tokio::time::sleep(self.pause).await;
        Ok(RecoveryAction::Recovered)
    }
}

/// Clear memory, then give the device time to settle.
pub struct InitializationRecovery {
    accelerator: Arc<dyn Accelerator>,
    stabilization: Duration,
}

impl InitializationRecovery {
    pub fn new(accelerator: Arc<dyn Accelerator>, stabilization: Duration) -> Self {
        Self {
            accelerator,
            stabilization,
        }
    }
}

#[async_trait]
impl RecoveryStrategy for InitializationRecovery {
    fn name(&self) -> &str {
        "initialization"
    }

    async fn recover(&self, _failure: &Failure) -> Result<RecoveryAction, RecoveryError> {
        self.accelerator.clear_cache();
        self.accelerator.collect_garbage();
        tokio::time::sleep(self.stabilization).await;
        Ok(RecoveryAction::Recovered)
    }
}

/// Clear memory and let the latency monitor learn a fresh baseline.
pub struct PerformanceRecovery {
    accelerator: Arc<dyn Accelerator>,
    monitor: Arc<LatencyMonitor>,
}

impl PerformanceRecovery {
    pub fn new(accelerator: Arc<dyn Accelerator>, monitor: Arc<LatencyMonitor>) -> Self {
        Self {
            accelerator,
            monitor,
        }
    }
}

#[async_trait]
impl RecoveryStrategy for PerformanceRecovery {
    fn name(&self) -> &str {
        "performance"
    }

    async fn recover(&self, _failure: &Failure) -> Result<RecoveryAction, RecoveryError> {
        self.accelerator.clear_cache();
        self.accelerator.collect_garbage();
        self.monitor.reset_baseline();
        Ok(RecoveryAction::Recovered)
    }
}

/// Wait, then mark the call as retryable. Never retries by itself.
pub struct NetworkRecovery {
    delay: Duration,
}

impl NetworkRecovery {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl RecoveryStrategy for NetworkRecovery {
    fn name(&self) -> &str {
        "network"
    }

    async fn recover(&self, _failure: &Failure) -> Result<RecoveryAction, RecoveryError> {
        tokio::time::sleep(self.delay).await;
        Ok(RecoveryAction::RetryEligible)
    }
}

// ── Classification ──

const KEYWORDS: &[(FailureCategory, &[&str])] = &[
    (FailureCategory::Cancelled, &["cancelled", "canceled"]),
    (FailureCategory::Memory, &["out of memory", "memory", "allocat", "cuda"]),
    (
        FailureCategory::Network,
        &["timeout", "timed out", "connection", "network", "unreachable"],
    ),
    (
        FailureCategory::Initialization,
        &["not initialized", "initializ", "not ready", "failed to load", "missing"],
    ),
    (FailureCategory::Performance, &["slow", "latency", "degrad", "throughput"]),
    (FailureCategory::Validation, &["invalid", "malformed", "validation", "out of range"]),
    (FailureCategory::Runtime, &["runtime", "panic", "unexpected"]),
];

fn category_from_prefix(prefix: &str) -> Option<FailureCategory> {
    match prefix {
        "memory" => Some(FailureCategory::Memory),
        "initialization" => Some(FailureCategory::Initialization),
        "performance" => Some(FailureCategory::Performance),
        "network" => Some(FailureCategory::Network),
        "validation" => Some(FailureCategory::Validation),
        "runtime" => Some(FailureCategory::Runtime),
        "cancelled" => Some(FailureCategory::Cancelled),
        _ => None,
    }
}

/// Category from the declared kind (`"memory.budget_exhausted"`), falling
/// back to keywords in the message.
pub fn classify(failure: &Failure) -> FailureCategory {
    let prefix = failure.kind.split('.').next().unwrap_or_default();
    if let Some(category) = category_from_prefix(prefix) {
        return category;
    }
    let message = failure.message.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| message.contains(w)))
        .map(|(category, _)| *category)
        .unwrap_or(FailureCategory::Unknown)
}

// ── Manager ──

#[derive(Debug, Clone, PartialEq)]
pub struct PatternAlert {
    pub category: FailureCategory,
    pub kind: String,
    pub occurrences: usize,
    pub window_secs: u64,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    pub category: FailureCategory,
    pub strategy: Option<String>,
    pub attempted: bool,
    pub succeeded: bool,
    pub retry_eligible: bool,
    /// Set when this failure pushed its category+kind over the pattern
    /// threshold.
    pub alert: Option<PatternAlert>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryStats {
    pub failures: u64,
    pub attempts: u64,
    pub successes: u64,
}

#[derive(Debug, Clone)]
pub struct RecoveryStats {
    pub by_category: BTreeMap<FailureCategory, CategoryStats>,
    pub recent: Vec<FailureRecord>,
    pub alerts: Vec<PatternAlert>,
}

impl RecoveryStats {
    pub fn total_failures(&self) -> u64 {
        self.by_category.values().map(|s| s.failures).sum()
    }
}

struct RecoveryState {
    history: BoundedHistory<FailureRecord>,
    counters: BTreeMap<FailureCategory, CategoryStats>,
    occurrences: HashMap<(FailureCategory, String), VecDeque<DateTime<Utc>>>,
    alerts: HashMap<(FailureCategory, String), PatternAlert>,
}

pub struct RecoveryManager {
    config: RecoveryConfig,
    strategies: RwLock<HashMap<FailureCategory, Arc<dyn RecoveryStrategy>>>,
    state: Mutex<RecoveryState>,
}

impl RecoveryManager {
    /// A manager with no strategies registered.
    pub fn new(config: RecoveryConfig) -> Self {
        let state = RecoveryState {
            history: BoundedHistory::new(config.history_capacity),
            counters: BTreeMap::new(),
            occurrences: HashMap::new(),
            alerts: HashMap::new(),
        };
        Self {
            config,
            strategies: RwLock::new(HashMap::new()),
            state: Mutex::new(state),
        }
    }

    /// A manager with the memory, initialization, performance and network
    /// strategies registered.
    pub fn with_defaults(
        config: RecoveryConfig,
        accelerator: Arc<dyn Accelerator>,
        monitor: Arc<LatencyMonitor>,
    ) -> Self {
        let memory_pause = Duration::from_millis(config.memory_pause_ms);
        let stabilization = Duration::from_millis(config.stabilization_ms);
        let network_delay = Duration::from_millis(config.network_delay_ms);

        let manager = Self::new(config);
        manager.register(
            FailureCategory::Memory,
            Arc::new(MemoryRecovery::new(accelerator.clone(), memory_pause)),
        );
        manager.register(
            FailureCategory::Initialization,
            Arc::new(InitializationRecovery::new(accelerator.clone(), stabilization)),
        );
        manager.register(
            FailureCategory::Performance,
            Arc::new(PerformanceRecovery::new(accelerator, monitor)),
        );
        manager.register(
            FailureCategory::Network,
            Arc::new(NetworkRecovery::new(network_delay)),
        );
        manager
    }

    pub fn register(&self, category: FailureCategory, strategy: Arc<dyn RecoveryStrategy>) {
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(category, strategy);
    }

    pub fn list_strategies(&self) -> Vec<(FailureCategory, String)> {
        let mut out: Vec<_> = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(c, s)| (*c, s.name().to_string()))
            .collect();
        out.sort();
        out
    }

    fn lock(&self) -> MutexGuard<'_, RecoveryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify `failure`, run its strategy if one is registered, and record
    /// the result. Never fails: a strategy that errors or panics is recorded
    /// as an unsuccessful recovery.
    pub async fn handle(&self, failure: &Failure) -> RecoveryOutcome {
        let category = classify(failure);
        let now = Utc::now();
        let alert = self.note_occurrence(category, &failure.kind, now);

        let strategy = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .cloned();

        let (strategy_name, attempted, result) = match strategy {
            Some(strategy) => {
                let name = strategy.name().to_string();
                let owned = failure.clone();
                let task_name = name.clone();
                let result = match tokio::spawn(async move { strategy.recover(&owned).await }).await
                {
                    Ok(result) => result,
                    Err(_) => Err(RecoveryError::StrategyPanicked(task_name)),
                };
                (Some(name), true, Some(result))
            }
            None => (None, false, None),
        };

        let (succeeded, retry_eligible) = match &result {
            Some(Ok(action)) => (true, *action == RecoveryAction::RetryEligible),
            Some(Err(e)) => {
                tracing::error!(
                    category = %category,
                    kind = %failure.kind,
                    "recovery failed: {e}"
                );
                (false, false)
            }
            None => (false, false),
        };

        {
            let mut state = self.lock();
            let counters = state.counters.entry(category).or_default();
            counters.failures += 1;
            if attempted {
                counters.attempts += 1;
            }
            if succeeded {
                counters.successes += 1;
            }
            state.history.push(FailureRecord {
                timestamp: now,
                kind: failure.kind.clone(),
                severity: failure.severity,
                category,
                recovery_attempted: attempted,
                recovery_succeeded: succeeded,
            });
        }

        if succeeded {
            tracing::info!(
                category = %category,
                kind = %failure.kind,
                strategy = strategy_name.as_deref().unwrap_or_default(),
                retry_eligible,
                "recovered from failure"
            );
        } else if !attempted {
            tracing::debug!(category = %category, kind = %failure.kind, "no recovery strategy");
        }

        RecoveryOutcome {
            category,
            strategy: strategy_name,
            attempted,
            succeeded,
            retry_eligible,
            alert,
        }
    }

    /// Count one occurrence of `category`+`kind` and return a new alert if
    /// the count just crossed the threshold.
    fn note_occurrence(
        &self,
        category: FailureCategory,
        kind: &str,
        now: DateTime<Utc>,
    ) -> Option<PatternAlert> {
        let window = ChronoDuration::seconds(self.config.pattern_window_secs as i64);
        let key = (category, kind.to_string());
        let mut state = self.lock();

        let times = state.occurrences.entry(key.clone()).or_default();
        times.push_back(now);
        while times.front().is_some_and(|t| now - *t > window) {
            times.pop_front();
        }
        let occurrences = times.len();

        if occurrences <= self.config.pattern_threshold {
            return None;
        }
        if state.alerts.contains_key(&key) {
            if let Some(alert) = state.alerts.get_mut(&key) {
                alert.occurrences = occurrences;
            }
            return None;
        }

        let alert = PatternAlert {
            category,
            kind: kind.to_string(),
            occurrences,
            window_secs: self.config.pattern_window_secs,
            raised_at: now,
        };
        tracing::warn!(
            category = %category,
            kind = %kind,
            occurrences,
            window_secs = self.config.pattern_window_secs,
            "recurring failure pattern"
        );
        state.alerts.insert(key, alert.clone());
        Some(alert)
    }

    /// Alerts whose pattern is still above threshold within the window.
    pub fn active_alerts(&self) -> Vec<PatternAlert> {
        let window = ChronoDuration::seconds(self.config.pattern_window_secs as i64);
        let now = Utc::now();
        let threshold = self.config.pattern_threshold;
        let mut state = self.lock();
        let RecoveryState {
            occurrences,
            alerts,
            ..
        } = &mut *state;

        alerts.retain(|key, alert| {
            let live = occurrences
                .get(key)
                .map(|times| times.iter().filter(|t| now - **t <= window).count())
                .unwrap_or(0);
            alert.occurrences = live;
            live > threshold
        });

        let mut out: Vec<_> = alerts.values().cloned().collect();
        out.sort_by(|a, b| (a.category, &a.kind).cmp(&(b.category, &b.kind)));
        out
    }

    pub fn stats(&self) -> RecoveryStats {
        let alerts = self.active_alerts();
        let state = self.lock();
        RecoveryStats {
            by_category: state.counters.clone(),
            recent: state.history.to_vec(),
            alerts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use voxturn_core::{HostAccelerator, LatencyBreakdown, LatencyConfig, Severity};

    fn fast_config() -> RecoveryConfig {
        RecoveryConfig {
            memory_pause_ms: 1,
            stabilization_ms: 1,
            network_delay_ms: 1,
            ..RecoveryConfig::default()
        }
    }

    fn defaults() -> (RecoveryManager, Arc<HostAccelerator>, Arc<LatencyMonitor>) {
        let acc = Arc::new(HostAccelerator::new());
        let monitor = Arc::new(LatencyMonitor::new(LatencyConfig::default()));
        let manager = RecoveryManager::with_defaults(fast_config(), acc.clone(), monitor.clone());
        (manager, acc, monitor)
    }

    struct FailingStrategy;

    #[async_trait]
    impl RecoveryStrategy for FailingStrategy {
        fn name(&self) -> &str {
            "failing"
        }

        async fn recover(&self, _failure: &Failure) -> Result<RecoveryAction, RecoveryError> {
            Err(RecoveryError::StrategyFailed {
                strategy: "failing".to_string(),
                reason: "device busy".to_string(),
            })
        }
    }

    struct PanickingStrategy;

    #[async_trait]
    impl RecoveryStrategy for PanickingStrategy {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn recover(&self, _failure: &Failure) -> Result<RecoveryAction, RecoveryError> {
            panic!("strategy bug");
        }
    }

    struct CountingStrategy(AtomicUsize);

    #[async_trait]
    impl RecoveryStrategy for CountingStrategy {
        fn name(&self) -> &str {
            "counting"
        }

        async fn recover(&self, _failure: &Failure) -> Result<RecoveryAction, RecoveryError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(RecoveryAction::Recovered)
        }
    }

    #[test]
    fn test_classify_by_kind_prefix() {
        let cases = [
            ("memory.budget_exhausted", FailureCategory::Memory),
            ("initialization.engine", FailureCategory::Initialization),
            ("performance.degraded", FailureCategory::Performance),
            ("network.timeout", FailureCategory::Network),
            ("validation.insufficient_codes", FailureCategory::Validation),
            ("runtime.short_waveform", FailureCategory::Runtime),
            ("cancelled", FailureCategory::Cancelled),
        ];
        for (kind, expected) in cases {
            assert_eq!(classify(&Failure::new(kind, "whatever")), expected, "{kind}");
        }
    }

    #[test]
    fn test_classify_by_message_keywords() {
        let cases = [
            ("CUDA out of memory. Tried to allocate 2 GiB", FailureCategory::Memory),
            ("connection reset by peer", FailureCategory::Network),
            ("model not initialized", FailureCategory::Initialization),
            ("malformed request body", FailureCategory::Validation),
            ("something odd happened", FailureCategory::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(
                classify(&Failure::new("collaborator", message)),
                expected,
                "{message}"
            );
        }
    }

    #[tokio::test]
    async fn test_memory_strategy_clears_accelerator() {
        let (manager, acc, _) = defaults();
        let outcome = manager
            .handle(&Failure::new("memory.budget_exhausted", "no room"))
            .await;
        assert_eq!(outcome.category, FailureCategory::Memory);
        assert_eq!(outcome.strategy.as_deref(), Some("memory"));
        assert!(outcome.attempted && outcome.succeeded);
        assert!(!outcome.retry_eligible);
        assert_eq!(acc.cache_clears(), 1);
        assert_eq!(acc.collections(), 1);
    }

    #[tokio::test]
    async fn test_performance_strategy_resets_baseline() {
        let (manager, acc, monitor) = defaults();
        for id in 0..10 {
            monitor.record_turn(LatencyBreakdown::new(id, Vec::new(), 100.0, 300.0));
        }
        assert!(monitor.baseline_ms().is_some());

        let outcome = manager
            .handle(&Failure::new("performance.degraded", "slow"))
            .await;
        assert!(outcome.succeeded);
        assert_eq!(monitor.baseline_ms(), None);
        assert_eq!(acc.cache_clears(), 1);
    }

    #[tokio::test]
    async fn test_network_strategy_is_retry_eligible() {
        let (manager, _, _) = defaults();
        let outcome = manager
            .handle(&Failure::new("network.timeout", "timed out"))
            .await;
        assert!(outcome.succeeded);
        assert!(outcome.retry_eligible);
    }

    #[tokio::test]
    async fn test_validation_has_no_strategy() {
        let (manager, _, _) = defaults();
        let outcome = manager
            .handle(&Failure::new("validation.input", "bad codes"))
            .await;
        assert!(!outcome.attempted);
        assert!(!outcome.succeeded);

        let stats = manager.stats();
        assert_eq!(stats.by_category[&FailureCategory::Validation].failures, 1);
        assert_eq!(stats.by_category[&FailureCategory::Validation].attempts, 0);
    }

    #[tokio::test]
    async fn test_failing_strategy_recorded_not_propagated() {
        let manager = RecoveryManager::new(fast_config());
        manager.register(FailureCategory::Runtime, Arc::new(FailingStrategy));

        let outcome = manager.handle(&Failure::new("runtime.x", "boom")).await;
        assert!(outcome.attempted);
        assert!(!outcome.succeeded);

        let stats = manager.stats();
        let record = stats.recent.last().unwrap();
        assert!(record.recovery_attempted);
        assert!(!record.recovery_succeeded);
        assert_eq!(record.category, FailureCategory::Runtime);
    }

    #[tokio::test]
    async fn test_panicking_strategy_recorded_as_failed_recovery() {
        let manager = RecoveryManager::new(fast_config());
        manager.register(FailureCategory::Runtime, Arc::new(PanickingStrategy));

        let outcome = manager.handle(&Failure::new("runtime.x", "boom")).await;
        assert!(outcome.attempted);
        assert!(!outcome.succeeded);
        assert_eq!(manager.stats().by_category[&FailureCategory::Runtime].successes, 0);
    }

    #[tokio::test]
    async fn test_register_replaces_strategy() {
        let (manager, _, _) = defaults();
        let counting = Arc::new(CountingStrategy(AtomicUsize::new(0)));
        manager.register(FailureCategory::Network, counting.clone());

        let outcome = manager
            .handle(&Failure::new("network.timeout", "timed out"))
            .await;
        assert_eq!(outcome.strategy.as_deref(), Some("counting"));
        assert!(!outcome.retry_eligible);
        assert_eq!(counting.0.load(Ordering::Relaxed), 1);
        assert!(manager
            .list_strategies()
            .contains(&(FailureCategory::Network, "counting".to_string())));
    }

    #[tokio::test]
    async fn test_counters_and_history() {
        let (manager, _, _) = defaults();
        manager
            .handle(&Failure::new("memory.a", "x").with_severity(Severity::High))
            .await;
        manager.handle(&Failure::new("memory.a", "x")).await;
        manager.handle(&Failure::new("cancelled", "stop")).await;

        let stats = manager.stats();
        assert_eq!(stats.total_failures(), 3);
        let memory = stats.by_category[&FailureCategory::Memory];
        assert_eq!(memory.attempts, 2);
        assert_eq!(memory.successes, 2);
        assert_eq!(stats.recent.len(), 3);
        assert_eq!(stats.recent[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let config = RecoveryConfig {
            history_capacity: 3,
            ..fast_config()
        };
        let manager = RecoveryManager::new(config);
        for i in 0..5 {
            manager
                .handle(&Failure::new(format!("validation.case{i}"), "bad"))
                .await;
        }
        let recent = manager.stats().recent;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].kind, "validation.case2");
    }

    #[tokio::test]
    async fn test_pattern_alert_raised_above_threshold() {
        let manager = RecoveryManager::new(fast_config());
        let failure = Failure::new("validation.input", "bad audio");

        for _ in 0..10 {
            assert!(manager.handle(&failure).await.alert.is_none());
        }
        let alert = manager.handle(&failure).await.alert.expect("alert");
        assert_eq!(alert.category, FailureCategory::Validation);
        assert_eq!(alert.kind, "validation.input");
        assert_eq!(alert.occurrences, 11);

        // Standing: reported once, then visible through stats.
        assert!(manager.handle(&failure).await.alert.is_none());
        let alerts = manager.stats().alerts;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].occurrences, 12);
    }

    #[tokio::test]
    async fn test_pattern_alert_is_per_kind() {
        let manager = RecoveryManager::new(fast_config());
        for i in 0..11 {
            let kind = if i % 2 == 0 { "validation.a" } else { "validation.b" };
            assert!(manager.handle(&Failure::new(kind, "x")).await.alert.is_none());
        }
        assert!(manager.active_alerts().is_empty());
    }

    #[test]
    fn test_manager_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RecoveryManager>();
    }
}
