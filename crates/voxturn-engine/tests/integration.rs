use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use voxturn_core::{AudioChunk, EngineKind, EngineSpec, EngineState, HostAccelerator, VoiceProfile};
use voxturn_engine::{BackendRegistry, EngineLifecycleManager, ManagerState, ResourceBudgetTracker};

fn specs() -> Vec<EngineSpec> {
    vec![
        EngineSpec::new("orpheus", EngineKind::Synthesis, 6.0),
        EngineSpec::new("whisper", EngineKind::Transcription, 3.0),
        EngineSpec::new("llama", EngineKind::Response, 10.0),
    ]
}

fn manager(total_gb: f64) -> (EngineLifecycleManager, Arc<HostAccelerator>) {
    let accelerator = Arc::new(HostAccelerator::new());
    let budget = Arc::new(ResourceBudgetTracker::new(total_gb, accelerator.clone()));
    (
        EngineLifecycleManager::new(budget, BackendRegistry::new()),
        accelerator,
    )
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(2)
}

#[tokio::test]
async fn test_null_engines_answer_end_to_end() {
    let (manager, _) = manager(24.0);
    let set = manager.initialize_all(&specs()).await.unwrap();

    let chunk = AudioChunk {
        id: 7,
        samples: vec![0.2; 3200],
        sample_rate: 16000,
        channels: 1,
    };
    let transcript = set
        .transcriber()
        .unwrap()
        .transcribe(&chunk, deadline())
        .await
        .unwrap();
    assert_eq!(transcript.text, "[null] 3200 samples");

    let reply = set
        .generator()
        .unwrap()
        .generate(&transcript.text, &[], deadline())
        .await
        .unwrap();
    assert!(reply.contains("3200"));

    let speech = set
        .synthesizer()
        .unwrap()
        .synthesize(&reply, &VoiceProfile::new("tara", 1.0), deadline())
        .await
        .unwrap();
    assert_eq!(speech.tokens.len() % 7, 0);
    assert!(!speech.tokens.is_empty());

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_memory_stats_track_lifecycle() {
    let (manager, accelerator) = manager(24.0);
    manager.initialize_all(&specs()).await.unwrap();

    let stats = manager.budget().memory_stats();
    assert_eq!(stats.reserved_gb, 19.0);
    assert_eq!(stats.headroom_gb, 5.0);
    assert_eq!(stats.reserved_by_engine.len(), 3);

    manager.shutdown().await.unwrap();
    let stats = manager.budget().memory_stats();
    assert_eq!(stats.reserved_gb, 0.0);
    assert_eq!(manager.budget().state("llama"), EngineState::Released);
    assert_eq!(accelerator.cache_clears(), 3);
}

#[tokio::test]
async fn test_concurrent_initialize_only_one_wins() {
    let (manager, _) = manager(24.0);
    let manager = Arc::new(manager);

    let a = tokio::spawn({
        let m = Arc::clone(&manager);
        async move { m.initialize_all(&specs()).await.is_ok() }
    });
    let b = tokio::spawn({
        let m = Arc::clone(&manager);
        async move { m.initialize_all(&specs()).await.is_ok() }
    });

    let (a, b) = tokio::time::timeout(Duration::from_secs(2), async {
        (a.await.unwrap(), b.await.unwrap())
    })
    .await
    .expect("initialization timed out");

    assert!(a ^ b);
    assert_eq!(manager.state(), ManagerState::Ready);
    assert_eq!(manager.budget().reserved_total(), 19.0);
}
