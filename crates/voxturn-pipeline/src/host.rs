use crate::coordinator::ConversationCoordinator;
use crate::turn::ConversationTurn;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use voxturn_core::AudioChunk;

/// Feeds audio chunks into the coordinator, one task per turn, and forwards
/// finished turns to a single result channel.
pub struct TurnHost {
    coordinator: Arc<ConversationCoordinator>,
    input_tx: Option<mpsc::UnboundedSender<AudioChunk>>,
    input_rx: Option<mpsc::UnboundedReceiver<AudioChunk>>,
    result_tx: mpsc::UnboundedSender<ConversationTurn>,
    result_rx: Option<mpsc::UnboundedReceiver<ConversationTurn>>,
    cancel: CancellationToken,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl TurnHost {
    pub fn new(coordinator: Arc<ConversationCoordinator>) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        Self {
            coordinator,
            input_tx: Some(input_tx),
            input_rx: Some(input_rx),
            result_tx,
            result_rx: Some(result_rx),
            cancel: CancellationToken::new(),
            task_handle: None,
        }
    }

    pub fn take_result_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<ConversationTurn>> {
        self.result_rx.take()
    }

    /// A sender for audio chunks. Only available before [`start`](Self::start);
    /// the host stops accepting turns once every sender is dropped.
    pub fn add_input(&self) -> Option<mpsc::UnboundedSender<AudioChunk>> {
        self.input_tx.clone()
    }

    pub fn start(&mut self) {
        // Drop our own sender so the input closes with the callers' senders.
        self.input_tx = None;
        let Some(mut input_rx) = self.input_rx.take() else {
            tracing::warn!("turn host already started");
            return;
        };

        let coordinator = Arc::clone(&self.coordinator);
        let result_tx = self.result_tx.clone();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let mut turns = JoinSet::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(in_flight = turns.len(), "turn host cancelled");
                        break;
                    }
                    chunk = input_rx.recv() => {
                        match chunk {
                            Some(chunk) => {
                                let coordinator = Arc::clone(&coordinator);
                                let result_tx = result_tx.clone();
                                let token = cancel.child_token();
                                turns.spawn(async move {
                                    let chunk_id = chunk.id;
                                    match coordinator.process_turn_with_cancel(chunk, token).await {
                                        Ok(turn) => {
                                            let _ = result_tx.send(turn);
                                        }
                                        Err(e) => {
                                            tracing::warn!(chunk_id, "turn not started: {e}");
                                        }
                                    }
                                });
                            }
                            None => {
                                tracing::debug!(in_flight = turns.len(), "input closed, draining turns");
                                break;
                            }
                        }
                    }
                    Some(joined) = turns.join_next(), if !turns.is_empty() => {
                        log_join(joined);
                    }
                }
            }
            while let Some(joined) = turns.join_next().await {
                log_join(joined);
            }
        });
        self.task_handle = Some(handle);
    }

    /// Cancel every in-flight turn. Cancelled turns are still reported.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!("turn task panicked: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{speech_chunk, Harness};
    use crate::turn::{TurnOutcome, TurnState};
    use std::time::Duration;
    use voxturn_core::{ConversationConfig, FailureCategory};

    #[tokio::test]
    async fn test_host_new_has_result_receiver() {
        let harness = Harness::unstarted();
        let mut host = TurnHost::new(harness.coordinator.clone());
        assert!(host.take_result_receiver().is_some());
        assert!(host.take_result_receiver().is_none());
    }

    #[tokio::test]
    async fn test_host_runs_turns_and_reports_results() {
        let harness = Harness::started().await;
        let mut host = TurnHost::new(harness.coordinator.clone());
        let mut rx = host.take_result_receiver().unwrap();
        let tx = host.add_input().unwrap();
        host.start();
        assert!(host.add_input().is_none());

        tx.send(speech_chunk(1)).unwrap();
        tx.send(speech_chunk(2)).unwrap();

        let timeout = Duration::from_secs(2);
        let mut chunk_ids = Vec::new();
        for _ in 0..2 {
            let turn = tokio::time::timeout(timeout, rx.recv())
                .await
                .expect("timed out")
                .expect("closed");
            assert_eq!(turn.state(), TurnState::Completed);
            chunk_ids.push(turn.chunk_id());
        }
        chunk_ids.sort();
        assert_eq!(chunk_ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_host_drains_in_flight_turns_when_input_closes() {
        let harness = Harness::started().await;
        harness.generator.delay(50);
        let mut host = TurnHost::new(harness.coordinator.clone());
        let mut rx = host.take_result_receiver().unwrap();
        let tx = host.add_input().unwrap();
        host.start();

        tx.send(speech_chunk(7)).unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), host.shutdown())
            .await
            .expect("shutdown timed out");
        let turn = rx.try_recv().expect("turn finished before shutdown returned");
        assert_eq!(turn.chunk_id(), 7);
    }

    #[tokio::test]
    async fn test_host_cancel_fails_in_flight_turns() {
        let harness = Harness::started_with(ConversationConfig {
            response_deadline_ms: 5_000,
            ..ConversationConfig::default()
        })
        .await;
        harness.generator.delay(2_000);
        let mut host = TurnHost::new(harness.coordinator.clone());
        let mut rx = host.take_result_receiver().unwrap();
        let tx = host.add_input().unwrap();
        host.start();

        tx.send(speech_chunk(3)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        host.cancel();

        let turn = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("closed");
        assert_eq!(
            turn.outcome(),
            TurnOutcome::Failed {
                stage: voxturn_core::Stage::Response,
                category: FailureCategory::Cancelled,
            }
        );
        tokio::time::timeout(Duration::from_secs(1), host.shutdown())
            .await
            .expect("shutdown timed out");
    }

    #[tokio::test]
    async fn test_host_skips_chunks_when_not_ready() {
        let harness = Harness::unstarted();
        let mut host = TurnHost::new(harness.coordinator.clone());
        let mut rx = host.take_result_receiver().unwrap();
        let tx = host.add_input().unwrap();
        host.start();

        tx.send(speech_chunk(1)).unwrap();
        drop(tx);
        host.shutdown().await;
        assert!(rx.try_recv().is_err());
    }
}
