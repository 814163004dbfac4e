use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sink_api::{BackendConnector, BackendWriter, RecordConverter, StoreHooks, StreamMessage};

use crate::error::StageError;
use crate::stage::{Acknowledgment, SinkStage};

// ═══════════════════════════════════════════════════════════════
//  Delivery
// ═══════════════════════════════════════════════════════════════

/// One delivery of a message to a stage, with its acknowledgment channel.
///
/// Acknowledging consumes the delivery, so it can happen at most once.
/// A delivery dropped without acknowledgment closes the channel; the
/// upstream sees `RecvError` and applies its own replay policy.
#[derive(Debug)]
pub struct Delivery {
    pub seq: u64,
    pub message: StreamMessage,
    ack: oneshot::Sender<Acknowledgment>,
}

impl Delivery {
    pub fn new(seq: u64, message: StreamMessage) -> (Self, oneshot::Receiver<Acknowledgment>) {
        let (ack, rx) = oneshot::channel();
        (Self { seq, message, ack }, rx)
    }

    fn acknowledge(self, ack: Acknowledgment) {
        // Upstream may have stopped waiting.
        let _ = self.ack.send(ack);
    }
}

/// Per-task counters, reported when the task stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageStats {
    pub stored: u64,
    pub dropped: u64,
}

impl StageStats {
    fn record(&mut self, ack: Acknowledgment) {
        match ack {
            Acknowledgment::Stored => self.stored += 1,
            Acknowledgment::Dropped(_) => self.dropped += 1,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Stage task: deliveries → stage.on_message() → ack
// ═══════════════════════════════════════════════════════════════

/// Run an initialized stage as a task.
///
/// Deliveries are processed strictly in arrival order, one at a time.
/// Cancellation is checked between messages only: a message in flight
/// always runs to completion. A stage error ends the task without
/// acknowledging the offending delivery. The stage is closed on every
/// exit path.
pub fn spawn_stage_task<C, K, H>(
    mut stage: SinkStage<C, K, H>,
    mut rx: mpsc::Receiver<Delivery>,
    token: CancellationToken,
) -> JoinHandle<Result<StageStats, StageError>>
where
    C: RecordConverter + 'static,
    K: BackendConnector + 'static,
    K::Writer: BackendWriter<Record = C::Record> + 'static,
    H: StoreHooks<C::Record> + 'static,
{
    tokio::spawn(async move {
        let name = stage.name().to_string();
        let mut stats = StageStats::default();

        let result = loop {
            let delivery = tokio::select! {
                biased;
                _ = token.cancelled() => break Ok(()),
                delivery = rx.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break Ok(()),
                },
            };

            match stage.on_message(&delivery.message).await {
                Ok(ack) => {
                    tracing::debug!(stage = %name, seq = delivery.seq, ?ack, "acknowledged");
                    stats.record(ack);
                    delivery.acknowledge(ack);
                }
                Err(e) => {
                    tracing::error!(stage = %name, seq = delivery.seq, error = %e, "stage failed, message not acknowledged");
                    break Err(e);
                }
            }
        };

        let closed = stage.close().await;
        tracing::info!(stage = %name, stored = stats.stored, dropped = stats.dropped, "stopped");

        result?;
        closed?;
        Ok(stats)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::stage::tests::{ready, RecordingBackend};
    use crate::stage::{DropReason, WriteFailurePolicy};

    #[tokio::test]
    async fn acknowledges_in_order_until_channel_closes() {
        let backend = RecordingBackend::default();
        let stage = ready(backend.clone()).await;
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_stage_task(stage, rx, CancellationToken::new());

        let mut acks = Vec::new();
        for (seq, body) in ["v1", "poison", "v3"].into_iter().enumerate() {
            let (delivery, ack) =
                Delivery::new(seq as u64, StreamMessage::with_fields(format!("T{seq}"), "S1", [body]));
            tx.send(delivery).await.unwrap();
            acks.push(ack);
        }
        drop(tx);

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats, StageStats { stored: 2, dropped: 1 });

        let mut results = Vec::new();
        for ack in acks {
            results.push(ack.await.unwrap());
        }
        assert_eq!(
            results,
            vec![
                Acknowledgment::Stored,
                Acknowledgment::Dropped(DropReason::Conversion),
                Acknowledgment::Stored,
            ]
        );

        let keys: Vec<String> = backend.writes.lock().unwrap().iter().map(|kv| kv.key.clone()).collect();
        assert_eq!(keys, vec!["T0_S1".to_string(), "T2_S1".to_string()]);
        assert!(backend.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn escalated_write_failure_stops_without_ack() {
        let backend = RecordingBackend {
            reject_key: Some("T1_S1".into()),
            ..Default::default()
        };
        let stage = ready(backend.clone()).await.with_policy(WriteFailurePolicy::Escalate);
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_stage_task(stage, rx, CancellationToken::new());

        let (first, first_ack) = Delivery::new(0, StreamMessage::with_fields("T0", "S1", ["v0"]));
        let (second, second_ack) = Delivery::new(1, StreamMessage::with_fields("T1", "S1", ["v1"]));
        tx.send(first).await.unwrap();
        tx.send(second).await.unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, StageError::Write { .. }));
        assert_eq!(first_ack.await.unwrap(), Acknowledgment::Stored);
        assert!(second_ack.await.is_err());
        assert!(backend.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancellation_closes_stage() {
        let backend = RecordingBackend::default();
        let stage = ready(backend.clone()).await;
        let (_tx, rx) = mpsc::channel::<Delivery>(8);
        let token = CancellationToken::new();
        let handle = spawn_stage_task(stage, rx, token.clone());

        token.cancel();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats, StageStats::default());
        assert!(backend.closed.load(Ordering::SeqCst));
    }
}
