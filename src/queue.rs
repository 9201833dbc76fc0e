//! Downstream 큐 (C6, `spec.md` §4.6)
//!
//! dispatcher가 만든 `ChangeRecord`를 외부 poller에게 전달하는 경계.
//! 용량 제한이 있는 FIFO이고, 가득 차면 `enqueue`가 블로킹되어
//! 자연스럽게 backpressure가 dispatcher까지 전파된다.

use crate::error::{CdcError, Result};
use crate::record::ChangeRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// C6 — `enqueue`/`drain_batch`/`close`.
pub struct DownstreamQueue {
    sender: mpsc::Sender<ChangeRecord>,
    receiver: mpsc::Receiver<ChangeRecord>,
    /// Distinguishes a shutdown-requested close (§5 cancellation: a
    /// blocked `enqueue` must observe an `Interrupted`, not an error)
    /// from the receiver simply being dropped.
    closed_for_shutdown: Arc<AtomicBool>,
}

impl DownstreamQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        DownstreamQueue {
            sender,
            receiver,
            closed_for_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            sender: self.sender.clone(),
            closed_for_shutdown: self.closed_for_shutdown.clone(),
        }
    }

    /// 큐가 가득 차면 여유가 생길 때까지 기다린다 (`spec.md` §5 backpressure).
    pub async fn enqueue(&self, record: ChangeRecord) -> Result<()> {
        enqueue(&self.sender, &self.closed_for_shutdown, record).await
    }

    /// 최대 `max` 개를 모으거나 `timeout`이 지날 때까지 기다린다.
    /// 큐가 닫히고 비어 있으면 빈 벡터를 반환한다.
    pub async fn drain_batch(&mut self, max: usize, timeout: Duration) -> Vec<ChangeRecord> {
        let mut batch = Vec::with_capacity(max.min(64));

        let Some(first) = (tokio::time::timeout(timeout, self.receiver.recv()).await).ok().flatten() else {
            return batch;
        };
        batch.push(first);

        while batch.len() < max {
            match self.receiver.try_recv() {
                Ok(record) => batch.push(record),
                Err(_) => break,
            }
        }
        batch
    }

    /// Unblocks both sides for a cooperative shutdown — any in-flight
    /// blocking `enqueue` observes `CdcError::Interrupted` rather than
    /// a generic channel error (`spec.md` §5/§7).
    pub fn close(&mut self) {
        self.closed_for_shutdown.store(true, Ordering::Release);
        self.receiver.close();
    }
}

/// dispatcher 쪽에서 들고 있는, 복제 가능한 enqueue-only 핸들.
#[derive(Clone)]
pub struct QueueHandle {
    sender: mpsc::Sender<ChangeRecord>,
    closed_for_shutdown: Arc<AtomicBool>,
}

impl QueueHandle {
    pub async fn enqueue(&self, record: ChangeRecord) -> Result<()> {
        enqueue(&self.sender, &self.closed_for_shutdown, record).await
    }
}

async fn enqueue(
    sender: &mpsc::Sender<ChangeRecord>,
    closed_for_shutdown: &AtomicBool,
    record: ChangeRecord,
) -> Result<()> {
    sender.send(record).await.map_err(|_| {
        if closed_for_shutdown.load(Ordering::Acquire) {
            CdcError::Interrupted
        } else {
            CdcError::Other("downstream queue receiver dropped".into())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::SourcePosition;
    use crate::record::Op;
    use chrono::Utc;

    fn sample_record() -> ChangeRecord {
        ChangeRecord {
            op: Op::Create,
            table_id: None,
            before: None,
            after: None,
            ts: Utc::now(),
            source_position: SourcePosition {
                server_id: 1,
                file: "mysql-bin.000001".into(),
                pos: 4,
                row: 0,
                ts_sec: 0,
                gtids: None,
            },
            statements: None,
        }
    }

    #[tokio::test]
    async fn enqueue_then_drain_returns_in_order() {
        let mut queue = DownstreamQueue::new(4);
        queue.enqueue(sample_record()).await.unwrap();
        queue.enqueue(sample_record()).await.unwrap();

        let batch = queue.drain_batch(10, Duration::from_millis(100)).await;
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn drain_batch_times_out_when_empty() {
        let mut queue = DownstreamQueue::new(4);
        let batch = queue.drain_batch(10, Duration::from_millis(20)).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn drain_batch_respects_max() {
        let mut queue = DownstreamQueue::new(8);
        for _ in 0..5 {
            queue.enqueue(sample_record()).await.unwrap();
        }
        let batch = queue.drain_batch(3, Duration::from_millis(100)).await;
        assert_eq!(batch.len(), 3);
    }

    /// `spec.md` §5 cancellation: a blocked `enqueue` (queue full, no
    /// reader draining) must see `Interrupted`, not a generic error,
    /// once `close()` has been called for shutdown.
    #[tokio::test]
    async fn blocked_enqueue_observes_interrupted_after_shutdown_close() {
        let mut queue = DownstreamQueue::new(1);
        let handle = queue.handle();
        // Fill capacity so the next send on `handle` blocks.
        queue.enqueue(sample_record()).await.unwrap();

        let blocked = tokio::spawn(async move { handle.enqueue(sample_record()).await });

        // Give the spawned enqueue a chance to start blocking, then
        // request shutdown the way `BinlogReader::stop()` does.
        tokio::task::yield_now().await;
        queue.close();

        let result = blocked.await.unwrap();
        assert!(matches!(result, Err(CdcError::Interrupted)));
    }

    #[tokio::test]
    async fn enqueue_after_receiver_dropped_without_shutdown_is_other_error() {
        let queue = DownstreamQueue::new(1);
        let handle = queue.handle();
        drop(queue);

        let result = handle.enqueue(sample_record()).await;
        assert!(matches!(result, Err(CdcError::Other(_))));
    }
}
