//! uibatch: per-connection outgoing message batching.
//!
//! Each connection gets one [`Batcher`]. Enqueued messages accumulate
//! until a debounce timer elapses or an immediate ("user-event") flush is
//! requested, at which point the queue drains as a single stable-sorted
//! `(priority, insertion order)` batch.
//!
//! `create` replies are never routed through this queue — they are
//! correlated replies the caller sends directly, per the protocol's
//! explicit carve-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use uiproto::{Message, Priority};

/// A single queued outbound message plus its delivery priority and
/// insertion order (assigned at enqueue time, not at flush time, so
/// ordering is stable even under a debounce race).
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: Message,
    pub priority: Priority,
    pub order: u64,
}

enum Enqueued {
    Msg(QueuedMessage),
    FlushNow,
}

/// Handle used by a session dispatcher to feed one connection's batcher.
#[derive(Clone)]
pub struct Batcher {
    tx: mpsc::UnboundedSender<Enqueued>,
    next_order: Arc<AtomicU64>,
}

impl Batcher {
    /// Spawns the debounce task and returns a handle to feed it. Flushed
    /// batches (never empty) are sent to `out`; the task exits, dropping
    /// `out`, once every `Batcher` clone is dropped.
    pub fn spawn(debounce: Duration, out: mpsc::UnboundedSender<Vec<Message>>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(rx, out, debounce));
        (
            Self {
                tx,
                next_order: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    pub fn enqueue(&self, message: Message, priority: Priority) {
        let order = self.next_order.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(Enqueued::Msg(QueuedMessage {
            message,
            priority,
            order,
        }));
    }

    /// Requests an immediate flush, bypassing the debounce wait. Used for
    /// watch's synthetic `update` and other user-event-triggered sends.
    pub fn flush_now(&self) {
        let _ = self.tx.send(Enqueued::FlushNow);
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Enqueued>,
    out: mpsc::UnboundedSender<Vec<Message>>,
    debounce: Duration,
) {
    let mut queue: Vec<QueuedMessage> = Vec::new();
    loop {
        if queue.is_empty() {
            match rx.recv().await {
                Some(Enqueued::Msg(m)) => queue.push(m),
                Some(Enqueued::FlushNow) => continue,
                None => return,
            }
        }

        let sleep = tokio::time::sleep(debounce);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(Enqueued::Msg(m)) => queue.push(m),
                    Some(Enqueued::FlushNow) => break,
                    None => {
                        flush(&mut queue, &out);
                        return;
                    }
                },
                () = &mut sleep => break,
            }
        }
        flush(&mut queue, &out);
    }
}

fn flush(queue: &mut Vec<QueuedMessage>, out: &mpsc::UnboundedSender<Vec<Message>>) {
    if queue.is_empty() {
        return;
    }
    queue.sort_by_key(|m| (m.priority, m.order));
    trace!(count = queue.len(), "flushing outgoing batch");
    let batch: Vec<Message> = queue.drain(..).map(|m| m.message).collect();
    let _ = out.send(batch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use uiproto::{DestroyMessage, WatchMessage};

    fn watch(id: u64) -> Message {
        Message::Watch(WatchMessage { var_id: id })
    }

    fn destroy(id: u64) -> Message {
        Message::Destroy(DestroyMessage { var_id: id })
    }

    #[tokio::test]
    async fn flush_now_drains_immediately_in_priority_order() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (batcher, _handle) = Batcher::spawn(Duration::from_secs(60), out_tx);

        batcher.enqueue(watch(1), Priority::Low);
        batcher.enqueue(destroy(2), Priority::High);
        batcher.enqueue(watch(3), Priority::Medium);
        batcher.flush_now();

        let batch = out_rx.recv().await.unwrap();
        assert_eq!(
            batch,
            vec![destroy(2), watch(3), watch(1)],
            "high before medium before low"
        );
    }

    #[tokio::test]
    async fn ties_within_a_priority_preserve_insertion_order() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (batcher, _handle) = Batcher::spawn(Duration::from_secs(60), out_tx);

        batcher.enqueue(watch(1), Priority::Medium);
        batcher.enqueue(watch(2), Priority::Medium);
        batcher.enqueue(watch(3), Priority::Medium);
        batcher.flush_now();

        let batch = out_rx.recv().await.unwrap();
        assert_eq!(batch, vec![watch(1), watch(2), watch(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_elapses_and_flushes_without_explicit_flush_now() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (batcher, _handle) = Batcher::spawn(Duration::from_millis(10), out_tx);

        batcher.enqueue(watch(1), Priority::High);
        tokio::time::advance(Duration::from_millis(11)).await;

        let batch = out_rx.recv().await.unwrap();
        assert_eq!(batch, vec![watch(1)]);
    }

    #[tokio::test]
    async fn empty_queue_never_emits_a_batch() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (batcher, _handle) = Batcher::spawn(Duration::from_millis(5), out_tx);
        batcher.flush_now();
        drop(batcher);
        assert!(out_rx.recv().await.is_none());
    }
}
