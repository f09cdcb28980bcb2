// src/pipeline/channel.rs
//
// Latest-only hand-off between the frame-producing task and the single
// classification consumer. Publishing while a frame is still pending
// replaces it: the consumer only ever sees the newest available frame,
// which bounds both memory and latency when the producer outruns the
// classifier.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

struct SlotInner<T> {
    pending: Mutex<Option<T>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

pub struct LatestSlot<T> {
    inner: Arc<SlotInner<T>>,
}

impl<T> Clone for LatestSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SlotInner {
                pending: Mutex::new(None),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Make `value` the next frame the consumer will see, superseding any
    /// undelivered one. Returns true when an older frame was dropped.
    pub fn publish(&self, value: T) -> bool {
        let replaced = {
            let mut pending = self.inner.pending.lock().expect("slot lock poisoned");
            pending.replace(value).is_some()
        };
        if replaced {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.notify.notify_one();
        replaced
    }

    /// Take the newest pending frame, waiting for one if necessary.
    /// Returns None once the slot is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut pending = self.inner.pending.lock().expect("slot lock poisoned");
                if let Some(value) = pending.take() {
                    return Some(value);
                }
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Signal that no more frames will be published. The consumer still
    /// receives a frame already pending.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    /// Frames superseded before delivery.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivers_published_value() {
        let slot = LatestSlot::new();
        slot.publish(7u64);
        assert_eq!(slot.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_burst_keeps_only_newest() {
        let slot = LatestSlot::new();
        for i in 0..10u64 {
            slot.publish(i);
        }
        assert_eq!(slot.recv().await, Some(9), "only the newest survives");
        assert_eq!(slot.dropped_count(), 9);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let slot = LatestSlot::new();
        slot.publish(1u64);
        slot.close();
        assert_eq!(slot.recv().await, Some(1), "pending frame still delivered");
        assert_eq!(slot.recv().await, None, "then the stream ends");
    }

    #[tokio::test]
    async fn test_producer_consumer_tasks() {
        let slot = LatestSlot::new();
        let producer = slot.clone();

        let handle = tokio::spawn(async move {
            for i in 0..100u64 {
                producer.publish(i);
                tokio::task::yield_now().await;
            }
            producer.close();
        });

        let mut last_seen = None;
        let mut received = 0u64;
        while let Some(v) = slot.recv().await {
            // Values arrive in order even when some are dropped.
            if let Some(prev) = last_seen {
                assert!(v > prev);
            }
            last_seen = Some(v);
            received += 1;
        }

        handle.await.unwrap();
        assert!(received >= 1);
        assert_eq!(last_seen, Some(99), "final frame is never lost");
    }
}
