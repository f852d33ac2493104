//! Bounded per-connection outbound queue
//!
//! Fan-out must never block on a slow receiver, and there is no
//! flow-control in the protocol, so every connection gets a fixed-capacity
//! queue with a drop-oldest overflow policy: under pressure the stalest
//! audio goes first and playback continuity wins over completeness.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// One queued WebSocket payload
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Binary(Bytes),
}

/// Drop-oldest queue feeding one connection's writer task
pub struct OutboundQueue {
    queue: ArrayQueue<Outbound>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicUsize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: ArrayQueue::new(capacity),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicUsize::new(0),
        })
    }

    /// Enqueue a payload, evicting the oldest entry when full. Never
    /// blocks; pushes to a closed queue are discarded.
    pub fn push(&self, payload: Outbound) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if self.queue.force_push(payload).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
    }

    /// Dequeue without waiting
    pub fn try_pop(&self) -> Option<Outbound> {
        self.queue.pop()
    }

    /// Await the next payload; `None` once the queue is closed and drained
    pub async fn pop(&self) -> Option<Outbound> {
        loop {
            if let Some(payload) = self.queue.pop() {
                return Some(payload);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue, waking any waiting consumer
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Payloads evicted by the drop-oldest policy
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(byte: u8) -> Outbound {
        Outbound::Binary(Bytes::from(vec![byte]))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = OutboundQueue::new(4);
        queue.push(binary(1));
        queue.push(binary(2));

        assert_eq!(queue.pop().await, Some(binary(1)));
        assert_eq!(queue.pop().await, Some(binary(2)));
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let queue = OutboundQueue::new(2);
        queue.push(binary(1));
        queue.push(binary(2));
        queue.push(binary(3));

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await, Some(binary(2)));
        assert_eq!(queue.pop().await, Some(binary(3)));
    }

    #[tokio::test]
    async fn test_close_wakes_consumer() {
        let queue = OutboundQueue::new(2);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        queue.close();
        assert_eq!(consumer.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_drains_before_reporting_closed() {
        let queue = OutboundQueue::new(2);
        queue.push(binary(7));
        queue.close();

        assert_eq!(queue.pop().await, Some(binary(7)));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_push_after_close_ignored() {
        let queue = OutboundQueue::new(2);
        queue.close();
        queue.push(binary(1));
        assert!(queue.is_empty());
    }
}
