//! Bounded broadcast dispatch
//!
//! Ingest never awaits a broadcast. It pushes a job onto the hub's bounded
//! queue and returns; one dispatcher task per hub drains the queue in order,
//! which keeps per-connection delivery in ingestion order.
//!
//! Backpressure policy: drop-oldest. When the queue is full the oldest pending
//! job is discarded to make room, so viewers that fall behind see the most
//! recent telemetry rather than stalling the pipeline.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};

use crate::observability::TelemetryMetrics;
use crate::types::TenantId;

use super::message::{Frame, PushMessage};
use super::ConnectionHub;

/// One pending broadcast
#[derive(Debug, Clone)]
pub struct BroadcastJob {
    pub frame: Frame,
    pub tenant_id: Option<TenantId>,
}

/// Fixed-capacity FIFO of pending broadcasts with drop-oldest overflow
#[derive(Debug)]
pub struct BroadcastQueue {
    capacity: usize,
    jobs: Mutex<VecDeque<BroadcastJob>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl BroadcastQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            jobs: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a job; returns the job evicted to make room, if any
    pub fn push(&self, job: BroadcastJob) -> Option<BroadcastJob> {
        let evicted = {
            let mut jobs = self.jobs.lock();
            let evicted = if jobs.len() >= self.capacity {
                jobs.pop_front()
            } else {
                None
            };
            jobs.push_back(job);
            evicted
        };

        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    /// Take the next job without waiting
    pub fn try_pop(&self) -> Option<BroadcastJob> {
        self.jobs.lock().pop_front()
    }

    /// Wait for the next job; `None` once closed and drained
    pub async fn pop(&self) -> Option<BroadcastJob> {
        loop {
            if let Some(job) = self.try_pop() {
                return Some(job);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting waits; pending jobs can still be drained
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Pending jobs
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs discarded by the overflow policy since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A hub paired with its queue and dispatcher
#[derive(Debug, Clone)]
pub struct BroadcastChannel {
    hub: Arc<ConnectionHub>,
    queue: Arc<BroadcastQueue>,
    metrics: Arc<TelemetryMetrics>,
}

impl BroadcastChannel {
    pub fn new(hub: Arc<ConnectionHub>, capacity: usize, metrics: Arc<TelemetryMetrics>) -> Self {
        Self {
            hub,
            queue: Arc::new(BroadcastQueue::new(capacity)),
            metrics,
        }
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    pub fn queue(&self) -> &Arc<BroadcastQueue> {
        &self.queue
    }

    /// Serialize a message and queue it for delivery. Never blocks.
    pub fn publish(&self, message: &PushMessage, tenant_id: Option<&str>) {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(kind = message.kind(), error = %e, "Failed to encode push message");
                return;
            }
        };

        let job = BroadcastJob {
            frame,
            tenant_id: tenant_id.map(str::to_string),
        };
        if self.queue.push(job).is_some() {
            let channel = self.hub.channel();
            self.metrics
                .broadcast_jobs_dropped
                .with_label_values(&[channel.as_str()])
                .inc();
            tracing::warn!(
                channel = %channel,
                capacity = self.queue.capacity(),
                "Broadcast queue full, dropped oldest pending job"
            );
        }
    }

    /// Dispatcher loop: drain the queue into the hub until shutdown
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let channel = self.hub.channel();
        tracing::info!(channel = %channel, "Broadcast dispatcher started");

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!(channel = %channel, "Broadcast dispatcher received shutdown signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!(missed = n, "Broadcast dispatcher shutdown receiver lagged");
                        }
                    }
                }

                job = self.queue.pop() => {
                    match job {
                        Some(job) => {
                            self.hub.broadcast(job.frame, job.tenant_id.as_deref()).await;
                        }
                        None => break,
                    }
                }
            }
        }

        self.queue.close();
        let pending = self.queue.len();
        if pending > 0 {
            tracing::info!(channel = %channel, pending, "Broadcast dispatcher stopped with pending jobs");
        } else {
            tracing::info!(channel = %channel, "Broadcast dispatcher stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::ChannelConnection;
    use crate::types::Channel;
    use std::time::Duration;

    fn job(text: &str) -> BroadcastJob {
        BroadcastJob {
            frame: Frame::from(text),
            tenant_id: None,
        }
    }

    #[test]
    fn test_drop_oldest() {
        let queue = BroadcastQueue::new(2);
        assert!(queue.push(job("a")).is_none());
        assert!(queue.push(job("b")).is_none());
        let evicted = queue.push(job("c")).unwrap();

        assert_eq!(&*evicted.frame, "a");
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(&*queue.try_pop().unwrap().frame, "b");
        assert_eq!(&*queue.try_pop().unwrap().frame, "c");
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(BroadcastQueue::new(4));
        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.pop().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(job("late"));
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(&*got.frame, "late");
    }

    #[tokio::test]
    async fn test_closed_queue_drains_then_ends() {
        let queue = BroadcastQueue::new(4);
        queue.push(job("a"));
        queue.close();
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_dispatcher_delivers_in_order() {
        let metrics = Arc::new(TelemetryMetrics::new().unwrap());
        let hub = Arc::new(ConnectionHub::new(Channel::Public, metrics.clone()));
        let channel = BroadcastChannel::new(hub.clone(), 16, metrics);

        let (conn, mut rx) = ChannelConnection::pair(16, Duration::from_millis(100));
        hub.connect(Arc::new(conn), None).unwrap();

        let (tx, shutdown) = broadcast::channel(1);
        let c = channel.clone();
        let handle = tokio::spawn(async move { c.run(shutdown).await });

        for _ in 0..3 {
            channel.publish(&PushMessage::Pong, None);
        }
        for _ in 0..3 {
            let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&*frame, r#"{"type":"pong"}"#);
        }

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
