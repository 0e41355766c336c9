// In-process broker with the same delivery semantics as the Redis broker

use crate::core::errors::QueueError;
use crate::queue::{Delivery, Envelope, MessageBroker};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

/// A delivered message and when its visibility clock last started
struct Lease {
    envelope: Envelope,
    since: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    in_flight: HashMap<String, Lease>,
    notify: Arc<Notify>,
}

/// Broker backed by in-memory queues
///
/// Not durable across restarts. Used by tests and local development.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, QueueState>>,
    closed: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting for delivery
    pub async fn ready_len(&self, queue: &str) -> usize {
        self.queues.lock().await.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet acknowledged
    pub async fn in_flight_len(&self, queue: &str) -> usize {
        self.queues.lock().await.get(queue).map_or(0, |q| q.in_flight.len())
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn declare_queue(&self, name: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.queues.lock().await.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn push(&self, queue: &str, body: &[u8]) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        state.ready.push_back(Envelope::new(body));
        state.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            self.ensure_open()?;

            let notify = {
                let mut queues = self.queues.lock().await;
                let state = queues
                    .get_mut(queue)
                    .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

                if let Some(envelope) = state.ready.pop_front() {
                    let handle = Uuid::new_v4().to_string();
                    let body = match envelope.decode_body() {
                        Ok(body) => body,
                        Err(e) => {
                            tracing::error!(queue = %queue, message_id = %envelope.id, error = %e, "Dropping malformed message");
                            continue;
                        }
                    };
                    let delivery = Delivery {
                        queue: queue.to_string(),
                        handle: handle.clone(),
                        message_id: envelope.id,
                        attempt: envelope.attempt,
                        body,
                    };
                    state.in_flight.insert(
                        handle,
                        Lease {
                            envelope,
                            since: Instant::now(),
                        },
                    );
                    return Ok(Some(delivery));
                }

                state.notify.clone()
            };

            // A permit stored by notify_one wakes this immediately
            if tokio::time::timeout_at(deadline, notify.notified()).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| QueueError::UnknownQueue(delivery.queue.clone()))?;
        state
            .in_flight
            .remove(&delivery.handle)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.handle.clone()))
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| QueueError::UnknownQueue(delivery.queue.clone()))?;
        let envelope = state
            .in_flight
            .remove(&delivery.handle)
            .map(|lease| lease.envelope)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.handle.clone()))?;

        if requeue {
            state.ready.push_back(envelope.next_attempt());
            state.notify.notify_one();
        }
        Ok(())
    }

    async fn touch(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| QueueError::UnknownQueue(delivery.queue.clone()))?;
        let lease = state
            .in_flight
            .get_mut(&delivery.handle)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.handle.clone()))?;
        lease.since = Instant::now();
        Ok(())
    }

    async fn recover(&self, queue: &str, visibility_timeout: Duration) -> Result<usize, QueueError> {
        self.ensure_open()?;
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.since.elapsed() >= visibility_timeout)
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in &expired {
            if let Some(lease) = state.in_flight.remove(handle) {
                state.ready.push_back(lease.envelope.next_attempt());
                state.notify.notify_one();
            }
        }
        Ok(expired.len())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::SeqCst);
        for state in self.queues.lock().await.values() {
            state.notify.notify_waiters();
        }
        Ok(())
    }
}
