// MessageQueue facade: routing, publishing and background consumers

use crate::core::errors::QueueError;
use crate::metrics::Metrics;
use crate::queue::{Delivery, MessageBroker, DEFAULT_EXCHANGE};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Failure reported by a message handler. The message is requeued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Processes one message body
///
/// `Ok` acknowledges the message. `Err` returns it to the queue for redelivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a handler
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        (self.0)(body.to_vec()).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Ack/nack attempts before a delivery is left to lease expiry
const RESOLVE_ATTEMPTS: u32 = 3;
const RESOLVE_BACKOFF: Duration = Duration::from_millis(100);

/// Consumer loop tuning
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// How long a single receive waits before re-checking for shutdown
    pub poll_interval: Duration,
    /// Delivery attempt after which each redelivery logs a warning
    pub poison_warn_threshold: u32,
    /// How long a delivery may go without a lease renewal before any consumer
    /// of the queue may hand it out again. Live handlers renew at a third of it.
    pub visibility_timeout: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poison_warn_threshold: 10,
            visibility_timeout: Duration::from_secs(60),
        }
    }
}

impl ConsumerSettings {
    fn heartbeat_interval(&self) -> Duration {
        (self.visibility_timeout / 3).max(Duration::from_millis(1))
    }

    fn reclaim_interval(&self) -> Duration {
        (self.visibility_timeout / 2).max(self.poll_interval)
    }
}

#[derive(Debug, Clone, Copy)]
enum Resolution {
    Ack,
    Requeue,
}

pub(crate) struct ConsumerHandle {
    queue: String,
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Durable at-least-once queue with direct-exchange routing
///
/// Messages published to the default exchange go to the queue named by the
/// routing key. Other exchanges route through explicit bindings.
pub struct MessageQueue {
    broker: Arc<dyn MessageBroker>,
    bindings: RwLock<HashMap<(String, String), String>>,
    consumers: Mutex<Vec<ConsumerHandle>>,
    shutdown: CancellationToken,
    settings: ConsumerSettings,
    metrics: Option<Arc<Metrics>>,
}

impl MessageQueue {
    pub fn new(broker: Arc<dyn MessageBroker>, settings: ConsumerSettings) -> Self {
        Self {
            broker,
            bindings: RwLock::new(HashMap::new()),
            consumers: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.shutdown.is_cancelled() {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    /// Idempotently create a durable queue
    pub async fn declare_queue(&self, name: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.broker.declare_queue(name).await
    }

    /// Route `routing_key` on `exchange` to `queue`
    pub fn bind_queue(&self, exchange: &str, routing_key: &str, queue: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut bindings = self
            .bindings
            .write()
            .map_err(|_| QueueError::Transient("binding table poisoned".to_string()))?;
        bindings.insert((exchange.to_string(), routing_key.to_string()), queue.to_string());
        Ok(())
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<String, QueueError> {
        if exchange == DEFAULT_EXCHANGE {
            return Ok(routing_key.to_string());
        }
        let bindings = self
            .bindings
            .read()
            .map_err(|_| QueueError::Transient("binding table poisoned".to_string()))?;
        bindings
            .get(&(exchange.to_string(), routing_key.to_string()))
            .cloned()
            .ok_or_else(|| QueueError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            })
    }

    /// Durably enqueue `body`; once this returns Ok the message survives a broker restart
    pub async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), QueueError> {
        self.ensure_open()?;
        let queue = self.route(exchange, routing_key)?;
        self.broker.push(&queue, body).await?;
        debug!(queue = %queue, bytes = body.len(), "Message published");
        Ok(())
    }

    /// Start a background consumer for `queue`
    ///
    /// Deliveries whose lease already expired (a crashed consumer, here or in
    /// another process) are returned to the queue first, and again periodically
    /// while the consumer runs. The consumer runs until `close`.
    pub async fn consume(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<(), QueueError> {
        self.ensure_open()?;
        let recovered = self.broker.recover(queue, self.settings.visibility_timeout).await?;
        if recovered > 0 {
            info!(queue = %queue, count = recovered, "Returned expired deliveries to the queue");
        }

        let token = self.shutdown.child_token();
        let worker = ConsumerWorker {
            broker: self.broker.clone(),
            queue: queue.to_string(),
            handler,
            settings: self.settings.clone(),
            metrics: self.metrics.clone(),
        };
        let task = tokio::spawn(worker.run(token.clone()));

        info!(queue = %queue, "Consumer started");
        self.consumers.lock().await.push(ConsumerHandle {
            queue: queue.to_string(),
            token,
            task,
        });
        Ok(())
    }

    /// Stop every consumer, wait for in-progress deliveries to resolve, then
    /// release the broker. Safe to call more than once.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.shutdown.cancel();

        let consumers: Vec<ConsumerHandle> = self.consumers.lock().await.drain(..).collect();
        for consumer in consumers {
            consumer.token.cancel();
            if let Err(e) = consumer.task.await {
                error!(queue = %consumer.queue, error = %e, "Consumer task ended abnormally");
            }
        }

        self.broker.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

struct ConsumerWorker {
    broker: Arc<dyn MessageBroker>,
    queue: String,
    handler: Arc<dyn MessageHandler>,
    settings: ConsumerSettings,
    metrics: Option<Arc<Metrics>>,
}

impl ConsumerWorker {
    async fn run(self, token: CancellationToken) {
        let mut next_reclaim = Instant::now() + self.settings.reclaim_interval();
        loop {
            if Instant::now() >= next_reclaim {
                self.reclaim().await;
                next_reclaim = Instant::now() + self.settings.reclaim_interval();
            }

            let received = tokio::select! {
                _ = token.cancelled() => break,
                received = self.broker.receive(&self.queue, self.settings.poll_interval) => received,
            };

            match received {
                Ok(Some(delivery)) => self.process(delivery).await,
                Ok(None) => continue,
                Err(QueueError::Closed) => break,
                Err(e) => {
                    warn!(queue = %self.queue, error = %e, "Receive failed, backing off");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    }
                }
            }
        }
        info!(queue = %self.queue, "Consumer stopped");
    }

    /// Hand expired deliveries back to the queue
    async fn reclaim(&self) {
        match self.broker.recover(&self.queue, self.settings.visibility_timeout).await {
            Ok(0) | Err(QueueError::Closed) => {}
            Ok(count) => info!(queue = %self.queue, count, "Returned expired deliveries to the queue"),
            Err(e) => warn!(queue = %self.queue, error = %e, "Reclaiming expired deliveries failed"),
        }
    }

    /// Run the handler and resolve the delivery. Never interrupted by shutdown,
    /// so a delivery that reached the handler is always acked or nacked. The
    /// lease is renewed while the handler runs.
    async fn process(&self, delivery: Delivery) {
        if let Some(metrics) = &self.metrics {
            metrics.queue_deliveries.with_label_values(&[self.queue.as_str()]).inc();
        }
        if delivery.attempt > self.settings.poison_warn_threshold {
            warn!(
                queue = %self.queue,
                message_id = %delivery.message_id,
                attempt = delivery.attempt,
                "Message keeps failing; redelivering"
            );
        }

        let handling = AssertUnwindSafe(self.handler.handle(&delivery.body)).catch_unwind();
        tokio::pin!(handling);
        let period = self.settings.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);

        let outcome = loop {
            tokio::select! {
                result = &mut handling => break match result {
                    Ok(outcome) => outcome,
                    Err(_) => Err(HandlerError::new("handler panicked")),
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = self.broker.touch(&delivery).await {
                        warn!(queue = %self.queue, message_id = %delivery.message_id, error = %e, "Lease renewal failed");
                    }
                }
            }
        };

        match outcome {
            Ok(()) => match self.resolve(&delivery, Resolution::Ack).await {
                Ok(()) => {
                    debug!(queue = %self.queue, message_id = %delivery.message_id, "Message acknowledged");
                    if let Some(metrics) = &self.metrics {
                        metrics.queue_acks.with_label_values(&[self.queue.as_str()]).inc();
                    }
                }
                // Left in flight; redelivered once its lease expires
                Err(e) => error!(queue = %self.queue, message_id = %delivery.message_id, error = %e, "Ack failed"),
            },
            Err(reason) => {
                warn!(
                    queue = %self.queue,
                    message_id = %delivery.message_id,
                    attempt = delivery.attempt,
                    error = %reason,
                    "Handler failed, requeueing"
                );
                match self.resolve(&delivery, Resolution::Requeue).await {
                    Ok(()) => {
                        if let Some(metrics) = &self.metrics {
                            metrics.queue_nacks.with_label_values(&[self.queue.as_str()]).inc();
                        }
                    }
                    Err(e) => error!(queue = %self.queue, message_id = %delivery.message_id, error = %e, "Nack failed"),
                }
            }
        }
    }

    /// Ack or requeue, retrying transient broker failures with backoff
    async fn resolve(&self, delivery: &Delivery, resolution: Resolution) -> Result<(), QueueError> {
        let mut backoff = RESOLVE_BACKOFF;
        let mut attempt = 1;
        loop {
            let result = match resolution {
                Resolution::Ack => self.broker.ack(delivery).await,
                Resolution::Requeue => self.broker.nack(delivery, true).await,
            };
            match result {
                Err(QueueError::Transient(reason)) if attempt < RESOLVE_ATTEMPTS => {
                    warn!(
                        queue = %self.queue,
                        message_id = %delivery.message_id,
                        attempt,
                        error = %reason,
                        resolution = ?resolution,
                        "Resolving delivery failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
