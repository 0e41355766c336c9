// Redis-backed durable broker (reliable queue on lists)

use crate::core::errors::QueueError;
use crate::queue::{Delivery, Envelope, MessageBroker};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Client, Script};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::time::Duration;

const REGISTRY_KEY: &str = "mq:queues";

/// Push only to registered queues
const PUBLISH_SCRIPT: &str = r#"
if redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 0 then
    return -1
end
return redis.call('LPUSH', KEYS[2], ARGV[2])
"#;

/// Resolve a delivery for good: drop it from the processing list and its lease
const ACK_SCRIPT: &str = r#"
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
return removed
"#;

/// Remove the delivery from the processing list and, if it was there, push the
/// next attempt to the tail of the ready list
const REQUEUE_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[3], ARGV[1])
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
    return 0
end
redis.call('LPUSH', KEYS[2], ARGV[2])
return 1
"#;

/// Restart a lease, but only for a delivery still in the processing list
const TOUCH_SCRIPT: &str = r#"
if not redis.call('LPOS', KEYS[1], ARGV[1]) then
    return 0
end
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
return 1
"#;

/// Move processing entries whose lease started at or before ARGV[1] - ARGV[2]
/// back onto the ready list with the attempt count bumped. Entries without a
/// lease (receive interrupted between BLMOVE and ZADD) get one starting now.
const RECOVER_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local cutoff = now - tonumber(ARGV[2])
local moved = 0
for _, entry in ipairs(redis.call('LRANGE', KEYS[1], 0, -1)) do
    local since = redis.call('ZSCORE', KEYS[3], entry)
    if not since then
        redis.call('ZADD', KEYS[3], now, entry)
    elseif tonumber(since) <= cutoff then
        redis.call('LREM', KEYS[1], 1, entry)
        redis.call('ZREM', KEYS[3], entry)
        local ok, envelope = pcall(cjson.decode, entry)
        if ok and type(envelope) == 'table' and type(envelope.attempt) == 'number' then
            envelope.attempt = envelope.attempt + 1
            entry = cjson.encode(envelope)
        end
        redis.call('LPUSH', KEYS[2], entry)
        moved = moved + 1
    end
end
return moved
"#;

fn ready_key(queue: &str) -> String {
    format!("mq:{}", queue)
}

fn processing_key(queue: &str) -> String {
    format!("mq:{}:processing", queue)
}

fn leases_key(queue: &str) -> String {
    format!("mq:{}:leases", queue)
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Broker storing each queue as a pair of Redis lists
///
/// Messages are pushed on the left of `mq:<queue>` and moved atomically to
/// `mq:<queue>:processing` on receive, so a consumer crash leaves them in the
/// processing list instead of losing them. The stored envelope string doubles as
/// the delivery handle.
///
/// Each delivery holds a lease in the sorted set `mq:<queue>:leases` (score =
/// lease start, unix millis). Only entries whose lease outlived the visibility
/// timeout are recovered, so several processes can share a queue.
pub struct RedisBroker {
    client: Client,
    connection_manager: ConnectionManager,
    // Blocking BLMOVE would stall the multiplexed manager, so receives borrow
    // their own connections
    blocking_pool: Mutex<Vec<MultiplexedConnection>>,
    operation_timeout: Duration,
    publish_script: Script,
    ack_script: Script,
    requeue_script: Script,
    touch_script: Script,
    recover_script: Script,
    closed: AtomicBool,
}

impl RedisBroker {
    pub fn new(client: Client, connection_manager: ConnectionManager, operation_timeout: Duration) -> Self {
        Self {
            client,
            connection_manager,
            blocking_pool: Mutex::new(Vec::new()),
            operation_timeout,
            publish_script: Script::new(PUBLISH_SCRIPT),
            ack_script: Script::new(ACK_SCRIPT),
            requeue_script: Script::new(REQUEUE_SCRIPT),
            touch_script: Script::new(TOUCH_SCRIPT),
            recover_script: Script::new(RECOVER_SCRIPT),
            closed: AtomicBool::new(false),
        }
    }

    /// Open a broker on its own connection manager
    pub async fn connect(redis_url: &str, connection_timeout: Duration, operation_timeout: Duration) -> Result<Self, QueueError> {
        let client = Client::open(redis_url)
            .map_err(|e| QueueError::Transient(format!("Invalid Redis URL format '{}': {}", redis_url, e)))?;

        let connection_manager = tokio::time::timeout(connection_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| QueueError::Transient(format!("Redis connection timed out after {}s", connection_timeout.as_secs())))?
            .map_err(|e| QueueError::Transient(format!("Failed to create Redis ConnectionManager: {}", e)))?;

        Ok(Self::new(client, connection_manager, operation_timeout))
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    async fn timed<T, F>(&self, op: &'static str, limit: Duration, fut: F) -> Result<T, QueueError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(QueueError::Transient(format!("{} failed: {}", op, e))),
            Err(_) => Err(QueueError::Transient(format!("{} timed out after {}ms", op, limit.as_millis()))),
        }
    }

    async fn checkout(&self) -> Result<MultiplexedConnection, QueueError> {
        if let Some(conn) = self.blocking_pool.lock().await.pop() {
            return Ok(conn);
        }
        self.timed(
            "CONNECT",
            self.operation_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
    }

    async fn checkin(&self, conn: MultiplexedConnection) {
        if !self.closed.load(Ordering::SeqCst) {
            self.blocking_pool.lock().await.push(conn);
        }
    }
}

#[async_trait]
impl MessageBroker for RedisBroker {
    async fn declare_queue(&self, name: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut conn = self.connection_manager.clone();
        let mut cmd = redis::cmd("SADD");
        cmd.arg(REGISTRY_KEY).arg(name);
        let _added: i64 = self.timed("SADD", self.operation_timeout, cmd.query_async(&mut conn)).await?;
        tracing::debug!(queue = %name, "Queue declared");
        Ok(())
    }

    async fn push(&self, queue: &str, body: &[u8]) -> Result<(), QueueError> {
        self.ensure_open()?;
        let wire = Envelope::new(body).to_wire()?;
        let mut conn = self.connection_manager.clone();

        let mut invocation = self.publish_script.prepare_invoke();
        invocation.key(REGISTRY_KEY).key(ready_key(queue)).arg(queue).arg(wire);
        let length: i64 = self
            .timed("LPUSH", self.operation_timeout, invocation.invoke_async(&mut conn))
            .await?;

        if length < 0 {
            return Err(QueueError::UnknownQueue(queue.to_string()));
        }
        Ok(())
    }

    async fn receive(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        self.ensure_open()?;
        let mut conn = self.checkout().await?;

        let mut cmd = redis::cmd("BLMOVE");
        cmd.arg(ready_key(queue))
            .arg(processing_key(queue))
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout.as_secs_f64());

        // The server-side block ends at `timeout`; allow the round trip on top
        let limit = timeout + self.operation_timeout;
        // On failure the connection is dropped rather than returned to the pool
        let raw: Option<String> = self.timed("BLMOVE", limit, cmd.query_async(&mut conn)).await?;
        self.checkin(conn).await;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let decoded = Envelope::from_wire(&raw).and_then(|envelope| {
            let body = envelope.decode_body()?;
            Ok((envelope, body))
        });

        match decoded {
            Ok((envelope, body)) => {
                let mut conn = self.connection_manager.clone();
                let mut cmd = redis::cmd("ZADD");
                cmd.arg(leases_key(queue)).arg(now_millis()).arg(&raw);
                // Without a lease the next recovery sweep starts one
                if let Err(e) = self.timed::<i64, _>("ZADD", self.operation_timeout, cmd.query_async(&mut conn)).await {
                    tracing::warn!(queue = %queue, message_id = %envelope.id, error = %e, "Failed to record delivery lease");
                }
                Ok(Some(Delivery {
                    queue: queue.to_string(),
                    handle: raw,
                    message_id: envelope.id,
                    attempt: envelope.attempt,
                    body,
                }))
            }
            Err(e) => {
                tracing::error!(queue = %queue, error = %e, "Dropping malformed message");
                let mut conn = self.connection_manager.clone();
                let mut cmd = redis::cmd("LREM");
                cmd.arg(processing_key(queue)).arg(1).arg(&raw);
                let _removed: i64 = self.timed("LREM", self.operation_timeout, cmd.query_async(&mut conn)).await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut conn = self.connection_manager.clone();
        let mut invocation = self.ack_script.prepare_invoke();
        invocation
            .key(processing_key(&delivery.queue))
            .key(leases_key(&delivery.queue))
            .arg(&delivery.handle);
        let removed: i64 = self
            .timed("ACK", self.operation_timeout, invocation.invoke_async(&mut conn))
            .await?;

        if removed == 0 {
            return Err(QueueError::UnknownDelivery(delivery.message_id.to_string()));
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        if !requeue {
            return self.ack(delivery).await;
        }

        self.ensure_open()?;
        let retry = Envelope::from_wire(&delivery.handle)?.next_attempt().to_wire()?;
        let mut conn = self.connection_manager.clone();

        let mut invocation = self.requeue_script.prepare_invoke();
        invocation
            .key(processing_key(&delivery.queue))
            .key(ready_key(&delivery.queue))
            .key(leases_key(&delivery.queue))
            .arg(&delivery.handle)
            .arg(retry);
        let moved: i64 = self
            .timed("REQUEUE", self.operation_timeout, invocation.invoke_async(&mut conn))
            .await?;

        if moved == 0 {
            return Err(QueueError::UnknownDelivery(delivery.message_id.to_string()));
        }
        Ok(())
    }

    async fn touch(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut conn = self.connection_manager.clone();
        let mut invocation = self.touch_script.prepare_invoke();
        invocation
            .key(processing_key(&delivery.queue))
            .key(leases_key(&delivery.queue))
            .arg(&delivery.handle)
            .arg(now_millis());
        let touched: i64 = self
            .timed("TOUCH", self.operation_timeout, invocation.invoke_async(&mut conn))
            .await?;

        if touched == 0 {
            return Err(QueueError::UnknownDelivery(delivery.message_id.to_string()));
        }
        Ok(())
    }

    async fn recover(&self, queue: &str, visibility_timeout: Duration) -> Result<usize, QueueError> {
        self.ensure_open()?;
        let mut conn = self.connection_manager.clone();
        let visibility_ms = i64::try_from(visibility_timeout.as_millis()).unwrap_or(i64::MAX);
        let mut invocation = self.recover_script.prepare_invoke();
        invocation
            .key(processing_key(queue))
            .key(ready_key(queue))
            .key(leases_key(queue))
            .arg(now_millis())
            .arg(visibility_ms);
        let moved: i64 = self
            .timed("RECOVER", self.operation_timeout, invocation.invoke_async(&mut conn))
            .await?;

        if moved > 0 {
            tracing::warn!(queue = %queue, count = moved, "Recovered expired deliveries");
        }
        Ok(moved.max(0) as usize)
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::SeqCst);
        self.blocking_pool.lock().await.clear();
        Ok(())
    }
}
