// Redis-backed cache store

use crate::core::errors::CacheError;
use crate::state::cache::{CacheStore, CacheValue};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script, Value};
use std::future::Future;
use tokio::time::Duration;

/// Reads a key of either type in one round trip. With ARGV[1] == '1' the key is
/// deleted inside the same script, which makes read-and-delete atomic.
const FETCH_SCRIPT: &str = r#"
local t = redis.call('TYPE', KEYS[1])['ok']
local result
if t == 'string' then
    result = {t, redis.call('GET', KEYS[1])}
elseif t == 'hash' then
    result = {t, redis.call('HGETALL', KEYS[1])}
else
    return {t}
end
if ARGV[1] == '1' then
    redis.call('DEL', KEYS[1])
end
return result
"#;

const SCAN_BATCH: usize = 100;

/// Millisecond expiry for PX/PEXPIRE; `None` stores without expiry.
/// Sub-millisecond TTLs round up so they never become "no expiry".
fn expiry_millis(ttl: Duration) -> Option<u64> {
    if ttl.is_zero() {
        return None;
    }
    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    Some(millis.max(1))
}

/// Redis cache store
pub struct RedisCache {
    connection_manager: ConnectionManager,
    operation_timeout: Duration,
    fetch_script: Script,
}

impl RedisCache {
    /// Connect with retries, then verify the connection with PING
    ///
    /// Makes three attempts with linear backoff (1s, 2s) before giving up.
    pub async fn new(
        redis_url: &str,
        connection_timeout: Duration,
        operation_timeout: Duration,
    ) -> Result<Self, CacheError> {
        use tokio::time::sleep;

        const MAX_RETRIES: u32 = 3;
        const INITIAL_DELAY_MS: u64 = 1000;

        let mut connection_errors = Vec::new();

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                sleep(Duration::from_millis(INITIAL_DELAY_MS * attempt as u64)).await;
            }

            match Self::connect(redis_url, connection_timeout, operation_timeout).await {
                Ok(store) => match store.ping().await {
                    Ok(()) => {
                        if attempt > 0 {
                            tracing::info!("Redis connection succeeded on attempt {}", attempt + 1);
                        }
                        return Ok(store);
                    }
                    Err(e) => {
                        connection_errors.push(format!("Connection created but ping failed: {}", e));
                    }
                },
                Err(e) => {
                    if attempt < MAX_RETRIES - 1 {
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_attempts = MAX_RETRIES,
                            error = %e,
                            "Redis connection attempt failed, retrying..."
                        );
                    }
                    connection_errors.push(format!("Attempt {} failed: {}", attempt + 1, e));
                }
            }
        }

        Err(CacheError::Transient(format!(
            "Failed to connect to Redis after {} attempts: {}",
            MAX_RETRIES,
            connection_errors.join("; ")
        )))
    }

    async fn connect(
        redis_url: &str,
        connection_timeout: Duration,
        operation_timeout: Duration,
    ) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Transient(format!("Invalid Redis URL format '{}': {}", redis_url, e)))?;

        let connection_manager = tokio::time::timeout(connection_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CacheError::Transient(format!(
                    "Redis connection timed out after {}s",
                    connection_timeout.as_secs()
                ))
            })?
            .map_err(|e| CacheError::Transient(format!("Failed to create Redis ConnectionManager: {}", e)))?;

        Ok(Self::from_connection_manager(connection_manager, operation_timeout))
    }

    /// Wrap an existing connection manager (shared with the broker)
    pub fn from_connection_manager(connection_manager: ConnectionManager, operation_timeout: Duration) -> Self {
        Self {
            connection_manager,
            operation_timeout,
            fetch_script: Script::new(FETCH_SCRIPT),
        }
    }

    pub fn connection_manager(&self) -> ConnectionManager {
        self.connection_manager.clone()
    }

    /// Run a Redis operation under the operation timeout
    async fn timed<T, F>(&self, op: &'static str, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Transient(format!("{} failed: {}", op, e))),
            Err(_) => Err(CacheError::Transient(format!(
                "{} timed out after {}ms",
                op,
                self.operation_timeout.as_millis()
            ))),
        }
    }

    async fn fetch(&self, key: &str, delete: bool) -> Result<CacheValue, CacheError> {
        let mut conn = self.connection_manager.clone();
        let mut invocation = self.fetch_script.prepare_invoke();
        invocation.key(key).arg(if delete { "1" } else { "0" });

        let reply: Value = self
            .timed(if delete { "GETDEL" } else { "GET" }, invocation.invoke_async(&mut conn))
            .await?;

        decode_fetch_reply(reply)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<CacheValue, CacheError> {
        self.fetch(key, false).await
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        let ttl_ms = expiry_millis(ttl);

        let mut pipe = redis::pipe();
        pipe.atomic();
        match value {
            CacheValue::Text(text) => {
                let mut set = redis::cmd("SET");
                set.arg(key).arg(text);
                if let Some(ttl_ms) = ttl_ms {
                    set.arg("PX").arg(ttl_ms);
                }
                pipe.add_command(set).ignore();
            }
            CacheValue::Fields(fields) => {
                pipe.cmd("DEL").arg(key).ignore();
                if !fields.is_empty() {
                    pipe.cmd("HSET").arg(key);
                    for (field, value) in &fields {
                        pipe.arg(field).arg(value);
                    }
                    pipe.ignore();
                    if let Some(ttl_ms) = ttl_ms {
                        pipe.cmd("PEXPIRE").arg(key).arg(ttl_ms).ignore();
                    }
                }
            }
        }

        self.timed("SET", pipe.query_async(&mut conn)).await
    }

    async fn get_and_delete(&self, key: &str) -> Result<CacheValue, CacheError> {
        self.fetch(key, true).await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection_manager.clone();
        let mut cursor: u64 = 0;
        let mut keys = std::collections::BTreeSet::new();

        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(SCAN_BATCH);
            let (next, batch): (u64, Vec<String>) = self.timed("SCAN", cmd.query_async(&mut conn)).await?;

            // SCAN may return a key more than once
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys.into_iter().collect())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let _removed: i64 = self.timed("DEL", cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        let cmd = redis::cmd("PING");
        let result: String = self.timed("PING", cmd.query_async(&mut conn)).await?;

        if result == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Transient(format!("Redis ping returned unexpected response: {}", result)))
        }
    }
}

/// Decode the `{type, payload}` reply of the fetch script
pub(crate) fn decode_fetch_reply(reply: Value) -> Result<CacheValue, CacheError> {
    let mut items = match reply {
        Value::Array(items) => items.into_iter(),
        other => return Err(CacheError::Decode(format!("unexpected script reply: {:?}", other))),
    };

    let kind = match items.next() {
        Some(v) => value_to_string(v)?,
        None => return Err(CacheError::Decode("empty script reply".to_string())),
    };

    match kind.as_str() {
        "none" => Err(CacheError::Miss),
        "string" => {
            let payload = items
                .next()
                .ok_or_else(|| CacheError::Decode("missing string payload".to_string()))?;
            Ok(CacheValue::Text(value_to_string(payload)?))
        }
        "hash" => {
            let flat = match items.next() {
                Some(Value::Array(flat)) => flat,
                other => return Err(CacheError::Decode(format!("unexpected hash payload: {:?}", other))),
            };
            if flat.is_empty() {
                return Err(CacheError::Miss);
            }
            let mut fields = Vec::with_capacity(flat.len() / 2);
            let mut iter = flat.into_iter();
            while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
                fields.push((value_to_string(field)?, value_to_string(value)?));
            }
            Ok(CacheValue::Fields(fields))
        }
        other => Err(CacheError::Decode(format!("unsupported key type '{}'", other))),
    }
}

fn value_to_string(value: Value) -> Result<String, CacheError> {
    match value {
        Value::BulkString(bytes) => {
            String::from_utf8(bytes).map_err(|e| CacheError::Decode(format!("invalid UTF-8: {}", e)))
        }
        Value::SimpleString(s) => Ok(s),
        Value::Okay => Ok("OK".to_string()),
        other => Err(CacheError::Decode(format!("unexpected value: {:?}", other))),
    }
}
