// Prometheus counters for cache, queue and auth paths

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Service metrics, owned by the application state
///
/// Each instance has its own registry so tests never collide on global state.
pub struct Metrics {
    registry: Registry,
    pub cache_hits: IntCounterVec,
    pub cache_misses: IntCounterVec,
    pub queue_deliveries: IntCounterVec,
    pub queue_acks: IntCounterVec,
    pub queue_nacks: IntCounterVec,
    pub auth_failures: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cache_hits = IntCounterVec::new(Opts::new("cache_hits_total", "Cache reads served from the cache"), &["entity"])?;
        let cache_misses = IntCounterVec::new(Opts::new("cache_misses_total", "Cache reads that fell through to the store"), &["entity"])?;
        let queue_deliveries = IntCounterVec::new(Opts::new("queue_deliveries_total", "Messages handed to a consumer"), &["queue"])?;
        let queue_acks = IntCounterVec::new(Opts::new("queue_acks_total", "Messages acknowledged"), &["queue"])?;
        let queue_nacks = IntCounterVec::new(Opts::new("queue_nacks_total", "Messages returned for redelivery"), &["queue"])?;
        let auth_failures = IntCounterVec::new(Opts::new("auth_failures_total", "Rejected authentication attempts"), &["reason"])?;

        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(queue_deliveries.clone()))?;
        registry.register(Box::new(queue_acks.clone()))?;
        registry.register(Box::new(queue_nacks.clone()))?;
        registry.register(Box::new(auth_failures.clone()))?;

        Ok(Self {
            registry,
            cache_hits,
            cache_misses,
            queue_deliveries,
            queue_acks,
            queue_nacks,
            auth_failures,
        })
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
