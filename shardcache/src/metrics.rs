//! Prometheus Metrics for the cache client
//!
//! - `<prefix>_operations_total{operation,status}`
//! - `<prefix>_operation_duration_seconds{operation}`
//! - `<prefix>_connections_active{node}`
//! - `<prefix>_cache_hits_total` / `<prefix>_cache_misses_total`
//! - `<prefix>_circuit_breaker_state`

use crate::breaker::CircuitState;
use crate::error::{CacheError, Result};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default metric name prefix
pub const DEFAULT_PREFIX: &str = "shardcache";

/// Operation completed normally
pub const STATUS_SUCCESS: &str = "success";
/// Operation failed
pub const STATUS_ERROR: &str = "error";
/// Batch operation completed with some shards failed
pub const STATUS_PARTIAL: &str = "partial";

/// Latency buckets, 1ms to 1s
const DURATION_BUCKETS: &[f64] = &[0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

lazy_static! {
    /// Process-wide recorders, one per prefix
    static ref SHARED_RECORDERS: Mutex<HashMap<String, Arc<MetricsRecorder>>> =
        Mutex::new(HashMap::new());
}

/// Counters, histograms and gauges for client operations
///
/// Counters only ever increase; there is no reset.
pub struct MetricsRecorder {
    prefix: String,
    registry: Registry,
    operations: IntCounterVec,
    durations: HistogramVec,
    connections: IntGaugeVec,
    hits: IntCounter,
    misses: IntCounter,
    circuit_state: IntGauge,
}

impl MetricsRecorder {
    /// Create a recorder with its own registry
    pub fn new(prefix: &str) -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new(
                format!("{}_operations_total", prefix),
                "Total number of cache operations by type and outcome",
            ),
            &["operation", "status"],
        )
        .map_err(registration_error)?;

        let durations = HistogramVec::new(
            HistogramOpts::new(
                format!("{}_operation_duration_seconds", prefix),
                "Cache operation latency in seconds",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["operation"],
        )
        .map_err(registration_error)?;

        let connections = IntGaugeVec::new(
            Opts::new(
                format!("{}_connections_active", prefix),
                "Active connections per cluster node",
            ),
            &["node"],
        )
        .map_err(registration_error)?;

        let hits = IntCounter::new(format!("{}_cache_hits_total", prefix), "Cache hits")
            .map_err(registration_error)?;
        let misses = IntCounter::new(format!("{}_cache_misses_total", prefix), "Cache misses")
            .map_err(registration_error)?;
        let circuit_state = IntGauge::new(
            format!("{}_circuit_breaker_state", prefix),
            "Circuit breaker state (0 closed, 1 open, 2 half-open)",
        )
        .map_err(registration_error)?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(durations.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(connections.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(hits.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(misses.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(circuit_state.clone()))
            .map_err(registration_error)?;

        Ok(Self {
            prefix: prefix.to_string(),
            registry,
            operations,
            durations,
            connections,
            hits,
            misses,
            circuit_state,
        })
    }

    /// Process-wide recorder for a prefix, created on first use
    pub fn shared(prefix: &str) -> Result<Arc<Self>> {
        let mut recorders = SHARED_RECORDERS.lock();
        if let Some(recorder) = recorders.get(prefix) {
            return Ok(recorder.clone());
        }
        let recorder = Arc::new(Self::new(prefix)?);
        recorders.insert(prefix.to_string(), recorder.clone());
        Ok(recorder)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Record one operation outcome and its latency
    pub fn record_operation(&self, operation: &str, status: &str, duration: Duration) {
        self.operations
            .with_label_values(&[operation, status])
            .inc();
        self.durations
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    pub fn record_hit(&self) {
        self.hits.inc();
    }

    pub fn record_miss(&self) {
        self.misses.inc();
    }

    pub fn set_connection_active(&self, node: &str, active: bool) {
        self.connections
            .with_label_values(&[node])
            .set(i64::from(active));
    }

    pub fn set_circuit_state(&self, state: CircuitState) {
        self.circuit_state.set(state as i64);
    }

    /// Count recorded for an `{operation,status}` pair
    pub fn operation_count(&self, operation: &str, status: &str) -> u64 {
        self.operations
            .with_label_values(&[operation, status])
            .get()
    }

    pub fn hits(&self) -> u64 {
        self.hits.get()
    }

    pub fn misses(&self) -> u64 {
        self.misses.get()
    }

    /// Encode all metrics in Prometheus text exposition format
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!(prefix = %self.prefix, error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

fn registration_error(err: prometheus::Error) -> CacheError {
    CacheError::Config(format!("metrics registration failed: {}", err))
}
