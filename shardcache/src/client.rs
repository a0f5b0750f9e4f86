//! Cluster cache client

use crate::batch::BatchCoordinator;
use crate::breaker::{CircuitBreaker, CircuitState};
use crate::codec::EncryptionCodec;
use crate::config::ClusterConfig;
use crate::error::{CacheError, Result};
use crate::metrics::{MetricsRecorder, STATUS_ERROR, STATUS_PARTIAL, STATUS_SUCCESS};
use crate::transport::{Command, Reply, Transport};
use crate::types::{BatchDelete, BatchGet, BatchWrite, ClusterInfo, SetEntry};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Cluster-aware cache client
///
/// Cloning is cheap; clones share connections, the circuit breaker and
/// metrics.
#[derive(Clone)]
pub struct ClusterClient {
    config: Arc<ClusterConfig>,
    transport: Arc<dyn Transport>,
    codec: Arc<EncryptionCodec>,
    breaker: Arc<CircuitBreaker>,
    batch: Arc<BatchCoordinator>,
    metrics: Arc<MetricsRecorder>,
    connected: Arc<AtomicBool>,
    connect_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ClusterClient {
    /// Create a client over the given transport
    ///
    /// Metrics go to the process-wide recorder for `config.metrics_prefix`.
    /// No connection is made until [`connect`](Self::connect) or, when
    /// allowed, the first call.
    pub fn new(config: ClusterConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let metrics = MetricsRecorder::shared(&config.metrics_prefix)?;
        Self::build(config, transport, metrics)
    }

    /// Create a client that records into a caller-owned metrics recorder
    pub fn with_metrics(
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<MetricsRecorder>,
    ) -> Result<Self> {
        config.validate()?;
        Self::build(config, transport, metrics)
    }

    /// Create a client backed by a Redis Cluster
    ///
    /// # Example
    /// ```no_run
    /// use shardcache::{ClusterClient, ClusterConfig, NodeAddress};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ClusterConfig::new([NodeAddress::new("127.0.0.1", 7000)])
    ///     .with_key_prefix("app:");
    /// let client = ClusterClient::redis(config)?;
    /// client.connect().await?;
    /// client.set("user:1", "Alice", Some(60)).await?;
    /// # Ok(())
    /// # }
    /// ```
    #[cfg(feature = "redis-cluster")]
    pub fn redis(config: ClusterConfig) -> Result<Self> {
        let transport = Arc::new(crate::transport::RedisClusterTransport::new(config.clone()));
        Self::new(config, transport)
    }

    fn build(
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<MetricsRecorder>,
    ) -> Result<Self> {
        let codec = Arc::new(EncryptionCodec::from_hex(config.encryption_key.as_deref())?);
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker));
        let batch = Arc::new(BatchCoordinator::new(
            transport.clone(),
            breaker.clone(),
            codec.clone(),
            config.key_prefix.clone(),
            config.command_timeout(),
        ));
        metrics.set_circuit_state(breaker.state());

        debug!(
            nodes = config.nodes.len(),
            encryption = codec.is_enabled(),
            key_prefix = %config.key_prefix,
            "Cluster client created"
        );

        Ok(Self {
            config: Arc::new(config),
            transport,
            codec,
            breaker,
            batch,
            metrics,
            connected: Arc::new(AtomicBool::new(false)),
            connect_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Current circuit breaker state
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Connect to the cluster, bounded by the connect timeout
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.connect_locked().await
    }

    async fn connect_locked(&self) -> Result<()> {
        let start = Instant::now();
        let timeout = self.config.connect_timeout();
        let result = match tokio::time::timeout(timeout, self.transport.connect()).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Remote(format!(
                "connect timed out after {}ms",
                timeout.as_millis()
            ))),
        };

        let connected = result.is_ok();
        for node in self.transport.nodes() {
            self.metrics.set_connection_active(&node, connected);
        }
        self.record("connect", start, &result);

        if connected {
            self.connected.store(true, Ordering::SeqCst);
            info!(nodes = ?self.transport.nodes(), "Connected to cluster");
        }
        result
    }

    /// Close all connections
    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        self.connected.store(false, Ordering::SeqCst);
        for node in self.transport.nodes() {
            self.metrics.set_connection_active(&node, false);
        }
        self.transport.disconnect().await?;
        info!("Disconnected from cluster");
        Ok(())
    }

    /// Make sure a connection exists before issuing a call
    async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if !self.config.connects_on_demand() {
            return Err(CacheError::Remote("not connected".to_string()));
        }
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        debug!("Connecting on first use");
        self.connect_locked().await
    }

    pub(crate) fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Run one command with connection, breaker, timeout and metrics
    ///
    /// `command` is a `Result` so that failures building it (value
    /// encryption) are recorded like any other outcome. `decode` runs on the
    /// reply outside the breaker; its errors count in metrics only.
    pub(crate) async fn instrumented<T, D>(
        &self,
        operation: &'static str,
        command: Result<Command>,
        decode: D,
    ) -> Result<T>
    where
        D: FnOnce(Reply) -> Result<T>,
    {
        let start = Instant::now();
        let result = match command {
            Ok(command) => self.dispatch(command).await.and_then(decode),
            Err(e) => Err(e),
        };
        self.record(operation, start, &result);
        result
    }

    async fn dispatch(&self, command: Command) -> Result<Reply> {
        self.ensure_connected().await?;
        debug!(command = command.name(), key = ?command.key(), "Dispatching");
        let timeout = self.config.command_timeout();
        self.breaker
            .execute(|| async move {
                Ok(tokio::time::timeout(timeout, self.transport.execute(command)).await??)
            })
            .await
    }

    fn record<T>(&self, operation: &str, start: Instant, result: &Result<T>) {
        self.metrics.set_circuit_state(self.breaker.state());
        let status = match result {
            Ok(_) => STATUS_SUCCESS,
            Err(e) => {
                warn!(operation, error = %e, "Cache operation failed");
                STATUS_ERROR
            }
        };
        self.metrics
            .record_operation(operation, status, start.elapsed());
    }

    fn record_batch(&self, operation: &str, start: Instant, failed: usize, total: usize) {
        self.metrics.set_circuit_state(self.breaker.state());
        let status = if failed == 0 {
            STATUS_SUCCESS
        } else if failed >= total {
            STATUS_ERROR
        } else {
            STATUS_PARTIAL
        };
        if failed > 0 {
            warn!(operation, failed, total, "Batch operation degraded");
        }
        self.metrics
            .record_operation(operation, status, start.elapsed());
    }

    pub(crate) fn encode(&self, value: &[u8]) -> Result<Vec<u8>> {
        self.codec.encrypt(value)
    }

    pub(crate) fn decrypt(&self, stored: &[u8]) -> Result<Vec<u8>> {
        self.codec.decrypt(stored)
    }

    pub(crate) fn decode(&self, stored: Option<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        stored.map(|raw| self.decrypt(&raw)).transpose()
    }

    /// Get a value
    ///
    /// Returns `None` when the key is missing or expired.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let command = Command::Get {
            key: self.prefixed(key),
        };
        let value = self
            .instrumented("get", Ok(command), |reply| {
                self.decode(reply.into_optional_bytes()?)
            })
            .await?;

        if value.is_some() {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        Ok(value)
    }

    /// Get a value as UTF-8 text
    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get(key)
            .await?
            .map(|bytes| {
                String::from_utf8(bytes).map_err(|_| {
                    CacheError::Decryption(format!("value for '{}' is not valid UTF-8", key))
                })
            })
            .transpose()
    }

    /// Set a value with an optional TTL in seconds
    ///
    /// A TTL of `None` or `Some(0)` stores the value without expiry.
    pub async fn set(&self, key: &str, value: impl AsRef<[u8]>, ttl: Option<u64>) -> Result<()> {
        let key = self.prefixed(key);
        let command = self.encode(value.as_ref()).map(|value| match ttl {
            Some(ttl_secs) if ttl_secs > 0 => Command::SetEx {
                key,
                value,
                ttl_secs,
            },
            _ => Command::Set { key, value },
        });
        self.instrumented("set", command, Reply::into_ok).await
    }

    /// Delete a key, returning whether it existed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let command = Command::Del {
            keys: vec![self.prefixed(key)],
        };
        self.instrumented("delete", Ok(command), |reply| Ok(reply.into_int()? > 0))
            .await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let command = Command::Exists {
            key: self.prefixed(key),
        };
        self.instrumented("exists", Ok(command), |reply| Ok(reply.into_int()? > 0))
            .await
    }

    /// Remaining time to live in seconds
    ///
    /// `-2` when the key does not exist, `-1` when it has no expiry.
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        let command = Command::Ttl {
            key: self.prefixed(key),
        };
        self.instrumented("ttl", Ok(command), Reply::into_int).await
    }

    /// Set a key's time to live, returning whether the key exists
    pub async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let command = Command::Expire {
            key: self.prefixed(key),
            ttl_secs,
        };
        self.instrumented("expire", Ok(command), |reply| Ok(reply.into_int()? > 0))
            .await
    }

    /// Get many keys across shards
    ///
    /// Shard failures do not fail the call; affected keys read as `None` and
    /// are listed in [`BatchGet::failed`].
    pub async fn mget<K: AsRef<str>>(&self, keys: &[K]) -> Result<BatchGet> {
        let start = Instant::now();
        if let Err(e) = self.ensure_connected().await {
            self.record::<()>("mget", start, &Err(e.clone()));
            return Err(e);
        }
        let result = self.batch.get_many(keys).await;
        self.record_batch("mget", start, result.failed.len(), result.values.len());
        Ok(result)
    }

    /// Set many entries across shards
    pub async fn mset(&self, entries: Vec<SetEntry>) -> Result<BatchWrite> {
        let start = Instant::now();
        if let Err(e) = self.ensure_connected().await {
            self.record::<()>("mset", start, &Err(e.clone()));
            return Err(e);
        }
        let total = entries.len();
        let result = self.batch.set_many(entries).await;
        self.record_batch("mset", start, result.failed.len(), total);
        Ok(result)
    }

    /// Delete many keys across shards, returning the summed removal count
    pub async fn mdelete<K: AsRef<str>>(&self, keys: &[K]) -> Result<BatchDelete> {
        let start = Instant::now();
        if let Err(e) = self.ensure_connected().await {
            self.record::<()>("mdelete", start, &Err(e.clone()));
            return Err(e);
        }
        let total = keys.iter().map(|key| key.as_ref()).collect::<HashSet<&str>>().len();
        let result = self.batch.delete_many(keys).await;
        self.record_batch("mdelete", start, result.failed.len(), total);
        Ok(result)
    }

    /// Round-trip to the cluster
    pub async fn ping(&self) -> Result<String> {
        self.instrumented("ping", Ok(Command::Ping), Reply::into_text)
            .await
    }

    /// Cluster health as reported by `CLUSTER INFO`
    pub async fn get_cluster_info(&self) -> Result<ClusterInfo> {
        self.instrumented("cluster_info", Ok(Command::ClusterInfo), |reply| {
            Ok(ClusterInfo::parse(&reply.into_text()?))
        })
        .await
    }

    /// All metrics in Prometheus text exposition format
    pub fn get_metrics(&self) -> String {
        self.metrics.encode()
    }
}
