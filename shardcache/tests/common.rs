//! Common test utilities

use shardcache::{ClusterClient, ClusterConfig, MemoryTransport, MetricsRecorder, NodeAddress};
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 64-hex-character AES-256 key used by encryption tests
#[allow(dead_code)] // Used by other test modules
pub const TEST_KEY: &str = "6b1f8c2d4e5a7b9c0d1e2f3a4b5c6d7e8f9a0b1c2d3e4f5a6b7c8d9e0f1a2b3c";

static TRACING: Once = Once::new();
static RECORDERS: AtomicUsize = AtomicUsize::new(0);

/// Route client logs to the test output, filtered by `RUST_LOG`
#[allow(dead_code)] // Used by other test modules
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Base configuration pointing at the simulated cluster
#[allow(dead_code)] // Used by other test modules
pub fn test_config() -> ClusterConfig {
    ClusterConfig::new([NodeAddress::new("127.0.0.1", 7000)])
}

/// Setup a client over a fresh in-memory cluster of `nodes` primaries
///
/// Each client records into its own metrics registry.
#[allow(dead_code)] // Used by other test modules
pub async fn setup_test_client(
    nodes: usize,
    config: ClusterConfig,
) -> (ClusterClient, MemoryTransport) {
    init_tracing();
    let transport = MemoryTransport::new(nodes);
    let prefix = format!("it_{}", RECORDERS.fetch_add(1, Ordering::SeqCst));
    let metrics = Arc::new(MetricsRecorder::new(&prefix).unwrap());
    let client = ClusterClient::with_metrics(config, Arc::new(transport.clone()), metrics).unwrap();
    client.connect().await.unwrap();
    (client, transport)
}

/// `count` keys owned by the given simulated node
#[allow(dead_code)] // Used by other test modules
pub fn keys_on_node(transport: &MemoryTransport, prefix: &str, node: usize, count: usize) -> Vec<String> {
    (0..)
        .map(|i| format!("key:{}", i))
        .filter(|key| transport.node_for_key(&format!("{}{}", prefix, key)) == node)
        .take(count)
        .collect()
}

/// Setup a client for S2S tests (requires a running Redis Cluster)
#[cfg(feature = "s2s-tests")]
#[allow(dead_code)] // Used by S2S test modules
pub fn setup_s2s_client() -> ClusterClient {
    let nodes = std::env::var("SHARDCACHE_NODES").unwrap_or_else(|_| "127.0.0.1:7000".to_string());
    let nodes: Vec<NodeAddress> = nodes
        .split(',')
        .map(|node| node.trim().parse().expect("invalid SHARDCACHE_NODES entry"))
        .collect();
    ClusterClient::redis(ClusterConfig::new(nodes).with_key_prefix("s2s:"))
        .expect("Failed to create S2S client")
}
