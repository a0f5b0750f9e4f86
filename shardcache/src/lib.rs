//! # Shardcache
//!
//! Cluster-aware cache client for hash-slot sharded stores (Redis Cluster
//! protocol).
//!
//! ## Features
//!
//! - **Slot routing**: CRC16 hash slots with `{tag}` co-location
//! - **Batching**: multi-key operations split per slot and pipelined concurrently,
//!   with per-shard fault isolation
//! - **Circuit breaking**: one shared breaker fails fast while the cluster is unhealthy
//! - **Encryption**: optional AES-256-GCM sealing of values at rest
//! - **Metrics**: Prometheus counters, histograms and gauges per operation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shardcache::{ClusterClient, ClusterConfig, NodeAddress, SetEntry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClusterConfig::new([
//!         NodeAddress::new("10.0.0.1", 7000),
//!         NodeAddress::new("10.0.0.2", 7000),
//!     ])
//!     .with_key_prefix("app:");
//!
//!     let client = ClusterClient::redis(config)?;
//!     client.connect().await?;
//!
//!     client.set("user:1", "Alice", Some(60)).await?;
//!     let value = client.get("user:1").await?;
//!     println!("Value: {:?}", value);
//!
//!     let batch = client
//!         .mset(vec![SetEntry::new("a", "1"), SetEntry::new("b", "2")])
//!         .await?;
//!     println!("Stored {} keys", batch.stored.len());
//!
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod breaker;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod list;
pub mod metrics;
pub mod pubsub;
pub mod slot;
pub mod transport;
pub mod types;

pub use batch::BatchCoordinator;
pub use breaker::{CircuitBreaker, CircuitState};
pub use client::ClusterClient;
pub use codec::{EncryptionCodec, Envelope};
pub use config::{CircuitBreakerConfig, ClusterConfig, NodeAddress};
pub use error::{CacheError, Result};
pub use metrics::MetricsRecorder;
pub use slot::{HashSlot, compute_slot, hash_tag};
pub use transport::{Command, MemoryTransport, Reply, Transport};
pub use types::{BatchDelete, BatchGet, BatchWrite, ClusterInfo, SetEntry};
