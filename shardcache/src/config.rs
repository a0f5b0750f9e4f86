//! Client configuration

use crate::codec::parse_key;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Cluster node address (`host:port`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Connection URL for this node
    pub fn to_url(&self, tls: bool) -> String {
        let scheme = if tls { "rediss" } else { "redis" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| CacheError::Config(format!("node '{}' must be host:port", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| CacheError::Config(format!("node '{}' has an invalid port", s)))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NodeAddress> for String {
    fn from(node: NodeAddress) -> Self {
        node.to_string()
    }
}

/// Circuit breaker parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub threshold: u32,
    /// Cooldown before a half-open trial is allowed (milliseconds)
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_timeout_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Cluster cache client configuration
///
/// Immutable once handed to a client.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Seed nodes (at least one)
    pub nodes: Vec<NodeAddress>,
    /// ACL username
    pub username: Option<String>,
    /// AUTH password
    pub password: Option<String>,
    /// Use TLS connections
    pub tls: bool,
    /// Connection establishment timeout (milliseconds)
    pub connect_timeout_ms: u64,
    /// Per-command timeout (milliseconds)
    pub command_timeout_ms: u64,
    /// Transport-level retries per request
    pub max_retries_per_request: u32,
    /// Route read-only commands to replicas
    pub enable_read_from_replicas: bool,
    /// Prefix prepended to every key
    pub key_prefix: String,
    /// Optional 64-hex-character AES-256 key for at-rest encryption
    pub encryption_key: Option<String>,
    /// Connect on demand when a call arrives before `connect()`
    pub enable_offline_queue: bool,
    /// Defer connecting until the first call
    pub lazy_connect: bool,
    /// Metric name prefix
    pub metrics_prefix: String,
    /// Circuit breaker parameters
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            username: None,
            password: None,
            tls: false,
            connect_timeout_ms: 5000,
            command_timeout_ms: 5000,
            max_retries_per_request: 3,
            enable_read_from_replicas: true,
            key_prefix: String::new(),
            encryption_key: None,
            enable_offline_queue: true,
            lazy_connect: false,
            metrics_prefix: "shardcache".to_string(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Create a configuration for the given seed nodes
    pub fn new(nodes: impl IntoIterator<Item = NodeAddress>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: ClusterConfig = serde_yaml::from_str(&content)
            .map_err(|e| CacheError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries_per_request = max_retries;
        self
    }

    pub fn with_read_from_replicas(mut self, enabled: bool) -> Self {
        self.enable_read_from_replicas = enabled;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_encryption_key(mut self, hex_key: impl Into<String>) -> Self {
        self.encryption_key = Some(hex_key.into());
        self
    }

    pub fn with_offline_queue(mut self, enabled: bool) -> Self {
        self.enable_offline_queue = enabled;
        self
    }

    pub fn with_lazy_connect(mut self, enabled: bool) -> Self {
        self.lazy_connect = enabled;
        self
    }

    pub fn with_metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metrics_prefix = prefix.into();
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Whether calls made before `connect()` should connect on demand
    pub fn connects_on_demand(&self) -> bool {
        self.lazy_connect || self.enable_offline_queue
    }

    /// Check every parameter, failing on the first invalid one
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(CacheError::Config("at least one node is required".into()));
        }
        for node in &self.nodes {
            if node.host.is_empty() {
                return Err(CacheError::Config(format!("node '{}' has no host", node)));
            }
            if node.port == 0 {
                return Err(CacheError::Config(format!("node '{}' has port 0", node)));
            }
        }
        if self.connect_timeout_ms == 0 {
            return Err(CacheError::Config("connect_timeout_ms must be > 0".into()));
        }
        if self.command_timeout_ms == 0 {
            return Err(CacheError::Config("command_timeout_ms must be > 0".into()));
        }
        if self.tls && !cfg!(feature = "tls") {
            return Err(CacheError::Config(
                "tls requires shardcache to be built with the `tls` feature".into(),
            ));
        }
        if self.key_prefix.contains(['{', '}']) {
            return Err(CacheError::Config(
                "key_prefix must not contain hash tag braces".into(),
            ));
        }
        if let Some(key) = &self.encryption_key {
            parse_key(key)?;
        }
        if !is_metric_name(&self.metrics_prefix) {
            return Err(CacheError::Config(format!(
                "metrics_prefix '{}' is not a valid metric name",
                self.metrics_prefix
            )));
        }
        if self.circuit_breaker.threshold == 0 {
            return Err(CacheError::Config(
                "circuit_breaker.threshold must be >= 1".into(),
            ));
        }
        if self.circuit_breaker.reset_timeout_ms == 0 {
            return Err(CacheError::Config(
                "circuit_breaker.reset_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("nodes", &self.nodes)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("tls", &self.tls)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("command_timeout_ms", &self.command_timeout_ms)
            .field("max_retries_per_request", &self.max_retries_per_request)
            .field("enable_read_from_replicas", &self.enable_read_from_replicas)
            .field("key_prefix", &self.key_prefix)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "***"))
            .field("enable_offline_queue", &self.enable_offline_queue)
            .field("lazy_connect", &self.lazy_connect)
            .field("metrics_prefix", &self.metrics_prefix)
            .field("circuit_breaker", &self.circuit_breaker)
            .finish()
    }
}
