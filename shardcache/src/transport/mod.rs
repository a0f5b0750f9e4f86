//! Cluster transport abstraction
//!
//! The transport owns connections, node discovery, replica routing and
//! MOVED/ASK redirection. The client only hands it fully prefixed commands,
//! one at a time or as a single-slot pipeline.

pub mod memory;
#[cfg(feature = "redis-cluster")]
pub mod redis_cluster;

pub use memory::MemoryTransport;
#[cfg(feature = "redis-cluster")]
pub use redis_cluster::RedisClusterTransport;

use crate::error::{CacheError, Result};
use async_trait::async_trait;

/// A store command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: Vec<u8> },
    SetEx { key: String, value: Vec<u8>, ttl_secs: u64 },
    Del { keys: Vec<String> },
    Exists { key: String },
    Ttl { key: String },
    Expire { key: String, ttl_secs: u64 },
    HGet { key: String, field: String },
    HSet { key: String, field: String, value: Vec<u8> },
    HGetAll { key: String },
    LPush { key: String, values: Vec<Vec<u8>> },
    RPop { key: String },
    LRange { key: String, start: i64, stop: i64 },
    Publish { channel: String, message: Vec<u8> },
    Ping,
    ClusterInfo,
}

impl Command {
    /// Command name as sent to the store
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "GET",
            Self::Set { .. } => "SET",
            Self::SetEx { .. } => "SETEX",
            Self::Del { .. } => "DEL",
            Self::Exists { .. } => "EXISTS",
            Self::Ttl { .. } => "TTL",
            Self::Expire { .. } => "EXPIRE",
            Self::HGet { .. } => "HGET",
            Self::HSet { .. } => "HSET",
            Self::HGetAll { .. } => "HGETALL",
            Self::LPush { .. } => "LPUSH",
            Self::RPop { .. } => "RPOP",
            Self::LRange { .. } => "LRANGE",
            Self::Publish { .. } => "PUBLISH",
            Self::Ping => "PING",
            Self::ClusterInfo => "CLUSTER INFO",
        }
    }

    /// The key this command is routed by, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Get { key }
            | Self::Set { key, .. }
            | Self::SetEx { key, .. }
            | Self::Exists { key }
            | Self::Ttl { key }
            | Self::Expire { key, .. }
            | Self::HGet { key, .. }
            | Self::HSet { key, .. }
            | Self::HGetAll { key }
            | Self::LPush { key, .. }
            | Self::RPop { key }
            | Self::LRange { key, .. } => Some(key.as_str()),
            Self::Del { keys } => keys.first().map(String::as_str),
            Self::Publish { .. } | Self::Ping | Self::ClusterInfo => None,
        }
    }
}

/// A store reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Int(i64),
    Bulk(Vec<u8>),
    Array(Vec<Reply>),
    Status(String),
}

impl Reply {
    /// Optional bulk value (`GET`, `HGET`, `RPOP`)
    pub fn into_optional_bytes(self) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Nil => Ok(None),
            Self::Bulk(data) => Ok(Some(data)),
            Self::Status(text) => Ok(Some(text.into_bytes())),
            other => Err(unexpected("bulk or nil", &other)),
        }
    }

    pub fn into_int(self) -> Result<i64> {
        match self {
            Self::Int(n) => Ok(n),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Array of bulk values (`LRANGE`, `HGETALL`)
    pub fn into_bytes_list(self) -> Result<Vec<Vec<u8>>> {
        match self {
            Self::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Self::Bulk(data) => Ok(data),
                    Self::Status(text) => Ok(text.into_bytes()),
                    other => Err(unexpected("bulk", &other)),
                })
                .collect(),
            Self::Nil => Ok(Vec::new()),
            other => Err(unexpected("array", &other)),
        }
    }

    /// Text reply (`PING`, `CLUSTER INFO`)
    pub fn into_text(self) -> Result<String> {
        match self {
            Self::Status(text) => Ok(text),
            Self::Bulk(data) => String::from_utf8(data)
                .map_err(|_| CacheError::Remote("reply is not valid UTF-8".to_string())),
            other => Err(unexpected("text", &other)),
        }
    }

    /// Acknowledgement of a write (`SET`, `SETEX`)
    pub fn into_ok(self) -> Result<()> {
        match self {
            Self::Status(_) => Ok(()),
            other => Err(unexpected("status", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &Reply) -> CacheError {
    CacheError::Remote(format!("unexpected reply: expected {}, got {:?}", expected, got))
}

/// Connection to a sharded store
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish connections to the cluster
    async fn connect(&self) -> Result<()>;

    /// Close all connections
    async fn disconnect(&self) -> Result<()>;

    /// Nodes this transport talks to, as `host:port`
    fn nodes(&self) -> Vec<String>;

    /// Execute a single command
    async fn execute(&self, command: Command) -> Result<Reply>;

    /// Execute commands that all route to the same slot in one round trip
    ///
    /// Replies come back in submission order. Any failure fails the whole
    /// pipeline.
    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_key() {
        assert_eq!(
            Command::Get {
                key: "a".into()
            }
            .key(),
            Some("a")
        );
        assert_eq!(
            Command::Del {
                keys: vec!["x".into(), "y".into()]
            }
            .key(),
            Some("x")
        );
        assert_eq!(Command::Ping.key(), None);
        assert_eq!(Command::ClusterInfo.name(), "CLUSTER INFO");
    }

    #[test]
    fn test_reply_conversions() {
        assert_eq!(Reply::Nil.into_optional_bytes().unwrap(), None);
        assert_eq!(
            Reply::Bulk(b"v".to_vec()).into_optional_bytes().unwrap(),
            Some(b"v".to_vec())
        );
        assert_eq!(Reply::Int(3).into_int().unwrap(), 3);
        assert!(Reply::Nil.into_int().is_err());
        assert_eq!(
            Reply::Array(vec![Reply::Bulk(b"a".to_vec()), Reply::Bulk(b"b".to_vec())])
                .into_bytes_list()
                .unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
        assert_eq!(Reply::Status("PONG".into()).into_text().unwrap(), "PONG");
        assert!(Reply::Status("OK".into()).into_ok().is_ok());
        assert!(matches!(
            Reply::Int(1).into_ok(),
            Err(CacheError::Remote(_))
        ));
    }
}
