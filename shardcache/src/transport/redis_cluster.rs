//! Redis Cluster transport
//!
//! Thin adapter over the `redis` crate's async cluster connection, which
//! handles slot discovery, MOVED/ASK redirection and replica reads.

use super::{Command, Reply, Transport};
use crate::config::ClusterConfig;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, Value};
use tracing::{debug, info};

/// Transport backed by a live Redis Cluster
pub struct RedisClusterTransport {
    config: ClusterConfig,
    connection: Mutex<Option<ClusterConnection>>,
}

impl RedisClusterTransport {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    fn builder(&self) -> ClusterClientBuilder {
        let urls: Vec<String> = self
            .config
            .nodes
            .iter()
            .map(|node| node.to_url(self.config.tls))
            .collect();

        let mut builder = ClusterClientBuilder::new(urls)
            .retries(self.config.max_retries_per_request)
            .connection_timeout(self.config.connect_timeout())
            .response_timeout(self.config.command_timeout());
        if let Some(username) = &self.config.username {
            builder = builder.username(username.clone());
        }
        if let Some(password) = &self.config.password {
            builder = builder.password(password.clone());
        }
        if self.config.enable_read_from_replicas {
            builder = builder.read_from_replicas();
        }
        builder
    }

    fn connection(&self) -> Result<ClusterConnection> {
        self.connection
            .lock()
            .clone()
            .ok_or_else(|| CacheError::Remote("connection is closed".to_string()))
    }
}

fn to_cmd(command: Command) -> Cmd {
    let mut cmd = match &command {
        Command::ClusterInfo => redis::cmd("CLUSTER"),
        other => redis::cmd(other.name()),
    };
    match command {
        Command::Get { key }
        | Command::Exists { key }
        | Command::Ttl { key }
        | Command::HGetAll { key }
        | Command::RPop { key } => {
            cmd.arg(key);
        }
        Command::Set { key, value } => {
            cmd.arg(key).arg(value);
        }
        Command::SetEx {
            key,
            value,
            ttl_secs,
        } => {
            cmd.arg(key).arg(ttl_secs).arg(value);
        }
        Command::Del { keys } => {
            cmd.arg(keys);
        }
        Command::Expire { key, ttl_secs } => {
            cmd.arg(key).arg(ttl_secs);
        }
        Command::HGet { key, field } => {
            cmd.arg(key).arg(field);
        }
        Command::HSet { key, field, value } => {
            cmd.arg(key).arg(field).arg(value);
        }
        Command::LPush { key, values } => {
            cmd.arg(key).arg(values);
        }
        Command::LRange { key, start, stop } => {
            cmd.arg(key).arg(start).arg(stop);
        }
        Command::Publish { channel, message } => {
            cmd.arg(channel).arg(message);
        }
        Command::Ping => {}
        Command::ClusterInfo => {
            cmd.arg("INFO");
        }
    }
    cmd
}

fn to_reply(value: Value) -> Reply {
    match value {
        Value::Nil => Reply::Nil,
        Value::Int(n) => Reply::Int(n),
        Value::BulkString(data) => Reply::Bulk(data),
        Value::SimpleString(text) => Reply::Status(text),
        Value::Okay => Reply::Status("OK".to_string()),
        Value::Array(items) | Value::Set(items) => {
            Reply::Array(items.into_iter().map(to_reply).collect())
        }
        Value::Map(pairs) => Reply::Array(
            pairs
                .into_iter()
                .flat_map(|(k, v)| [to_reply(k), to_reply(v)])
                .collect(),
        ),
        Value::VerbatimString { text, .. } => Reply::Bulk(text.into_bytes()),
        Value::Boolean(b) => Reply::Int(i64::from(b)),
        other => Reply::Status(format!("{:?}", other)),
    }
}

#[async_trait]
impl Transport for RedisClusterTransport {
    async fn connect(&self) -> Result<()> {
        if self.connection.lock().is_some() {
            return Ok(());
        }
        let client = self.builder().build()?;
        let connection = client.get_async_connection().await?;
        *self.connection.lock() = Some(connection);
        info!(nodes = ?self.nodes(), "Connected to Redis cluster");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connection.lock().take().is_some() {
            info!("Disconnected from Redis cluster");
        }
        Ok(())
    }

    fn nodes(&self) -> Vec<String> {
        self.config.nodes.iter().map(ToString::to_string).collect()
    }

    async fn execute(&self, command: Command) -> Result<Reply> {
        let mut connection = self.connection()?;
        debug!(command = command.name(), key = ?command.key(), "Executing");
        let value: Value = to_cmd(command).query_async(&mut connection).await?;
        Ok(to_reply(value))
    }

    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let mut connection = self.connection()?;
        let mut pipe = redis::pipe();
        let count = commands.len();
        for command in commands {
            pipe.add_command(to_cmd(command));
        }
        debug!(count, "Executing pipeline");
        let values: Vec<Value> = pipe.query_async(&mut connection).await?;
        Ok(values.into_iter().map(to_reply).collect())
    }
}
