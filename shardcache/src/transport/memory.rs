//! In-process sharded store
//!
//! Simulates a cluster of primaries that each own a contiguous slot range.
//! Supports strings, hashes and lists with TTL, pub/sub fan-out, per-node
//! failure injection and artificial latency. Used for tests and local
//! development without a running cluster.

use super::{Command, Reply, Transport};
use crate::error::{CacheError, Result};
use crate::slot::{TOTAL_SLOTS, compute_slot};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

const PUBSUB_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum StoredData {
    String(Vec<u8>),
    Hash(HashMap<String, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
}

#[derive(Debug, Clone)]
struct StoredValue {
    data: StoredData,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: StoredData, ttl_secs: Option<u64>) -> Self {
        Self {
            data,
            expires_at: ttl_secs.map(|secs| Instant::now() + Duration::from_secs(secs)),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// Remaining TTL in whole seconds, rounded like the store does
    fn remaining_ttl_secs(&self) -> Option<i64> {
        self.expires_at.map(|at| {
            let remaining = at.saturating_duration_since(Instant::now());
            ((remaining.as_millis() + 500) / 1000) as i64
        })
    }
}

struct Shard {
    node: String,
    slots: RangeInclusive<u16>,
    down: AtomicBool,
    data: RwLock<HashMap<String, StoredValue>>,
}

struct MemoryCluster {
    shards: Vec<Shard>,
    connected: AtomicBool,
    commands: AtomicU64,
    pipelines: AtomicU64,
    latency: Mutex<Option<Duration>>,
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

/// In-memory transport; clones share the same simulated cluster
#[derive(Clone)]
pub struct MemoryTransport {
    cluster: Arc<MemoryCluster>,
}

impl MemoryTransport {
    /// Create a cluster of `node_count` primaries splitting the slot space
    pub fn new(node_count: usize) -> Self {
        let node_count = node_count.clamp(1, TOTAL_SLOTS as usize);
        let per_node = TOTAL_SLOTS as usize / node_count;

        let shards = (0..node_count)
            .map(|i| {
                let start = (i * per_node) as u16;
                let end = if i + 1 == node_count {
                    TOTAL_SLOTS - 1
                } else {
                    ((i + 1) * per_node - 1) as u16
                };
                Shard {
                    node: format!("127.0.0.1:{}", 7000 + i),
                    slots: start..=end,
                    down: AtomicBool::new(false),
                    data: RwLock::new(HashMap::new()),
                }
            })
            .collect();

        Self {
            cluster: Arc::new(MemoryCluster {
                shards,
                connected: AtomicBool::new(false),
                commands: AtomicU64::new(0),
                pipelines: AtomicU64::new(0),
                latency: Mutex::new(None),
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Index of the node owning a key
    pub fn node_for_key(&self, key: &str) -> usize {
        self.node_for_slot(compute_slot(key))
    }

    pub fn node_for_slot(&self, slot: u16) -> usize {
        self.cluster
            .shards
            .iter()
            .position(|shard| shard.slots.contains(&slot))
            .unwrap_or(0)
    }

    /// Make a node unreachable (or reachable again)
    pub fn set_node_down(&self, index: usize, down: bool) {
        if let Some(shard) = self.cluster.shards.get(index) {
            debug!(node = %shard.node, down, "Memory node availability changed");
            shard.down.store(down, Ordering::SeqCst);
        }
    }

    /// Delay every command by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.cluster.latency.lock() = latency;
    }

    pub fn is_connected(&self) -> bool {
        self.cluster.connected.load(Ordering::SeqCst)
    }

    /// Commands executed so far, pipelined ones included
    pub fn command_count(&self) -> u64 {
        self.cluster.commands.load(Ordering::SeqCst)
    }

    pub fn pipeline_count(&self) -> u64 {
        self.cluster.pipelines.load(Ordering::SeqCst)
    }

    /// Raw stored bytes of a string key, bypassing any decoding
    pub fn raw_get(&self, key: &str) -> Option<Vec<u8>> {
        let shard = &self.cluster.shards[self.node_for_key(key)];
        let data = shard.data.read();
        match data.get(key) {
            Some(value) if !value.is_expired() => match &value.data {
                StoredData::String(bytes) => Some(bytes.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Raw stored bytes of every element under a key, bypassing decoding
    pub fn raw_values(&self, key: &str) -> Vec<Vec<u8>> {
        let shard = &self.cluster.shards[self.node_for_key(key)];
        let data = shard.data.read();
        match data.get(key).map(|value| &value.data) {
            Some(StoredData::String(bytes)) => vec![bytes.clone()],
            Some(StoredData::Hash(fields)) => fields.values().cloned().collect(),
            Some(StoredData::List(items)) => items.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Subscribe to a pub/sub channel
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
        let mut channels = self.cluster.channels.lock();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(PUBSUB_CAPACITY).0)
            .subscribe()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(CacheError::Remote("connection is closed".to_string()))
        }
    }

    fn reachable_shard(&self, slot: u16) -> Result<&Shard> {
        let shard = &self.cluster.shards[self.node_for_slot(slot)];
        if shard.down.load(Ordering::SeqCst) {
            return Err(CacheError::Remote(format!("node {} unreachable", shard.node)));
        }
        Ok(shard)
    }

    fn any_reachable(&self) -> Result<&Shard> {
        self.cluster
            .shards
            .iter()
            .find(|shard| !shard.down.load(Ordering::SeqCst))
            .ok_or_else(|| CacheError::Remote("no reachable nodes".to_string()))
    }

    async fn simulate_latency(&self) {
        let latency = *self.cluster.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn publish(&self, channel: &str, message: Vec<u8>) -> Reply {
        let channels = self.cluster.channels.lock();
        let receivers = channels
            .get(channel)
            .and_then(|sender| sender.send(message).ok())
            .unwrap_or(0);
        Reply::Int(receivers as i64)
    }

    fn cluster_info(&self) -> Reply {
        let total = self.cluster.shards.len();
        let slots_ok: usize = self
            .cluster
            .shards
            .iter()
            .filter(|shard| !shard.down.load(Ordering::SeqCst))
            .map(|shard| shard.slots.clone().count())
            .sum();
        let state = if slots_ok == TOTAL_SLOTS as usize {
            "ok"
        } else {
            "fail"
        };
        let text = format!(
            "cluster_state:{}\r\ncluster_slots_assigned:{}\r\ncluster_slots_ok:{}\r\ncluster_slots_pfail:0\r\ncluster_slots_fail:{}\r\ncluster_known_nodes:{}\r\ncluster_size:{}\r\n",
            state,
            TOTAL_SLOTS,
            slots_ok,
            TOTAL_SLOTS as usize - slots_ok,
            total,
            total
        );
        Reply::Bulk(text.into_bytes())
    }
}

fn wrong_type() -> CacheError {
    CacheError::Remote(
        "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
    )
}

fn purge_expired(data: &mut HashMap<String, StoredValue>, key: &str) {
    if data.get(key).is_some_and(StoredValue::is_expired) {
        data.remove(key);
    }
}

/// Look up a key, dropping it first if it has expired
fn live<'a>(data: &'a mut HashMap<String, StoredValue>, key: &str) -> Option<&'a mut StoredValue> {
    purge_expired(data, key);
    data.get_mut(key)
}

fn apply(data: &mut HashMap<String, StoredValue>, command: Command) -> Result<Reply> {
    match command {
        Command::Get { key } => match live(data, &key).map(|value| &value.data) {
            Some(StoredData::String(bytes)) => Ok(Reply::Bulk(bytes.clone())),
            Some(_) => Err(wrong_type()),
            None => Ok(Reply::Nil),
        },
        Command::Set { key, value } => {
            data.insert(key, StoredValue::new(StoredData::String(value), None));
            Ok(Reply::Status("OK".to_string()))
        }
        Command::SetEx {
            key,
            value,
            ttl_secs,
        } => {
            if ttl_secs == 0 {
                return Err(CacheError::Remote(
                    "ERR invalid expire time in 'setex' command".to_string(),
                ));
            }
            data.insert(
                key,
                StoredValue::new(StoredData::String(value), Some(ttl_secs)),
            );
            Ok(Reply::Status("OK".to_string()))
        }
        Command::Del { keys } => {
            let mut deleted = 0;
            for key in keys {
                if live(data, &key).is_some() {
                    data.remove(&key);
                    deleted += 1;
                }
            }
            Ok(Reply::Int(deleted))
        }
        Command::Exists { key } => Ok(Reply::Int(i64::from(live(data, &key).is_some()))),
        Command::Ttl { key } => Ok(Reply::Int(match live(data, &key) {
            None => -2,
            Some(value) => value.remaining_ttl_secs().unwrap_or(-1),
        })),
        Command::Expire { key, ttl_secs } => {
            if live(data, &key).is_none() {
                return Ok(Reply::Int(0));
            }
            if ttl_secs == 0 {
                data.remove(&key);
            } else if let Some(value) = data.get_mut(&key) {
                value.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
            }
            Ok(Reply::Int(1))
        }
        Command::HGet { key, field } => match live(data, &key).map(|value| &value.data) {
            Some(StoredData::Hash(fields)) => Ok(fields
                .get(&field)
                .map_or(Reply::Nil, |v| Reply::Bulk(v.clone()))),
            Some(_) => Err(wrong_type()),
            None => Ok(Reply::Nil),
        },
        Command::HSet { key, field, value } => {
            purge_expired(data, &key);
            let entry = data
                .entry(key)
                .or_insert_with(|| StoredValue::new(StoredData::Hash(HashMap::new()), None));
            match &mut entry.data {
                StoredData::Hash(fields) => {
                    let added = fields.insert(field, value).is_none();
                    Ok(Reply::Int(i64::from(added)))
                }
                _ => Err(wrong_type()),
            }
        }
        Command::HGetAll { key } => match live(data, &key).map(|value| &value.data) {
            Some(StoredData::Hash(fields)) => {
                let mut pairs: Vec<_> = fields.iter().collect();
                pairs.sort_by(|a, b| a.0.cmp(b.0));
                Ok(Reply::Array(
                    pairs
                        .into_iter()
                        .flat_map(|(field, value)| {
                            [
                                Reply::Bulk(field.clone().into_bytes()),
                                Reply::Bulk(value.clone()),
                            ]
                        })
                        .collect(),
                ))
            }
            Some(_) => Err(wrong_type()),
            None => Ok(Reply::Array(Vec::new())),
        },
        Command::LPush { key, values } => {
            purge_expired(data, &key);
            let entry = data
                .entry(key)
                .or_insert_with(|| StoredValue::new(StoredData::List(VecDeque::new()), None));
            match &mut entry.data {
                StoredData::List(items) => {
                    for value in values {
                        items.push_front(value);
                    }
                    Ok(Reply::Int(items.len() as i64))
                }
                _ => Err(wrong_type()),
            }
        }
        Command::RPop { key } => {
            let (popped, now_empty) = match live(data, &key).map(|value| &mut value.data) {
                Some(StoredData::List(items)) => (items.pop_back(), items.is_empty()),
                Some(_) => return Err(wrong_type()),
                None => (None, false),
            };
            if now_empty {
                data.remove(&key);
            }
            Ok(popped.map_or(Reply::Nil, Reply::Bulk))
        }
        Command::LRange { key, start, stop } => {
            match live(data, &key).map(|value| &value.data) {
                Some(StoredData::List(items)) => {
                    let len = items.len() as i64;
                    let start = if start < 0 { (len + start).max(0) } else { start };
                    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
                    if start > stop || start >= len {
                        return Ok(Reply::Array(Vec::new()));
                    }
                    Ok(Reply::Array(
                        items
                            .iter()
                            .skip(start as usize)
                            .take((stop - start + 1) as usize)
                            .cloned()
                            .map(Reply::Bulk)
                            .collect(),
                    ))
                }
                Some(_) => Err(wrong_type()),
                None => Ok(Reply::Array(Vec::new())),
            }
        }
        Command::Publish { .. } | Command::Ping | Command::ClusterInfo => Err(CacheError::Remote(
            "keyless command cannot be applied to a shard".to_string(),
        )),
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<()> {
        self.any_reachable()?;
        self.cluster.connected.store(true, Ordering::SeqCst);
        debug!(nodes = self.cluster.shards.len(), "Memory transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.cluster.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn nodes(&self) -> Vec<String> {
        self.cluster
            .shards
            .iter()
            .map(|shard| shard.node.clone())
            .collect()
    }

    async fn execute(&self, command: Command) -> Result<Reply> {
        self.ensure_connected()?;
        self.simulate_latency().await;
        self.cluster.commands.fetch_add(1, Ordering::SeqCst);

        match command {
            Command::Ping => {
                self.any_reachable()?;
                Ok(Reply::Status("PONG".to_string()))
            }
            Command::ClusterInfo => {
                self.any_reachable()?;
                Ok(self.cluster_info())
            }
            Command::Publish { channel, message } => {
                self.any_reachable()?;
                Ok(self.publish(&channel, message))
            }
            command => {
                let slot = command.key().map(compute_slot).unwrap_or(0);
                let shard = self.reachable_shard(slot)?;
                let mut data = shard.data.write();
                apply(&mut data, command)
            }
        }
    }

    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>> {
        self.ensure_connected()?;
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        self.simulate_latency().await;
        self.cluster.pipelines.fetch_add(1, Ordering::SeqCst);
        self.cluster
            .commands
            .fetch_add(commands.len() as u64, Ordering::SeqCst);

        let slot = commands[0].key().map(compute_slot).unwrap_or(0);
        if commands
            .iter()
            .any(|command| command.key().map(compute_slot).unwrap_or(0) != slot)
        {
            return Err(CacheError::Remote(
                "CROSSSLOT Keys in request don't hash to the same slot".to_string(),
            ));
        }

        let shard = self.reachable_shard(slot)?;
        let mut data = shard.data.write();
        commands
            .into_iter()
            .map(|command| apply(&mut data, command))
            .collect()
    }
}
