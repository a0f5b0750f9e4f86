//! Batch Coordinator
//!
//! Splits multi-key operations by hash slot and runs one pipeline per slot
//! group concurrently. A whole batch is admitted through the shared circuit
//! breaker once and counts as a failure only when every group failed, so a
//! failing shard only degrades the keys it owns. Each pipeline is bounded by
//! the command timeout on its own.

use crate::breaker::CircuitBreaker;
use crate::codec::EncryptionCodec;
use crate::error::{CacheError, Result};
use crate::slot::group_by_shard;
use crate::transport::{Command, Reply, Transport};
use crate::types::{BatchDelete, BatchGet, BatchWrite, SetEntry};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A key as requested, its position in the request and its stored name
struct Routed<T> {
    index: usize,
    key: String,
    payload: T,
}

/// Fans multi-key operations out across shards
pub struct BatchCoordinator {
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    codec: Arc<EncryptionCodec>,
    key_prefix: String,
    command_timeout: Duration,
}

impl BatchCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        breaker: Arc<CircuitBreaker>,
        codec: Arc<EncryptionCodec>,
        key_prefix: impl Into<String>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            breaker,
            codec,
            key_prefix: key_prefix.into(),
            command_timeout,
        }
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Run one slot group's pipeline under the command timeout
    async fn run_shard(&self, slot: u16, commands: Vec<Command>) -> Result<Vec<Reply>> {
        let expected = commands.len();
        debug!(slot, commands = expected, "Dispatching shard pipeline");
        let replies =
            tokio::time::timeout(self.command_timeout, self.transport.pipeline(commands)).await??;
        if replies.len() != expected {
            return Err(CacheError::Remote(format!(
                "pipeline returned {} replies for {} commands",
                replies.len(),
                expected
            )));
        }
        Ok(replies)
    }

    /// Run every slot group concurrently under one breaker admission
    ///
    /// Outcomes come back in input order. When the circuit is open no
    /// pipeline is sent and every group gets the rejection.
    async fn fan_out(&self, pipelines: Vec<(u16, Vec<Command>)>) -> Vec<Result<Vec<Reply>>> {
        if pipelines.is_empty() {
            return Vec::new();
        }
        let groups = pipelines.len();
        let admitted = self
            .breaker
            .execute_with(
                || {
                    join_all(
                        pipelines
                            .into_iter()
                            .map(|(slot, commands)| self.run_shard(slot, commands)),
                    )
                },
                |outcomes: &Vec<Result<Vec<Reply>>>| outcomes.iter().any(Result::is_ok),
            )
            .await;

        match admitted {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(groups, error = %e, "Batch rejected");
                (0..groups).map(|_| Err(e.clone())).collect()
            }
        }
    }

    /// Fetch many keys at once
    ///
    /// Every distinct requested key appears in the result. Duplicates are
    /// fetched once.
    pub async fn get_many<K: AsRef<str>>(&self, keys: &[K]) -> BatchGet {
        let mut result = BatchGet::default();
        let mut routed = Vec::new();
        for key in keys {
            let key: &str = key.as_ref();
            if result.values.contains_key(key) {
                continue;
            }
            result.values.insert(key.to_string(), None);
            routed.push(Routed {
                index: routed.len(),
                key: key.to_string(),
                payload: self.prefixed(key),
            });
        }
        if routed.is_empty() {
            return result;
        }

        let groups = group_by_shard(routed, |entry| entry.payload.as_str());
        let pipelines = groups
            .iter()
            .map(|(slot, entries)| {
                let commands = entries
                    .iter()
                    .map(|entry| Command::Get {
                        key: entry.payload.clone(),
                    })
                    .collect();
                (*slot, commands)
            })
            .collect();
        let outcomes = self.fan_out(pipelines).await;

        let mut failed = Vec::new();
        for ((slot, entries), outcome) in groups.into_iter().zip(outcomes) {
            let replies = match outcome {
                Ok(replies) => replies,
                Err(e) => {
                    warn!(slot, keys = entries.len(), error = %e, "Shard read failed");
                    failed.extend(entries.into_iter().map(|entry| (entry.index, entry.key)));
                    continue;
                }
            };

            for (entry, reply) in entries.into_iter().zip(replies) {
                let value = reply
                    .into_optional_bytes()
                    .and_then(|raw| raw.map(|raw| self.codec.decrypt(&raw)).transpose());
                match value {
                    Ok(value) => {
                        result.values.insert(entry.key, value);
                    }
                    Err(e) => {
                        warn!(key = %entry.key, error = %e, "Unreadable value in batch read");
                        failed.push((entry.index, entry.key));
                    }
                }
            }
        }

        result.failed = in_request_order(failed);
        result
    }

    /// Store many entries at once
    pub async fn set_many(&self, entries: Vec<SetEntry>) -> BatchWrite {
        let mut result = BatchWrite::default();
        let mut failed = Vec::new();
        let mut routed = Vec::with_capacity(entries.len());

        for (index, entry) in entries.into_iter().enumerate() {
            match self.codec.encrypt(&entry.value) {
                Ok(value) => routed.push(Routed {
                    index,
                    payload: (self.prefixed(&entry.key), value, entry.ttl),
                    key: entry.key,
                }),
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Cannot encode value for batch write");
                    failed.push((index, entry.key));
                }
            }
        }

        let groups = group_by_shard(routed, |entry| entry.payload.0.as_str());
        let pipelines = groups
            .iter()
            .map(|(slot, entries)| {
                let commands = entries
                    .iter()
                    .map(|entry| {
                        let (key, value, ttl) = &entry.payload;
                        match *ttl {
                            Some(ttl_secs) if ttl_secs > 0 => Command::SetEx {
                                key: key.clone(),
                                value: value.clone(),
                                ttl_secs,
                            },
                            _ => Command::Set {
                                key: key.clone(),
                                value: value.clone(),
                            },
                        }
                    })
                    .collect();
                (*slot, commands)
            })
            .collect();
        let outcomes = self.fan_out(pipelines).await;

        let mut stored = Vec::new();
        for ((slot, entries), outcome) in groups.into_iter().zip(outcomes) {
            let keys = entries.into_iter().map(|entry| (entry.index, entry.key));
            match outcome {
                Ok(_) => stored.extend(keys),
                Err(e) => {
                    warn!(slot, error = %e, "Shard write failed");
                    failed.extend(keys);
                }
            }
        }

        result.stored = in_request_order(stored);
        result.failed = in_request_order(failed);
        result
    }

    /// Delete many keys at once, summing removals across shards
    pub async fn delete_many<K: AsRef<str>>(&self, keys: &[K]) -> BatchDelete {
        let mut result = BatchDelete::default();
        let mut seen = HashSet::new();
        let mut routed = Vec::new();
        for key in keys {
            let key: &str = key.as_ref();
            if seen.insert(key) {
                routed.push(Routed {
                    index: routed.len(),
                    key: key.to_string(),
                    payload: self.prefixed(key),
                });
            }
        }
        if routed.is_empty() {
            return result;
        }

        let groups = group_by_shard(routed, |entry| entry.payload.as_str());
        let pipelines = groups
            .iter()
            .map(|(slot, entries)| {
                let commands = entries
                    .iter()
                    .map(|entry| Command::Del {
                        keys: vec![entry.payload.clone()],
                    })
                    .collect();
                (*slot, commands)
            })
            .collect();
        let outcomes = self.fan_out(pipelines).await;

        let mut failed = Vec::new();
        for ((slot, entries), outcome) in groups.into_iter().zip(outcomes) {
            let outcome = outcome.and_then(|replies| {
                replies
                    .into_iter()
                    .map(Reply::into_int)
                    .sum::<Result<i64>>()
            });
            match outcome {
                Ok(deleted) => result.deleted += deleted.max(0) as u64,
                Err(e) => {
                    warn!(slot, keys = entries.len(), error = %e, "Shard delete failed");
                    failed.extend(entries.into_iter().map(|entry| (entry.index, entry.key)));
                }
            }
        }

        result.failed = in_request_order(failed);
        result
    }
}

fn in_request_order(mut keys: Vec<(usize, String)>) -> Vec<String> {
    keys.sort_by_key(|(index, _)| *index);
    keys.into_iter().map(|(_, key)| key).collect()
}
