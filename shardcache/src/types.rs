//! Shared request and result types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One entry of a batch write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetEntry {
    pub key: String,
    pub value: Vec<u8>,
    /// Time to live in seconds; `None` stores without expiry
    pub ttl: Option<u64>,
}

impl SetEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl = Some(ttl_secs);
        self
    }
}

/// Result of a batch read
///
/// Every requested key is present in `values`. Keys whose shard failed, or
/// whose value could not be decrypted, map to `None` and are listed in
/// `failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchGet {
    pub values: HashMap<String, Option<Vec<u8>>>,
    pub failed: Vec<String>,
}

impl BatchGet {
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.values.get(key).and_then(|v| v.as_deref())
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of a batch write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchWrite {
    pub stored: Vec<String>,
    pub failed: Vec<String>,
}

impl BatchWrite {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of a batch delete
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchDelete {
    /// Keys removed across all reachable shards
    pub deleted: u64,
    pub failed: Vec<String>,
}

impl BatchDelete {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Parsed `CLUSTER INFO` reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterInfo {
    pub state: String,
    pub slots_assigned: u64,
    pub slots_ok: u64,
    pub known_nodes: u64,
    pub size: u64,
    /// Every `name:value` line of the reply
    pub fields: BTreeMap<String, String>,
}

impl ClusterInfo {
    /// Parse the `name:value` lines of a `CLUSTER INFO` reply
    ///
    /// Unknown lines are kept in `fields`; missing numeric fields read as 0.
    pub fn parse(text: &str) -> Self {
        let fields: BTreeMap<String, String> = text
            .lines()
            .filter_map(|line| line.trim().split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect();

        let number = |name: &str| {
            fields
                .get(name)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };

        Self {
            state: fields.get("cluster_state").cloned().unwrap_or_default(),
            slots_assigned: number("cluster_slots_assigned"),
            slots_ok: number("cluster_slots_ok"),
            known_nodes: number("cluster_known_nodes"),
            size: number("cluster_size"),
            fields,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.state == "ok"
    }
}
