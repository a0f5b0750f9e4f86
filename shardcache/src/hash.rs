//! Hash operations
//!
//! Field values are encrypted like plain values; field names are stored as
//! given.

use crate::client::ClusterClient;
use crate::error::{CacheError, Result};
use crate::transport::Command;
use std::collections::HashMap;

impl ClusterClient {
    /// Set a field in a hash, returning `true` when the field is new
    pub async fn hset(&self, key: &str, field: &str, value: impl AsRef<[u8]>) -> Result<bool> {
        let key = self.prefixed(key);
        let command = self.encode(value.as_ref()).map(|value| Command::HSet {
            key,
            field: field.to_string(),
            value,
        });
        self.instrumented("hset", command, |reply| Ok(reply.into_int()? > 0))
            .await
    }

    /// Get a field from a hash
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let command = Command::HGet {
            key: self.prefixed(key),
            field: field.to_string(),
        };
        self.instrumented("hget", Ok(command), |reply| {
            self.decode(reply.into_optional_bytes()?)
        })
        .await
    }

    /// Get every field of a hash; empty when the key does not exist
    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>> {
        let command = Command::HGetAll {
            key: self.prefixed(key),
        };
        self.instrumented("hgetall", Ok(command), |reply| {
            let items = reply.into_bytes_list()?;
            if items.len() % 2 != 0 {
                return Err(CacheError::Remote(
                    "HGETALL returned an odd number of items".to_string(),
                ));
            }

            let mut fields = HashMap::with_capacity(items.len() / 2);
            let mut items = items.into_iter();
            while let (Some(field), Some(value)) = (items.next(), items.next()) {
                let field = String::from_utf8(field)
                    .map_err(|_| CacheError::Remote("hash field is not valid UTF-8".to_string()))?;
                fields.insert(field, self.decrypt(&value)?);
            }
            Ok(fields)
        })
        .await
    }
}
