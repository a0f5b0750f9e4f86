//! List operations

use crate::client::ClusterClient;
use crate::error::Result;
use crate::transport::Command;

impl ClusterClient {
    /// Push values onto the head of a list, returning the new length
    ///
    /// Values are pushed in order, so the last one ends up at the head.
    pub async fn lpush<V: AsRef<[u8]>>(&self, key: &str, values: &[V]) -> Result<i64> {
        let key = self.prefixed(key);
        let command = values
            .iter()
            .map(|value| self.encode(value.as_ref()))
            .collect::<Result<Vec<_>>>()
            .map(|values| Command::LPush { key, values });
        self.instrumented("lpush", command, |reply| reply.into_int())
            .await
    }

    /// Pop a value from the tail of a list
    pub async fn rpop(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let command = Command::RPop {
            key: self.prefixed(key),
        };
        self.instrumented("rpop", Ok(command), |reply| {
            self.decode(reply.into_optional_bytes()?)
        })
        .await
    }

    /// Get a range of list elements; negative indices count from the tail
    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let command = Command::LRange {
            key: self.prefixed(key),
            start,
            stop,
        };
        self.instrumented("lrange", Ok(command), |reply| {
            reply
                .into_bytes_list()?
                .iter()
                .map(|stored| self.decrypt(stored))
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::transport::MemoryTransport;
    use crate::{CacheError, ClusterClient, ClusterConfig, MetricsRecorder, NodeAddress};
    use std::sync::Arc;

    async fn client(transport: &MemoryTransport, encryption_key: Option<&str>) -> ClusterClient {
        let mut config = ClusterConfig::new([NodeAddress::new("127.0.0.1", 7000)]);
        if let Some(key) = encryption_key {
            config = config.with_encryption_key(key);
        }
        let metrics = Arc::new(MetricsRecorder::new("list_tests").unwrap());
        let client =
            ClusterClient::with_metrics(config, Arc::new(transport.clone()), metrics).unwrap();
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_lpush_rpop_fifo() {
        let transport = MemoryTransport::new(2);
        let client = client(&transport, None).await;

        assert_eq!(client.lpush("jobs", &["a", "b"]).await.unwrap(), 2);
        assert_eq!(client.lpush("jobs", &["c"]).await.unwrap(), 3);

        assert_eq!(client.rpop("jobs").await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(client.rpop("jobs").await.unwrap(), Some(b"b".to_vec()));
        assert_eq!(client.rpop("jobs").await.unwrap(), Some(b"c".to_vec()));
        assert_eq!(client.rpop("jobs").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lrange_decrypts() {
        let transport = MemoryTransport::new(2);
        let key = "ff".repeat(32);
        let client = client(&transport, Some(&key)).await;

        client.lpush("events", &["one", "two", "three"]).await.unwrap();
        assert_eq!(
            client.lrange("events", 0, -1).await.unwrap(),
            vec![b"three".to_vec(), b"two".to_vec(), b"one".to_vec()]
        );
        assert_eq!(
            client.lrange("events", -1, -1).await.unwrap(),
            vec![b"one".to_vec()]
        );
        assert!(client.lrange("events", 5, 10).await.unwrap().is_empty());
        assert!(transport
            .raw_values("events")
            .iter()
            .all(|raw| raw.starts_with(b"enc:")));
    }

    #[tokio::test]
    async fn test_wrong_type_propagates() {
        let transport = MemoryTransport::new(1);
        let client = client(&transport, None).await;
        client.set("plain", "v", None).await.unwrap();
        assert!(matches!(
            client.lpush("plain", &["x"]).await,
            Err(CacheError::Remote(_))
        ));
    }
}
