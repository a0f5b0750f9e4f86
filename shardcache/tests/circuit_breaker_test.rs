//! Circuit breaker behaviour seen through the client

mod common;

#[cfg(test)]
mod tests {
    use super::common::{keys_on_node, setup_test_client, test_config};
    use shardcache::{CacheError, CircuitBreakerConfig, CircuitState, SetEntry, Transport};
    use std::time::Duration;

    fn breaker(threshold: u32, reset_timeout_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            threshold,
            reset_timeout_ms,
        }
    }

    #[tokio::test]
    async fn test_open_circuit_skips_transport() {
        let config = test_config().with_circuit_breaker(breaker(3, 60_000));
        let (client, transport) = setup_test_client(1, config).await;
        transport.set_node_down(0, true);

        for _ in 0..3 {
            assert!(matches!(client.get("k").await, Err(CacheError::Remote(_))));
        }
        assert_eq!(client.circuit_state(), CircuitState::Open);

        let calls = transport.command_count();
        assert_eq!(client.get("k").await, Err(CacheError::CircuitOpen));
        assert_eq!(client.set("k", "v", None).await, Err(CacheError::CircuitOpen));
        assert_eq!(transport.command_count(), calls);
    }

    #[tokio::test]
    async fn test_recovers_after_reset_timeout() {
        let config = test_config().with_circuit_breaker(breaker(2, 50));
        let (client, transport) = setup_test_client(1, config).await;

        transport.set_node_down(0, true);
        let _ = client.get("k").await;
        let _ = client.get("k").await;
        assert_eq!(client.circuit_state(), CircuitState::Open);

        transport.set_node_down(0, false);
        assert_eq!(client.get("k").await, Err(CacheError::CircuitOpen));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(client.get("k").await.unwrap(), None);
        assert_eq!(client.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failed_trial_reopens() {
        let config = test_config().with_circuit_breaker(breaker(1, 50));
        let (client, transport) = setup_test_client(1, config).await;

        transport.set_node_down(0, true);
        let _ = client.ping().await;
        assert_eq!(client.circuit_state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(matches!(client.ping().await, Err(CacheError::Remote(_))));
        assert_eq!(client.circuit_state(), CircuitState::Open);
        assert_eq!(client.ping().await, Err(CacheError::CircuitOpen));
    }

    #[tokio::test]
    async fn test_decryption_failures_do_not_trip_breaker() {
        let config = test_config()
            .with_encryption_key(super::common::TEST_KEY)
            .with_circuit_breaker(breaker(1, 60_000));
        let (client, transport) = setup_test_client(1, config).await;

        transport
            .execute(shardcache::Command::Set {
                key: "bad".into(),
                value: b"enc:00:00:00".to_vec(),
            })
            .await
            .unwrap();
        assert!(matches!(client.get("bad").await, Err(CacheError::Decryption(_))));
        assert_eq!(client.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_batch_counts_once_against_the_breaker() {
        let config = test_config().with_circuit_breaker(breaker(2, 60_000));
        let (client, transport) = setup_test_client(1, config).await;
        transport.set_node_down(0, true);

        // Two slot groups fail, but the batch is one breaker outcome
        let entries = || vec![SetEntry::new("{a}1", "x"), SetEntry::new("{b}1", "y")];
        let result = client.mset(entries()).await.unwrap();
        assert_eq!(result.failed.len(), 2);
        assert_eq!(client.circuit_state(), CircuitState::Closed);

        let result = client.mset(entries()).await.unwrap();
        assert_eq!(result.failed.len(), 2);
        assert_eq!(client.circuit_state(), CircuitState::Open);

        let calls = transport.command_count();
        assert_eq!(client.get("{a}1").await, Err(CacheError::CircuitOpen));
        let result = client.mget(&["{a}1", "{b}1"]).await.unwrap();
        assert_eq!(result.failed.len(), 2);
        assert_eq!(transport.command_count(), calls);
    }

    #[tokio::test]
    async fn test_many_failing_slots_do_not_starve_healthy_shard() {
        let (client, transport) = setup_test_client(2, test_config()).await;
        let threshold = CircuitBreakerConfig::default().threshold as usize;
        let down = keys_on_node(&transport, "", 0, threshold + 3);
        let up = keys_on_node(&transport, "", 1, 2);
        transport.set_node_down(0, true);

        let entries = down
            .iter()
            .chain(&up)
            .map(|key| SetEntry::new(key.clone(), "v"))
            .collect();
        let result = client.mset(entries).await.unwrap();

        assert_eq!(result.stored, up);
        assert_eq!(result.failed, down);
        assert_eq!(client.circuit_state(), CircuitState::Closed);
        assert_eq!(client.get(&up[0]).await.unwrap(), Some(b"v".to_vec()));
    }
}
