//! Multi-key operation tests across simulated shards

mod common;

#[cfg(test)]
mod tests {
    use super::common::{TEST_KEY, keys_on_node, setup_test_client, test_config};
    use shardcache::metrics::{STATUS_ERROR, STATUS_PARTIAL, STATUS_SUCCESS};
    use shardcache::{SetEntry, compute_slot};
    use std::collections::HashSet;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_mget_reports_missing_keys() {
        let (client, _transport) = setup_test_client(3, test_config()).await;
        client.set("a", "1", None).await.unwrap();
        client.set("b", "2", None).await.unwrap();

        let result = client.mget(&["a", "b", "missing"]).await.unwrap();
        assert_eq!(result.values.len(), 3);
        assert_eq!(result.get("a"), Some(&b"1"[..]));
        assert_eq!(result.get("b"), Some(&b"2"[..]));
        assert_eq!(result.values.get("missing"), Some(&None));
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn test_mset_mget_round_trip_across_shards() {
        let config = test_config().with_encryption_key(TEST_KEY);
        let (client, transport) = setup_test_client(3, config).await;

        let keys: Vec<String> = (0..30).map(|i| format!("product:{}", i)).collect();
        let nodes: HashSet<usize> = keys.iter().map(|k| transport.node_for_key(k)).collect();
        assert!(nodes.len() > 1, "keys should span several nodes");

        let entries = keys
            .iter()
            .enumerate()
            .map(|(i, key)| SetEntry::new(key.clone(), format!("price={}", i)))
            .collect();
        let written = client.mset(entries).await.unwrap();
        assert_eq!(written.stored, keys);
        assert!(written.is_complete());

        let read = client.mget(&keys).await.unwrap();
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(read.get(key), Some(format!("price={}", i).as_bytes()));
        }
        assert_eq!(client.metrics().operation_count("mget", STATUS_SUCCESS), 1);
    }

    #[tokio::test]
    async fn test_hash_tagged_keys_share_one_pipeline() {
        let (client, transport) = setup_test_client(3, test_config()).await;
        let keys = ["{cart:9}:items", "{cart:9}:total", "{cart:9}:owner"];
        assert!(keys.iter().all(|k| compute_slot(k) == compute_slot(keys[0])));

        let before = transport.pipeline_count();
        client
            .mset(keys.iter().map(|k| SetEntry::new(*k, "x")).collect())
            .await
            .unwrap();
        assert_eq!(transport.pipeline_count() - before, 1);
    }

    #[tokio::test]
    async fn test_unreachable_shard_degrades_mset() {
        let (client, transport) = setup_test_client(2, test_config()).await;
        let reachable = keys_on_node(&transport, "", 0, 2);
        let unreachable = keys_on_node(&transport, "", 1, 2);

        transport.set_node_down(1, true);
        let entries = reachable
            .iter()
            .chain(&unreachable)
            .map(|key| SetEntry::new(key.clone(), "v"))
            .collect();
        let result = client.mset(entries).await.unwrap();

        assert_eq!(result.stored, reachable);
        assert_eq!(result.failed, unreachable);
        assert_eq!(client.metrics().operation_count("mset", STATUS_PARTIAL), 1);

        transport.set_node_down(1, false);
        for key in &reachable {
            assert_eq!(transport.raw_get(key), Some(b"v".to_vec()));
        }
        for key in &unreachable {
            assert_eq!(transport.raw_get(key), None);
        }
    }

    #[tokio::test]
    async fn test_unreachable_shard_degrades_mget() {
        let (client, transport) = setup_test_client(2, test_config()).await;
        let up = keys_on_node(&transport, "", 0, 1).remove(0);
        let down = keys_on_node(&transport, "", 1, 1).remove(0);
        client.set(&up, "1", None).await.unwrap();
        client.set(&down, "2", None).await.unwrap();

        transport.set_node_down(1, true);
        let result = client.mget(&[up.as_str(), down.as_str()]).await.unwrap();
        assert_eq!(result.get(&up), Some(&b"1"[..]));
        assert_eq!(result.values.get(&down), Some(&None));
        assert_eq!(result.failed, vec![down.clone()]);

        transport.set_node_down(0, true);
        let result = client.mget(&[up.as_str(), down.as_str()]).await.unwrap();
        assert_eq!(result.failed.len(), 2);
        assert_eq!(client.metrics().operation_count("mget", STATUS_ERROR), 1);
    }

    #[tokio::test]
    async fn test_mdelete_sums_counts_with_prefix() {
        let config = test_config().with_key_prefix("tmp:");
        let (client, transport) = setup_test_client(3, config).await;
        let keys: Vec<String> = (0..12).map(|i| format!("session:{}", i)).collect();
        client
            .mset(keys.iter().map(|k| SetEntry::new(k.clone(), "s")).collect())
            .await
            .unwrap();
        assert!(transport.raw_get("tmp:session:3").is_some());

        let mut request = keys.clone();
        request.push("session:absent".to_string());
        let deleted = client.mdelete(&request).await.unwrap();
        assert_eq!(deleted.deleted, 12);
        assert!(deleted.is_complete());

        let again = client.mdelete(&keys).await.unwrap();
        assert_eq!(again.deleted, 0);
    }

    #[tokio::test]
    async fn test_mset_with_ttl() {
        let (client, _transport) = setup_test_client(2, test_config()).await;
        client
            .mset(vec![
                SetEntry::new("short", "1").with_ttl(30),
                SetEntry::new("long", "2"),
            ])
            .await
            .unwrap();

        let ttl = client.ttl("short").await.unwrap();
        assert!(ttl > 0 && ttl <= 30);
        assert_eq!(client.ttl("long").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_shard_pipelines_run_concurrently() {
        let (client, transport) = setup_test_client(4, test_config()).await;
        let keys: Vec<String> = (0..4)
            .flat_map(|node| keys_on_node(&transport, "", node, 2))
            .collect();
        let slots: HashSet<u16> = keys.iter().map(|k| compute_slot(k)).collect();
        assert!(slots.len() >= 4);

        transport.set_latency(Some(Duration::from_millis(100)));
        let before = transport.pipeline_count();
        let start = Instant::now();
        let result = client.mget(&keys).await.unwrap();
        let elapsed = start.elapsed();

        assert!(result.is_complete());
        assert_eq!(transport.pipeline_count() - before, slots.len() as u64);
        assert!(
            elapsed < Duration::from_millis(100 * slots.len() as u64 / 2),
            "mget took {:?} for {} slot groups",
            elapsed,
            slots.len()
        );
    }

    #[tokio::test]
    async fn test_mdelete_with_duplicates_on_failed_cluster_is_error() {
        let (client, transport) = setup_test_client(1, test_config()).await;
        transport.set_node_down(0, true);

        let result = client.mdelete(&["a", "a", "b", "b"]).await.unwrap();
        assert_eq!(result.failed, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(client.metrics().operation_count("mdelete", STATUS_ERROR), 1);
        assert_eq!(client.metrics().operation_count("mdelete", STATUS_PARTIAL), 0);
    }
}
