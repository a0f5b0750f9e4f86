//! Pub/Sub operations

use crate::client::ClusterClient;
use crate::error::Result;
use crate::transport::Command;

impl ClusterClient {
    /// Publish a message to a channel
    ///
    /// Channel names are not prefixed and messages are sent as given, since
    /// nothing is stored at rest.
    ///
    /// # Returns
    /// The number of subscribers that received the message
    pub async fn publish(&self, channel: &str, message: impl AsRef<[u8]>) -> Result<i64> {
        let command = Command::Publish {
            channel: channel.to_string(),
            message: message.as_ref().to_vec(),
        };
        self.instrumented("publish", Ok(command), |reply| reply.into_int())
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::transport::MemoryTransport;
    use crate::{ClusterClient, ClusterConfig, MetricsRecorder, NodeAddress};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let transport = MemoryTransport::new(2);
        let config = ClusterConfig::new([NodeAddress::new("127.0.0.1", 7000)])
            .with_key_prefix("app:")
            .with_encryption_key("ab".repeat(32));
        let metrics = Arc::new(MetricsRecorder::new("pubsub_tests").unwrap());
        let client =
            ClusterClient::with_metrics(config, Arc::new(transport.clone()), metrics).unwrap();

        assert_eq!(client.publish("user.created", "nobody").await.unwrap(), 0);

        let mut rx = transport.subscribe("user.created");
        assert_eq!(client.publish("user.created", "alice").await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), b"alice".to_vec());
    }
}
