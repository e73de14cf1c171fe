//! Event fan-out: local subscribers and best-effort delivery to peers.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use trellis_types::PeerEvent;

use crate::remote::RemoteClient;

/// Publishes peer-set changes.
///
/// Local delivery never fails; a send with no subscribers is simply dropped.
/// Remote delivery runs detached and only logs failures, so the operation
/// that triggered it is never blocked or failed by an unreachable peer.
#[derive(Debug, Clone)]
pub struct Notifier {
    local_tx: broadcast::Sender<PeerEvent>,
    client: RemoteClient,
}

impl Notifier {
    pub fn new(client: RemoteClient, capacity: usize) -> Self {
        let (local_tx, _) = broadcast::channel(capacity);
        Self { local_tx, client }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.local_tx.subscribe()
    }

    pub fn publish_local(&self, event: PeerEvent) {
        tracing::debug!(topic = %event.topic, "publishing local event");
        let _ = self.local_tx.send(event);
    }

    /// Delivers `event` to the node at `address` in the background.
    pub fn publish_remote(&self, address: String, event: PeerEvent) -> JoinHandle<()> {
        let client = self.client.clone();
        tokio::spawn(async move {
            match client.publish_event(&address, &event).await {
                Ok(()) => {
                    tracing::debug!(%address, topic = %event.topic, "delivered remote event");
                }
                Err(e) => {
                    tracing::warn!(%address, topic = %event.topic, error = %e, "failed to deliver remote event");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn local_subscribers_receive_events() {
        let notifier = Notifier::new(RemoteClient::new(Duration::from_secs(1)).unwrap(), 8);
        let mut rx = notifier.subscribe();

        notifier.publish_local(PeerEvent::new("update_peers_evt", serde_json::Value::Null));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "update_peers_evt");
    }

    #[tokio::test]
    async fn unreachable_peer_does_not_panic() {
        let notifier = Notifier::new(
            RemoteClient::new(Duration::from_millis(200)).unwrap(),
            8,
        );
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let handle = notifier.publish_remote(
            format!("http://{addr}"),
            PeerEvent::new("x", serde_json::Value::Null),
        );
        handle.await.unwrap();
    }
}
