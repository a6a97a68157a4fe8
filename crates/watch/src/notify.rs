//! Change-event and broadcast delivery.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vigil_store::{OwnerId, StoreError, WatchStore};

use crate::scheduler::ChangeEvent;

/// Outbound side of the chat transport. The Telegram client implements this;
/// tests use a recording stub.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, chat: OwnerId, text: &str) -> anyhow::Result<()>;
}

/// Consume change events and hand each to the transport once. Delivery
/// failures are logged, not retried, and never block later events.
pub fn spawn_dispatcher(
    notifier: Arc<dyn Notifier>,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = format!(
                "The content of the following site has changed:\n{}",
                event.url
            );
            match notifier.send_text(event.owner, &text).await {
                Ok(()) => debug!(owner = event.owner, url = %event.url, "change notification sent"),
                Err(err) => {
                    warn!(owner = event.owner, url = %event.url, %err, "change notification failed")
                }
            }
        }
        debug!("change event channel closed; dispatcher stopping");
    })
}

/// Send `text` once to every registered owner. Failed deliveries are logged
/// and skipped. Returns the number of successful sends.
pub async fn broadcast(
    store: &dyn WatchStore,
    notifier: &dyn Notifier,
    text: &str,
) -> Result<usize, StoreError> {
    let mut delivered = 0;
    for owner in store.all_accounts()? {
        match notifier.send_text(owner, text).await {
            Ok(()) => delivered += 1,
            Err(err) => warn!(owner, %err, "broadcast delivery failed"),
        }
    }
    Ok(delivered)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every (chat, text) pair it is asked to send; can be told to
    /// fail for specific chats.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(OwnerId, String)>>,
        pub failing: Mutex<Vec<OwnerId>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_text(&self, chat: OwnerId, text: &str) -> anyhow::Result<()> {
            if self.failing.lock().unwrap().contains(&chat) {
                anyhow::bail!("delivery refused for chat {chat}");
            }
            self.sent.lock().unwrap().push((chat, text.to_string()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingNotifier;
    use super::*;
    use vigil_store::MemoryStore;

    #[tokio::test]
    async fn dispatcher_names_url_and_survives_failures() {
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.failing.lock().unwrap().push(13);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_dispatcher(notifier.clone(), rx);

        tx.send(ChangeEvent {
            owner: 13,
            url: "http://fails.example".to_string(),
        })
        .unwrap();
        tx.send(ChangeEvent {
            owner: 42,
            url: "http://example.com".to_string(),
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 42);
        assert!(sent[0].1.contains("http://example.com"));
    }

    #[tokio::test]
    async fn broadcast_reaches_each_registered_owner_once() {
        let store = MemoryStore::new();
        store.register_account(1).unwrap();
        store.register_account(2).unwrap();
        store.register_account(3).unwrap();
        let notifier = RecordingNotifier::default();
        notifier.failing.lock().unwrap().push(2);

        let delivered = broadcast(&store, &notifier, "hello everyone").await.unwrap();
        assert_eq!(delivered, 2);
        let sent = notifier.sent.lock().unwrap();
        let chats: Vec<_> = sent.iter().map(|(c, _)| *c).collect();
        assert_eq!(chats, [1, 3]);
    }
}
