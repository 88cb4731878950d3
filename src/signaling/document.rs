//! Document store abstraction
//!
//! The signaling protocol only needs a handful of document operations plus
//! change notification. Backends implement [`DocumentStore`]; watches are
//! delivered as [`Subscription`] handles backed by bounded channels.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A document body: top-level field map
pub type Document = serde_json::Map<String, Value>;

/// Remote document database used for signaling
///
/// Paths are slash separated, alternating collection and document id:
/// `webrtc_signaling/<room>` is a document, `webrtc_signaling/<room>/ice_candidates`
/// a sub-collection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    async fn get(&self, path: &str) -> Result<Option<Document>>;

    /// Create or replace a document
    async fn set(&self, path: &str, doc: Document) -> Result<()>;

    /// Merge top-level fields into an existing document
    ///
    /// Fails with `DocumentNotFound` if the document does not exist.
    async fn update(&self, path: &str, fields: Document) -> Result<()>;

    /// Delete a document; deleting a missing document is not an error
    async fn delete(&self, path: &str) -> Result<()>;

    /// Append a document with a generated id, returns the id
    async fn add(&self, collection: &str, doc: Document) -> Result<String>;

    /// List `(id, document)` pairs of a collection
    async fn list(&self, collection: &str) -> Result<Vec<(String, Document)>>;

    /// Watch a single document
    ///
    /// Delivers the current value first (None when absent), then every
    /// subsequent value. Delivery is at-least-once.
    async fn watch_document(
        &self,
        path: &str,
        capacity: usize,
    ) -> Result<Subscription<Option<Document>>>;

    /// Watch a collection for added documents
    ///
    /// Existing documents are delivered first. Each id is delivered at most
    /// once per subscription.
    async fn watch_collection(
        &self,
        collection: &str,
        capacity: usize,
    ) -> Result<Subscription<(String, Document)>>;
}

/// Join a parent path and a child segment
pub fn child_path(parent: &str, child: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), child)
}

/// Split `a/b/c` into (`a/b`, `c`)
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    path.rsplit_once('/')
}

/// Receiving half of a watch
///
/// Dropping the handle (or calling [`Subscription::cancel`]) stops the
/// producer and releases whatever the backend holds for the watch.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    cancel: CancellationToken,
}

/// Producing half of a watch, owned by the backend task
pub struct SubscriptionSender<T> {
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
}

impl<T> Subscription<T> {
    /// Create a connected sender/subscription pair with a bounded buffer
    pub fn channel(capacity: usize) -> (SubscriptionSender<T>, Subscription<T>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        (
            SubscriptionSender {
                tx,
                cancel: cancel.clone(),
            },
            Subscription { rx, cancel },
        )
    }

    /// Next event, or None once the producer has ended or the handle was cancelled
    pub async fn recv(&mut self) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Transform events on a background task
    ///
    /// Items for which `f` returns None are skipped. Cancelling the returned
    /// subscription drops `self`, which cancels the source watch.
    pub fn filter_map<U, F>(mut self, capacity: usize, mut f: F) -> Subscription<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(T) -> Option<U> + Send + 'static,
    {
        let (tx, out) = Subscription::channel(capacity);
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = tx.cancelled() => break,
                    item = self.recv() => item,
                };
                let Some(item) = item else { break };
                if let Some(mapped) = f(item) {
                    if !tx.send(mapped).await {
                        break;
                    }
                }
            }
        });
        out
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T> SubscriptionSender<T> {
    /// Deliver an item, waiting for buffer space
    ///
    /// Returns false once the subscriber is gone; the producer should stop.
    pub async fn send(&self, item: T) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            res = self.tx.send(item) => res.is_ok(),
        }
    }

    /// Resolves when the subscriber cancels or drops its handle
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_paths() {
        assert_eq!(child_path("rooms", "a"), "rooms/a");
        assert_eq!(child_path("rooms/", "a"), "rooms/a");
        assert_eq!(split_path("rooms/a/ice/x"), Some(("rooms/a/ice", "x")));
        assert_eq!(split_path("rooms"), None);
    }

    #[tokio::test]
    async fn test_subscription_delivers_in_order() {
        let (tx, mut sub) = Subscription::channel(4);
        assert!(tx.send(1).await);
        assert!(tx.send(2).await);
        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_drop_cancels_producer() {
        let (tx, sub) = Subscription::<u32>::channel(1);
        drop(sub);
        assert!(!tx.send(1).await);
        tokio::time::timeout(Duration::from_secs(1), tx.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_recv() {
        let (tx, mut sub) = Subscription::channel(4);
        assert!(tx.send("a").await);
        sub.cancel();
        assert_eq!(sub.recv().await, None);
        assert!(!tx.send("b").await);
    }

    #[tokio::test]
    async fn test_filter_map() {
        let (tx, source) = Subscription::channel(4);
        let mut evens = source.filter_map(4, |n: u32| (n % 2 == 0).then_some(n * 10));

        for n in 1..=4 {
            assert!(tx.send(n).await);
        }
        assert_eq!(evens.recv().await, Some(20));
        assert_eq!(evens.recv().await, Some(40));

        drop(evens);
        tokio::time::timeout(Duration::from_secs(1), tx.cancelled())
            .await
            .unwrap();
    }
}
