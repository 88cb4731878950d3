//! Process-local document store
//!
//! Used when sender and dashboard share one process, and by tests. Every
//! write is published on a broadcast channel while the store lock is held,
//! so a watch that snapshots under the same lock never misses a write.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::document::{child_path, split_path, Document, DocumentStore, Subscription};
use crate::error::{AppError, Result};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
enum Change {
    Put { path: String, doc: Document },
    Delete { path: String },
}

struct Shared {
    docs: Mutex<BTreeMap<String, Document>>,
    changes: broadcast::Sender<Change>,
}

impl Shared {
    fn list(docs: &BTreeMap<String, Document>, collection: &str) -> Vec<(String, Document)> {
        let prefix = format!("{}/", collection.trim_end_matches('/'));
        docs.range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, doc)| {
                let id = &path[prefix.len()..];
                (!id.contains('/')).then(|| (id.to_string(), doc.clone()))
            })
            .collect()
    }
}

/// In-memory [`DocumentStore`]
#[derive(Clone)]
pub struct MemoryDocumentStore {
    shared: Arc<Shared>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                docs: Mutex::new(BTreeMap::new()),
                changes,
            }),
        }
    }

    /// Number of stored documents (all collections)
    pub fn len(&self) -> usize {
        self.shared.docs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.docs.lock().is_empty()
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, path: &str) -> Result<Option<Document>> {
        Ok(self.shared.docs.lock().get(path).cloned())
    }

    async fn set(&self, path: &str, doc: Document) -> Result<()> {
        let mut docs = self.shared.docs.lock();
        docs.insert(path.to_string(), doc.clone());
        let _ = self.shared.changes.send(Change::Put {
            path: path.to_string(),
            doc,
        });
        Ok(())
    }

    async fn update(&self, path: &str, fields: Document) -> Result<()> {
        let mut docs = self.shared.docs.lock();
        let doc = docs
            .get_mut(path)
            .ok_or_else(|| AppError::DocumentNotFound(path.to_string()))?;
        for (key, value) in fields {
            doc.insert(key, value);
        }
        let doc = doc.clone();
        let _ = self.shared.changes.send(Change::Put {
            path: path.to_string(),
            doc,
        });
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut docs = self.shared.docs.lock();
        if docs.remove(path).is_some() {
            let _ = self.shared.changes.send(Change::Delete {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    async fn add(&self, collection: &str, doc: Document) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string()[..20].to_string();
        self.set(&child_path(collection, &id), doc).await?;
        Ok(id)
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Document)>> {
        Ok(Shared::list(&self.shared.docs.lock(), collection))
    }

    async fn watch_document(
        &self,
        path: &str,
        capacity: usize,
    ) -> Result<Subscription<Option<Document>>> {
        let (initial, mut changes) = {
            let docs = self.shared.docs.lock();
            (docs.get(path).cloned(), self.shared.changes.subscribe())
        };

        let (tx, sub) = Subscription::channel(capacity);
        let shared = self.shared.clone();
        let path = path.to_string();

        tokio::spawn(async move {
            if !tx.send(initial).await {
                return;
            }
            loop {
                let change = tokio::select! {
                    _ = tx.cancelled() => break,
                    change = changes.recv() => change,
                };
                let delivered = match change {
                    Ok(Change::Put { path: p, doc }) if p == path => tx.send(Some(doc)).await,
                    Ok(Change::Delete { path: p }) if p == path => tx.send(None).await,
                    Ok(_) => true,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Document watch on {} lagged by {} changes, resyncing", path, skipped);
                        let current = shared.docs.lock().get(&path).cloned();
                        tx.send(current).await
                    }
                    Err(RecvError::Closed) => false,
                };
                if !delivered {
                    break;
                }
            }
            debug!("Document watch on {} ended", path);
        });

        Ok(sub)
    }

    async fn watch_collection(
        &self,
        collection: &str,
        capacity: usize,
    ) -> Result<Subscription<(String, Document)>> {
        let collection = collection.trim_end_matches('/').to_string();
        let (initial, mut changes) = {
            let docs = self.shared.docs.lock();
            (Shared::list(&docs, &collection), self.shared.changes.subscribe())
        };

        let (tx, sub) = Subscription::channel(capacity);
        let shared = self.shared.clone();

        tokio::spawn(async move {
            let mut seen = HashSet::new();
            for (id, doc) in initial {
                seen.insert(id.clone());
                if !tx.send((id, doc)).await {
                    return;
                }
            }
            loop {
                let change = tokio::select! {
                    _ = tx.cancelled() => break,
                    change = changes.recv() => change,
                };
                let added = match change {
                    Ok(Change::Put { path, doc }) => match split_path(&path) {
                        Some((parent, id)) if parent == collection && !seen.contains(id) => {
                            vec![(id.to_string(), doc)]
                        }
                        _ => Vec::new(),
                    },
                    Ok(Change::Delete { .. }) => Vec::new(),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "Collection watch on {} lagged by {} changes, resyncing",
                            collection, skipped
                        );
                        let docs = shared.docs.lock();
                        Shared::list(&docs, &collection)
                            .into_iter()
                            .filter(|(id, _)| !seen.contains(id))
                            .collect()
                    }
                    Err(RecvError::Closed) => break,
                };
                for (id, doc) in added {
                    seen.insert(id.clone());
                    if !tx.send((id, doc)).await {
                        return;
                    }
                }
            }
            debug!("Collection watch on {} ended", collection);
        });

        Ok(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_set_get_update_delete() {
        let store = MemoryDocumentStore::new();

        store.set("rooms/a", doc(json!({"status": "waiting"}))).await.unwrap();
        store.update("rooms/a", doc(json!({"offer": "x"}))).await.unwrap();

        let got = store.get("rooms/a").await.unwrap().unwrap();
        assert_eq!(got["status"], "waiting");
        assert_eq!(got["offer"], "x");

        store.delete("rooms/a").await.unwrap();
        assert!(store.get("rooms/a").await.unwrap().is_none());
        // Deleting again is fine
        store.delete("rooms/a").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let store = MemoryDocumentStore::new();
        let err = store
            .update("rooms/missing", doc(json!({"offer": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_collection() {
        let store = MemoryDocumentStore::new();
        store.set("rooms/a", doc(json!({}))).await.unwrap();
        store.add("rooms/a/ice", doc(json!({"n": 1}))).await.unwrap();
        store.add("rooms/a/ice", doc(json!({"n": 2}))).await.unwrap();
        store.add("rooms/ab/ice", doc(json!({"n": 3}))).await.unwrap();

        let listed = store.list("rooms/a/ice").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(store.list("rooms").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_watch_document() {
        let store = MemoryDocumentStore::new();
        let mut watch = store.watch_document("rooms/a", 8).await.unwrap();

        // Initial snapshot of a missing document
        assert_eq!(watch.recv().await, Some(None));

        store.set("rooms/a", doc(json!({"v": 1}))).await.unwrap();
        store.set("rooms/b", doc(json!({"v": 2}))).await.unwrap();
        store.delete("rooms/a").await.unwrap();

        let first = timeout(Duration::from_secs(1), watch.recv()).await.unwrap();
        assert_eq!(first.unwrap().unwrap()["v"], 1);
        let second = timeout(Duration::from_secs(1), watch.recv()).await.unwrap();
        assert_eq!(second, Some(None));
    }

    #[tokio::test]
    async fn test_watch_collection_delivers_existing_and_new_once() {
        let store = MemoryDocumentStore::new();
        let existing = store.add("rooms/a/ice", doc(json!({"n": 1}))).await.unwrap();

        let mut watch = store.watch_collection("rooms/a/ice", 8).await.unwrap();
        let (id, _) = watch.recv().await.unwrap();
        assert_eq!(id, existing);

        let added = store.add("rooms/a/ice", doc(json!({"n": 2}))).await.unwrap();
        let (id, body) = timeout(Duration::from_secs(1), watch.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, added);
        assert_eq!(body["n"], 2);

        // Rewriting a seen document is not a new addition
        store
            .set(&child_path("rooms/a/ice", &added), doc(json!({"n": 3})))
            .await
            .unwrap();
        assert!(timeout(Duration::from_millis(100), watch.recv()).await.is_err());
    }
}
