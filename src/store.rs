use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{EvaluationRecord, NewEvaluation, RawEvaluation};

/// Number of entries in the "latest" view used by the record table.
pub const DEFAULT_LATEST_LIMIT: usize = 10;

/// Which slice of the collection a fetch or subscription covers. Both shapes
/// are ordered newest `created_at` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotQuery {
    All,
    Latest(usize),
}

/// Wake-ups signalling that the collection changed since the last fetch.
pub type ChangeFeed = BoxStream<'static, Result<(), StoreError>>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch(&self, query: SnapshotQuery) -> Result<Vec<EvaluationRecord>, StoreError>;

    async fn changes(&self) -> Result<ChangeFeed, StoreError>;

    /// Writes an already validated payload and returns the new id.
    async fn insert(&self, payload: NewEvaluation) -> Result<String, StoreError>;

    /// Removes a document by id. A missing id is not an error.
    async fn remove(&self, id: &str) -> Result<(), StoreError>;

    async fn create(&self, payload: NewEvaluation) -> Result<String, StoreError> {
        let payload = payload.validated()?;
        self.insert(payload).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.trim();
        if id.is_empty() {
            tracing::debug!("ignoring delete without a record id");
            return Ok(());
        }
        self.remove(id).await
    }
}

struct StoredDocument {
    id: String,
    doc: RawEvaluation,
}

/// In-process document collection with the same contract as the shared
/// store. Documents are kept in insertion order.
#[derive(Clone)]
pub struct MemoryStore {
    documents: Arc<RwLock<Vec<StoredDocument>>>,
    notify: broadcast::Sender<()>,
    offline: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(64);
        Self {
            documents: Arc::new(RwLock::new(Vec::new())),
            notify,
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stores a document verbatim, bypassing validation.
    pub async fn insert_raw(&self, doc: RawEvaluation) -> String {
        let id = Uuid::new_v4().to_string();
        self.documents.write().await.push(StoredDocument {
            id: id.clone(),
            doc,
        });
        self.announce();
        id
    }

    /// Makes every subsequent operation fail as if the store were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn announce(&self) {
        // No receivers simply means nobody is subscribed yet.
        let _ = self.notify.send(());
    }

    fn ensure_online(&self) -> Result<(), &'static str> {
        if self.offline.load(Ordering::SeqCst) {
            Err("store is offline")
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn fetch(&self, query: SnapshotQuery) -> Result<Vec<EvaluationRecord>, StoreError> {
        self.ensure_online().map_err(StoreError::read)?;

        let now = Utc::now();
        let documents = self.documents.read().await;
        let mut indexed: Vec<(usize, EvaluationRecord)> = documents
            .iter()
            .enumerate()
            .map(|(position, stored)| {
                (position, EvaluationRecord::from_raw(&stored.id, &stored.doc, now))
            })
            .collect();
        drop(documents);

        indexed.sort_by(|(pos_a, a), (pos_b, b)| {
            b.created_at.cmp(&a.created_at).then(pos_b.cmp(pos_a))
        });

        let limit = match query {
            SnapshotQuery::All => indexed.len(),
            SnapshotQuery::Latest(n) => n,
        };
        Ok(indexed
            .into_iter()
            .take(limit)
            .map(|(_, record)| record)
            .collect())
    }

    async fn changes(&self) -> Result<ChangeFeed, StoreError> {
        self.ensure_online().map_err(StoreError::read)?;

        let receiver = self.notify.subscribe();
        let feed = stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => Some((Ok(()), receiver)),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(feed.boxed())
    }

    async fn insert(&self, payload: NewEvaluation) -> Result<String, StoreError> {
        self.ensure_online().map_err(StoreError::write)?;

        let doc = payload.to_raw(Utc::now());
        let id = self.insert_raw(doc).await;
        tracing::debug!(%id, assessor = %payload.assessor, "evaluation stored");
        Ok(id)
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_online().map_err(StoreError::write)?;

        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|stored| stored.id != id);
        let removed = before != documents.len();
        drop(documents);

        if removed {
            self.announce();
        } else {
            tracing::debug!(%id, "delete of unknown evaluation treated as done");
        }
        Ok(())
    }
}
