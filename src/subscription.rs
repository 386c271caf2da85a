use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::EvaluationRecord;
use crate::store::{RecordStore, SnapshotQuery};

const SNAPSHOT_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    /// Complete replacement view of the subscribed records.
    Snapshot(Vec<EvaluationRecord>),
    /// Terminal failure; nothing follows it.
    Failed(String),
}

/// A live view over a record store. Every change in the store produces a
/// fresh snapshot until the subscription is cancelled or fails.
pub struct Subscription {
    receiver: mpsc::Receiver<SnapshotEvent>,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stops the subscription. Safe to call repeatedly; nothing is delivered
    /// afterwards, not even a snapshot already queued.
    pub fn unsubscribe(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            tracing::debug!("snapshot subscription cancelled");
        }
        self.task.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn recv(&mut self) -> Option<SnapshotEvent> {
        if self.is_cancelled() {
            return None;
        }
        let event = self.receiver.recv().await?;
        if self.is_cancelled() {
            return None;
        }
        Some(event)
    }
}

impl Stream for Subscription {
    type Item = SnapshotEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_cancelled() {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(_)) if self.is_cancelled() => Poll::Ready(None),
            other => other,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

pub fn subscribe_all<S>(store: Arc<S>) -> Subscription
where
    S: RecordStore + ?Sized + 'static,
{
    subscribe(store, SnapshotQuery::All)
}

pub fn subscribe_latest<S>(store: Arc<S>, limit: usize) -> Subscription
where
    S: RecordStore + ?Sized + 'static,
{
    subscribe(store, SnapshotQuery::Latest(limit))
}

/// Starts a background task that pushes a snapshot for `query` now and after
/// every change reported by the store. Must be called inside a Tokio runtime.
pub fn subscribe<S>(store: Arc<S>, query: SnapshotQuery) -> Subscription
where
    S: RecordStore + ?Sized + 'static,
{
    let (sender, receiver) = mpsc::channel(SNAPSHOT_BUFFER);
    let cancelled = Arc::new(AtomicBool::new(false));
    let task = tokio::spawn(run_snapshots(store, query, sender, Arc::clone(&cancelled)));

    Subscription {
        receiver,
        cancelled,
        task,
    }
}

async fn run_snapshots<S>(
    store: Arc<S>,
    query: SnapshotQuery,
    sender: mpsc::Sender<SnapshotEvent>,
    cancelled: Arc<AtomicBool>,
) where
    S: RecordStore + ?Sized,
{
    // Attach to the feed before the first read so no change slips between them.
    let mut changes = match store.changes().await {
        Ok(feed) => feed,
        Err(err) => {
            tracing::warn!(?query, error = %err, "could not attach to record changes");
            let _ = sender.send(SnapshotEvent::Failed(err.user_message())).await;
            return;
        }
    };

    loop {
        if cancelled.load(Ordering::SeqCst) {
            return;
        }

        match store.fetch(query).await {
            Ok(records) => {
                tracing::debug!(?query, count = records.len(), "snapshot ready");
                if sender.send(SnapshotEvent::Snapshot(records)).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                tracing::warn!(?query, error = %err, "snapshot fetch failed");
                let _ = sender.send(SnapshotEvent::Failed(err.user_message())).await;
                return;
            }
        }

        match changes.next().await {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                tracing::warn!(?query, error = %err, "record change feed failed");
                let _ = sender.send(SnapshotEvent::Failed(err.user_message())).await;
                return;
            }
            None => {
                tracing::debug!(?query, "record change feed closed");
                return;
            }
        }
    }
}
