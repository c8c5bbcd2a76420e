use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use tandem_types::{Activity, Emotion, StatusRecord};

use crate::dispatcher::StoreEvent;
use crate::error::Result;
use crate::store::{DocumentStore, StatusPatch};
use crate::subscription::{StatusListener, Subscription};

/// Reads, writes and watches per-identity status records.
#[derive(Clone)]
pub struct StatusStore {
    store: Arc<dyn DocumentStore>,
}

impl StatusStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Overwrite all three fields. Message length is the caller's concern.
    pub async fn write_status(
        &self,
        owner: Uuid,
        activity: Activity,
        emotion: Emotion,
        message: &str,
    ) -> Result<StatusRecord> {
        self.merge_status(owner, StatusPatch::full(activity, emotion, message))
            .await
    }

    /// Partial update: fields left `None` keep their stored values.
    pub async fn merge_status(&self, owner: Uuid, patch: StatusPatch) -> Result<StatusRecord> {
        let record = self.store.upsert_status(owner, &patch).await?;
        debug!(
            "status of {} is now {}/{} at {}",
            owner, record.activity, record.emotion, record.updated_at
        );
        Ok(record)
    }

    pub async fn read_status(&self, owner: Uuid) -> Result<Option<StatusRecord>> {
        Ok(self.store.status(owner).await?)
    }

    /// Create the neutral record for `owner` if none exists yet.
    pub async fn ensure_default(&self, owner: Uuid) -> Result<bool> {
        Ok(self.store.insert_default_status(owner).await?)
    }

    /// Deliver the current record immediately, then every later write.
    pub fn subscribe(&self, owner: Uuid, listener: Arc<dyn StatusListener>) -> Subscription {
        let store = self.store.clone();
        // Register before the initial read so no write falls in between
        let mut events = store.events();

        Subscription::spawn(async move {
            let current = read_or_none(store.as_ref(), owner).await;
            listener.on_status_changed(owner, current).await;

            loop {
                match events.recv().await {
                    Ok(StoreEvent::StatusChanged(record)) if record.owner_id == owner => {
                        listener.on_status_changed(owner, Some(record)).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("status subscription for {} lagged by {} events, resyncing", owner, n);
                        let current = read_or_none(store.as_ref(), owner).await;
                        listener.on_status_changed(owner, current).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

async fn read_or_none(store: &dyn DocumentStore, owner: Uuid) -> Option<StatusRecord> {
    match store.status(owner).await {
        Ok(status) => status,
        Err(e) => {
            warn!("status read for {} failed: {:#}", owner, e);
            None
        }
    }
}
