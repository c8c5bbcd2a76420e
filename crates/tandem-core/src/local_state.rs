use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::widget::write_atomic;

/// Durable per-device keys the background sync reads without a session.
#[async_trait]
pub trait LocalState: Send + Sync {
    async fn partner_id(&self) -> Result<Option<Uuid>>;

    async fn set_partner_id(&self, partner: Option<Uuid>) -> Result<()>;

    /// Observability only.
    async fn last_sync(&self) -> Result<Option<DateTime<Utc>>>;

    async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct LocalStateDoc {
    #[serde(rename = "@couple:partnerId", default, skip_serializing_if = "Option::is_none")]
    partner_id: Option<Uuid>,
    #[serde(rename = "@couple:lastSync", default, skip_serializing_if = "Option::is_none")]
    last_sync: Option<DateTime<Utc>>,
    /// Keys written by other components are carried through untouched.
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

/// Keys persisted as one JSON object on disk.
pub struct FileLocalState {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileLocalState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<LocalStateDoc> {
        match tokio::fs::read(&self.path).await {
            Ok(body) => serde_json::from_slice(&body)
                .with_context(|| format!("parse {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalStateDoc::default()),
            Err(e) => Err(e).with_context(|| format!("read {}", self.path.display())),
        }
    }

    async fn update(&self, f: impl FnOnce(&mut LocalStateDoc) + Send) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        f(&mut doc);
        write_atomic(&self.path, &serde_json::to_vec_pretty(&doc)?).await
    }
}

#[async_trait]
impl LocalState for FileLocalState {
    async fn partner_id(&self) -> Result<Option<Uuid>> {
        Ok(self.load().await?.partner_id)
    }

    async fn set_partner_id(&self, partner: Option<Uuid>) -> Result<()> {
        self.update(|doc| doc.partner_id = partner).await
    }

    async fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.load().await?.last_sync)
    }

    async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
        self.update(|doc| doc.last_sync = Some(at)).await
    }
}

#[derive(Default)]
pub struct MemoryLocalState {
    doc: Mutex<LocalStateDoc>,
}

impl MemoryLocalState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalState for MemoryLocalState {
    async fn partner_id(&self) -> Result<Option<Uuid>> {
        Ok(self.doc.lock().await.partner_id)
    }

    async fn set_partner_id(&self, partner: Option<Uuid>) -> Result<()> {
        self.doc.lock().await.partner_id = partner;
        Ok(())
    }

    async fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.doc.lock().await.last_sync)
    }

    async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
        self.doc.lock().await.last_sync = Some(at);
        Ok(())
    }
}
