//! The slot an out-of-process widget renders from.
//!
//! The widget refreshes on its own schedule and may coalesce or ignore
//! refresh requests, so a written snapshot is all that is guaranteed to
//! reach it eventually.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use tandem_types::WidgetSnapshot;

use crate::store::now_millis;

pub const SNAPSHOT_FILE: &str = "partner_status.json";
pub const REFRESH_FILE: &str = "refresh";

#[async_trait]
pub trait WidgetSurface: Send + Sync {
    /// Replace the slot wholesale.
    async fn write_snapshot(&self, snapshot: &WidgetSnapshot) -> Result<()>;

    async fn read_snapshot(&self) -> Result<Option<WidgetSnapshot>>;

    /// Ask the widget to re-render. No delivery guarantee.
    async fn request_refresh(&self) -> Result<()>;
}

/// Snapshot kept as a JSON file in a directory shared with the widget
/// process.
pub struct FileWidgetSurface {
    dir: PathBuf,
}

impl FileWidgetSurface {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    pub fn refresh_path(&self) -> PathBuf {
        self.dir.join(REFRESH_FILE)
    }
}

#[async_trait]
impl WidgetSurface for FileWidgetSurface {
    async fn write_snapshot(&self, snapshot: &WidgetSnapshot) -> Result<()> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.snapshot_path(), &body).await?;
        debug!("widget snapshot written to {}", self.snapshot_path().display());
        Ok(())
    }

    async fn read_snapshot(&self) -> Result<Option<WidgetSnapshot>> {
        let path = self.snapshot_path();
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        let snapshot = serde_json::from_slice(&body)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(snapshot))
    }

    async fn request_refresh(&self) -> Result<()> {
        // The widget side watches this file's contents change
        let stamp = now_millis().timestamp_millis().to_string();
        write_atomic(&self.refresh_path(), stamp.as_bytes()).await
    }
}

/// Write to a sibling temp file, then rename over `path`, so a reader in
/// another process never sees a half-written file.
pub(crate) async fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, body)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

/// In-process slot, for tests and for hosts without a shared directory.
#[derive(Default)]
pub struct MemoryWidgetSurface {
    slot: RwLock<Option<WidgetSnapshot>>,
    refreshes: AtomicUsize,
}

impl MemoryWidgetSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl WidgetSurface for MemoryWidgetSurface {
    async fn write_snapshot(&self, snapshot: &WidgetSnapshot) -> Result<()> {
        *self.slot.write().await = Some(snapshot.clone());
        Ok(())
    }

    async fn read_snapshot(&self) -> Result<Option<WidgetSnapshot>> {
        Ok(self.slot.read().await.clone())
    }

    async fn request_refresh(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
