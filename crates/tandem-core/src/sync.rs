//! Keeps the widget slot in step with the partner's status.
//!
//! Three triggers feed it: partner status events (debounced), the app
//! returning to the foreground (forced), and a periodic one-shot that runs
//! without an interactive session and takes its partner id from
//! [`LocalState`]. Failures are logged and swallowed; the next trigger
//! retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_types::{StatusRecord, WidgetSnapshot};

use crate::local_state::LocalState;
use crate::store::{DocumentStore, now_millis};
use crate::subscription::StatusListener;
use crate::widget::WidgetSurface;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Written(WidgetSnapshot),
    /// Partner profile or status missing; the slot was left as it was.
    NoData,
}

/// Result reported to the host scheduler after one background run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundSyncResult {
    NewData,
    NoData,
    Failed,
}

pub struct SyncBridge {
    store: Arc<dyn DocumentStore>,
    surface: Arc<dyn WidgetSurface>,
    local_state: Arc<dyn LocalState>,
    debounce: Duration,
    last_write: Mutex<Option<Instant>>,
}

impl SyncBridge {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        surface: Arc<dyn WidgetSurface>,
        local_state: Arc<dyn LocalState>,
        debounce: Duration,
    ) -> Self {
        Self {
            store,
            surface,
            local_state,
            debounce,
            last_write: Mutex::new(None),
        }
    }

    /// Read the partner's profile and status and write the snapshot.
    /// Concurrent calls race on the slot; the last writer wins.
    pub async fn sync(&self, partner_id: Uuid) -> anyhow::Result<SyncOutcome> {
        let outcome = sync_once(
            self.store.as_ref(),
            self.surface.as_ref(),
            self.local_state.as_ref(),
            partner_id,
        )
        .await?;
        if matches!(outcome, SyncOutcome::Written(_)) {
            *self.last_write.lock().await = Some(Instant::now());
        }
        Ok(outcome)
    }

    /// Debounced sync for a status change. Skipped entirely when the slot
    /// was written less than the debounce window ago.
    pub async fn on_status_event(&self, partner_id: Uuid) -> BackgroundSyncResult {
        let recent = self
            .last_write
            .lock()
            .await
            .is_some_and(|at| at.elapsed() < self.debounce);
        if recent {
            debug!("widget sync for {} debounced", partner_id);
            return BackgroundSyncResult::NoData;
        }
        self.sync_logged(partner_id).await
    }

    /// Forced sync on return to the foreground; ignores the debounce.
    pub async fn on_foreground(&self) -> BackgroundSyncResult {
        match self.local_state.partner_id().await {
            Ok(Some(partner_id)) => self.sync_logged(partner_id).await,
            Ok(None) => BackgroundSyncResult::NoData,
            Err(e) => {
                warn!("cannot read stored partner id: {:#}", e);
                BackgroundSyncResult::Failed
            }
        }
    }

    /// Persist the partner id the background trigger will use.
    pub async fn bind_partner(&self, partner_id: Option<Uuid>) -> anyhow::Result<()> {
        self.local_state.set_partner_id(partner_id).await?;
        debug!("widget sync bound to partner {:?}", partner_id);
        Ok(())
    }

    /// Run the one-shot body every `period` until the task is dropped.
    pub async fn run_periodic(&self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Widget sync every {}s", period.as_secs());

        loop {
            interval.tick().await;
            let result = run_background_sync(
                self.store.as_ref(),
                self.local_state.as_ref(),
                self.surface.as_ref(),
            )
            .await;
            if result == BackgroundSyncResult::NewData {
                *self.last_write.lock().await = Some(Instant::now());
            }
        }
    }

    async fn sync_logged(&self, partner_id: Uuid) -> BackgroundSyncResult {
        match self.sync(partner_id).await {
            Ok(SyncOutcome::Written(_)) => BackgroundSyncResult::NewData,
            Ok(SyncOutcome::NoData) => BackgroundSyncResult::NoData,
            Err(e) => {
                warn!("widget sync for {} failed: {:#}", partner_id, e);
                BackgroundSyncResult::Failed
            }
        }
    }
}

#[async_trait]
impl StatusListener for SyncBridge {
    async fn on_status_changed(&self, owner: Uuid, status: Option<StatusRecord>) {
        if status.is_some() {
            self.on_status_event(owner).await;
        }
    }
}

/// One background run. Needs nothing from an interactive session: the
/// partner id comes from durable local state.
pub async fn run_background_sync(
    store: &dyn DocumentStore,
    local_state: &dyn LocalState,
    surface: &dyn WidgetSurface,
) -> BackgroundSyncResult {
    let partner_id = match local_state.partner_id().await {
        Ok(Some(id)) => id,
        Ok(None) => {
            debug!("no partner bound; background sync skipped");
            return BackgroundSyncResult::NoData;
        }
        Err(e) => {
            warn!("cannot read stored partner id: {:#}", e);
            return BackgroundSyncResult::Failed;
        }
    };

    match sync_once(store, surface, local_state, partner_id).await {
        Ok(SyncOutcome::Written(_)) => BackgroundSyncResult::NewData,
        Ok(SyncOutcome::NoData) => BackgroundSyncResult::NoData,
        Err(e) => {
            warn!("background sync for {} failed: {:#}", partner_id, e);
            BackgroundSyncResult::Failed
        }
    }
}

async fn sync_once(
    store: &dyn DocumentStore,
    surface: &dyn WidgetSurface,
    local_state: &dyn LocalState,
    partner_id: Uuid,
) -> anyhow::Result<SyncOutcome> {
    let (Some(partner), Some(status)) = (
        store.identity(partner_id).await?,
        store.status(partner_id).await?,
    ) else {
        debug!("partner {} has no profile or status yet", partner_id);
        return Ok(SyncOutcome::NoData);
    };

    let snapshot = WidgetSnapshot::compose(&partner, &status);
    surface.write_snapshot(&snapshot).await?;

    if let Err(e) = surface.request_refresh().await {
        warn!("widget refresh request failed: {:#}", e);
    }
    if let Err(e) = local_state.set_last_sync(now_millis()).await {
        warn!("cannot record last sync time: {:#}", e);
    }

    debug!("widget shows {} as {}/{}", snapshot.name, snapshot.status, snapshot.emotion);
    Ok(SyncOutcome::Written(snapshot))
}
