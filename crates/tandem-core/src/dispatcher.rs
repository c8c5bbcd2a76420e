use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use tandem_types::{Couple, StatusRecord};

/// Change notifications emitted by a store after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    StatusChanged(StatusRecord),
    CoupleChanged(Couple),
    CoupleRemoved { couple_id: String },
}

impl StoreEvent {
    /// Status events are keyed by owner id.
    pub fn status_owner(&self) -> Option<Uuid> {
        match self {
            Self::StatusChanged(r) => Some(r.owner_id),
            _ => None,
        }
    }

    /// Couple events are keyed by couple id.
    pub fn couple_id(&self) -> Option<&str> {
        match self {
            Self::CoupleChanged(c) => Some(&c.id),
            Self::CoupleRemoved { couple_id } => Some(couple_id),
            Self::StatusChanged(_) => None,
        }
    }
}

/// Fans store writes out to every live subscriber in this process.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<StoreEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to store events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all subscribers. No subscribers is not an error.
    pub fn broadcast(&self, event: StoreEvent) {
        trace!("dispatch {:?}", event);
        let _ = self.inner.broadcast_tx.send(event);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
