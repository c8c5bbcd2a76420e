use std::future::Future;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use uuid::Uuid;

use tandem_types::{Couple, StatusRecord};

/// Receives a status record once on registration and again after every
/// write to it. Delivery is at-least-once and only the latest value is
/// guaranteed to arrive; across devices ordering is not guaranteed.
#[async_trait]
pub trait StatusListener: Send + Sync {
    async fn on_status_changed(&self, owner: Uuid, status: Option<StatusRecord>);
}

/// Receives a couple document once on registration and after every change.
/// `None` means the couple does not exist (or was pruned).
#[async_trait]
pub trait CoupleListener: Send + Sync {
    async fn on_couple_changed(&self, couple_id: &str, couple: Option<Couple>);
}

/// Handle for a live registration. Delivery stops on [`Subscription::cancel`]
/// or when the handle is dropped.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(fut)),
        }
    }

    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.abort();
    }
}
