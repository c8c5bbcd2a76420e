//! Document persistence seam.
//!
//! Every read and write the core performs is expressed through
//! [`DocumentStore`]. Two implementations exist: [`SqliteStore`] (durable)
//! and [`MemoryStore`] (process-local). Pick one with [`open_store`].

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use tandem_types::{Activity, Couple, Emotion, Identity, InviteCode, StatusRecord};

use crate::config::{BackendKind, Config};
use crate::dispatcher::StoreEvent;

/// An identity plus the credential the local identity provider checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub identity: Identity,
    pub password_hash: String,
}

/// Result of [`DocumentStore::insert_couple`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintOutcome {
    Minted,
    CodeTaken,
    /// The member's existing pending couple, now attached to them
    PendingExists(Couple),
    /// The member already belongs to a completed couple
    MemberPaired,
    UnknownMember,
}

/// Result of [`DocumentStore::claim_couple`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// `pruned` holds the ids of the joiner's own pending couples that were
    /// deleted in the same step.
    Claimed { couple: Couple, pruned: Vec<String> },
    /// The joiner already belongs to a completed couple
    MemberPaired,
    /// The couple is completed, gone, or was minted by the joiner
    Taken,
    UnknownMember,
}

/// Fields to write on a status record. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPatch {
    pub activity: Option<Activity>,
    pub emotion: Option<Emotion>,
    pub message: Option<String>,
}

impl StatusPatch {
    pub fn full(activity: Activity, emotion: Emotion, message: impl Into<String>) -> Self {
        Self {
            activity: Some(activity),
            emotion: Some(emotion),
            message: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns `false` if the email is already registered.
    async fn insert_account(&self, account: &Account) -> Result<bool>;

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn identity(&self, id: Uuid) -> Result<Option<Identity>>;

    /// Insert a pending couple and attach it to its first member, unless the
    /// member is already paired, already holds a pending couple (which is
    /// attached and returned instead) or the code is taken. One atomic step.
    async fn insert_couple(&self, couple: &Couple) -> Result<MintOutcome>;

    async fn couple(&self, id: &str) -> Result<Option<Couple>>;

    async fn couple_by_code(&self, code: &InviteCode) -> Result<Option<Couple>>;

    async fn pending_couples(&self, first_member: Uuid) -> Result<Vec<Couple>>;

    /// Complete a pending couple with `member`. One atomic step: refuse if
    /// `member` is already paired, set the second member only while unset,
    /// delete `member`'s own pending couples and attach the couple to
    /// `member`. Exactly one concurrent joiner gets `Claimed`.
    async fn claim_couple(&self, id: &str, member: Uuid, at: DateTime<Utc>) -> Result<ClaimOutcome>;

    async fn status(&self, owner: Uuid) -> Result<Option<StatusRecord>>;

    /// Merge `patch` into the owner's record, creating it with neutral
    /// defaults if absent. The store stamps `updated_at`.
    async fn upsert_status(&self, owner: Uuid, patch: &StatusPatch) -> Result<StatusRecord>;

    /// Returns `true` if a neutral record was created.
    async fn insert_default_status(&self, owner: Uuid) -> Result<bool>;

    /// Change feed for writes made through this store instance.
    fn events(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Open the backend named by `config`.
pub fn open_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match config.backend {
        BackendKind::Sqlite => {
            let store = SqliteStore::open(&config.db_path)?;
            info!("Using SQLite store at {}", config.db_path.display());
            Ok(Arc::new(store))
        }
        BackendKind::Memory => {
            info!("Using in-memory store; data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Server time for a status write, forced past the previous stamp so that
/// successive writes to one record are strictly ordered.
pub(crate) fn next_stamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = now_millis();
    match previous {
        Some(prev) if prev >= now => prev + TimeDelta::milliseconds(1),
        _ => now,
    }
}

/// Current time at the millisecond precision every backend persists.
pub(crate) fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
