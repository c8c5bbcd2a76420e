#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use tandem_core::dispatcher::StoreEvent;
use tandem_core::identity::register_account;
use tandem_core::store::{Account, ClaimOutcome, MintOutcome, StatusPatch};
use tandem_core::{DocumentStore, MemoryStore, SqliteStore};
use tandem_types::{CharacterVariant, Couple, Identity, InviteCode, StatusRecord};
use tempfile::TempDir;

pub fn memory() -> Arc<dyn DocumentStore> {
    Arc::new(MemoryStore::new())
}

pub fn sqlite(dir: &TempDir) -> Arc<dyn DocumentStore> {
    Arc::new(SqliteStore::open(&dir.path().join("tandem.db")).unwrap())
}

pub async fn register(store: &Arc<dyn DocumentStore>, name: &str) -> Identity {
    register_account(
        store.as_ref(),
        &format!("{}@example.com", name.to_lowercase()),
        "password",
        name,
        CharacterVariant::Female,
    )
    .await
    .unwrap()
}

/// Delegates to a memory store, with failures injected on demand: status
/// writes can error out and couple inserts can report a taken code.
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_status_writes: AtomicBool,
    /// Inserts still to answer with `CodeTaken`; `usize::MAX` never runs out
    pub code_collisions: AtomicUsize,
    pub insert_attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_status_writes: AtomicBool::new(false),
            code_collisions: AtomicUsize::new(0),
            insert_attempts: AtomicUsize::new(0),
        }
    }

    fn take_collision(&self) -> bool {
        self.code_collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                usize::MAX => Some(n),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn insert_account(&self, account: &Account) -> anyhow::Result<bool> {
        self.inner.insert_account(account).await
    }
    async fn account_by_email(&self, email: &str) -> anyhow::Result<Option<Account>> {
        self.inner.account_by_email(email).await
    }
    async fn identity(&self, id: Uuid) -> anyhow::Result<Option<Identity>> {
        self.inner.identity(id).await
    }
    async fn insert_couple(&self, couple: &Couple) -> anyhow::Result<MintOutcome> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        if self.take_collision() {
            return Ok(MintOutcome::CodeTaken);
        }
        self.inner.insert_couple(couple).await
    }
    async fn couple(&self, id: &str) -> anyhow::Result<Option<Couple>> {
        self.inner.couple(id).await
    }
    async fn couple_by_code(&self, code: &InviteCode) -> anyhow::Result<Option<Couple>> {
        self.inner.couple_by_code(code).await
    }
    async fn pending_couples(&self, first_member: Uuid) -> anyhow::Result<Vec<Couple>> {
        self.inner.pending_couples(first_member).await
    }
    async fn claim_couple(
        &self,
        id: &str,
        member: Uuid,
        at: DateTime<Utc>,
    ) -> anyhow::Result<ClaimOutcome> {
        self.inner.claim_couple(id, member, at).await
    }
    async fn status(&self, owner: Uuid) -> anyhow::Result<Option<StatusRecord>> {
        self.inner.status(owner).await
    }
    async fn upsert_status(&self, owner: Uuid, patch: &StatusPatch) -> anyhow::Result<StatusRecord> {
        if self.fail_status_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("connection reset"));
        }
        self.inner.upsert_status(owner, patch).await
    }
    async fn insert_default_status(&self, owner: Uuid) -> anyhow::Result<bool> {
        self.inner.insert_default_status(owner).await
    }
    fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events()
    }
}
