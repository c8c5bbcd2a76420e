use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use tandem_types::{Couple, Identity, InviteCode, StatusRecord};

use super::{Account, ClaimOutcome, DocumentStore, MintOutcome, StatusPatch, next_stamp};
use crate::dispatcher::{Dispatcher, StoreEvent};

/// Process-local store. Each operation takes the lock once, so the
/// check-then-set operations are atomic.
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    dispatcher: Dispatcher,
}

#[derive(Default)]
struct MemoryInner {
    /// email -> identity id
    emails: HashMap<String, Uuid>,
    accounts: HashMap<Uuid, Account>,
    couples: HashMap<String, Couple>,
    statuses: HashMap<Uuid, StatusRecord>,
}

impl MemoryInner {
    fn is_paired(&self, member: Uuid) -> bool {
        self.couples
            .values()
            .any(|c| !c.is_pending() && (c.first_member == member || c.second_member == Some(member)))
    }

    fn attach(&mut self, member: Uuid, couple_id: &str) {
        if let Some(account) = self.accounts.get_mut(&member) {
            account.identity.couple_id = Some(couple_id.to_string());
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryInner::default()),
            dispatcher: Dispatcher::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let id = account.identity.id;
        if inner.emails.contains_key(&account.identity.email) || inner.accounts.contains_key(&id) {
            return Ok(false);
        }
        inner.emails.insert(account.identity.email.clone(), id);
        inner.accounts.insert(id, account.clone());
        Ok(true)
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let inner = self.inner.read().await;
        Ok(inner
            .emails
            .get(email)
            .and_then(|id| inner.accounts.get(id))
            .cloned())
    }

    async fn identity(&self, id: Uuid) -> Result<Option<Identity>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.get(&id).map(|a| a.identity.clone()))
    }

    async fn insert_couple(&self, couple: &Couple) -> Result<MintOutcome> {
        let mut inner = self.inner.write().await;
        let member = couple.first_member;

        if !inner.accounts.contains_key(&member) {
            return Ok(MintOutcome::UnknownMember);
        }
        if inner.is_paired(member) {
            return Ok(MintOutcome::MemberPaired);
        }
        if let Some(existing) = inner
            .couples
            .values()
            .find(|c| c.first_member == member && c.is_pending())
            .cloned()
        {
            inner.attach(member, &existing.id);
            return Ok(MintOutcome::PendingExists(existing));
        }
        if inner.couples.values().any(|c| c.invite_code == couple.invite_code) {
            return Ok(MintOutcome::CodeTaken);
        }

        inner.couples.insert(couple.id.clone(), couple.clone());
        inner.attach(member, &couple.id);
        drop(inner);

        self.dispatcher.broadcast(StoreEvent::CoupleChanged(couple.clone()));
        Ok(MintOutcome::Minted)
    }

    async fn couple(&self, id: &str) -> Result<Option<Couple>> {
        Ok(self.inner.read().await.couples.get(id).cloned())
    }

    async fn couple_by_code(&self, code: &InviteCode) -> Result<Option<Couple>> {
        let inner = self.inner.read().await;
        Ok(inner.couples.values().find(|c| &c.invite_code == code).cloned())
    }

    async fn pending_couples(&self, first_member: Uuid) -> Result<Vec<Couple>> {
        let inner = self.inner.read().await;
        let mut pending: Vec<Couple> = inner
            .couples
            .values()
            .filter(|c| c.first_member == first_member && c.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pending)
    }

    async fn claim_couple(&self, id: &str, member: Uuid, at: DateTime<Utc>) -> Result<ClaimOutcome> {
        let mut inner = self.inner.write().await;

        if !inner.accounts.contains_key(&member) {
            return Ok(ClaimOutcome::UnknownMember);
        }
        if inner.is_paired(member) {
            return Ok(ClaimOutcome::MemberPaired);
        }
        let claimed = match inner.couples.get_mut(id) {
            Some(c) if c.is_pending() && c.first_member != member => {
                c.second_member = Some(member);
                c.connected_at = Some(at);
                c.clone()
            }
            _ => return Ok(ClaimOutcome::Taken),
        };

        let pruned: Vec<String> = inner
            .couples
            .values()
            .filter(|c| c.first_member == member && c.is_pending())
            .map(|c| c.id.clone())
            .collect();
        for couple_id in &pruned {
            inner.couples.remove(couple_id);
        }
        inner.attach(member, id);
        drop(inner);

        self.dispatcher.broadcast(StoreEvent::CoupleChanged(claimed.clone()));
        for couple_id in &pruned {
            self.dispatcher.broadcast(StoreEvent::CoupleRemoved {
                couple_id: couple_id.clone(),
            });
        }
        Ok(ClaimOutcome::Claimed {
            couple: claimed,
            pruned,
        })
    }

    async fn status(&self, owner: Uuid) -> Result<Option<StatusRecord>> {
        Ok(self.inner.read().await.statuses.get(&owner).cloned())
    }

    async fn upsert_status(&self, owner: Uuid, patch: &StatusPatch) -> Result<StatusRecord> {
        let mut inner = self.inner.write().await;
        let previous = inner.statuses.get(&owner).cloned();
        let stamp = next_stamp(previous.as_ref().map(|r| r.updated_at));

        let mut record = previous.unwrap_or_else(|| StatusRecord::neutral(owner, stamp));
        if let Some(activity) = patch.activity {
            record.activity = activity;
        }
        if let Some(emotion) = patch.emotion {
            record.emotion = emotion;
        }
        if let Some(message) = &patch.message {
            record.message = message.clone();
        }
        record.updated_at = stamp;

        inner.statuses.insert(owner, record.clone());
        drop(inner);

        self.dispatcher.broadcast(StoreEvent::StatusChanged(record.clone()));
        Ok(record)
    }

    async fn insert_default_status(&self, owner: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.statuses.contains_key(&owner) {
            return Ok(false);
        }
        let record = StatusRecord::neutral(owner, next_stamp(None));
        inner.statuses.insert(owner, record.clone());
        drop(inner);

        self.dispatcher.broadcast(StoreEvent::StatusChanged(record));
        Ok(true)
    }

    fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.dispatcher.subscribe()
    }
}
