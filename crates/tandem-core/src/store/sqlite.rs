use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::error;
use uuid::Uuid;

use tandem_db::Database;
use tandem_db::models::{CoupleClaim, CoupleInsert, CoupleRow, IdentityRow, StatusRow};
use tandem_types::{Couple, Identity, InviteCode, StatusRecord};

use super::{Account, ClaimOutcome, DocumentStore, MintOutcome, StatusPatch, now_millis};
use crate::dispatcher::{Dispatcher, StoreEvent};

/// Durable store on top of `tandem-db`. Blocking SQLite calls run on the
/// blocking pool; events only reach subscribers of this process.
pub struct SqliteStore {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::open(path).with_context(|| format!("open database {}", path.display()))?;
        Ok(Self::from_database(db))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
        }
    }

    /// Run blocking DB work off the async runtime
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                anyhow!("database task failed: {}", e)
            })?
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert_account(&self, account: &Account) -> Result<bool> {
        let row = IdentityRow {
            id: account.identity.id.to_string(),
            email: account.identity.email.clone(),
            password: account.password_hash.clone(),
            name: account.identity.name.clone(),
            character: account.identity.character.as_str().to_string(),
            couple_id: account.identity.couple_id.clone(),
            created_at: account.identity.created_at.timestamp_millis(),
        };
        self.blocking(move |db| db.create_identity(&row)).await
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let email = email.to_string();
        let row = self.blocking(move |db| db.get_identity_by_email(&email)).await?;
        row.map(account_from_row).transpose()
    }

    async fn identity(&self, id: Uuid) -> Result<Option<Identity>> {
        let row = self
            .blocking(move |db| db.get_identity_by_id(&id.to_string()))
            .await?;
        Ok(row.map(account_from_row).transpose()?.map(|a| a.identity))
    }

    async fn insert_couple(&self, couple: &Couple) -> Result<MintOutcome> {
        let row = CoupleRow {
            id: couple.id.clone(),
            first_member: couple.first_member.to_string(),
            second_member: None,
            invite_code: couple.invite_code.to_string(),
            created_at: couple.created_at.timestamp_millis(),
            connected_at: None,
        };
        let outcome = match self.blocking(move |db| db.insert_couple(&row)).await? {
            CoupleInsert::Inserted => MintOutcome::Minted,
            CoupleInsert::CodeTaken => MintOutcome::CodeTaken,
            CoupleInsert::PendingExists(existing) => {
                MintOutcome::PendingExists(couple_from_row(existing)?)
            }
            CoupleInsert::MemberPaired => MintOutcome::MemberPaired,
            CoupleInsert::UnknownMember => MintOutcome::UnknownMember,
        };
        if outcome == MintOutcome::Minted {
            self.dispatcher.broadcast(StoreEvent::CoupleChanged(couple.clone()));
        }
        Ok(outcome)
    }

    async fn couple(&self, id: &str) -> Result<Option<Couple>> {
        let id = id.to_string();
        let row = self.blocking(move |db| db.get_couple(&id)).await?;
        row.map(couple_from_row).transpose()
    }

    async fn couple_by_code(&self, code: &InviteCode) -> Result<Option<Couple>> {
        let code = code.to_string();
        let row = self.blocking(move |db| db.get_couple_by_code(&code)).await?;
        row.map(couple_from_row).transpose()
    }

    async fn pending_couples(&self, first_member: Uuid) -> Result<Vec<Couple>> {
        let rows = self
            .blocking(move |db| db.get_pending_couples(&first_member.to_string()))
            .await?;
        rows.into_iter().map(couple_from_row).collect()
    }

    async fn claim_couple(&self, id: &str, member: Uuid, at: DateTime<Utc>) -> Result<ClaimOutcome> {
        let id = id.to_string();
        let claim = self
            .blocking(move |db| db.claim_couple(&id, &member.to_string(), at.timestamp_millis()))
            .await?;

        let (row, pruned) = match claim {
            CoupleClaim::Claimed { couple, pruned } => (couple, pruned),
            CoupleClaim::MemberPaired => return Ok(ClaimOutcome::MemberPaired),
            CoupleClaim::Taken => return Ok(ClaimOutcome::Taken),
            CoupleClaim::UnknownMember => return Ok(ClaimOutcome::UnknownMember),
        };
        let couple = couple_from_row(row)?;

        self.dispatcher.broadcast(StoreEvent::CoupleChanged(couple.clone()));
        for couple_id in &pruned {
            self.dispatcher.broadcast(StoreEvent::CoupleRemoved {
                couple_id: couple_id.clone(),
            });
        }
        Ok(ClaimOutcome::Claimed { couple, pruned })
    }

    async fn status(&self, owner: Uuid) -> Result<Option<StatusRecord>> {
        let row = self
            .blocking(move |db| db.get_status(&owner.to_string()))
            .await?;
        row.map(status_from_row).transpose()
    }

    async fn upsert_status(&self, owner: Uuid, patch: &StatusPatch) -> Result<StatusRecord> {
        let activity = patch.activity.map(|a| a.as_str());
        let emotion = patch.emotion.map(|e| e.as_str());
        let message = patch.message.clone();
        let now = now_millis().timestamp_millis();

        let row = self
            .blocking(move |db| {
                db.upsert_status(&owner.to_string(), activity, emotion, message.as_deref(), now)
            })
            .await?;
        let record = status_from_row(row)?;
        self.dispatcher.broadcast(StoreEvent::StatusChanged(record.clone()));
        Ok(record)
    }

    async fn insert_default_status(&self, owner: Uuid) -> Result<bool> {
        let now = now_millis().timestamp_millis();
        let created = self
            .blocking(move |db| db.insert_default_status(&owner.to_string(), now))
            .await?;
        match created {
            Some(row) => {
                self.dispatcher.broadcast(StoreEvent::StatusChanged(status_from_row(row)?));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.dispatcher.subscribe()
    }
}

fn millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn uuid(s: &str) -> Result<Uuid> {
    s.parse().with_context(|| format!("corrupt id '{}'", s))
}

fn account_from_row(row: IdentityRow) -> Result<Account> {
    Ok(Account {
        identity: Identity {
            id: uuid(&row.id)?,
            email: row.email,
            name: row.name,
            character: row.character.parse()?,
            couple_id: row.couple_id,
            created_at: millis(row.created_at)?,
        },
        password_hash: row.password,
    })
}

fn couple_from_row(row: CoupleRow) -> Result<Couple> {
    Ok(Couple {
        first_member: uuid(&row.first_member)?,
        second_member: row.second_member.as_deref().map(uuid).transpose()?,
        invite_code: InviteCode::parse(&row.invite_code)
            .with_context(|| format!("corrupt invite code on couple '{}'", row.id))?,
        created_at: millis(row.created_at)?,
        connected_at: row.connected_at.map(millis).transpose()?,
        id: row.id,
    })
}

fn status_from_row(row: StatusRow) -> Result<StatusRecord> {
    Ok(StatusRecord {
        owner_id: uuid(&row.owner_id)?,
        activity: row.activity.parse()?,
        emotion: row.emotion.parse()?,
        message: row.message,
        updated_at: millis(row.updated_at)?,
    })
}
