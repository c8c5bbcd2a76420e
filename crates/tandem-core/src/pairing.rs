use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_types::{Couple, InviteCode};

use crate::dispatcher::StoreEvent;
use crate::error::{Error, Result};
use crate::identity::resolve_profile;
use crate::status::StatusStore;
use crate::store::{ClaimOutcome, DocumentStore, MintOutcome, now_millis};
use crate::subscription::{CoupleListener, Subscription};

/// Fresh codes tried before minting gives up. With 32^6 codes a second
/// attempt is already rare.
const MINT_ATTEMPTS: usize = 8;

/// Links two identities into a couple through a one-time invite code.
#[derive(Clone)]
pub struct PairingService {
    store: Arc<dyn DocumentStore>,
    statuses: StatusStore,
}

impl PairingService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let statuses = StatusStore::new(store.clone());
        Self { store, statuses }
    }

    /// Return the caller's pending invite code, minting one if none exists.
    pub async fn generate_invite_code(&self, caller: Option<Uuid>) -> Result<InviteCode> {
        let caller = caller.ok_or(Error::Unauthenticated)?;
        let me = resolve_profile(self.store.as_ref(), caller).await?;

        if let Some(couple) = self.attached_couple(me.couple_id.as_deref()).await? {
            if !couple.is_pending() {
                return Err(Error::AlreadyPaired);
            }
            if couple.first_member == caller {
                return Ok(couple.invite_code);
            }
        }

        let couple = self.mint(caller).await?;
        self.statuses.ensure_default(caller).await?;

        info!("{} holds invite {} for couple {}", caller, couple.invite_code, couple.id);
        Ok(couple.invite_code)
    }

    /// Insert a pending couple under a fresh code. The store attaches it to
    /// `caller`, or hands back (and attaches) one `caller` already holds.
    async fn mint(&self, caller: Uuid) -> Result<Couple> {
        for attempt in 1..=MINT_ATTEMPTS {
            let created_at = now_millis();
            let couple = Couple {
                id: Couple::derive_id(caller, created_at),
                first_member: caller,
                second_member: None,
                invite_code: InviteCode::random(),
                created_at,
                connected_at: None,
            };

            match self.store.insert_couple(&couple).await? {
                MintOutcome::Minted => return Ok(couple),
                MintOutcome::PendingExists(existing) => return Ok(existing),
                MintOutcome::MemberPaired => return Err(Error::AlreadyPaired),
                MintOutcome::UnknownMember => return Err(Error::ProfileNotFound),
                MintOutcome::CodeTaken => {
                    debug!("invite code collision on attempt {}", attempt);
                }
            }
        }
        Err(Error::RemoteUnavailable(anyhow!(
            "no free invite code after {} attempts",
            MINT_ATTEMPTS
        )))
    }

    /// Redeem another identity's invite code and complete their couple.
    pub async fn join_with_code(&self, caller: Option<Uuid>, code: &str) -> Result<Couple> {
        let caller = caller.ok_or(Error::Unauthenticated)?;
        let me = resolve_profile(self.store.as_ref(), caller).await?;

        // Early answer only; the claim below re-checks atomically
        let current = self.attached_couple(me.couple_id.as_deref()).await?;
        if current.is_some_and(|c| !c.is_pending()) {
            return Err(Error::AlreadyPaired);
        }

        let code = InviteCode::parse(code).map_err(|_| Error::InvalidCode)?;
        let couple = self
            .store
            .couple_by_code(&code)
            .await?
            .ok_or(Error::InvalidCode)?;

        if couple.first_member == caller {
            return Err(Error::SelfPairing);
        }
        if !couple.is_pending() {
            return Err(Error::CodeAlreadyUsed);
        }

        let (couple, pruned) = match self.store.claim_couple(&couple.id, caller, now_millis()).await? {
            ClaimOutcome::Claimed { couple, pruned } => (couple, pruned),
            ClaimOutcome::MemberPaired => return Err(Error::AlreadyPaired),
            ClaimOutcome::Taken => return Err(Error::CodeAlreadyUsed),
            ClaimOutcome::UnknownMember => return Err(Error::ProfileNotFound),
        };
        for stale in &pruned {
            debug!("pruned abandoned invite {} of {}", stale, caller);
        }
        self.statuses.ensure_default(caller).await?;

        info!("{} joined couple {} with {}", caller, couple.id, couple.first_member);
        Ok(couple)
    }

    /// The couple attached to `caller`'s profile, if any.
    pub async fn get_relation(&self, caller: Uuid) -> Result<Option<Couple>> {
        let Some(me) = self.store.identity(caller).await? else {
            return Ok(None);
        };
        self.attached_couple(me.couple_id.as_deref()).await
    }

    async fn attached_couple(&self, couple_id: Option<&str>) -> Result<Option<Couple>> {
        match couple_id {
            Some(id) => Ok(self.store.couple(id).await?),
            None => Ok(None),
        }
    }

    /// Deliver the couple immediately, then after each change. `None` is
    /// delivered when the couple is pruned.
    pub fn watch_relation(&self, couple_id: &str, listener: Arc<dyn CoupleListener>) -> Subscription {
        let store = self.store.clone();
        let couple_id = couple_id.to_string();
        let mut events = store.events();

        Subscription::spawn(async move {
            let current = read_couple(store.as_ref(), &couple_id).await;
            listener.on_couple_changed(&couple_id, current).await;

            loop {
                match events.recv().await {
                    Ok(StoreEvent::CoupleChanged(couple)) if couple.id == couple_id => {
                        listener.on_couple_changed(&couple_id, Some(couple)).await;
                    }
                    Ok(StoreEvent::CoupleRemoved { couple_id: removed }) if removed == couple_id => {
                        listener.on_couple_changed(&couple_id, None).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("couple watch {} lagged by {} events, resyncing", couple_id, n);
                        let current = read_couple(store.as_ref(), &couple_id).await;
                        listener.on_couple_changed(&couple_id, current).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

/// The other member of `couple`, or `None` if `self_id` is not a member.
pub fn resolve_partner_id(couple: &Couple, self_id: Uuid) -> Option<Uuid> {
    couple.partner_of(self_id)
}

async fn read_couple(store: &dyn DocumentStore, id: &str) -> Option<Couple> {
    match store.couple(id).await {
        Ok(couple) => couple,
        Err(e) => {
            warn!("couple read for {} failed: {:#}", id, e);
            None
        }
    }
}
