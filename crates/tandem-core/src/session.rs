use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_types::{
    Activity, CharacterVariant, Couple, Emotion, Identity, InviteCode, MESSAGE_MAX_CHARS,
    StatusRecord,
};

use crate::error::{Error, Result};
use crate::identity::IdentityProvider;
use crate::pairing::PairingService;
use crate::state::{AppState, LocalStatus, PairingState};
use crate::status::StatusStore;
use crate::store::DocumentStore;
use crate::subscription::{CoupleListener, StatusListener, Subscription};
use crate::sync::{BackgroundSyncResult, SyncBridge};

/// Entry point for a UI layer on one device. Owns the [`AppState`] for the
/// signed-in identity and the live subscriptions that keep it current.
pub struct Session {
    inner: Arc<SessionInner>,
    _identity_watch: Subscription,
}

struct SessionInner {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    pairing: PairingService,
    statuses: StatusStore,
    bridge: Arc<SyncBridge>,
    state: watch::Sender<AppState>,
    /// Serializes sign-in, sign-out and provider-driven teardown
    lifecycle: Mutex<()>,
    couple_watch: Mutex<Option<Subscription>>,
    partner_watch: Mutex<Option<(Uuid, Subscription)>>,
}

impl Session {
    /// Spawns the identity follower, so it must run inside a Tokio runtime.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        bridge: Arc<SyncBridge>,
    ) -> Self {
        let (state, _) = watch::channel(AppState::default());
        let inner = Arc::new(SessionInner {
            pairing: PairingService::new(store.clone()),
            statuses: StatusStore::new(store.clone()),
            store,
            identity,
            bridge,
            state,
            lifecycle: Mutex::new(()),
            couple_watch: Mutex::new(None),
            partner_watch: Mutex::new(None),
        });
        let identity_watch = inner.follow_identity();
        Self {
            inner,
            _identity_watch: identity_watch,
        }
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
        character: CharacterVariant,
    ) -> Result<Identity> {
        let _guard = self.inner.lifecycle.lock().await;
        let user = self
            .inner
            .identity
            .sign_up(email, password, display_name, character)
            .await?;
        self.inner.statuses.ensure_default(user.id).await?;
        self.inner.start(user.clone()).await?;
        Ok(user)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let _guard = self.inner.lifecycle.lock().await;
        let user = self.inner.identity.sign_in(email, password).await?;
        self.inner.start(user.clone()).await?;
        Ok(user)
    }

    /// Stop all subscriptions and discard the session state.
    pub async fn sign_out(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.identity.sign_out().await?;
        self.inner.discard().await;
        Ok(())
    }

    /// Publish the caller's status. Local observers see the new value before
    /// the remote write resolves; a failed write is returned but the local
    /// value is kept.
    pub async fn update_status(
        &self,
        activity: Activity,
        emotion: Emotion,
        message: &str,
    ) -> Result<StatusRecord> {
        let user = self.user_id().ok_or(Error::Unauthenticated)?;
        let message: String = message.chars().take(MESSAGE_MAX_CHARS).collect();

        self.inner.state.send_modify(|s| {
            s.my_status = LocalStatus {
                activity,
                emotion,
                message: message.clone(),
            };
        });

        match self
            .inner
            .statuses
            .write_status(user, activity, emotion, &message)
            .await
        {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!("status write for {} failed, local value kept: {}", user, e);
                Err(e)
            }
        }
    }

    /// Latest partner status, or `None` when unpaired or unreadable.
    pub async fn get_partner_status(&self) -> Option<StatusRecord> {
        let partner_id = self.state().partner_id()?;
        match self.inner.statuses.read_status(partner_id).await {
            Ok(status) => {
                self.inner
                    .state
                    .send_modify(|s| s.partner_status = status.clone());
                status
            }
            Err(e) => {
                warn!("partner status read failed: {}", e);
                None
            }
        }
    }

    pub async fn generate_invite_code(&self) -> Result<InviteCode> {
        let code = self
            .inner
            .pairing
            .generate_invite_code(self.user_id())
            .await?;
        let user = self.user_id().ok_or(Error::Unauthenticated)?;
        if let Some(couple) = self.inner.pairing.get_relation(user).await? {
            self.inner.apply_couple(couple).await;
        }
        Ok(code)
    }

    pub async fn join_with_code(&self, code: &str) -> Result<Couple> {
        let couple = self
            .inner
            .pairing
            .join_with_code(self.user_id(), code)
            .await?;
        self.inner.apply_couple(couple.clone()).await;
        Ok(couple)
    }

    /// Foreground transition: force a widget sync and refresh the partner.
    pub async fn foreground(&self) -> BackgroundSyncResult {
        self.get_partner_status().await;
        self.inner.bridge.on_foreground().await
    }

    pub fn observe(&self) -> watch::Receiver<AppState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> AppState {
        self.inner.state.borrow().clone()
    }

    pub fn pairing_state(&self) -> PairingState {
        self.inner.state.borrow().pairing_state()
    }

    fn user_id(&self) -> Option<Uuid> {
        self.inner.user_id()
    }
}

impl SessionInner {
    fn user_id(&self) -> Option<Uuid> {
        self.state.borrow().user.as_ref().map(|u| u.id)
    }

    async fn start(self: &Arc<Self>, user: Identity) -> Result<()> {
        self.stop_watches().await;

        let my_status = match self.statuses.read_status(user.id).await? {
            Some(record) => LocalStatus {
                activity: record.activity,
                emotion: record.emotion,
                message: record.message,
            },
            None => LocalStatus::default(),
        };
        let couple = self.pairing.get_relation(user.id).await?;
        info!("Session started for {} ({})", user.id, user.name);

        self.state.send_replace(AppState {
            user: Some(user),
            my_status,
            ..Default::default()
        });
        if let Some(couple) = couple {
            self.apply_couple(couple).await;
        }
        Ok(())
    }

    /// Tear the session down when the provider reports a sign-out that did
    /// not come through [`Session::sign_out`].
    fn follow_identity(self: &Arc<Self>) -> Subscription {
        let mut identities = self.identity.watch();
        let session = Arc::downgrade(self);

        Subscription::spawn(async move {
            while identities.changed().await.is_ok() {
                let signed_out = identities.borrow_and_update().is_none();
                if !signed_out {
                    continue;
                }
                let Some(session) = session.upgrade() else {
                    break;
                };
                let _guard = session.lifecycle.lock().await;
                if session.identity.current_identity().is_none() && session.user_id().is_some() {
                    info!("identity provider signed out, discarding session");
                    session.discard().await;
                }
            }
        })
    }

    async fn discard(&self) {
        self.stop_watches().await;
        if let Err(e) = self.bridge.bind_partner(None).await {
            warn!("cannot clear stored partner id: {:#}", e);
        }
        self.state.send_replace(AppState::default());
    }

    async fn stop_watches(&self) {
        if let Some(sub) = self.couple_watch.lock().await.take() {
            sub.cancel();
        }
        if let Some((_, sub)) = self.partner_watch.lock().await.take() {
            sub.cancel();
        }
    }

    /// Fold a couple into the state. A pending couple is watched until the
    /// partner joins; a completed one starts the partner status feed.
    async fn apply_couple(self: &Arc<Self>, couple: Couple) {
        let Some(me) = self.user_id() else {
            return;
        };
        if couple.first_member != me && couple.second_member != Some(me) {
            debug!("ignoring couple {} that {} is not part of", couple.id, me);
            return;
        }

        if couple.is_pending() {
            self.state.send_modify(|s| {
                if let Some(user) = s.user.as_mut() {
                    user.couple_id = Some(couple.id.clone());
                }
                s.couple = Some(couple.clone());
            });
            let mut watch = self.couple_watch.lock().await;
            if watch.is_none() {
                let listener = Arc::new(CoupleWatch {
                    session: Arc::downgrade(self),
                });
                *watch = Some(self.pairing.watch_relation(&couple.id, listener));
            }
            return;
        }

        self.on_paired(me, couple).await;
    }

    async fn on_paired(self: &Arc<Self>, me: Uuid, couple: Couple) {
        let Some(partner_id) = couple.partner_of(me) else {
            return;
        };
        let partner = match self.store.identity(partner_id).await {
            Ok(partner) => partner,
            Err(e) => {
                warn!("partner profile read failed: {:#}", e);
                None
            }
        };

        self.state.send_modify(|s| {
            if let Some(user) = s.user.as_mut() {
                user.couple_id = Some(couple.id.clone());
            }
            s.couple = Some(couple.clone());
            if partner.is_some() {
                s.partner = partner.clone();
            }
        });

        if let Err(e) = self.bridge.bind_partner(Some(partner_id)).await {
            warn!("cannot store partner id for background sync: {:#}", e);
        }

        {
            let mut watch = self.partner_watch.lock().await;
            if !watch.as_ref().is_some_and(|(id, _)| *id == partner_id) {
                let listener = Arc::new(PartnerWatch {
                    session: Arc::downgrade(self),
                });
                let sub = self.statuses.subscribe(partner_id, listener);
                *watch = Some((partner_id, sub));
                info!("Paired with {} in couple {}", partner_id, couple.id);
            }
        }

        // The pending couple is settled. This may run inside the couple
        // watch's own task, so nothing may be awaited after the cancel.
        let pending_watch = self.couple_watch.lock().await.take();
        if let Some(sub) = pending_watch {
            debug!("stopping pending couple watch");
            sub.cancel();
        }
    }
}

/// Moves a pending session to paired once the partner redeems the code.
struct CoupleWatch {
    session: Weak<SessionInner>,
}

#[async_trait]
impl CoupleListener for CoupleWatch {
    async fn on_couple_changed(&self, couple_id: &str, couple: Option<Couple>) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        match couple {
            Some(couple) if !couple.is_pending() => {
                if let Some(me) = session.user_id() {
                    session.on_paired(me, couple).await;
                }
            }
            Some(_) => {}
            None => {
                debug!("pending couple {} disappeared", couple_id);
                session.state.send_modify(|s| {
                    if s.couple.as_ref().is_some_and(|c| c.id == couple_id) {
                        s.couple = None;
                    }
                });
            }
        }
    }
}

/// Mirrors the partner's status into the state and the widget slot.
struct PartnerWatch {
    session: Weak<SessionInner>,
}

#[async_trait]
impl StatusListener for PartnerWatch {
    async fn on_status_changed(&self, owner: Uuid, status: Option<StatusRecord>) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let has_status = status.is_some();
        session.state.send_modify(|s| s.partner_status = status);
        if has_status {
            session.bridge.on_status_event(owner).await;
        }
    }
}
