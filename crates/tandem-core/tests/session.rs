mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::timeout;

use tandem_core::{
    AppState, DocumentStore, Error, IdentityProvider, LocalIdentityProvider, LocalState,
    MemoryLocalState, MemoryWidgetSurface, PairingState, Session, SyncBridge, WidgetSurface,
};
use tandem_types::{Activity, CharacterVariant, Emotion, MESSAGE_MAX_CHARS};

struct Device {
    session: Session,
    identity: Arc<LocalIdentityProvider>,
    surface: Arc<MemoryWidgetSurface>,
    local_state: Arc<MemoryLocalState>,
}

fn device(store: &Arc<dyn DocumentStore>) -> Device {
    let surface = Arc::new(MemoryWidgetSurface::new());
    let local_state = Arc::new(MemoryLocalState::new());
    let bridge = Arc::new(SyncBridge::new(
        store.clone(),
        surface.clone(),
        local_state.clone(),
        Duration::ZERO,
    ));
    let identity = Arc::new(LocalIdentityProvider::new(store.clone()));
    Device {
        session: Session::new(store.clone(), identity.clone(), bridge),
        identity,
        surface,
        local_state,
    }
}

async fn wait_for(session: &Session, pred: impl FnMut(&AppState) -> bool) -> AppState {
    let mut rx = session.observe();
    let state = timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("state never reached")
        .unwrap()
        .clone();
    state
}

#[tokio::test]
async fn pending_inviter_becomes_paired_when_partner_joins() {
    let store = common::memory();
    let ari = device(&store);
    let bo = device(&store);

    let ari_id = ari
        .session
        .sign_up("ari@example.com", "password", "Ari", CharacterVariant::Female)
        .await
        .unwrap()
        .id;
    let bo_id = bo
        .session
        .sign_up("bo@example.com", "password", "Bo", CharacterVariant::Male)
        .await
        .unwrap()
        .id;
    assert_eq!(ari.session.pairing_state(), PairingState::Unpaired);

    let code = ari.session.generate_invite_code().await.unwrap();
    assert_eq!(ari.session.pairing_state(), PairingState::PendingInvite(code.clone()));

    let couple = bo
        .session
        .join_with_code(&code.as_str().to_lowercase())
        .await
        .unwrap();
    assert_eq!(
        bo.session.pairing_state(),
        PairingState::Paired {
            couple_id: couple.id.clone(),
            partner_id: ari_id,
        }
    );

    let state = wait_for(&ari.session, |s| s.partner_id().is_some()).await;
    assert_eq!(state.partner_id(), Some(bo_id));
    assert_eq!(state.partner.unwrap().name, "Bo");
    assert_eq!(state.user.unwrap().couple_id, Some(couple.id));
    assert_eq!(ari.local_state.partner_id().await.unwrap(), Some(bo_id));
}

#[tokio::test]
async fn partner_status_flows_to_state_and_widget() {
    let store = common::memory();
    let ari = device(&store);
    let bo = device(&store);

    ari.session
        .sign_up("ari@example.com", "password", "Ari", CharacterVariant::Female)
        .await
        .unwrap();
    bo.session
        .sign_up("bo@example.com", "password", "Bo", CharacterVariant::Male)
        .await
        .unwrap();
    let code = ari.session.generate_invite_code().await.unwrap();
    bo.session.join_with_code(code.as_str()).await.unwrap();

    ari.session
        .update_status(Activity::Studying, Emotion::Happy, "hello")
        .await
        .unwrap();

    let state = wait_for(&bo.session, |s| {
        s.partner_status
            .as_ref()
            .is_some_and(|p| p.activity == Activity::Studying)
    })
    .await;
    assert_eq!(state.partner_status.unwrap().message, "hello");

    for _ in 0..100 {
        if let Some(snapshot) = bo.surface.read_snapshot().await.unwrap() {
            if snapshot.status == Activity::Studying {
                assert_eq!(snapshot.name, "Ari");
                assert_eq!(snapshot.emotion, Emotion::Happy);
                assert_eq!(snapshot.custom_message, "hello");
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("widget never showed the partner status");
}

#[tokio::test]
async fn long_messages_are_truncated() {
    let store = common::memory();
    let ari = device(&store);
    ari.session
        .sign_up("ari@example.com", "password", "Ari", CharacterVariant::Female)
        .await
        .unwrap();

    let long = "é".repeat(MESSAGE_MAX_CHARS + 10);
    let record = ari
        .session
        .update_status(Activity::Busy, Emotion::Sad, &long)
        .await
        .unwrap();
    assert_eq!(record.message.chars().count(), MESSAGE_MAX_CHARS);
    assert_eq!(ari.session.state().my_status.message, record.message);
}

#[tokio::test]
async fn signed_out_session_rejects_operations() {
    let store = common::memory();
    let ari = device(&store);

    assert!(matches!(
        ari.session
            .update_status(Activity::Busy, Emotion::Sad, "")
            .await,
        Err(Error::Unauthenticated)
    ));
    assert!(matches!(
        ari.session.generate_invite_code().await,
        Err(Error::Unauthenticated)
    ));
    assert!(matches!(
        ari.session.join_with_code("K7M3QX").await,
        Err(Error::Unauthenticated)
    ));
    assert!(ari.session.get_partner_status().await.is_none());
}

#[tokio::test]
async fn sign_out_resets_and_sign_in_restores() {
    let store = common::memory();
    let ari = device(&store);
    let bo = device(&store);

    ari.session
        .sign_up("ari@example.com", "password", "Ari", CharacterVariant::Female)
        .await
        .unwrap();
    bo.session
        .sign_up("bo@example.com", "password", "Bo", CharacterVariant::Male)
        .await
        .unwrap();
    let code = ari.session.generate_invite_code().await.unwrap();
    bo.session.join_with_code(code.as_str()).await.unwrap();
    bo.session
        .update_status(Activity::Working, Emotion::Tired, "meeting")
        .await
        .unwrap();

    bo.session.sign_out().await.unwrap();
    assert_eq!(bo.session.state(), AppState::default());
    assert_eq!(bo.local_state.partner_id().await.unwrap(), None);

    bo.session.sign_in("bo@example.com", "password").await.unwrap();
    assert!(matches!(bo.session.pairing_state(), PairingState::Paired { .. }));
    assert_eq!(bo.session.state().my_status.message, "meeting");
    assert!(matches!(
        bo.session.sign_in("bo@example.com", "wrong-password").await,
        Err(Error::InvalidCredentials)
    ));
}

#[tokio::test]
async fn foreground_forces_widget_sync() {
    let store = common::memory();
    let ari = device(&store);
    let bo = device(&store);

    ari.session
        .sign_up("ari@example.com", "password", "Ari", CharacterVariant::Female)
        .await
        .unwrap();
    bo.session
        .sign_up("bo@example.com", "password", "Bo", CharacterVariant::Male)
        .await
        .unwrap();
    let code = ari.session.generate_invite_code().await.unwrap();
    bo.session.join_with_code(code.as_str()).await.unwrap();
    ari.session
        .update_status(Activity::Sleeping, Emotion::Tired, "zz")
        .await
        .unwrap();

    bo.session.foreground().await;
    let snapshot = bo.surface.read_snapshot().await.unwrap().unwrap();
    assert_eq!(snapshot.status, Activity::Sleeping);
    assert_eq!(
        bo.session.get_partner_status().await.unwrap().message,
        "zz"
    );
}

#[tokio::test]
async fn failed_write_keeps_optimistic_status() {
    let flaky = Arc::new(common::FlakyStore::new());
    let store: Arc<dyn DocumentStore> = flaky.clone();
    let ari = device(&store);
    let ari_id = ari
        .session
        .sign_up("ari@example.com", "password", "Ari", CharacterVariant::Female)
        .await
        .unwrap()
        .id;

    flaky.fail_status_writes.store(true, Ordering::SeqCst);
    let err = ari
        .session
        .update_status(Activity::Exercising, Emotion::Excited, "gym")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RemoteUnavailable(_)));
    assert!(err.is_retryable());

    let local = ari.session.state().my_status;
    assert_eq!(local.activity, Activity::Exercising);
    assert_eq!(local.message, "gym");

    let remote = store.status(ari_id).await.unwrap().unwrap();
    assert_eq!(remote.activity, Activity::Available);
}

#[tokio::test]
async fn provider_sign_out_discards_the_session() {
    let store = common::memory();
    let ari = device(&store);
    let bo = device(&store);
    ari.session
        .sign_up("ari@example.com", "password", "Ari", CharacterVariant::Female)
        .await
        .unwrap();
    let bo_id = bo
        .session
        .sign_up("bo@example.com", "password", "Bo", CharacterVariant::Male)
        .await
        .unwrap()
        .id;
    let code = ari.session.generate_invite_code().await.unwrap();
    bo.session.join_with_code(code.as_str()).await.unwrap();
    wait_for(&ari.session, |s| s.partner_id().is_some()).await;

    // Signed out underneath the session, e.g. by an expired credential
    ari.identity.sign_out().await.unwrap();

    let state = wait_for(&ari.session, |s| s.user.is_none()).await;
    assert_eq!(state, AppState::default());
    assert_eq!(ari.local_state.partner_id().await.unwrap(), None);
    assert!(matches!(
        ari.session.update_status(Activity::Busy, Emotion::Neutral, "").await,
        Err(Error::Unauthenticated)
    ));

    // Signing back in through the session restores the pairing
    ari.session.sign_in("ari@example.com", "password").await.unwrap();
    let state = wait_for(&ari.session, |s| s.partner_id().is_some()).await;
    assert_eq!(state.partner_id(), Some(bo_id));
}
