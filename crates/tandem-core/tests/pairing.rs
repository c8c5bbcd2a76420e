mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use tandem_core::pairing::resolve_partner_id;
use tandem_core::store::{ClaimOutcome, MintOutcome};
use tandem_core::{DocumentStore, Error, PairingService};
use tandem_types::invite::{ALPHABET, CODE_LEN};
use tandem_types::{Activity, Couple, Emotion, InviteCode};
use uuid::Uuid;

async fn generate_is_idempotent(store: Arc<dyn DocumentStore>) {
    let pairing = PairingService::new(store.clone());
    let ari = common::register(&store, "Ari").await;

    let code = pairing.generate_invite_code(Some(ari.id)).await.unwrap();
    assert_eq!(code.as_str().len(), CODE_LEN);
    assert!(code.as_str().bytes().all(|b| ALPHABET.contains(&b)));

    let again = pairing.generate_invite_code(Some(ari.id)).await.unwrap();
    assert_eq!(code, again);
    assert_eq!(store.pending_couples(ari.id).await.unwrap().len(), 1);

    let relation = pairing.get_relation(ari.id).await.unwrap().unwrap();
    assert_eq!(relation.invite_code, code);
    assert!(relation.is_pending());

    // Generating also seeds the caller's status
    assert!(store.status(ari.id).await.unwrap().is_some());
}

#[tokio::test]
async fn generate_is_idempotent_in_memory() {
    generate_is_idempotent(common::memory()).await;
}

#[tokio::test]
async fn generate_is_idempotent_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    generate_is_idempotent(common::sqlite(&dir)).await;
}

async fn join_with_lowercase_code(store: Arc<dyn DocumentStore>) {
    let pairing = PairingService::new(store.clone());
    let ari = common::register(&store, "Ari").await;
    let bo = common::register(&store, "Bo").await;

    // Seed a known code the way minting would
    let created_at = Utc::now();
    let couple = Couple {
        id: Couple::derive_id(ari.id, created_at),
        first_member: ari.id,
        second_member: None,
        invite_code: InviteCode::parse("K7M3QX").unwrap(),
        created_at,
        connected_at: None,
    };
    assert_eq!(store.insert_couple(&couple).await.unwrap(), MintOutcome::Minted);

    let joined = pairing.join_with_code(Some(bo.id), "k7m3qx").await.unwrap();
    assert_eq!(joined.id, couple.id);
    assert_eq!(joined.second_member, Some(bo.id));
    assert!(joined.connected_at.is_some());

    let status = store.status(bo.id).await.unwrap().unwrap();
    assert_eq!(status.activity, Activity::Available);
    assert_eq!(status.emotion, Emotion::Neutral);
    assert_eq!(status.message, "");

    assert_eq!(resolve_partner_id(&joined, ari.id), Some(bo.id));
    assert_eq!(resolve_partner_id(&joined, bo.id), Some(ari.id));
    assert_eq!(resolve_partner_id(&joined, Uuid::new_v4()), None);

    let seen_by_ari = pairing.get_relation(ari.id).await.unwrap().unwrap();
    let seen_by_bo = pairing.get_relation(bo.id).await.unwrap().unwrap();
    assert_eq!(seen_by_ari, seen_by_bo);
}

#[tokio::test]
async fn join_with_lowercase_code_in_memory() {
    join_with_lowercase_code(common::memory()).await;
}

#[tokio::test]
async fn join_with_lowercase_code_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    join_with_lowercase_code(common::sqlite(&dir)).await;
}

#[tokio::test]
async fn paired_members_cannot_pair_again() {
    let store = common::memory();
    let pairing = PairingService::new(store.clone());
    let ari = common::register(&store, "Ari").await;
    let bo = common::register(&store, "Bo").await;
    let cy = common::register(&store, "Cy").await;

    let code = pairing.generate_invite_code(Some(ari.id)).await.unwrap();
    pairing.join_with_code(Some(bo.id), code.as_str()).await.unwrap();
    let other = pairing.generate_invite_code(Some(cy.id)).await.unwrap();

    for member in [ari.id, bo.id] {
        assert!(matches!(
            pairing.generate_invite_code(Some(member)).await,
            Err(Error::AlreadyPaired)
        ));
        assert!(matches!(
            pairing.join_with_code(Some(member), other.as_str()).await,
            Err(Error::AlreadyPaired)
        ));
    }
}

#[tokio::test]
async fn joining_own_code_is_self_pairing() {
    let store = common::memory();
    let pairing = PairingService::new(store.clone());
    let ari = common::register(&store, "Ari").await;

    let code = pairing.generate_invite_code(Some(ari.id)).await.unwrap();
    assert!(matches!(
        pairing.join_with_code(Some(ari.id), code.as_str()).await,
        Err(Error::SelfPairing)
    ));
}

#[tokio::test]
async fn used_code_keeps_original_partner() {
    let store = common::memory();
    let pairing = PairingService::new(store.clone());
    let ari = common::register(&store, "Ari").await;
    let bo = common::register(&store, "Bo").await;
    let cy = common::register(&store, "Cy").await;

    let code = pairing.generate_invite_code(Some(ari.id)).await.unwrap();
    let couple = pairing.join_with_code(Some(bo.id), code.as_str()).await.unwrap();

    assert!(matches!(
        pairing.join_with_code(Some(cy.id), code.as_str()).await,
        Err(Error::CodeAlreadyUsed)
    ));
    let after = store.couple(&couple.id).await.unwrap().unwrap();
    assert_eq!(after.second_member, Some(bo.id));
}

#[tokio::test]
async fn unknown_and_malformed_codes_are_invalid() {
    let store = common::memory();
    let pairing = PairingService::new(store.clone());
    let bo = common::register(&store, "Bo").await;

    for code in ["ZZZZZZ", "abc", "K7M3Q0", ""] {
        assert!(
            matches!(pairing.join_with_code(Some(bo.id), code).await, Err(Error::InvalidCode)),
            "{code}"
        );
    }
}

#[tokio::test]
async fn anonymous_caller_is_unauthenticated() {
    let pairing = PairingService::new(common::memory());
    assert!(matches!(
        pairing.generate_invite_code(None).await,
        Err(Error::Unauthenticated)
    ));
    assert!(matches!(
        pairing.join_with_code(None, "K7M3QX").await,
        Err(Error::Unauthenticated)
    ));
}

#[tokio::test]
async fn missing_profile_is_reported() {
    let pairing = PairingService::new(common::memory());
    assert!(matches!(
        pairing.generate_invite_code(Some(Uuid::new_v4())).await,
        Err(Error::ProfileNotFound)
    ));
}

#[tokio::test]
async fn joining_prunes_own_pending_invite() {
    let store = common::memory();
    let pairing = PairingService::new(store.clone());
    let ari = common::register(&store, "Ari").await;
    let bo = common::register(&store, "Bo").await;

    let ari_code = pairing.generate_invite_code(Some(ari.id)).await.unwrap();
    let bo_code = pairing.generate_invite_code(Some(bo.id)).await.unwrap();

    let couple = pairing.join_with_code(Some(bo.id), ari_code.as_str()).await.unwrap();

    assert!(store.pending_couples(bo.id).await.unwrap().is_empty());
    assert!(store.couple_by_code(&bo_code).await.unwrap().is_none());
    assert_eq!(
        store.identity(bo.id).await.unwrap().unwrap().couple_id,
        Some(couple.id)
    );
}

async fn concurrent_joiners(store: Arc<dyn DocumentStore>) {
    let pairing = PairingService::new(store.clone());
    let ari = common::register(&store, "Ari").await;
    let bo = common::register(&store, "Bo").await;
    let cy = common::register(&store, "Cy").await;

    let code = pairing.generate_invite_code(Some(ari.id)).await.unwrap();

    let (p1, p2) = (pairing.clone(), pairing.clone());
    let (c1, c2) = (code.to_string(), code.to_string());
    let first = tokio::spawn(async move { p1.join_with_code(Some(bo.id), &c1).await });
    let second = tokio::spawn(async move { p2.join_with_code(Some(cy.id), &c2).await });
    let results = [first.await.unwrap(), second.await.unwrap()];

    let winners: Vec<&Couple> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(Error::CodeAlreadyUsed)))
    );

    let stored = store.couple_by_code(&code).await.unwrap().unwrap();
    assert_eq!(stored.second_member, winners[0].second_member);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joiners_in_memory() {
    for _ in 0..10 {
        concurrent_joiners(common::memory()).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joiners_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    concurrent_joiners(common::sqlite(&dir)).await;
}

#[tokio::test]
async fn watch_relation_sees_the_join() {
    use async_trait::async_trait;
    use tandem_core::CoupleListener;
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<Option<Couple>>);

    #[async_trait]
    impl CoupleListener for Forward {
        async fn on_couple_changed(&self, _couple_id: &str, couple: Option<Couple>) {
            let _ = self.0.send(couple);
        }
    }

    let store = common::memory();
    let pairing = PairingService::new(store.clone());
    let ari = common::register(&store, "Ari").await;
    let bo = common::register(&store, "Bo").await;

    let code = pairing.generate_invite_code(Some(ari.id)).await.unwrap();
    let couple_id = pairing.get_relation(ari.id).await.unwrap().unwrap().id;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = pairing.watch_relation(&couple_id, Arc::new(Forward(tx)));
    assert!(rx.recv().await.unwrap().unwrap().is_pending());

    pairing.join_with_code(Some(bo.id), code.as_str()).await.unwrap();
    let joined = rx.recv().await.unwrap().unwrap();
    assert_eq!(joined.second_member, Some(bo.id));
}

async fn claim_refuses_a_member_paired_elsewhere(store: Arc<dyn DocumentStore>) {
    let pairing = PairingService::new(store.clone());
    let ari = common::register(&store, "Ari").await;
    let bo = common::register(&store, "Bo").await;
    let cy = common::register(&store, "Cy").await;

    let ari_code = pairing.generate_invite_code(Some(ari.id)).await.unwrap();
    let cy_code = pairing.generate_invite_code(Some(cy.id)).await.unwrap();
    let cy_couple = store.couple_by_code(&cy_code).await.unwrap().unwrap();

    pairing.join_with_code(Some(bo.id), ari_code.as_str()).await.unwrap();

    // Ari's pending invite became a completed couple; the claim must not
    // hand Ari a second one
    assert_eq!(
        store.claim_couple(&cy_couple.id, ari.id, Utc::now()).await.unwrap(),
        ClaimOutcome::MemberPaired
    );
    assert!(store.couple(&cy_couple.id).await.unwrap().unwrap().is_pending());
}

#[tokio::test]
async fn claim_refuses_a_member_paired_elsewhere_in_memory() {
    claim_refuses_a_member_paired_elsewhere(common::memory()).await;
}

#[tokio::test]
async fn claim_refuses_a_member_paired_elsewhere_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    claim_refuses_a_member_paired_elsewhere(common::sqlite(&dir)).await;
}

async fn claim_closes_the_joiners_own_invite(store: Arc<dyn DocumentStore>) {
    let pairing = PairingService::new(store.clone());
    let ari = common::register(&store, "Ari").await;
    let bo = common::register(&store, "Bo").await;
    let cy = common::register(&store, "Cy").await;

    let ari_code = pairing.generate_invite_code(Some(ari.id)).await.unwrap();
    let ari_couple = store.couple_by_code(&ari_code).await.unwrap().unwrap();
    let cy_code = pairing.generate_invite_code(Some(cy.id)).await.unwrap();

    let joined = pairing.join_with_code(Some(ari.id), cy_code.as_str()).await.unwrap();
    assert_eq!(
        store.identity(ari.id).await.unwrap().unwrap().couple_id,
        Some(joined.id)
    );

    assert_eq!(
        store.claim_couple(&ari_couple.id, bo.id, Utc::now()).await.unwrap(),
        ClaimOutcome::Taken
    );
    assert!(matches!(
        pairing.join_with_code(Some(bo.id), ari_code.as_str()).await,
        Err(Error::InvalidCode)
    ));
    assert!(pairing.get_relation(bo.id).await.unwrap().is_none());
}

#[tokio::test]
async fn claim_closes_the_joiners_own_invite_in_memory() {
    claim_closes_the_joiners_own_invite(common::memory()).await;
}

#[tokio::test]
async fn claim_closes_the_joiners_own_invite_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    claim_closes_the_joiners_own_invite(common::sqlite(&dir)).await;
}

/// Two members with pending invites join each other's code at once.
async fn crossed_joins(store: Arc<dyn DocumentStore>) {
    let pairing = PairingService::new(store.clone());
    let ari = common::register(&store, "Ari").await;
    let bo = common::register(&store, "Bo").await;

    let ari_code = pairing.generate_invite_code(Some(ari.id)).await.unwrap();
    let bo_code = pairing.generate_invite_code(Some(bo.id)).await.unwrap();

    let (ari_id, bo_id) = (ari.id, bo.id);
    let (p1, p2) = (pairing.clone(), pairing.clone());
    let first = tokio::spawn(async move { p1.join_with_code(Some(bo_id), ari_code.as_str()).await });
    let second = tokio::spawn(async move { p2.join_with_code(Some(ari_id), bo_code.as_str()).await });
    let results = [first.await.unwrap(), second.await.unwrap()];

    let winners: Vec<&Couple> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1, "{results:?}");
    let winner = winners[0];

    for member in [ari_id, bo_id] {
        let relation = pairing.get_relation(member).await.unwrap().unwrap();
        assert_eq!(&relation, winner);
        assert!(store.pending_couples(member).await.unwrap().is_empty());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crossed_joins_in_memory() {
    for _ in 0..20 {
        crossed_joins(common::memory()).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crossed_joins_in_sqlite() {
    for _ in 0..5 {
        let dir = tempfile::tempdir().unwrap();
        crossed_joins(common::sqlite(&dir)).await;
    }
}

#[tokio::test]
async fn second_insert_for_a_member_returns_the_pending_couple() {
    let store = common::memory();
    let ari = common::register(&store, "Ari").await;

    let pending = |code: &str| {
        let created_at = Utc::now();
        Couple {
            id: Couple::derive_id(ari.id, created_at),
            first_member: ari.id,
            second_member: None,
            invite_code: InviteCode::parse(code).unwrap(),
            created_at,
            connected_at: None,
        }
    };
    let first = pending("K7M3QX");
    assert_eq!(store.insert_couple(&first).await.unwrap(), MintOutcome::Minted);
    assert_eq!(
        store.insert_couple(&pending("P4RTNR")).await.unwrap(),
        MintOutcome::PendingExists(first.clone())
    );
    assert_eq!(
        store.identity(ari.id).await.unwrap().unwrap().couple_id,
        Some(first.id)
    );
}

#[tokio::test]
async fn mint_retries_past_taken_codes() {
    let flaky = Arc::new(common::FlakyStore::new());
    let store: Arc<dyn DocumentStore> = flaky.clone();
    let pairing = PairingService::new(store.clone());
    let ari = common::register(&store, "Ari").await;

    flaky.code_collisions.store(3, Ordering::SeqCst);
    let code = pairing.generate_invite_code(Some(ari.id)).await.unwrap();

    assert_eq!(flaky.insert_attempts.load(Ordering::SeqCst), 4);
    let relation = pairing.get_relation(ari.id).await.unwrap().unwrap();
    assert!(relation.is_pending());
    assert_eq!(relation.invite_code, code);
}

#[tokio::test]
async fn mint_gives_up_after_repeated_collisions() {
    let flaky = Arc::new(common::FlakyStore::new());
    let store: Arc<dyn DocumentStore> = flaky.clone();
    let pairing = PairingService::new(store.clone());
    let ari = common::register(&store, "Ari").await;

    flaky.code_collisions.store(usize::MAX, Ordering::SeqCst);
    let err = pairing.generate_invite_code(Some(ari.id)).await.unwrap_err();

    assert!(matches!(err, Error::RemoteUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(flaky.insert_attempts.load(Ordering::SeqCst), 8);
    assert!(store.pending_couples(ari.id).await.unwrap().is_empty());
    assert!(pairing.get_relation(ari.id).await.unwrap().is_none());
}
