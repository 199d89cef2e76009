//! Concurrency tests: per-identity atomicity of challenge consumption and
//! counter updates under parallel callers.

use std::sync::Arc;
use std::time::Duration;

use passkey_core::testutil::SoftAuthenticator;
use passkey_core::{
    Challenge, ChallengePurpose, ChallengeStore, ErrorKind, Identity, MemoryStore, RelyingParty,
    RelyingPartyConfig,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consume_succeeds_exactly_once() {
    let store = ChallengeStore::new(
        Arc::new(MemoryStore::new()),
        Duration::from_secs(60),
        32,
        true,
    );
    let alice = Identity::parse("alice").unwrap();

    for _ in 0..20 {
        store
            .issue(&alice, ChallengePurpose::Authentication, None)
            .await
            .unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let alice = alice.clone();
                tokio::spawn(async move { store.consume(&alice).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert_eq!(e.kind(), ErrorKind::NotFound),
            }
        }
        assert_eq!(winners, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_verifications_accept_one_assertion() {
    let rp = RelyingParty::new(RelyingPartyConfig::default(), Arc::new(MemoryStore::new()));
    let bob = Identity::parse("bob").unwrap();
    let authenticator = SoftAuthenticator::es256();

    let options = rp.issue_registration_challenge(&bob, None).await.unwrap();
    let challenge = Challenge::from_base64url(&options.challenge).unwrap();
    rp.verify_registration(&bob, &authenticator.register(&challenge))
        .await
        .unwrap();

    let options = rp.issue_authentication_challenge(&bob).await.unwrap();
    let challenge = Challenge::from_base64url(&options.challenge).unwrap();
    let payload = authenticator.authenticate(&challenge, 1);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let rp = rp.clone();
            let bob = bob.clone();
            let payload = payload.clone();
            tokio::spawn(async move { rp.verify_authentication(&bob, &payload).await })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::ChallengeMissingOrExpired),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(rp.find_credential(&bob).await.unwrap().sign_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identities_do_not_interfere() {
    let rp = RelyingParty::new(RelyingPartyConfig::default(), Arc::new(MemoryStore::new()));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let rp = rp.clone();
            tokio::spawn(async move {
                let who = Identity::parse(format!("user-{i}")).unwrap();
                let authenticator = SoftAuthenticator::ed25519();

                let options = rp.issue_registration_challenge(&who, None).await?;
                let challenge = Challenge::from_base64url(&options.challenge)?;
                rp.verify_registration(&who, &authenticator.register(&challenge))
                    .await?;

                let options = rp.issue_authentication_challenge(&who).await?;
                let challenge = Challenge::from_base64url(&options.challenge)?;
                rp.verify_authentication(&who, &authenticator.authenticate(&challenge, 1))
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}
