use chrono::{Duration, Utc};
use shared::domain::{Platform, PostState};
use storage::{NewCredential, Storage};

#[tokio::test]
async fn credentials_and_posts_stay_within_their_workspace_acceptance() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let acme = storage.create_workspace("acme").await.expect("acme");
    let globex = storage.create_workspace("globex").await.expect("globex");

    let acme_token = storage.create_session_token(acme).await.expect("token");
    assert_eq!(
        storage.workspace_for_token(&acme_token).await.expect("lookup"),
        Some(acme)
    );

    storage
        .insert_oauth_attempt("nonce-acme", acme, Platform::Youtube, Some("verifier"))
        .await
        .expect("attempt");
    let attempt = storage
        .consume_oauth_attempt("nonce-acme")
        .await
        .expect("consume")
        .expect("first use");
    assert_eq!(attempt.workspace_id, acme);
    assert_eq!(attempt.code_verifier.as_deref(), Some("verifier"));

    storage
        .upsert_credential(
            attempt.workspace_id,
            attempt.platform,
            &NewCredential {
                username: Some("acme_channel".into()),
                access_token: "access".into(),
                refresh_token: None,
                expires_at: Some(Utc::now() + Duration::days(30)),
            },
        )
        .await
        .expect("credential");

    assert_eq!(storage.list_credentials(acme).await.expect("acme").len(), 1);
    assert!(storage.list_credentials(globex).await.expect("globex").is_empty());
    assert!(!storage
        .delete_credential(globex, Platform::Youtube)
        .await
        .expect("delete other"));

    let past = Utc::now() - Duration::minutes(1);
    storage
        .schedule_post(acme, Platform::Youtube, "acme teaser", past)
        .await
        .expect("acme post");
    let globex_post = storage
        .schedule_post(globex, Platform::Youtube, "globex teaser", past)
        .await
        .expect("globex post");

    let due = storage
        .list_due_posts(Some(acme), Utc::now())
        .await
        .expect("due");
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].workspace_id, acme);

    let all_due = storage.list_due_posts(None, Utc::now()).await.expect("all due");
    assert_eq!(all_due.len(), 2);

    storage
        .mark_post_failed(globex_post, "YouTube is not connected")
        .await
        .expect("fail");
    let globex_posts = storage.list_posts(globex).await.expect("globex posts");
    assert_eq!(globex_posts[0].state, PostState::Failed);
    assert_eq!(
        globex_posts[0].last_error.as_deref(),
        Some("YouTube is not connected")
    );
}
