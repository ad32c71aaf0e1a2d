use super::*;
use std::collections::HashMap;
use storage::NewCredential;
use shared::error::ErrorCode;

pub(crate) async fn setup() -> (ApiContext, WorkspaceId) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let workspace = storage.create_workspace("acme").await.expect("workspace");
    (
        ApiContext {
            storage,
            oauth: OAuthConfig {
                state_secret: "test-secret".into(),
                state_ttl_seconds: 600,
                public_base_url: "http://backend.test".into(),
                frontend_redirect_url: "http://app.test/accounts".into(),
                dev_mode: false,
                clients: HashMap::new(),
            },
        },
        workspace,
    )
}

fn credential(expires_at: Option<DateTime<Utc>>) -> NewCredential {
    NewCredential {
        username: Some("acme_social".into()),
        access_token: "token".into(),
        refresh_token: None,
        expires_at,
    }
}

#[tokio::test]
async fn status_reports_every_platform() {
    let (ctx, workspace) = setup().await;
    let now = Utc::now();
    ctx.storage
        .upsert_credential(workspace, Platform::Linkedin, &credential(None))
        .await
        .expect("store");

    let entries = credential_status(&ctx, workspace, now).await.expect("status");
    assert_eq!(entries.len(), Platform::ALL.len());
    let linkedin = entries
        .iter()
        .find(|e| e.platform == Platform::Linkedin)
        .expect("linkedin entry");
    assert!(linkedin.connected);
    assert_eq!(linkedin.username.as_deref(), Some("acme_social"));
    assert!(entries
        .iter()
        .filter(|e| e.platform != Platform::Linkedin)
        .all(|e| !e.connected));
}

#[tokio::test]
async fn status_flags_expired_and_expiring_credentials() {
    let (ctx, workspace) = setup().await;
    let now = Utc::now();
    ctx.storage
        .upsert_credential(
            workspace,
            Platform::Facebook,
            &credential(Some(now - Duration::hours(1))),
        )
        .await
        .expect("store");
    ctx.storage
        .upsert_credential(
            workspace,
            Platform::Youtube,
            &credential(Some(now + Duration::days(2))),
        )
        .await
        .expect("store");

    let entries = credential_status(&ctx, workspace, now).await.expect("status");
    let facebook = entries
        .iter()
        .find(|e| e.platform == Platform::Facebook)
        .expect("facebook");
    assert!(facebook.connected);
    assert_eq!(facebook.is_expired, Some(true));
    assert_eq!(facebook.is_expiring_soon, Some(false));

    let youtube = entries
        .iter()
        .find(|e| e.platform == Platform::Youtube)
        .expect("youtube");
    assert_eq!(youtube.is_expired, Some(false));
    assert_eq!(youtube.is_expiring_soon, Some(true));
}

#[tokio::test]
async fn unknown_workspace_is_rejected() {
    let (ctx, _) = setup().await;
    let err = credential_status(&ctx, WorkspaceId(404), Utc::now())
        .await
        .expect_err("should fail");
    assert!(matches!(err.code, ErrorCode::Validation));
    assert_eq!(err.message, "no_workspace");
}

#[tokio::test]
async fn disconnect_removes_credential() {
    let (ctx, workspace) = setup().await;
    ctx.storage
        .upsert_credential(workspace, Platform::Tiktok, &credential(None))
        .await
        .expect("store");

    let response = disconnect(&ctx, workspace, Platform::Tiktok)
        .await
        .expect("disconnect");
    assert!(response.success);
    assert!(response.message.is_none());

    let again = disconnect(&ctx, workspace, Platform::Tiktok)
        .await
        .expect("disconnect again");
    assert!(again.success);
    assert!(again.message.is_some());
}

#[tokio::test]
async fn publish_due_posts_requires_live_credentials() {
    let (ctx, workspace) = setup().await;
    let now = Utc::now();
    ctx.storage
        .upsert_credential(workspace, Platform::Linkedin, &credential(None))
        .await
        .expect("store");
    ctx.storage
        .upsert_credential(
            workspace,
            Platform::Facebook,
            &credential(Some(now - Duration::days(1))),
        )
        .await
        .expect("store");

    let ok = ctx
        .storage
        .schedule_post(workspace, Platform::Linkedin, "hello", now - Duration::minutes(5))
        .await
        .expect("schedule");
    let expired = ctx
        .storage
        .schedule_post(workspace, Platform::Facebook, "hi", now - Duration::minutes(5))
        .await
        .expect("schedule");
    let missing = ctx
        .storage
        .schedule_post(workspace, Platform::Tiktok, "yo", now - Duration::minutes(5))
        .await
        .expect("schedule");

    let response = publish_due_posts(&ctx, Some(workspace), now)
        .await
        .expect("publish");
    assert_eq!(response.published, vec![ok]);
    let failed: Vec<_> = response.failed.iter().map(|f| f.post_id).collect();
    assert_eq!(failed, vec![expired, missing]);

    let stored = ctx.storage.post(missing).await.expect("load").expect("post");
    assert_eq!(stored.last_error.as_deref(), Some("TikTok is not connected"));

    let second = publish_due_posts(&ctx, Some(workspace), now)
        .await
        .expect("publish again");
    assert!(second.published.is_empty() && second.failed.is_empty());
}

#[tokio::test]
async fn missing_video_job_is_not_found() {
    let (ctx, _) = setup().await;
    let err = video_job_status(&ctx, VideoJobId(7))
        .await
        .expect_err("should fail");
    assert!(matches!(err.code, ErrorCode::NotFound));
}

#[tokio::test]
async fn scheduled_posts_reflect_publish_outcome() {
    let (ctx, workspace) = setup().await;
    let now = Utc::now();
    let post = ctx
        .storage
        .schedule_post(workspace, Platform::Youtube, "teaser", now - Duration::minutes(1))
        .await
        .expect("schedule");

    publish_due_posts(&ctx, Some(workspace), now)
        .await
        .expect("publish");

    let posts = list_scheduled_posts(&ctx, workspace).await.expect("posts");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].post_id, post);
    assert_eq!(posts[0].state, shared::domain::PostState::Failed);
    assert_eq!(posts[0].last_error.as_deref(), Some("YouTube is not connected"));

    let err = list_scheduled_posts(&ctx, WorkspaceId(404))
        .await
        .expect_err("unknown workspace");
    assert_eq!(err.message, "no_workspace");
}
