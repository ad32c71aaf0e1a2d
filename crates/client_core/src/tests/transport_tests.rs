use super::*;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use shared::{domain::VideoJobState, error::ErrorCode};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct ServerState {
    seen_tokens: Arc<Mutex<Vec<Option<String>>>>,
    disconnects: Arc<Mutex<Vec<DisconnectRequest>>>,
}

#[derive(Deserialize)]
struct WorkspaceParam {
    workspace_id: Option<i64>,
}

#[derive(Deserialize)]
struct AuthParams {
    platform: Platform,
    workspace_id: i64,
}

async fn handle_status(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(q): Query<WorkspaceParam>,
) -> Json<Vec<CredentialStatusEntry>> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.seen_tokens.lock().await.push(token);

    let mut linkedin = CredentialStatusEntry::disconnected(Platform::Linkedin);
    linkedin.connected = q.workspace_id == Some(7);
    linkedin.username = Some("acme".into());
    Json(vec![
        linkedin,
        CredentialStatusEntry::disconnected(Platform::Twitter),
    ])
}

async fn handle_authorization_url(
    Query(q): Query<AuthParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    match q.platform {
        Platform::Twitter => Ok(Json(serde_json::json!({
            "authorization_url": format!("https://twitter.test/authorize?ws={}", q.workspace_id)
        }))),
        Platform::Linkedin => Ok(Json(serde_json::json!({
            "redirectUrl": "https://linkedin.test/authorize"
        }))),
        Platform::Tiktok => Ok(Json(serde_json::json!({}))),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(ApiError::new(ErrorCode::Unauthorized, "oauth_unauthorized")),
        )),
    }
}

async fn handle_disconnect(
    State(state): State<ServerState>,
    Json(req): Json<DisconnectRequest>,
) -> Json<DisconnectResponse> {
    state.disconnects.lock().await.push(req);
    Json(DisconnectResponse {
        success: true,
        message: None,
    })
}

async fn handle_publish(Query(q): Query<WorkspaceParam>) -> Json<PublishDueResponse> {
    assert_eq!(q.workspace_id, Some(7));
    Json(PublishDueResponse::default())
}

async fn handle_video(
    Path(job_id): Path<i64>,
) -> Result<Json<VideoJobStatus>, (StatusCode, String)> {
    if job_id != 3 {
        return Err((StatusCode::BAD_GATEWAY, "upstream exploded".into()));
    }
    Ok(Json(VideoJobStatus {
        job_id: VideoJobId(job_id),
        state: VideoJobState::Processing,
        video_url: None,
        error: None,
        updated_at: Utc::now(),
    }))
}

async fn spawn_backend() -> Result<(String, ServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = ServerState::default();
    let app = Router::new()
        .route("/credentials/status", get(handle_status))
        .route("/oauth/authorization-url", get(handle_authorization_url))
        .route("/credentials/disconnect", post(handle_disconnect))
        .route("/posts/publish-due", post(handle_publish))
        .route("/videos/:job_id", get(handle_video))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/"), state))
}

#[tokio::test]
async fn status_sends_workspace_and_bearer_token() {
    let (base_url, state) = spawn_backend().await.expect("backend");
    let client = BackendClient::new(base_url).with_session_token("sess-1");

    let entries = client
        .credential_status(Some(WorkspaceId(7)))
        .await
        .expect("status");
    assert_eq!(entries.len(), 2);
    assert!(entries[0].connected);

    let anonymous = BackendClient::new(client.base_url().to_string());
    let entries = anonymous.credential_status(None).await.expect("status");
    assert!(!entries[0].connected);

    let tokens = state.seen_tokens.lock().await.clone();
    assert_eq!(tokens, vec![Some("Bearer sess-1".to_string()), None]);
}

#[tokio::test]
async fn authorization_url_accepts_both_field_names() {
    let (base_url, _state) = spawn_backend().await.expect("backend");
    let client = BackendClient::new(base_url);

    let url = client
        .authorization_url(Platform::Twitter, WorkspaceId(9))
        .await
        .expect("twitter url");
    assert_eq!(url, "https://twitter.test/authorize?ws=9");

    let url = client
        .authorization_url(Platform::Linkedin, WorkspaceId(9))
        .await
        .expect("linkedin url");
    assert_eq!(url, "https://linkedin.test/authorize");

    let err = client
        .authorization_url(Platform::Tiktok, WorkspaceId(9))
        .await
        .expect_err("empty body");
    assert!(err.to_string().contains("no authorization url"));
}

#[tokio::test]
async fn backend_errors_surface_api_code() {
    let (base_url, _state) = spawn_backend().await.expect("backend");
    let client = BackendClient::new(base_url);

    let err = client
        .authorization_url(Platform::Facebook, WorkspaceId(1))
        .await
        .expect_err("unauthorized");
    assert_eq!(api_error_message(&err), Some("oauth_unauthorized"));

    let err = client
        .video_job_status(VideoJobId(99))
        .await
        .expect_err("bad gateway");
    assert_eq!(api_error_message(&err), None);
    assert!(err.to_string().contains("502"));
}

#[tokio::test]
async fn disconnect_posts_platform_and_workspace() {
    let (base_url, state) = spawn_backend().await.expect("backend");
    let client = BackendClient::new(base_url);

    let response = client
        .disconnect(Platform::Youtube, WorkspaceId(4))
        .await
        .expect("disconnect");
    assert!(response.success);

    let seen = state.disconnects.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].platform, Platform::Youtube);
    assert_eq!(seen[0].workspace_id, WorkspaceId(4));
}

#[tokio::test]
async fn publishing_calls_round_trip() {
    let (base_url, _state) = spawn_backend().await.expect("backend");
    let client = BackendClient::new(base_url);

    let report = client
        .publish_due_posts(Some(WorkspaceId(7)))
        .await
        .expect("publish");
    assert!(report.published.is_empty() && report.failed.is_empty());

    let status = client.video_job_status(VideoJobId(3)).await.expect("video");
    assert_eq!(status.state, VideoJobState::Processing);
}
