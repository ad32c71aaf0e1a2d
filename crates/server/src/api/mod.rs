//! HTTP handlers. Each one resolves the workspace, delegates to `server_api`
//! and maps `ApiError` codes onto status codes.

use std::{str::FromStr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use server_api::{
    authorization_url, complete_oauth_callback, credential_status, dev_consent_redirect,
    disconnect, list_scheduled_posts, publish_due_posts, video_job_status, CallbackQuery,
    CallbackResult,
};
use shared::{
    domain::{Platform, VideoJobId, WorkspaceId},
    error::{ApiError, ErrorCode, OAUTH_UNAUTHORIZED, WORKSPACE_FORBIDDEN},
    protocol::{
        AuthorizationUrlQuery, AuthorizationUrlResponse, CredentialStatusEntry,
        CredentialStatusQuery, DisconnectRequest, DisconnectResponse, PublishDueResponse,
        ScheduledPostSummary, VideoJobStatus,
    },
};
use tracing::{error, info, warn};
use url::Url;

use crate::app_state::AppState;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
pub(crate) struct WorkspaceQuery {
    workspace_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DevConsentQuery {
    state: String,
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::Upstream => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    (status_for(err.code), Json(err))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// A session token decides the workspace; an explicit `workspace_id` must
/// name the same one. Without a token an explicit id is only honoured in dev
/// mode.
async fn resolve_workspace(
    state: &AppState,
    explicit: Option<i64>,
    headers: &HeaderMap,
) -> ApiResult<WorkspaceId> {
    let Some(token) = bearer_token(headers) else {
        return match explicit {
            Some(id) if state.api.oauth.dev_mode => Ok(WorkspaceId(id)),
            Some(_) => Err(reject(ApiError::new(ErrorCode::Unauthorized, OAUTH_UNAUTHORIZED))),
            None => Err(reject(ApiError::no_workspace())),
        };
    };
    let bound = state
        .api
        .storage
        .workspace_for_token(token)
        .await
        .map_err(|e| reject(ApiError::internal(e)))?
        .ok_or_else(|| reject(ApiError::new(ErrorCode::Unauthorized, OAUTH_UNAUTHORIZED)))?;
    match explicit {
        Some(id) if id != bound.0 => {
            warn!(requested = id, session = bound.0, "workspace does not match session");
            Err(reject(ApiError::new(ErrorCode::Forbidden, WORKSPACE_FORBIDDEN)))
        }
        _ => Ok(bound),
    }
}

pub(crate) async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    match state.api.storage.health_check().await {
        Ok(()) => "ok".into_response(),
        Err(err) => {
            error!(error = %err, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable").into_response()
        }
    }
}

pub(crate) async fn http_credential_status(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CredentialStatusQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<CredentialStatusEntry>>> {
    let workspace_id = resolve_workspace(&state, q.workspace_id, &headers).await?;
    let entries = credential_status(&state.api, workspace_id, Utc::now())
        .await
        .map_err(reject)?;
    Ok(Json(entries))
}

pub(crate) async fn http_authorization_url(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AuthorizationUrlQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<AuthorizationUrlResponse>> {
    let workspace_id = resolve_workspace(&state, Some(q.workspace_id), &headers).await?;
    let response = authorization_url(&state.api, q.platform, workspace_id)
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

pub(crate) async fn http_disconnect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DisconnectRequest>,
) -> ApiResult<Json<DisconnectResponse>> {
    let workspace_id = resolve_workspace(&state, Some(req.workspace_id.0), &headers).await?;
    let response = disconnect(&state.api, workspace_id, req.platform)
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

fn frontend_error_redirect(state: &AppState, code: &str) -> ApiResult<Redirect> {
    let mut url = Url::parse(&state.api.oauth.frontend_redirect_url)
        .map_err(|e| reject(ApiError::internal(e)))?;
    url.query_pairs_mut().append_pair("oauth_error", code);
    Ok(Redirect::to(url.as_str()))
}

pub(crate) async fn http_oauth_callback(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Query(q): Query<CallbackQuery>,
) -> ApiResult<Redirect> {
    let Ok(platform) = Platform::from_str(&platform) else {
        warn!(%platform, "callback for unknown platform");
        return frontend_error_redirect(&state, "invalid_platform");
    };

    let mut result =
        complete_oauth_callback(&state.api, state.exchanger.as_ref(), platform, &q).await;

    if let CallbackResult::Connected(pending) = &result {
        let delay = state.credential_write_delay;
        if delay.is_zero() {
            if let Err(err) = pending.persist(&state.api.storage).await {
                error!(%platform, error = %err, "failed to persist credential");
                result = CallbackResult::Failed {
                    platform,
                    code: "credential_save_failed",
                };
            }
        } else {
            let storage = state.api.storage.clone();
            let pending = pending.clone();
            info!(%platform, delay_ms = delay.as_millis() as u64, "deferring credential write");
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(err) = pending.persist(&storage).await {
                    error!(platform = %pending.platform, error = %err, "deferred credential write failed");
                }
            });
        }
    }

    let target = result.redirect_url(&state.api.oauth).map_err(reject)?;
    Ok(Redirect::to(&target))
}

pub(crate) async fn http_dev_consent(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Query(q): Query<DevConsentQuery>,
) -> ApiResult<Redirect> {
    if !state.api.oauth.dev_mode {
        return Err(reject(ApiError::new(ErrorCode::NotFound, "not found")));
    }
    let platform = Platform::from_str(&platform)
        .map_err(|e| reject(ApiError::new(ErrorCode::Validation, e.to_string())))?;
    let target = dev_consent_redirect(&state.api.oauth, platform, &q.state).map_err(reject)?;
    Ok(Redirect::to(&target))
}

pub(crate) async fn http_publish_due(
    State(state): State<Arc<AppState>>,
    Query(q): Query<WorkspaceQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<PublishDueResponse>> {
    let workspace_id = resolve_workspace(&state, q.workspace_id, &headers).await?;
    let response = publish_due_posts(&state.api, Some(workspace_id), Utc::now())
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

pub(crate) async fn http_list_posts(
    State(state): State<Arc<AppState>>,
    Query(q): Query<WorkspaceQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ScheduledPostSummary>>> {
    let workspace_id = resolve_workspace(&state, q.workspace_id, &headers).await?;
    let posts = list_scheduled_posts(&state.api, workspace_id)
        .await
        .map_err(reject)?;
    Ok(Json(posts))
}

pub(crate) async fn http_video_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
) -> ApiResult<Json<VideoJobStatus>> {
    let status = video_job_status(&state.api, VideoJobId(job_id))
        .await
        .map_err(reject)?;
    Ok(Json(status))
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
