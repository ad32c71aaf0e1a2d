use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::{Platform, VideoJobId, WorkspaceId},
    error::ApiError,
    protocol::{
        CredentialStatusEntry, DisconnectResponse, FailedPost, PublishDueResponse,
        ScheduledPostSummary, VideoJobStatus,
    },
};
use storage::{Storage, StoredCredential};
use tracing::{info, warn};

pub mod oauth;

pub use oauth::{
    authorization_url, complete_oauth_callback, dev_consent_redirect, CallbackQuery,
    CallbackResult, DevTokenExchanger, ExchangedToken, OAuthConfig, PendingCredential,
    ProviderClient, TokenExchangeRequest, TokenExchanger,
};

const EXPIRING_SOON_DAYS: i64 = 7;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub oauth: OAuthConfig,
}

pub async fn ensure_workspace(ctx: &ApiContext, workspace_id: WorkspaceId) -> Result<(), ApiError> {
    let exists = ctx
        .storage
        .workspace_exists(workspace_id)
        .await
        .map_err(ApiError::internal)?;
    if !exists {
        return Err(ApiError::no_workspace());
    }
    Ok(())
}

/// One entry per known platform; platforms without a stored credential are
/// reported as disconnected.
pub async fn credential_status(
    ctx: &ApiContext,
    workspace_id: WorkspaceId,
    now: DateTime<Utc>,
) -> Result<Vec<CredentialStatusEntry>, ApiError> {
    ensure_workspace(ctx, workspace_id).await?;
    let stored: HashMap<Platform, StoredCredential> = ctx
        .storage
        .list_credentials(workspace_id)
        .await
        .map_err(ApiError::internal)?
        .into_iter()
        .map(|credential| (credential.platform, credential))
        .collect();

    Ok(Platform::ALL
        .into_iter()
        .map(|platform| match stored.get(&platform) {
            Some(credential) => status_entry(credential, now),
            None => CredentialStatusEntry::disconnected(platform),
        })
        .collect())
}

fn status_entry(credential: &StoredCredential, now: DateTime<Utc>) -> CredentialStatusEntry {
    let (is_expired, is_expiring_soon) = match credential.expires_at {
        Some(expires_at) => {
            let expired = expires_at <= now;
            (
                Some(expired),
                Some(!expired && expires_at - now <= Duration::days(EXPIRING_SOON_DAYS)),
            )
        }
        None => (Some(false), Some(false)),
    };

    CredentialStatusEntry {
        platform: credential.platform,
        connected: true,
        username: credential.username.clone(),
        expires_at: credential.expires_at,
        is_expired,
        is_expiring_soon,
    }
}

pub async fn disconnect(
    ctx: &ApiContext,
    workspace_id: WorkspaceId,
    platform: Platform,
) -> Result<DisconnectResponse, ApiError> {
    ensure_workspace(ctx, workspace_id).await?;
    let removed = ctx
        .storage
        .delete_credential(workspace_id, platform)
        .await
        .map_err(ApiError::internal)?;
    info!(workspace_id = workspace_id.0, %platform, removed, "credential disconnected");
    Ok(DisconnectResponse {
        success: true,
        message: (!removed).then(|| format!("{platform} was not connected")),
    })
}

/// Publishes every due post whose platform has a live credential; everything
/// else is marked failed with a reason.
pub async fn publish_due_posts(
    ctx: &ApiContext,
    workspace_id: Option<WorkspaceId>,
    now: DateTime<Utc>,
) -> Result<PublishDueResponse, ApiError> {
    if let Some(workspace_id) = workspace_id {
        ensure_workspace(ctx, workspace_id).await?;
    }
    let due = ctx
        .storage
        .list_due_posts(workspace_id, now)
        .await
        .map_err(ApiError::internal)?;

    let mut credentials: HashMap<WorkspaceId, Vec<StoredCredential>> = HashMap::new();
    let mut response = PublishDueResponse::default();
    for post in due {
        if !credentials.contains_key(&post.workspace_id) {
            let list = ctx
                .storage
                .list_credentials(post.workspace_id)
                .await
                .map_err(ApiError::internal)?;
            credentials.insert(post.workspace_id, list);
        }
        let credential = credentials
            .get(&post.workspace_id)
            .and_then(|list| list.iter().find(|c| c.platform == post.platform));

        let failure = match credential {
            None => Some(format!("{} is not connected", post.platform.display_name())),
            Some(c) if c.expires_at.is_some_and(|at| at <= now) => Some(format!(
                "{} credentials have expired",
                post.platform.display_name()
            )),
            Some(_) => None,
        };

        match failure {
            None => {
                ctx.storage
                    .mark_post_published(post.post_id, now)
                    .await
                    .map_err(ApiError::internal)?;
                info!(post_id = post.post_id.0, platform = %post.platform, "scheduled post published");
                response.published.push(post.post_id);
            }
            Some(reason) => {
                ctx.storage
                    .mark_post_failed(post.post_id, &reason)
                    .await
                    .map_err(ApiError::internal)?;
                warn!(post_id = post.post_id.0, platform = %post.platform, %reason, "scheduled post failed");
                response.failed.push(FailedPost {
                    post_id: post.post_id,
                    platform: post.platform,
                    reason,
                });
            }
        }
    }
    Ok(response)
}

pub async fn list_scheduled_posts(
    ctx: &ApiContext,
    workspace_id: WorkspaceId,
) -> Result<Vec<ScheduledPostSummary>, ApiError> {
    ensure_workspace(ctx, workspace_id).await?;
    let posts = ctx
        .storage
        .list_posts(workspace_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(posts
        .into_iter()
        .map(|post| ScheduledPostSummary {
            post_id: post.post_id,
            workspace_id: post.workspace_id,
            platform: post.platform,
            content: post.content,
            scheduled_for: post.scheduled_for,
            state: post.state,
            last_error: post.last_error,
        })
        .collect())
}

pub async fn video_job_status(
    ctx: &ApiContext,
    job_id: VideoJobId,
) -> Result<VideoJobStatus, ApiError> {
    let job = ctx
        .storage
        .video_job(job_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("video job"))?;
    Ok(VideoJobStatus {
        job_id: job.job_id,
        state: job.state,
        video_url: job.video_url,
        error: job.error,
        updated_at: job.updated_at,
    })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
