//! Backend calls used by the connection manager and the pollers.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Platform, VideoJobId, WorkspaceId},
    error::{ApiError, ApiException},
    protocol::{
        AuthorizationUrlResponse, CredentialStatusEntry, DisconnectRequest, DisconnectResponse,
        PublishDueResponse, ScheduledPostSummary, VideoJobStatus,
    },
};

#[async_trait]
pub trait CredentialApi: Send + Sync {
    /// `None` lets the backend infer the workspace from the session.
    async fn credential_status(
        &self,
        workspace_id: Option<WorkspaceId>,
    ) -> Result<Vec<CredentialStatusEntry>>;
    async fn authorization_url(&self, platform: Platform, workspace_id: WorkspaceId)
        -> Result<String>;
    async fn disconnect(
        &self,
        platform: Platform,
        workspace_id: WorkspaceId,
    ) -> Result<DisconnectResponse>;
}

#[async_trait]
pub trait PublishingApi: Send + Sync {
    async fn publish_due_posts(&self, workspace_id: Option<WorkspaceId>)
        -> Result<PublishDueResponse>;
    async fn scheduled_posts(&self, workspace_id: Option<WorkspaceId>)
        -> Result<Vec<ScheduledPostSummary>>;
    async fn video_job_status(&self, job_id: VideoJobId) -> Result<VideoJobStatus>;
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    session_token: Option<String>,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.session_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Backend failures carry an `ApiError` body; it is surfaced as an
/// [`ApiException`] so callers can downcast and read the code.
async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(match serde_json::from_str::<ApiError>(&body) {
            Ok(api_error) => anyhow::Error::new(ApiException::from(api_error))
                .context(format!("{what} failed with {status}")),
            Err(_) => anyhow!("{what} failed with {status}: {body}"),
        });
    }
    response
        .json()
        .await
        .with_context(|| format!("malformed {what} response"))
}

/// The backend error code behind an error returned by this module, if any.
pub fn api_error_message(err: &anyhow::Error) -> Option<&str> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ApiException>())
        .map(|exception| exception.message.as_str())
}

#[async_trait]
impl CredentialApi for BackendClient {
    async fn credential_status(
        &self,
        workspace_id: Option<WorkspaceId>,
    ) -> Result<Vec<CredentialStatusEntry>> {
        let mut request = self.request(Method::GET, "/credentials/status");
        if let Some(workspace_id) = workspace_id {
            request = request.query(&[("workspace_id", workspace_id.0)]);
        }
        let response = request
            .send()
            .await
            .context("credential status request failed")?;
        decode(response, "credential status").await
    }

    async fn authorization_url(
        &self,
        platform: Platform,
        workspace_id: WorkspaceId,
    ) -> Result<String> {
        let response = self
            .request(Method::GET, "/oauth/authorization-url")
            .query(&[
                ("platform", platform.as_str().to_string()),
                ("workspace_id", workspace_id.0.to_string()),
            ])
            .send()
            .await
            .context("authorization url request failed")?;
        let body: AuthorizationUrlResponse = decode(response, "authorization url").await?;
        body.url()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("backend returned no authorization url for {platform}"))
    }

    async fn disconnect(
        &self,
        platform: Platform,
        workspace_id: WorkspaceId,
    ) -> Result<DisconnectResponse> {
        let response = self
            .request(Method::POST, "/credentials/disconnect")
            .json(&DisconnectRequest {
                platform,
                workspace_id,
            })
            .send()
            .await
            .context("disconnect request failed")?;
        decode(response, "disconnect").await
    }
}

#[async_trait]
impl PublishingApi for BackendClient {
    async fn publish_due_posts(
        &self,
        workspace_id: Option<WorkspaceId>,
    ) -> Result<PublishDueResponse> {
        let mut request = self.request(Method::POST, "/posts/publish-due");
        if let Some(workspace_id) = workspace_id {
            request = request.query(&[("workspace_id", workspace_id.0)]);
        }
        let response = request.send().await.context("publish request failed")?;
        decode(response, "publish due posts").await
    }

    async fn scheduled_posts(
        &self,
        workspace_id: Option<WorkspaceId>,
    ) -> Result<Vec<ScheduledPostSummary>> {
        let mut request = self.request(Method::GET, "/posts");
        if let Some(workspace_id) = workspace_id {
            request = request.query(&[("workspace_id", workspace_id.0)]);
        }
        let response = request.send().await.context("post list request failed")?;
        decode(response, "scheduled posts").await
    }

    async fn video_job_status(&self, job_id: VideoJobId) -> Result<VideoJobStatus> {
        let response = self
            .request(Method::GET, &format!("/videos/{}", job_id.0))
            .send()
            .await
            .context("video status request failed")?;
        decode(response, "video status").await
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
