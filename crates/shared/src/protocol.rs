use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Platform, PostId, PostState, VideoJobId, VideoJobState, WorkspaceId};

/// One row of `GET /credentials/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStatusEntry {
    pub platform: Platform,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_expired: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_expiring_soon: Option<bool>,
}

impl CredentialStatusEntry {
    pub fn disconnected(platform: Platform) -> Self {
        Self {
            platform,
            connected: false,
            username: None,
            expires_at: None,
            is_expired: None,
            is_expiring_soon: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialStatusQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationUrlQuery {
    pub platform: Platform,
    pub workspace_id: i64,
}

/// Older backends answered with `redirectUrl`; both spellings are accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationUrlResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(
        default,
        rename = "redirectUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub redirect_url: Option<String>,
}

impl AuthorizationUrlResponse {
    pub fn new(authorization_url: impl Into<String>) -> Self {
        Self {
            authorization_url: Some(authorization_url.into()),
            redirect_url: None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.authorization_url
            .as_deref()
            .or(self.redirect_url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectRequest {
    pub platform: Platform,
    pub workspace_id: WorkspaceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPostSummary {
    pub post_id: PostId,
    pub workspace_id: WorkspaceId,
    pub platform: Platform,
    pub content: String,
    pub scheduled_for: DateTime<Utc>,
    pub state: PostState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedPost {
    pub post_id: PostId,
    pub platform: Platform,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishDueResponse {
    pub published: Vec<PostId>,
    pub failed: Vec<FailedPost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoJobStatus {
    pub job_id: VideoJobId,
    pub state: VideoJobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_url_accepts_legacy_field() {
        let legacy: AuthorizationUrlResponse =
            serde_json::from_str(r#"{"redirectUrl":"https://example.test/auth"}"#).expect("json");
        assert_eq!(legacy.url(), Some("https://example.test/auth"));

        let current: AuthorizationUrlResponse = serde_json::from_str(
            r#"{"authorization_url":"https://a.test","redirectUrl":"https://b.test"}"#,
        )
        .expect("json");
        assert_eq!(current.url(), Some("https://a.test"));
    }

    #[test]
    fn blank_authorization_url_is_treated_as_missing() {
        let blank: AuthorizationUrlResponse =
            serde_json::from_str(r#"{"authorization_url":"  "}"#).expect("json");
        assert_eq!(blank.url(), None);
    }

    #[test]
    fn status_entry_tolerates_missing_optional_fields() {
        let entry: CredentialStatusEntry =
            serde_json::from_str(r#"{"platform":"linkedin","connected":true}"#).expect("json");
        assert!(entry.connected);
        assert!(entry.username.is_none());
    }
}
