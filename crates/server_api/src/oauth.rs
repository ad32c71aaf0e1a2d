//! Backend half of the platform authorization flow: building provider
//! authorize URLs, carrying a signed `state` through the redirect, and turning
//! the provider's callback into a stored credential plus a frontend redirect
//! that carries `oauth_success` or `oauth_error`.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::{
    domain::{Platform, WorkspaceId},
    error::{ApiError, ErrorCode, OAUTH_UNAUTHORIZED},
    protocol::AuthorizationUrlResponse,
};
use storage::{NewCredential, Storage};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{ensure_workspace, ApiContext};

pub const CSRF_CHECK_FAILED: &str = "csrf_check_failed";
const DEV_CODE_PREFIX: &str = "dev-";
const DEV_TOKEN_TTL_SECONDS: i64 = 60 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct ProviderClient {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub state_secret: String,
    pub state_ttl_seconds: i64,
    /// Externally reachable base URL of this backend; provider callbacks land
    /// on `{public_base_url}/oauth/callback/{platform}`.
    pub public_base_url: String,
    /// Where the browser is sent once a callback has been handled.
    pub frontend_redirect_url: String,
    /// Skip real providers: authorize URLs point at the backend's own consent
    /// route and codes are exchanged by [`DevTokenExchanger`].
    pub dev_mode: bool,
    pub clients: HashMap<Platform, ProviderClient>,
}

impl OAuthConfig {
    pub fn redirect_uri(&self, platform: Platform) -> String {
        format!(
            "{}/oauth/callback/{platform}",
            self.public_base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderEndpoints {
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub scopes: &'static [&'static str],
    pub scope_separator: &'static str,
    pub client_id_param: &'static str,
    pub pkce: bool,
    pub extra_params: &'static [(&'static str, &'static str)],
}

pub fn provider_endpoints(platform: Platform) -> ProviderEndpoints {
    match platform {
        Platform::Twitter => ProviderEndpoints {
            authorize_url: "https://twitter.com/i/oauth2/authorize",
            token_url: "https://api.twitter.com/2/oauth2/token",
            scopes: &["tweet.read", "tweet.write", "users.read", "offline.access"],
            scope_separator: " ",
            client_id_param: "client_id",
            pkce: true,
            extra_params: &[],
        },
        Platform::Linkedin => ProviderEndpoints {
            authorize_url: "https://www.linkedin.com/oauth/v2/authorization",
            token_url: "https://www.linkedin.com/oauth/v2/accessToken",
            scopes: &["openid", "profile", "w_member_social"],
            scope_separator: " ",
            client_id_param: "client_id",
            pkce: false,
            extra_params: &[],
        },
        Platform::Facebook => ProviderEndpoints {
            authorize_url: "https://www.facebook.com/v19.0/dialog/oauth",
            token_url: "https://graph.facebook.com/v19.0/oauth/access_token",
            scopes: &[
                "pages_show_list",
                "pages_read_engagement",
                "pages_manage_posts",
            ],
            scope_separator: ",",
            client_id_param: "client_id",
            pkce: false,
            extra_params: &[],
        },
        Platform::Instagram => ProviderEndpoints {
            authorize_url: "https://www.facebook.com/v19.0/dialog/oauth",
            token_url: "https://graph.facebook.com/v19.0/oauth/access_token",
            scopes: &[
                "instagram_basic",
                "instagram_content_publish",
                "pages_show_list",
            ],
            scope_separator: ",",
            client_id_param: "client_id",
            pkce: false,
            extra_params: &[],
        },
        Platform::Tiktok => ProviderEndpoints {
            authorize_url: "https://www.tiktok.com/v2/auth/authorize/",
            token_url: "https://open.tiktokapis.com/v2/oauth/token/",
            scopes: &["user.info.basic", "video.publish"],
            scope_separator: ",",
            client_id_param: "client_key",
            pkce: false,
            extra_params: &[],
        },
        Platform::Youtube => ProviderEndpoints {
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
            token_url: "https://oauth2.googleapis.com/token",
            scopes: &[
                "https://www.googleapis.com/auth/youtube.upload",
                "https://www.googleapis.com/auth/youtube.readonly",
            ],
            scope_separator: " ",
            client_id_param: "client_id",
            pkce: false,
            extra_params: &[("access_type", "offline"), ("prompt", "consent")],
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateClaims {
    nonce: String,
    workspace_id: i64,
    platform: Platform,
    iat: i64,
    exp: i64,
}

fn sign_state(
    config: &OAuthConfig,
    nonce: &str,
    workspace_id: WorkspaceId,
    platform: Platform,
) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = StateClaims {
        nonce: nonce.to_string(),
        workspace_id: workspace_id.0,
        platform,
        iat: now.timestamp(),
        exp: (now + Duration::seconds(config.state_ttl_seconds)).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.state_secret.as_bytes()),
    )
    .map_err(|e| ApiError::new(ErrorCode::Internal, format!("failed to sign state: {e}")))
}

fn verify_state(config: &OAuthConfig, token: &str) -> Option<StateClaims> {
    decode::<StateClaims>(
        token,
        &DecodingKey::from_secret(config.state_secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|err| warn!(error = %err, "oauth state rejected"))
    .ok()
}

fn pkce_pair() -> (String, String) {
    let verifier = format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    );
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

fn parse_url(raw: &str) -> Result<Url, ApiError> {
    Url::parse(raw)
        .map_err(|e| ApiError::new(ErrorCode::Internal, format!("invalid url '{raw}': {e}")))
}

pub fn provider_authorize_url(
    config: &OAuthConfig,
    platform: Platform,
    client_id: &str,
    state: &str,
    code_challenge: Option<&str>,
) -> Result<String, ApiError> {
    let endpoints = provider_endpoints(platform);
    let mut url = parse_url(endpoints.authorize_url)?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair(endpoints.client_id_param, client_id)
            .append_pair("redirect_uri", &config.redirect_uri(platform))
            .append_pair("response_type", "code")
            .append_pair("scope", &endpoints.scopes.join(endpoints.scope_separator))
            .append_pair("state", state);
        for (key, value) in endpoints.extra_params {
            query.append_pair(key, value);
        }
        if let Some(challenge) = code_challenge {
            query
                .append_pair("code_challenge", challenge)
                .append_pair("code_challenge_method", "S256");
        }
    }
    Ok(url.to_string())
}

fn dev_consent_url(config: &OAuthConfig, platform: Platform, state: &str) -> Result<String, ApiError> {
    let mut url = parse_url(&format!(
        "{}/oauth/dev-consent/{platform}",
        config.public_base_url.trim_end_matches('/')
    ))?;
    url.query_pairs_mut().append_pair("state", state);
    Ok(url.to_string())
}

/// Where the dev consent route sends the browser: straight back to the
/// callback with a code [`DevTokenExchanger`] accepts.
pub fn dev_consent_redirect(
    config: &OAuthConfig,
    platform: Platform,
    state: &str,
) -> Result<String, ApiError> {
    let mut url = parse_url(&config.redirect_uri(platform))?;
    url.query_pairs_mut()
        .append_pair("code", &format!("{DEV_CODE_PREFIX}{}", Uuid::new_v4().simple()))
        .append_pair("state", state);
    Ok(url.to_string())
}

pub async fn authorization_url(
    ctx: &ApiContext,
    platform: Platform,
    workspace_id: WorkspaceId,
) -> Result<AuthorizationUrlResponse, ApiError> {
    ensure_workspace(ctx, workspace_id).await?;

    let client_id = match ctx.oauth.clients.get(&platform) {
        Some(client) => client.client_id.clone(),
        None if ctx.oauth.dev_mode => format!("dev-{platform}-client"),
        None => {
            warn!(%platform, "no oauth client configured");
            return Err(ApiError::new(ErrorCode::Validation, OAUTH_UNAUTHORIZED));
        }
    };

    let endpoints = provider_endpoints(platform);
    let (code_verifier, code_challenge) = if endpoints.pkce {
        let (verifier, challenge) = pkce_pair();
        (Some(verifier), Some(challenge))
    } else {
        (None, None)
    };

    let cutoff = Utc::now() - Duration::seconds(ctx.oauth.state_ttl_seconds);
    match ctx.storage.prune_oauth_attempts(cutoff).await {
        Ok(0) => {}
        Ok(pruned) => debug!(pruned, "pruned stale oauth attempts"),
        Err(err) => warn!(error = %err, "failed to prune oauth attempts"),
    }

    let nonce = Uuid::new_v4().simple().to_string();
    ctx.storage
        .insert_oauth_attempt(&nonce, workspace_id, platform, code_verifier.as_deref())
        .await
        .map_err(ApiError::internal)?;
    let state = sign_state(&ctx.oauth, &nonce, workspace_id, platform)?;

    let url = if ctx.oauth.dev_mode {
        dev_consent_url(&ctx.oauth, platform, &state)?
    } else {
        provider_authorize_url(
            &ctx.oauth,
            platform,
            &client_id,
            &state,
            code_challenge.as_deref(),
        )?
    };
    info!(workspace_id = workspace_id.0, %platform, dev_mode = ctx.oauth.dev_mode, "authorization url issued");
    Ok(AuthorizationUrlResponse::new(url))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_reason: Option<String>,
    pub error_description: Option<String>,
}

pub struct TokenExchangeRequest<'a> {
    pub platform: Platform,
    pub code: &'a str,
    pub code_verifier: Option<&'a str>,
    pub redirect_uri: &'a str,
}

#[derive(Debug, Clone)]
pub struct ExchangedToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub username: Option<String>,
}

#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, request: TokenExchangeRequest<'_>) -> Result<ExchangedToken>;
}

/// Accepts only codes minted by the dev consent route.
pub struct DevTokenExchanger;

#[async_trait]
impl TokenExchanger for DevTokenExchanger {
    async fn exchange(&self, request: TokenExchangeRequest<'_>) -> Result<ExchangedToken> {
        if !request.code.starts_with(DEV_CODE_PREFIX) {
            return Err(anyhow!("dev exchanger rejected code for {}", request.platform));
        }
        Ok(ExchangedToken {
            access_token: format!("dev-access-{}", Uuid::new_v4().simple()),
            refresh_token: Some(format!("dev-refresh-{}", Uuid::new_v4().simple())),
            expires_in: Some(DEV_TOKEN_TTL_SECONDS),
            username: Some(format!("dev_{}_user", request.platform)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PendingCredential {
    pub workspace_id: WorkspaceId,
    pub platform: Platform,
    pub credential: NewCredential,
}

impl PendingCredential {
    pub async fn persist(&self, storage: &Storage) -> Result<()> {
        storage
            .upsert_credential(self.workspace_id, self.platform, &self.credential)
            .await?;
        info!(workspace_id = self.workspace_id.0, platform = %self.platform, "credential stored");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum CallbackResult {
    Connected(PendingCredential),
    Failed {
        platform: Platform,
        code: &'static str,
    },
}

impl CallbackResult {
    fn failed(platform: Platform, code: &'static str) -> Self {
        CallbackResult::Failed { platform, code }
    }

    pub fn platform(&self) -> Platform {
        match self {
            CallbackResult::Connected(pending) => pending.platform,
            CallbackResult::Failed { platform, .. } => *platform,
        }
    }

    /// Frontend URL carrying exactly one of `oauth_success` / `oauth_error`,
    /// plus `platform` so the client can attribute errors.
    pub fn redirect_url(&self, config: &OAuthConfig) -> Result<String, ApiError> {
        let mut url = parse_url(&config.frontend_redirect_url)?;
        {
            let mut query = url.query_pairs_mut();
            match self {
                CallbackResult::Connected(pending) => {
                    query.append_pair("oauth_success", pending.platform.as_str());
                }
                CallbackResult::Failed { platform, code } => {
                    query
                        .append_pair("oauth_error", code)
                        .append_pair("platform", platform.as_str());
                }
            }
        }
        Ok(url.to_string())
    }
}

fn provider_error_code(error: &str, reason: Option<&str>) -> &'static str {
    let denied = matches!(
        error,
        "access_denied" | "user_cancelled_login" | "user_cancelled_authorize"
    ) || reason == Some("user_denied");
    if denied {
        "user_denied"
    } else {
        "oauth_provider_error"
    }
}

/// Validates the callback and exchanges the code. Persisting the resulting
/// credential is left to the caller.
pub async fn complete_oauth_callback(
    ctx: &ApiContext,
    exchanger: &dyn TokenExchanger,
    platform: Platform,
    query: &CallbackQuery,
) -> CallbackResult {
    if let Some(error) = query.error.as_deref() {
        let code = provider_error_code(error, query.error_reason.as_deref());
        warn!(
            %platform,
            provider_error = error,
            description = query.error_description.as_deref().unwrap_or_default(),
            code,
            "provider returned an authorization error"
        );
        return CallbackResult::failed(platform, code);
    }

    let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
        return CallbackResult::failed(platform, "missing_code");
    };
    let Some(claims) = query.state.as_deref().and_then(|s| verify_state(&ctx.oauth, s)) else {
        return CallbackResult::failed(platform, CSRF_CHECK_FAILED);
    };
    if claims.platform != platform {
        warn!(%platform, state_platform = %claims.platform, "state issued for another platform");
        return CallbackResult::failed(platform, CSRF_CHECK_FAILED);
    }

    let attempt = match ctx.storage.consume_oauth_attempt(&claims.nonce).await {
        Ok(Some(attempt)) => attempt,
        Ok(None) => {
            warn!(%platform, "oauth state replayed or unknown");
            return CallbackResult::failed(platform, CSRF_CHECK_FAILED);
        }
        Err(err) => {
            warn!(%platform, error = %err, "failed to load oauth attempt");
            return CallbackResult::failed(platform, "server_error");
        }
    };
    if attempt.workspace_id.0 != claims.workspace_id || attempt.platform != platform {
        return CallbackResult::failed(platform, CSRF_CHECK_FAILED);
    }

    match ctx.storage.workspace_exists(attempt.workspace_id).await {
        Ok(true) => {}
        Ok(false) => return CallbackResult::failed(platform, "no_workspace"),
        Err(err) => {
            warn!(%platform, error = %err, "failed to check workspace");
            return CallbackResult::failed(platform, "server_error");
        }
    }

    let redirect_uri = ctx.oauth.redirect_uri(platform);
    let exchanged = exchanger
        .exchange(TokenExchangeRequest {
            platform,
            code,
            code_verifier: attempt.code_verifier.as_deref(),
            redirect_uri: &redirect_uri,
        })
        .await;

    match exchanged {
        Ok(token) => CallbackResult::Connected(PendingCredential {
            workspace_id: attempt.workspace_id,
            platform,
            credential: NewCredential {
                username: token.username,
                access_token: token.access_token,
                refresh_token: token.refresh_token,
                expires_at: token.expires_in.and_then(|seconds| {
                    let expires_at = expiry_after(seconds);
                    if expires_at.is_none() {
                        warn!(%platform, seconds, "provider expiry out of range, storing without one");
                    }
                    expires_at
                }),
            },
        }),
        Err(err) => {
            warn!(%platform, error = %err, "token exchange failed");
            CallbackResult::failed(platform, "token_exchange_failed")
        }
    }
}

fn expiry_after(seconds: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(seconds).and_then(|ttl| Utc::now().checked_add_signed(ttl))
}

#[cfg(test)]
#[path = "tests/oauth_tests.rs"]
mod tests;
