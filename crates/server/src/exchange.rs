use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use server_api::{
    oauth::provider_endpoints, ExchangedToken, ProviderClient, TokenExchangeRequest,
    TokenExchanger,
};
use shared::domain::Platform;

/// Authorization-code exchange against the real provider token endpoints.
pub struct HttpTokenExchanger {
    http: Client,
    clients: HashMap<Platform, ProviderClient>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    /// TikTok returns the account id alongside the token.
    #[serde(default)]
    open_id: Option<String>,
}

impl HttpTokenExchanger {
    pub fn new(clients: HashMap<Platform, ProviderClient>) -> Self {
        Self {
            http: Client::new(),
            clients,
        }
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange(&self, request: TokenExchangeRequest<'_>) -> Result<ExchangedToken> {
        let client = self
            .clients
            .get(&request.platform)
            .ok_or_else(|| anyhow!("no oauth client configured for {}", request.platform))?;
        let endpoints = provider_endpoints(request.platform);

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", request.code),
            ("redirect_uri", request.redirect_uri),
            (endpoints.client_id_param, client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
        ];
        if let Some(verifier) = request.code_verifier {
            form.push(("code_verifier", verifier));
        }

        let response = self
            .http
            .post(endpoints.token_url)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("token request to {} failed", request.platform))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "{} token endpoint returned {status}: {body}",
                request.platform
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .with_context(|| format!("malformed {} token response", request.platform))?;
        Ok(ExchangedToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
            username: token.open_id,
        })
    }
}
