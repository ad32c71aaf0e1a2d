use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    routing::{get, post},
    Router,
};
use server_api::{ApiContext, DevTokenExchanger, OAuthConfig, ProviderClient, TokenExchanger};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;
mod exchange;

use app_state::AppState;
use config::{load_settings, prepare_database_url};
use exchange::HttpTokenExchanger;

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    settings.validate()?;
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let clients = settings
        .providers
        .iter()
        .map(|(platform, provider)| {
            (
                *platform,
                ProviderClient {
                    client_id: provider.client_id.clone(),
                    client_secret: provider.client_secret.clone(),
                },
            )
        })
        .collect::<std::collections::HashMap<_, _>>();

    let exchanger: Arc<dyn TokenExchanger> = if settings.dev_mode {
        warn!("dev mode enabled: provider consent is simulated");
        Arc::new(DevTokenExchanger)
    } else {
        Arc::new(HttpTokenExchanger::new(clients.clone()))
    };

    let api = ApiContext {
        storage,
        oauth: OAuthConfig {
            state_secret: settings.state_secret,
            state_ttl_seconds: settings.state_ttl_seconds,
            public_base_url: settings.public_base_url,
            frontend_redirect_url: settings.frontend_redirect_url,
            dev_mode: settings.dev_mode,
            clients,
        },
    };
    let state = AppState {
        api,
        exchanger,
        credential_write_delay: Duration::from_millis(settings.credential_write_delay_ms),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/credentials/status", get(api::http_credential_status))
        .route("/credentials/disconnect", post(api::http_disconnect))
        .route("/oauth/authorization-url", get(api::http_authorization_url))
        .route("/oauth/callback/:platform", get(api::http_oauth_callback))
        .route("/oauth/dev-consent/:platform", get(api::http_dev_consent))
        .route("/posts", get(api::http_list_posts))
        .route("/posts/publish-due", post(api::http_publish_due))
        .route("/videos/:job_id", get(api::http_video_status))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
