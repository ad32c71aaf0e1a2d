//! Local HTTP listener that receives the backend's post-authorization
//! redirect, standing in for the accounts page a browser would load.

use std::{net::SocketAddr, time::Duration};

use anyhow::{anyhow, Context, Result};
use axum::{
    extract::{OriginalUri, State},
    http::StatusCode,
    response::Html,
    Router,
};
use client_core::callback::OAuthCallback;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{info, warn};
use url::Url;

const LANDING_PAGE: &str =
    "<html><body><p>Authorization received. You can close this window.</p></body></html>";

#[derive(Clone)]
struct ListenerState {
    origin: String,
    callbacks: mpsc::Sender<Url>,
}

pub struct CallbackListener {
    addr: SocketAddr,
    callbacks: mpsc::Receiver<Url>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl CallbackListener {
    pub async fn start(bind: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("failed to bind callback listener on {bind}"))?;
        let addr = listener.local_addr()?;
        let (tx, callbacks) = mpsc::channel(8);
        let state = ListenerState {
            origin: format!("http://{addr}"),
            callbacks: tx,
        };
        let app = Router::new().fallback(receive_redirect).with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(error) = server.await {
                warn!(%error, "callback listener stopped with an error");
            }
        });
        info!(%addr, "waiting for authorization redirect");

        Ok(Self {
            addr,
            callbacks,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next redirect that carried callback parameters. `None` when `timeout`
    /// elapses first.
    pub async fn next_callback(&mut self, timeout: Duration) -> Result<Option<Url>> {
        match tokio::time::timeout(timeout, self.callbacks.recv()).await {
            Ok(Some(url)) => Ok(Some(url)),
            Ok(None) => Err(anyhow!("callback listener closed")),
            Err(_) => Ok(None),
        }
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.handle).await;
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn receive_redirect(
    State(state): State<ListenerState>,
    OriginalUri(uri): OriginalUri,
) -> (StatusCode, Html<&'static str>) {
    let Ok(url) = Url::parse(&format!("{}{uri}", state.origin)) else {
        return (StatusCode::BAD_REQUEST, Html("malformed request"));
    };
    if OAuthCallback::parse(&url).is_none() {
        return (StatusCode::NOT_FOUND, Html("not found"));
    }
    if state.callbacks.send(url).await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, Html("no longer waiting"));
    }
    (StatusCode::OK, Html(LANDING_PAGE))
}

#[cfg(test)]
#[path = "tests/loopback_tests.rs"]
mod tests;
