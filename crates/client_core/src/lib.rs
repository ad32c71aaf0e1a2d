use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use shared::{
    domain::{Platform, WorkspaceId},
    protocol::{CredentialStatusEntry, DisconnectResponse},
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use url::Url;

pub mod backoff;
pub mod callback;
pub mod error_map;
pub mod polling;
pub mod timers;
pub mod transport;

use backoff::{poll_until, Backoff, PollOutcome};
use callback::{attribute_platform, strip_callback_params, OAuthCallback};
use error_map::{oauth_error_message, CONNECTION_TIMED_OUT, GENERIC_FAILURE};
use timers::AttemptTimers;
use transport::{api_error_message, CredentialApi};

const CSRF_CHECK_FAILED: &str = "csrf_check_failed";
const TIMEOUT_WARNING_LEAD: Duration = Duration::from_secs(30);
const DISCONNECT_FAILED: &str = "Failed to disconnect. Please try again.";

/// Performs the full-page redirect to a provider's consent screen.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformPhase {
    Idle,
    Authorizing,
    Reconciling,
    Connected,
    Error,
}

impl PlatformPhase {
    fn is_busy(self) -> bool {
        matches!(self, PlatformPhase::Authorizing | PlatformPhase::Reconciling)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StatusRefreshed,
    PhaseChanged {
        platform: Platform,
        phase: PlatformPhase,
    },
    TimeoutWarning {
        platform: Platform,
    },
    Error {
        platform: Platform,
        message: String,
    },
    Reconciled {
        platform: Platform,
        connected: bool,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Workspace ID is required.")]
    WorkspaceRequired,
    #[error("a connection attempt for {0} is already in progress")]
    AttemptInProgress(Platform),
    #[error("connection attempt for {0} was cancelled")]
    Cancelled(Platform),
    #[error("{message}")]
    Failed { platform: Platform, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackDisposition {
    Reconciled {
        platform: Platform,
        connected: bool,
        attempts: usize,
    },
    Failed {
        platform: Option<Platform>,
        code: String,
        message: String,
    },
    /// Already handled, or the platform is mid-reconciliation.
    Duplicate,
    /// The URL carried no callback parameters.
    NoCallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A status fetch was already running.
    Skipped,
    Refreshed,
    Callback {
        disposition: CallbackDisposition,
        clean_url: Url,
    },
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub reconcile: Backoff,
    pub csrf_reverify: Backoff,
    pub warning_lead: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reconcile: Backoff::reconciliation(),
            csrf_reverify: Backoff::csrf_reverify(),
            warning_lead: TIMEOUT_WARNING_LEAD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformView {
    pub platform: Platform,
    pub phase: PlatformPhase,
    pub status: CredentialStatusEntry,
    pub error: Option<String>,
    pub timeout_warning: bool,
}

/// Read-only view handed to presentational shells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionsSnapshot {
    pub workspace_id: Option<WorkspaceId>,
    pub connecting: Option<Platform>,
    pub platforms: Vec<PlatformView>,
}

impl ConnectionsSnapshot {
    pub fn platform(&self, platform: Platform) -> Option<&PlatformView> {
        self.platforms.iter().find(|view| view.platform == platform)
    }

    pub fn is_connected(&self, platform: Platform) -> bool {
        self.platform(platform)
            .is_some_and(|view| view.status.connected)
    }

    pub fn error(&self, platform: Platform) -> Option<&str> {
        self.platform(platform).and_then(|view| view.error.as_deref())
    }
}

struct ActiveAttempt {
    platform: Platform,
    id: u64,
    timers: AttemptTimers,
}

#[derive(Default)]
struct ManagerState {
    workspace_id: Option<WorkspaceId>,
    statuses: HashMap<Platform, CredentialStatusEntry>,
    phases: HashMap<Platform, PlatformPhase>,
    errors: HashMap<Platform, String>,
    warnings: HashSet<Platform>,
    connecting: Option<ActiveAttempt>,
    last_attempted: Option<Platform>,
    processed_callbacks: HashMap<String, Option<Platform>>,
    next_attempt_id: u64,
}

impl ManagerState {
    fn phase(&self, platform: Platform) -> PlatformPhase {
        self.phases
            .get(&platform)
            .copied()
            .unwrap_or(PlatformPhase::Idle)
    }

    fn is_current_attempt(&self, platform: Platform, id: u64) -> bool {
        self.connecting
            .as_ref()
            .is_some_and(|attempt| attempt.platform == platform && attempt.id == id)
    }

    /// Ends the attempt for `platform`, cancelling its timers.
    fn finish_attempt(&mut self, platform: Platform) {
        if self
            .connecting
            .as_ref()
            .is_some_and(|attempt| attempt.platform == platform)
        {
            self.connecting = None;
        }
        self.warnings.remove(&platform);
    }
}

/// Connection state for every platform of one workspace.
///
/// Status is always taken from the backend. Local state only tracks the
/// in-flight attempt, per-platform phase and the messages shown to the user.
pub struct ConnectionManager {
    api: Arc<dyn CredentialApi>,
    navigator: Arc<dyn Navigator>,
    config: ManagerConfig,
    inner: Mutex<ManagerState>,
    status_fetches: AtomicUsize,
    events: broadcast::Sender<ConnectionEvent>,
}

struct FetchGuard<'a>(&'a AtomicUsize);

impl<'a> FetchGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConnectionManager {
    pub fn new(api: Arc<dyn CredentialApi>, navigator: Arc<dyn Navigator>) -> Arc<Self> {
        Self::with_config(api, navigator, ManagerConfig::default())
    }

    pub fn with_config(
        api: Arc<dyn CredentialApi>,
        navigator: Arc<dyn Navigator>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            api,
            navigator,
            config,
            inner: Mutex::new(ManagerState::default()),
            status_fetches: AtomicUsize::new(0),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn set_phase(&self, state: &mut ManagerState, platform: Platform, phase: PlatformPhase) {
        if state.phase(platform) != phase {
            state.phases.insert(platform, phase);
            self.emit(ConnectionEvent::PhaseChanged { platform, phase });
        }
    }

    fn set_error(&self, state: &mut ManagerState, platform: Platform, message: impl Into<String>) {
        let message = message.into();
        state.errors.insert(platform, message.clone());
        self.set_phase(state, platform, PlatformPhase::Error);
        self.emit(ConnectionEvent::Error { platform, message });
    }

    /// Switching workspace abandons any attempt and forgets cached status.
    pub async fn set_workspace(&self, workspace_id: Option<WorkspaceId>) {
        let mut state = self.inner.lock().await;
        if state.workspace_id == workspace_id {
            return;
        }
        info!(workspace_id = ?workspace_id.map(|w| w.0), "workspace changed");
        state.connecting = None;
        state.workspace_id = workspace_id;
        state.statuses.clear();
        state.errors.clear();
        state.warnings.clear();
        state.last_attempted = None;
        for platform in Platform::ALL {
            self.set_phase(&mut state, platform, PlatformPhase::Idle);
        }
    }

    pub async fn snapshot(&self) -> ConnectionsSnapshot {
        let state = self.inner.lock().await;
        ConnectionsSnapshot {
            workspace_id: state.workspace_id,
            connecting: state.connecting.as_ref().map(|attempt| attempt.platform),
            platforms: Platform::ALL
                .into_iter()
                .map(|platform| PlatformView {
                    platform,
                    phase: state.phase(platform),
                    status: state
                        .statuses
                        .get(&platform)
                        .cloned()
                        .unwrap_or_else(|| CredentialStatusEntry::disconnected(platform)),
                    error: state.errors.get(&platform).cloned(),
                    timeout_warning: state.warnings.contains(&platform),
                })
                .collect(),
        }
    }

    /// Fetches status and folds it into local state. Failures leave the
    /// previous snapshot untouched.
    async fn fetch_statuses(&self) -> Result<Vec<CredentialStatusEntry>> {
        let _guard = FetchGuard::enter(&self.status_fetches);
        let workspace_id = self.inner.lock().await.workspace_id;
        let entries = self.api.credential_status(workspace_id).await?;

        let mut state = self.inner.lock().await;
        if state.workspace_id != workspace_id {
            return Err(anyhow!("workspace changed while fetching status"));
        }
        state.statuses = Platform::ALL
            .into_iter()
            .map(|platform| {
                let entry = entries
                    .iter()
                    .find(|entry| entry.platform == platform)
                    .cloned()
                    .unwrap_or_else(|| CredentialStatusEntry::disconnected(platform));
                (platform, entry)
            })
            .collect();

        for platform in Platform::ALL {
            let phase = state.phase(platform);
            if phase.is_busy() {
                continue;
            }
            let connected = state
                .statuses
                .get(&platform)
                .is_some_and(|entry| entry.connected);
            if connected {
                state.errors.remove(&platform);
                self.set_phase(&mut state, platform, PlatformPhase::Connected);
            } else if phase == PlatformPhase::Connected {
                self.set_phase(&mut state, platform, PlatformPhase::Idle);
            }
        }
        self.emit(ConnectionEvent::StatusRefreshed);
        Ok(entries)
    }

    /// Reads status from the backend. On failure any displayed errors are
    /// cleared and no new one is set.
    pub async fn refresh_status(&self) -> Result<()> {
        self.refresh_status_keeping(None).await
    }

    /// Like [`Self::refresh_status`], but a failed fetch leaves `keep`'s error
    /// in place.
    async fn refresh_status_keeping(&self, keep: Option<Platform>) -> Result<()> {
        match self.fetch_statuses().await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(error = %err, "credential status refresh failed");
                let mut state = self.inner.lock().await;
                let cleared: Vec<Platform> = state
                    .errors
                    .keys()
                    .copied()
                    .filter(|platform| Some(*platform) != keep)
                    .collect();
                for platform in cleared {
                    state.errors.remove(&platform);
                    if state.phase(platform) == PlatformPhase::Error {
                        self.set_phase(&mut state, platform, PlatformPhase::Idle);
                    }
                }
                Err(err)
            }
        }
    }

    /// Page-load entry point. Callback URLs are always handled; a plain load
    /// is skipped while another status fetch is running.
    pub async fn load(&self, url: Option<&Url>) -> Result<LoadOutcome> {
        if let Some(url) = url {
            if OAuthCallback::parse(url).is_some() {
                let disposition = self.handle_callback(url).await;
                if !matches!(disposition, CallbackDisposition::Reconciled { .. })
                    && self.status_fetches.load(Ordering::SeqCst) == 0
                {
                    let failed = match &disposition {
                        CallbackDisposition::Failed { platform, .. } => *platform,
                        _ => None,
                    };
                    if let Err(err) = self.refresh_status_keeping(failed).await {
                        warn!(error = %err, "status refresh after callback failed");
                    }
                }
                return Ok(LoadOutcome::Callback {
                    disposition,
                    clean_url: strip_callback_params(url),
                });
            }
        }

        if self.status_fetches.load(Ordering::SeqCst) > 0 {
            info!("status refresh already in flight; skipping load");
            return Ok(LoadOutcome::Skipped);
        }
        self.refresh_status().await?;
        Ok(LoadOutcome::Refreshed)
    }

    /// Starts an authorization round-trip: fetches the provider URL, arms the
    /// warning and hard-timeout timers, then navigates.
    pub async fn begin_connect(self: &Arc<Self>, platform: Platform) -> Result<(), ConnectError> {
        let (workspace_id, attempt_id) = {
            let mut state = self.inner.lock().await;
            let Some(workspace_id) = state.workspace_id else {
                return Err(ConnectError::WorkspaceRequired);
            };
            if let Some(active) = &state.connecting {
                return Err(ConnectError::AttemptInProgress(active.platform));
            }
            state.next_attempt_id += 1;
            let id = state.next_attempt_id;
            state.connecting = Some(ActiveAttempt {
                platform,
                id,
                timers: AttemptTimers::default(),
            });
            state.last_attempted = Some(platform);
            state.errors.remove(&platform);
            state.warnings.remove(&platform);
            state
                .processed_callbacks
                .retain(|_, seen| *seen != Some(platform));
            self.set_phase(&mut state, platform, PlatformPhase::Authorizing);
            (workspace_id, id)
        };
        info!(%platform, workspace_id = workspace_id.0, attempt_id, "starting connect attempt");

        let url = match self.api.authorization_url(platform, workspace_id).await {
            Ok(url) => url,
            Err(err) => {
                warn!(%platform, error = %err, "failed to fetch authorization url");
                let message = api_error_message(&err)
                    .map(oauth_error_message)
                    .unwrap_or(GENERIC_FAILURE);
                return Err(self.fail_attempt(platform, attempt_id, message).await);
            }
        };

        {
            let mut state = self.inner.lock().await;
            let Some(attempt) = state
                .connecting
                .as_mut()
                .filter(|attempt| attempt.platform == platform && attempt.id == attempt_id)
            else {
                return Err(ConnectError::Cancelled(platform));
            };
            let timeout = platform.connect_timeout();
            let warning_at = timeout.saturating_sub(self.config.warning_lead);

            let weak = Arc::downgrade(self);
            attempt.timers.schedule(warning_at, async move {
                if let Some(manager) = weak.upgrade() {
                    manager.on_timeout_warning(platform, attempt_id).await;
                }
            });
            let weak = Arc::downgrade(self);
            attempt.timers.schedule(timeout, async move {
                if let Some(manager) = weak.upgrade() {
                    manager.on_hard_timeout(platform, attempt_id).await;
                }
            });
        }

        if let Err(err) = self.navigator.navigate(&url) {
            warn!(%platform, error = %err, "navigation to authorization url failed");
            return Err(self.fail_attempt(platform, attempt_id, GENERIC_FAILURE).await);
        }
        Ok(())
    }

    async fn fail_attempt(&self, platform: Platform, attempt_id: u64, message: &str) -> ConnectError {
        let mut state = self.inner.lock().await;
        if !state.is_current_attempt(platform, attempt_id) {
            return ConnectError::Cancelled(platform);
        }
        state.finish_attempt(platform);
        self.set_error(&mut state, platform, message);
        ConnectError::Failed {
            platform,
            message: message.to_string(),
        }
    }

    async fn on_timeout_warning(&self, platform: Platform, attempt_id: u64) {
        let mut state = self.inner.lock().await;
        if state.is_current_attempt(platform, attempt_id)
            && state.phase(platform) == PlatformPhase::Authorizing
        {
            warn!(%platform, attempt_id, "connect attempt is taking longer than expected");
            state.warnings.insert(platform);
            self.emit(ConnectionEvent::TimeoutWarning { platform });
        }
    }

    async fn on_hard_timeout(&self, platform: Platform, attempt_id: u64) {
        let mut state = self.inner.lock().await;
        if state.is_current_attempt(platform, attempt_id)
            && state.phase(platform) == PlatformPhase::Authorizing
        {
            warn!(%platform, attempt_id, "connect attempt timed out");
            self.set_error(&mut state, platform, CONNECTION_TIMED_OUT);
            // Cancels this timer's own task; nothing below may await.
            state.finish_attempt(platform);
        }
    }

    /// Interprets callback parameters once. Successful callbacks and CSRF
    /// failures for a known platform poll the backend before settling.
    pub async fn handle_callback(&self, url: &Url) -> CallbackDisposition {
        let Some(callback) = OAuthCallback::parse(url) else {
            return CallbackDisposition::NoCallback;
        };
        let fingerprint = callback.fingerprint();

        let mut state = self.inner.lock().await;
        if state.processed_callbacks.contains_key(&fingerprint) {
            info!(%fingerprint, "callback already processed");
            return CallbackDisposition::Duplicate;
        }

        match callback {
            OAuthCallback::Success { platform } => {
                if state.phase(platform) == PlatformPhase::Reconciling {
                    return CallbackDisposition::Duplicate;
                }
                state
                    .processed_callbacks
                    .insert(fingerprint, Some(platform));
                self.begin_reconcile(&mut state, platform);
                drop(state);
                info!(%platform, "authorization succeeded; reconciling status");
                self.reconcile(platform, &self.config.reconcile).await
            }
            OAuthCallback::Error { code, platform } => {
                let platform = platform.or_else(|| attribute_platform(&code, state.last_attempted));
                state.processed_callbacks.insert(fingerprint, platform);
                let message = oauth_error_message(&code).to_string();

                let Some(platform) = platform else {
                    warn!(%code, "callback error could not be attributed to a platform");
                    return CallbackDisposition::Failed {
                        platform: None,
                        code,
                        message,
                    };
                };
                if state.phase(platform) == PlatformPhase::Reconciling {
                    return CallbackDisposition::Duplicate;
                }

                if code == CSRF_CHECK_FAILED {
                    self.begin_reconcile(&mut state, platform);
                    drop(state);
                    warn!(%platform, "csrf check failed; re-verifying connection before reporting");
                    let disposition = self.reconcile(platform, &self.config.csrf_reverify).await;
                    if matches!(disposition, CallbackDisposition::Reconciled { connected: true, .. }) {
                        return disposition;
                    }
                    let mut state = self.inner.lock().await;
                    self.set_error(&mut state, platform, message.clone());
                    return CallbackDisposition::Failed {
                        platform: Some(platform),
                        code,
                        message,
                    };
                }

                warn!(%platform, %code, "authorization failed");
                state.finish_attempt(platform);
                self.set_error(&mut state, platform, message.clone());
                CallbackDisposition::Failed {
                    platform: Some(platform),
                    code,
                    message,
                }
            }
        }
    }

    /// The callback ends the authorization phase: timers stop, but the
    /// platform stays marked as connecting until reconciliation finishes.
    fn begin_reconcile(&self, state: &mut ManagerState, platform: Platform) {
        match state.connecting.as_mut() {
            Some(attempt) if attempt.platform == platform => attempt.timers.cancel(),
            Some(_) => {}
            None => {
                state.next_attempt_id += 1;
                state.connecting = Some(ActiveAttempt {
                    platform,
                    id: state.next_attempt_id,
                    timers: AttemptTimers::default(),
                });
            }
        }
        state.errors.remove(&platform);
        state.warnings.remove(&platform);
        self.set_phase(state, platform, PlatformPhase::Reconciling);
    }

    async fn reconcile(&self, platform: Platform, backoff: &Backoff) -> CallbackDisposition {
        let outcome = poll_until(
            backoff,
            platform.as_str(),
            |_| self.fetch_statuses(),
            |entries| {
                entries
                    .iter()
                    .any(|entry| entry.platform == platform && entry.connected)
            },
        )
        .await;
        let attempts = outcome.attempts();
        let connected = matches!(outcome, PollOutcome::Satisfied { .. });
        if !connected {
            warn!(%platform, attempts, "backend has not reported the connection yet");
        }

        let mut state = self.inner.lock().await;
        state.finish_attempt(platform);
        let phase = if connected {
            PlatformPhase::Connected
        } else {
            PlatformPhase::Idle
        };
        self.set_phase(&mut state, platform, phase);
        self.emit(ConnectionEvent::Reconciled {
            platform,
            connected,
        });
        CallbackDisposition::Reconciled {
            platform,
            connected,
            attempts,
        }
    }

    /// Asks the backend to drop the credential, then re-reads status.
    pub async fn disconnect(&self, platform: Platform) -> Result<DisconnectResponse> {
        let workspace_id = self
            .inner
            .lock()
            .await
            .workspace_id
            .ok_or(ConnectError::WorkspaceRequired)?;

        let response = match self.api.disconnect(platform, workspace_id).await {
            Ok(response) => response,
            Err(err) => {
                let mut state = self.inner.lock().await;
                self.set_error(&mut state, platform, DISCONNECT_FAILED);
                return Err(err);
            }
        };
        if !response.success {
            let mut state = self.inner.lock().await;
            let message = response
                .message
                .clone()
                .unwrap_or_else(|| DISCONNECT_FAILED.to_string());
            self.set_error(&mut state, platform, message);
            return Ok(response);
        }

        info!(%platform, workspace_id = workspace_id.0, "disconnected");
        self.refresh_status().await?;
        Ok(response)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
