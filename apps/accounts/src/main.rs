use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    polling::{ScheduledPostPublisher, VideoStatusWatcher},
    transport::{BackendClient, CredentialApi, PublishingApi},
    ConnectionEvent, ConnectionManager, LoadOutcome, Navigator,
};
use shared::domain::{Platform, VideoJobId, WorkspaceId};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use url::Url;

mod config;
mod loopback;
mod render;

use config::{load_settings, Settings};
use loopback::CallbackListener;

/// Extra wait past the provider timeout so the manager's own timeout fires first.
const REDIRECT_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(about = "Manage connected social accounts for a workspace")]
struct Cli {
    #[arg(long, default_value = "accounts.toml")]
    config: PathBuf,
    #[arg(long)]
    backend_url: Option<String>,
    #[arg(long)]
    workspace_id: Option<i64>,
    #[arg(long)]
    session_token: Option<String>,
    /// Print the authorization URL instead of opening a browser.
    #[arg(long)]
    no_browser: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the connection status of every platform.
    Status,
    /// Authorize a platform through the browser and wait for the redirect.
    Connect { platform: Platform },
    /// Process a redirect URL captured elsewhere.
    Callback { url: Url },
    Disconnect { platform: Platform },
    /// List the workspace's scheduled posts.
    Posts,
    /// Publish due posts once, or every minute with `--watch`.
    PublishDue {
        #[arg(long)]
        watch: bool,
    },
    WatchVideo { job_id: i64 },
}

struct BrowserNavigator {
    open_browser: bool,
}

impl Navigator for BrowserNavigator {
    fn navigate(&self, url: &str) -> Result<()> {
        println!("Authorize in your browser:\n  {url}");
        if self.open_browser {
            open::that(url).context("failed to open the browser")?;
        }
        Ok(())
    }
}

enum RedirectWait {
    Received(Url),
    Failed(String),
    TimedOut,
    Interrupted,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(&cli.config);
    if let Some(v) = cli.backend_url {
        settings.backend_url = v;
    }
    if let Some(v) = cli.workspace_id {
        settings.workspace_id = Some(v);
    }
    if let Some(v) = cli.session_token {
        settings.session_token = Some(v);
    }
    if cli.no_browser {
        settings.open_browser = false;
    }

    let mut client = BackendClient::new(settings.backend_url.clone());
    if let Some(token) = &settings.session_token {
        client = client.with_session_token(token.clone());
    }
    let backend = Arc::new(client);
    let workspace_id = settings.workspace_id.map(WorkspaceId);

    let credentials: Arc<dyn CredentialApi> = backend.clone();
    let manager = ConnectionManager::new(
        credentials,
        Arc::new(BrowserNavigator {
            open_browser: settings.open_browser,
        }),
    );
    manager.set_workspace(workspace_id).await;

    match cli.command {
        Command::Status => {
            manager.load(None).await?;
            print!("{}", render::snapshot(&manager.snapshot().await));
        }
        Command::Connect { platform } => connect(&manager, platform, &settings).await?,
        Command::Callback { url } => {
            if let LoadOutcome::Callback {
                disposition,
                clean_url,
            } = manager.load(Some(&url)).await?
            {
                println!("{}", render::disposition(&disposition));
                println!("page url: {clean_url}");
            }
            print!("{}", render::snapshot(&manager.snapshot().await));
        }
        Command::Disconnect { platform } => {
            let response = manager.disconnect(platform).await?;
            if response.success {
                println!("{} disconnected", platform.display_name());
            }
            print!("{}", render::snapshot(&manager.snapshot().await));
        }
        Command::Posts => {
            let posts = backend.scheduled_posts(workspace_id).await?;
            print!("{}", render::posts(&posts));
        }
        Command::PublishDue { watch: false } => {
            let report = backend.publish_due_posts(workspace_id).await?;
            print!("{}", render::publish_report(&report));
        }
        Command::PublishDue { watch: true } => {
            let publishing: Arc<dyn PublishingApi> = backend.clone();
            let (poller, mut reports) = ScheduledPostPublisher::new(publishing, workspace_id).spawn();
            loop {
                tokio::select! {
                    report = reports.recv() => match report {
                        Some(report) => print!("{}", render::publish_report(&report)),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            poller.stop();
        }
        Command::WatchVideo { job_id } => {
            let publishing: Arc<dyn PublishingApi> = backend.clone();
            let (poller, mut updates) =
                VideoStatusWatcher::new(publishing, VideoJobId(job_id)).spawn();
            loop {
                tokio::select! {
                    status = updates.recv() => match status {
                        Some(status) => println!("{}", render::video_status(&status)),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            poller.stop();
        }
    }

    Ok(())
}

async fn connect(
    manager: &Arc<ConnectionManager>,
    platform: Platform,
    settings: &Settings,
) -> Result<()> {
    let mut listener = CallbackListener::start(&settings.callback_bind).await?;
    let mut events = manager.subscribe();
    manager.load(None).await?;
    manager.begin_connect(platform).await?;

    let wait = {
        let redirect = listener.next_callback(platform.connect_timeout() + REDIRECT_GRACE);
        tokio::pin!(redirect);
        loop {
            tokio::select! {
                received = &mut redirect => {
                    break match received? {
                        Some(url) => RedirectWait::Received(url),
                        None => RedirectWait::TimedOut,
                    };
                }
                event = events.recv() => match event {
                    Ok(ConnectionEvent::TimeoutWarning { platform: p }) if p == platform => {
                        eprintln!("Still waiting for {} to finish authorizing...", platform.display_name());
                    }
                    Ok(ConnectionEvent::Error { platform: p, message }) if p == platform => {
                        break RedirectWait::Failed(message);
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break RedirectWait::TimedOut,
                },
                _ = tokio::signal::ctrl_c() => break RedirectWait::Interrupted,
            }
        }
    };
    listener.stop().await;

    match wait {
        RedirectWait::Received(url) => {
            if let LoadOutcome::Callback { disposition, .. } = manager.load(Some(&url)).await? {
                println!("{}", render::disposition(&disposition));
            }
        }
        RedirectWait::Failed(message) => bail!("{}: {message}", platform.display_name()),
        RedirectWait::TimedOut => bail!("no authorization redirect received"),
        RedirectWait::Interrupted => bail!("connection attempt interrupted"),
    }
    print!("{}", render::snapshot(&manager.snapshot().await));
    Ok(())
}
