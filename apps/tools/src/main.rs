//! Operator commands that work on the backend database directly.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use shared::domain::{Platform, VideoJobId, VideoJobState, WorkspaceId};
use storage::Storage;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/server.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates a workspace and prints a session token for it.
    CreateWorkspace { name: String },
    ListCredentials { workspace_id: i64 },
    /// Moves a credential's expiry; negative values expire it.
    ExpireCredential {
        workspace_id: i64,
        platform: Platform,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        in_days: i64,
    },
    SchedulePost {
        workspace_id: i64,
        platform: Platform,
        content: String,
        #[arg(long, default_value_t = 0)]
        in_seconds: i64,
    },
    ListPosts { workspace_id: i64 },
    CreateVideoJob { workspace_id: i64, prompt: String },
    SetVideoState {
        job_id: i64,
        state: VideoJobState,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        error: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateWorkspace { name } => {
            let workspace_id = storage.create_workspace(&name).await?;
            let token = storage.create_session_token(workspace_id).await?;
            println!("created workspace_id={workspace_id}");
            println!("session_token={token}");
        }
        Command::ListCredentials { workspace_id } => {
            let credentials = storage.list_credentials(WorkspaceId(workspace_id)).await?;
            if credentials.is_empty() {
                println!("no credentials");
            }
            for credential in credentials {
                let expires = credential
                    .expires_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "never".into());
                println!(
                    "{:<10} user={} expires={expires} updated={}",
                    credential.platform.as_str(),
                    credential.username.as_deref().unwrap_or("-"),
                    credential.updated_at.to_rfc3339()
                );
            }
        }
        Command::ExpireCredential {
            workspace_id,
            platform,
            in_days,
        } => {
            let at = from_now(Duration::try_days(in_days))
                .with_context(|| format!("--in-days {in_days} is out of range"))?;
            if !storage
                .expire_credential(WorkspaceId(workspace_id), platform, at)
                .await?
            {
                bail!("workspace {workspace_id} has no {platform} credential");
            }
            println!("{platform} credential now expires at {}", at.to_rfc3339());
        }
        Command::SchedulePost {
            workspace_id,
            platform,
            content,
            in_seconds,
        } => {
            let at = from_now(Duration::try_seconds(in_seconds))
                .with_context(|| format!("--in-seconds {in_seconds} is out of range"))?;
            let post_id = storage
                .schedule_post(WorkspaceId(workspace_id), platform, &content, at)
                .await?;
            println!("scheduled post_id={post_id} for {}", at.to_rfc3339());
        }
        Command::ListPosts { workspace_id } => {
            for post in storage.list_posts(WorkspaceId(workspace_id)).await? {
                println!(
                    "{:>5} {:<10} {:<10} {} {}",
                    post.post_id.0,
                    post.platform.as_str(),
                    post.state.as_str(),
                    post.scheduled_for.to_rfc3339(),
                    post.last_error.as_deref().unwrap_or("")
                );
            }
        }
        Command::CreateVideoJob {
            workspace_id,
            prompt,
        } => {
            let job_id = storage
                .create_video_job(WorkspaceId(workspace_id), &prompt)
                .await?;
            println!("created video job_id={job_id}");
        }
        Command::SetVideoState {
            job_id,
            state,
            url,
            error,
        } => {
            if !storage
                .update_video_job(VideoJobId(job_id), state, url.as_deref(), error.as_deref())
                .await?
            {
                bail!("no video job {job_id}");
            }
            println!("video job {job_id} is now {}", state.as_str());
        }
    }

    Ok(())
}

fn from_now(offset: Option<Duration>) -> Option<DateTime<Utc>> {
    offset.and_then(|offset| Utc::now().checked_add_signed(offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_outside_chrono_range_are_rejected() {
        assert!(from_now(Duration::try_days(-3)).is_some_and(|at| at < Utc::now()));
        assert!(from_now(Duration::try_days(i64::MAX)).is_none());
        assert!(from_now(Duration::try_days(100_000_000)).is_none());
        assert!(from_now(Duration::try_seconds(i64::MIN)).is_none());
    }
}
