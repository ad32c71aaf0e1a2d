use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{Platform, PostId, PostState, VideoJobId, VideoJobState, WorkspaceId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct NewCredential {
    pub username: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub workspace_id: WorkspaceId,
    pub platform: Platform,
    pub username: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredOAuthAttempt {
    pub nonce: String,
    pub workspace_id: WorkspaceId,
    pub platform: Platform,
    pub code_verifier: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredPost {
    pub post_id: PostId,
    pub workspace_id: WorkspaceId,
    pub platform: Platform,
    pub content: String,
    pub scheduled_for: DateTime<Utc>,
    pub state: PostState,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredVideoJob {
    pub job_id: VideoJobId,
    pub workspace_id: WorkspaceId,
    pub prompt: String,
    pub state: VideoJobState,
    pub video_url: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // An in-memory database lives per connection, so keep a single one.
        let max_connections = if database_url.starts_with("sqlite::memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_workspace(&self, name: &str) -> Result<WorkspaceId> {
        let rec = sqlx::query("INSERT INTO workspaces (name) VALUES (?) RETURNING id")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to create workspace '{name}'"))?;
        Ok(WorkspaceId(rec.get::<i64, _>(0)))
    }

    pub async fn workspace_exists(&self, workspace_id: WorkspaceId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM workspaces WHERE id = ?")
            .bind(workspace_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn create_session_token(&self, workspace_id: WorkspaceId) -> Result<String> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        sqlx::query("INSERT INTO api_sessions (token, workspace_id) VALUES (?, ?)")
            .bind(&token)
            .bind(workspace_id.0)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to create session for workspace {workspace_id}"))?;
        Ok(token)
    }

    pub async fn workspace_for_token(&self, token: &str) -> Result<Option<WorkspaceId>> {
        let row = sqlx::query("SELECT workspace_id FROM api_sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| WorkspaceId(r.get::<i64, _>(0))))
    }

    pub async fn upsert_credential(
        &self,
        workspace_id: WorkspaceId,
        platform: Platform,
        credential: &NewCredential,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO platform_credentials
                (workspace_id, platform, username, access_token, refresh_token, expires_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(workspace_id, platform) DO UPDATE SET
                username = excluded.username,
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, platform_credentials.refresh_token),
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
        )
        .bind(workspace_id.0)
        .bind(platform.as_str())
        .bind(credential.username.as_deref())
        .bind(&credential.access_token)
        .bind(credential.refresh_token.as_deref())
        .bind(credential.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!("failed to store {platform} credential for workspace {workspace_id}")
        })?;
        Ok(())
    }

    pub async fn list_credentials(&self, workspace_id: WorkspaceId) -> Result<Vec<StoredCredential>> {
        let rows = sqlx::query(
            "SELECT workspace_id, platform, username, access_token, refresh_token, expires_at, updated_at
             FROM platform_credentials WHERE workspace_id = ? ORDER BY platform",
        )
        .bind(workspace_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(credential_from_row).collect()
    }

    pub async fn delete_credential(
        &self,
        workspace_id: WorkspaceId,
        platform: Platform,
    ) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM platform_credentials WHERE workspace_id = ? AND platform = ?")
                .bind(workspace_id.0)
                .bind(platform.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn expire_credential(
        &self,
        workspace_id: WorkspaceId,
        platform: Platform,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE platform_credentials SET expires_at = ?, updated_at = ?
             WHERE workspace_id = ? AND platform = ?",
        )
        .bind(at)
        .bind(Utc::now())
        .bind(workspace_id.0)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_oauth_attempt(
        &self,
        nonce: &str,
        workspace_id: WorkspaceId,
        platform: Platform,
        code_verifier: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO oauth_attempts (nonce, workspace_id, platform, code_verifier, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(nonce)
        .bind(workspace_id.0)
        .bind(platform.as_str())
        .bind(code_verifier)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("failed to record oauth attempt")?;
        Ok(())
    }

    /// Deletes consumed attempts and any created before `created_before`.
    pub async fn prune_oauth_attempts(&self, created_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM oauth_attempts WHERE consumed_at IS NOT NULL OR created_at < ?",
        )
        .bind(created_before)
        .execute(&self.pool)
        .await
        .context("failed to prune oauth attempts")?;
        Ok(result.rows_affected())
    }

    /// Marks the attempt consumed and returns it. A nonce is only ever handed
    /// out once; replays get `None`.
    pub async fn consume_oauth_attempt(&self, nonce: &str) -> Result<Option<StoredOAuthAttempt>> {
        let row = sqlx::query(
            "UPDATE oauth_attempts SET consumed_at = ?
             WHERE nonce = ? AND consumed_at IS NULL
             RETURNING nonce, workspace_id, platform, code_verifier, created_at",
        )
        .bind(Utc::now())
        .bind(nonce)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(StoredOAuthAttempt {
                nonce: r.get::<String, _>(0),
                workspace_id: WorkspaceId(r.get::<i64, _>(1)),
                platform: parse_platform(&r.get::<String, _>(2))?,
                code_verifier: r.get::<Option<String>, _>(3),
                created_at: r.get::<DateTime<Utc>, _>(4),
            })
        })
        .transpose()
    }

    pub async fn schedule_post(
        &self,
        workspace_id: WorkspaceId,
        platform: Platform,
        content: &str,
        scheduled_for: DateTime<Utc>,
    ) -> Result<PostId> {
        let rec = sqlx::query(
            "INSERT INTO scheduled_posts (workspace_id, platform, content, scheduled_for)
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(workspace_id.0)
        .bind(platform.as_str())
        .bind(content)
        .bind(scheduled_for)
        .fetch_one(&self.pool)
        .await?;
        Ok(PostId(rec.get::<i64, _>(0)))
    }

    pub async fn list_due_posts(
        &self,
        workspace_id: Option<WorkspaceId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredPost>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, platform, content, scheduled_for, state, last_error
             FROM scheduled_posts
             WHERE state = 'scheduled' AND scheduled_for <= ?
               AND (? IS NULL OR workspace_id = ?)
             ORDER BY scheduled_for, id",
        )
        .bind(now)
        .bind(workspace_id.map(|w| w.0))
        .bind(workspace_id.map(|w| w.0))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(post_from_row).collect()
    }

    pub async fn list_posts(&self, workspace_id: WorkspaceId) -> Result<Vec<StoredPost>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, platform, content, scheduled_for, state, last_error
             FROM scheduled_posts WHERE workspace_id = ?
             ORDER BY scheduled_for, id",
        )
        .bind(workspace_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(post_from_row).collect()
    }

    pub async fn post(&self, post_id: PostId) -> Result<Option<StoredPost>> {
        let row = sqlx::query(
            "SELECT id, workspace_id, platform, content, scheduled_for, state, last_error
             FROM scheduled_posts WHERE id = ?",
        )
        .bind(post_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(post_from_row).transpose()
    }

    pub async fn mark_post_published(&self, post_id: PostId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_posts SET state = 'published', published_at = ?, last_error = NULL
             WHERE id = ?",
        )
        .bind(at)
        .bind(post_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_post_failed(&self, post_id: PostId, reason: &str) -> Result<()> {
        sqlx::query("UPDATE scheduled_posts SET state = 'failed', last_error = ? WHERE id = ?")
            .bind(reason)
            .bind(post_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn create_video_job(
        &self,
        workspace_id: WorkspaceId,
        prompt: &str,
    ) -> Result<VideoJobId> {
        let rec = sqlx::query(
            "INSERT INTO video_jobs (workspace_id, prompt, updated_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(workspace_id.0)
        .bind(prompt)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(VideoJobId(rec.get::<i64, _>(0)))
    }

    pub async fn video_job(&self, job_id: VideoJobId) -> Result<Option<StoredVideoJob>> {
        let row = sqlx::query(
            "SELECT id, workspace_id, prompt, state, video_url, error, updated_at
             FROM video_jobs WHERE id = ?",
        )
        .bind(job_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(StoredVideoJob {
                job_id: VideoJobId(r.get::<i64, _>(0)),
                workspace_id: WorkspaceId(r.get::<i64, _>(1)),
                prompt: r.get::<String, _>(2),
                state: VideoJobState::from_str(&r.get::<String, _>(3)).map_err(|e| anyhow!(e))?,
                video_url: r.get::<Option<String>, _>(4),
                error: r.get::<Option<String>, _>(5),
                updated_at: r.get::<DateTime<Utc>, _>(6),
            })
        })
        .transpose()
    }

    pub async fn update_video_job(
        &self,
        job_id: VideoJobId,
        state: VideoJobState,
        video_url: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE video_jobs SET state = ?, video_url = ?, error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(state.as_str())
        .bind(video_url)
        .bind(error)
        .bind(Utc::now())
        .bind(job_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_platform(raw: &str) -> Result<Platform> {
    Platform::from_str(raw).map_err(|e| anyhow!("corrupt platform column: {e}"))
}

fn parse_post_state(raw: &str) -> Result<PostState> {
    match raw {
        "scheduled" => Ok(PostState::Scheduled),
        "published" => Ok(PostState::Published),
        "failed" => Ok(PostState::Failed),
        other => Err(anyhow!("corrupt post state column: '{other}'")),
    }
}

fn credential_from_row(r: &SqliteRow) -> Result<StoredCredential> {
    Ok(StoredCredential {
        workspace_id: WorkspaceId(r.get::<i64, _>(0)),
        platform: parse_platform(&r.get::<String, _>(1))?,
        username: r.get::<Option<String>, _>(2),
        access_token: r.get::<String, _>(3),
        refresh_token: r.get::<Option<String>, _>(4),
        expires_at: r.get::<Option<DateTime<Utc>>, _>(5),
        updated_at: r.get::<DateTime<Utc>, _>(6),
    })
}

fn post_from_row(r: &SqliteRow) -> Result<StoredPost> {
    Ok(StoredPost {
        post_id: PostId(r.get::<i64, _>(0)),
        workspace_id: WorkspaceId(r.get::<i64, _>(1)),
        platform: parse_platform(&r.get::<String, _>(2))?,
        content: r.get::<String, _>(3),
        scheduled_for: r.get::<DateTime<Utc>, _>(4),
        state: parse_post_state(&r.get::<String, _>(5))?,
        last_error: r.get::<Option<String>, _>(6),
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
