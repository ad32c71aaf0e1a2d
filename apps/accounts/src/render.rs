use std::fmt::Write as _;

use client_core::{CallbackDisposition, ConnectionsSnapshot, PlatformPhase};
use shared::protocol::{PublishDueResponse, ScheduledPostSummary, VideoJobStatus};

pub fn snapshot(snapshot: &ConnectionsSnapshot) -> String {
    let mut out = String::new();
    if let Some(workspace_id) = snapshot.workspace_id {
        let _ = writeln!(out, "workspace {workspace_id}");
    }
    for view in &snapshot.platforms {
        let state = match (view.status.connected, view.phase) {
            (_, PlatformPhase::Authorizing) => "connecting",
            (_, PlatformPhase::Reconciling) => "verifying",
            (true, _) => "connected",
            (false, _) => "not connected",
        };
        let _ = write!(out, "{:<10} {state}", view.platform.display_name());
        if let Some(username) = &view.status.username {
            let _ = write!(out, "  @{username}");
        }
        if view.status.is_expired == Some(true) {
            let _ = write!(out, "  (expired, reconnect)");
        } else if view.status.is_expiring_soon == Some(true) {
            let _ = write!(out, "  (expiring soon)");
        }
        if let Some(error) = &view.error {
            let _ = write!(out, "  error: {error}");
        }
        out.push('\n');
    }
    out
}

pub fn disposition(disposition: &CallbackDisposition) -> String {
    match disposition {
        CallbackDisposition::Reconciled {
            platform,
            connected: true,
            attempts,
        } => format!(
            "{} connected (confirmed after {attempts} check(s))",
            platform.display_name()
        ),
        CallbackDisposition::Reconciled {
            platform,
            connected: false,
            ..
        } => format!(
            "{} authorized, but the backend has not reported the account yet; run `status` again shortly",
            platform.display_name()
        ),
        CallbackDisposition::Failed {
            platform: Some(platform),
            message,
            ..
        } => format!("{}: {message}", platform.display_name()),
        CallbackDisposition::Failed {
            platform: None,
            message,
            ..
        } => message.clone(),
        CallbackDisposition::Duplicate => "callback already handled".to_string(),
        CallbackDisposition::NoCallback => "no callback parameters in url".to_string(),
    }
}

pub fn publish_report(report: &PublishDueResponse) -> String {
    let mut out = format!(
        "published {} post(s), {} failed\n",
        report.published.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        let _ = writeln!(
            out,
            "  post {} on {}: {}",
            failure.post_id,
            failure.platform.display_name(),
            failure.reason
        );
    }
    out
}

pub fn posts(posts: &[ScheduledPostSummary]) -> String {
    if posts.is_empty() {
        return "no scheduled posts\n".to_string();
    }
    let mut out = String::new();
    for post in posts {
        let _ = write!(
            out,
            "{:>5}  {:<10} {:<10} {}",
            post.post_id.0,
            post.platform.display_name(),
            post.state.as_str(),
            post.scheduled_for.format("%Y-%m-%d %H:%M UTC")
        );
        if let Some(error) = &post.last_error {
            let _ = write!(out, "  {error}");
        }
        out.push('\n');
    }
    out
}

pub fn video_status(status: &VideoJobStatus) -> String {
    let mut line = format!("video job {}: {}", status.job_id, status.state.as_str());
    if let Some(url) = &status.video_url {
        let _ = write!(line, " {url}");
    }
    if let Some(error) = &status.error {
        let _ = write!(line, " ({error})");
    }
    line
}
