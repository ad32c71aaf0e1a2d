//! Fixed-interval background loops: due-post publishing and video job status.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use shared::{
    domain::{VideoJobId, WorkspaceId},
    protocol::{PublishDueResponse, VideoJobStatus},
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{info, warn};

use crate::transport::PublishingApi;

pub const PUBLISH_INTERVAL: Duration = Duration::from_secs(60);
pub const VIDEO_STATUS_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// A background loop that ticks immediately and then every `period`.
/// A failed tick is logged and the loop carries on with the next one.
/// Dropping the poller stops it.
#[derive(Debug)]
pub struct IntervalPoller {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl IntervalPoller {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<TickControl>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match tick().await {
                    Ok(TickControl::Continue) => {}
                    Ok(TickControl::Stop) => {
                        info!(poller = name, "poller finished");
                        break;
                    }
                    Err(error) => warn!(poller = name, %error, "poller tick failed"),
                }
            }
        });
        Self { name, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for IntervalPoller {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            info!(poller = self.name, "stopping poller");
            self.handle.abort();
        }
    }
}

/// Asks the backend to publish due posts once a minute.
pub struct ScheduledPostPublisher {
    api: Arc<dyn PublishingApi>,
    workspace_id: Option<WorkspaceId>,
    period: Duration,
}

impl ScheduledPostPublisher {
    pub fn new(api: Arc<dyn PublishingApi>, workspace_id: Option<WorkspaceId>) -> Self {
        Self {
            api,
            workspace_id,
            period: PUBLISH_INTERVAL,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Each tick's report is sent on the returned channel.
    pub fn spawn(self) -> (IntervalPoller, mpsc::UnboundedReceiver<PublishDueResponse>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let Self {
            api,
            workspace_id,
            period,
        } = self;
        let poller = IntervalPoller::spawn("scheduled-post-publisher", period, move || {
            let api = api.clone();
            let tx = tx.clone();
            async move {
                let report = api.publish_due_posts(workspace_id).await?;
                if !report.published.is_empty() || !report.failed.is_empty() {
                    info!(
                        published = report.published.len(),
                        failed = report.failed.len(),
                        "due posts processed"
                    );
                }
                for failure in &report.failed {
                    warn!(
                        post_id = failure.post_id.0,
                        platform = %failure.platform,
                        reason = %failure.reason,
                        "scheduled post failed"
                    );
                }
                if tx.send(report).is_err() {
                    return Ok(TickControl::Stop);
                }
                Ok(TickControl::Continue)
            }
        });
        (poller, rx)
    }
}

/// Follows one video generation job until it reaches a terminal state.
pub struct VideoStatusWatcher {
    api: Arc<dyn PublishingApi>,
    job_id: VideoJobId,
    period: Duration,
}

impl VideoStatusWatcher {
    pub fn new(api: Arc<dyn PublishingApi>, job_id: VideoJobId) -> Self {
        Self {
            api,
            job_id,
            period: VIDEO_STATUS_INTERVAL,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// The channel closes once the job is terminal.
    pub fn spawn(self) -> (IntervalPoller, mpsc::UnboundedReceiver<VideoJobStatus>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let Self {
            api,
            job_id,
            period,
        } = self;
        let poller = IntervalPoller::spawn("video-status-watcher", period, move || {
            let api = api.clone();
            let tx = tx.clone();
            async move {
                let status = api.video_job_status(job_id).await?;
                info!(job_id = job_id.0, state = status.state.as_str(), "video job status");
                let terminal = status.state.is_terminal();
                if tx.send(status).is_err() || terminal {
                    return Ok(TickControl::Stop);
                }
                Ok(TickControl::Continue)
            }
        });
        (poller, rx)
    }
}

#[cfg(test)]
#[path = "tests/polling_tests.rs"]
mod tests;
