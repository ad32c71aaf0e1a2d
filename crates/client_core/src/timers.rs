use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;

/// Timers owned by a single connect attempt. Dropping the value cancels
/// every timer that has not fired yet.
#[derive(Debug, Default)]
pub struct AttemptTimers {
    handles: Vec<JoinHandle<()>>,
}

impl AttemptTimers {
    pub fn schedule<F>(&mut self, after: Duration, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            fire.await;
        }));
    }

    pub fn cancel(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    /// Timers that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for AttemptTimers {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test(start_paused = true)]
    async fn cancelled_timers_never_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timers = AttemptTimers::default();
        for secs in [1, 5] {
            let fired = fired.clone();
            timers.schedule(Duration::from_secs(secs), async move {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timers.pending(), 1);

        drop(timers);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
