//! Periodic background work with explicit cancellation
//!
//! Each [`PeriodicTask`] owns a cancellation token and the join handles of
//! every task spawned under it, so stopping is a single call that cancels
//! and then awaits them with a bound.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{SchedulerError, SchedulerResult};

#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Run `tick` every `interval` until stopped. The first tick happens one
    /// full interval after spawning.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(task = name, "timer cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        debug!(task = name, "timer fired");
                        tick().await;
                    }
                }
            }
        });
        Self { name, cancel, handles: vec![handle] }
    }

    /// Token that sibling tasks should watch to stop with this timer.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop `handle` together with the timer.
    pub fn attach(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Cancel and wait for every attached task.
    pub async fn stop(&mut self, timeout: Duration) -> SchedulerResult<()> {
        if self.cancel.is_cancelled() && self.handles.is_empty() {
            return Err(SchedulerError::NotRunning(self.name));
        }
        self.cancel.cancel();

        for handle in self.handles.drain(..) {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(task = self.name, error = %e, "timer task failed");
                    return Err(SchedulerError::TaskJoinFailed(e.to_string()));
                }
                Err(_) => {
                    warn!(task = self.name, "timer task did not complete within timeout");
                    return Err(SchedulerError::Timeout {
                        task: self.name,
                        millis: timeout.as_millis() as u64,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            warn!(task = self.name, "timer dropped while running; cancelling");
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut timer = PeriodicTask::spawn("test", Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        timer.stop(Duration::from_secs(1)).await.unwrap();
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "only {seen} ticks");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen, "no ticks after stop");
        assert!(!timer.is_running());
    }

    #[tokio::test]
    async fn attached_tasks_observe_the_token() {
        let mut timer = PeriodicTask::spawn("test", Duration::from_secs(60), || async {});
        let token = timer.token();
        timer.attach(tokio::spawn(async move { token.cancelled().await }));

        timer.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            timer.stop(Duration::from_secs(1)).await,
            Err(SchedulerError::NotRunning("test"))
        );
    }
}
